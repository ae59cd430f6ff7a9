// 该文件是 Xueying （血影） 项目的一部分。
// src/output.rs - 标注图输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::panic::{self, AssertUnwindSafe};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::detection::Detection;

pub mod draw;
mod store;

pub use self::draw::Draw;
pub use self::store::ArtifactStore;

#[derive(Error, Debug)]
pub enum AnnotationError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 标注图渲染器
///
/// 在图像副本上绘制检测框并写入输出目录。渲染是尽力而为的，
/// 任何失败（包括绘制过程中的 panic）都只记录日志，不会影响请求结果。
pub struct AnnotationRenderer {
  draw: Draw,
  store: ArtifactStore,
}

impl AnnotationRenderer {
  pub fn new(draw: Draw, store: ArtifactStore) -> Self {
    Self { draw, store }
  }

  /// 渲染并保存标注图，返回生成的文件名
  pub fn render(&self, image: &RgbImage, detections: &[Detection]) -> Option<String> {
    match panic::catch_unwind(AssertUnwindSafe(|| self.try_render(image, detections))) {
      Ok(Ok(name)) => {
        debug!("标注图已保存: {}", name);
        Some(name)
      }
      Ok(Err(e)) => {
        warn!("保存标注图失败: {}", e);
        None
      }
      Err(_) => {
        warn!("绘制标注图时发生崩溃，跳过标注图");
        None
      }
    }
  }

  fn try_render(
    &self,
    image: &RgbImage,
    detections: &[Detection],
  ) -> Result<String, AnnotationError> {
    let mut canvas = image.clone();
    self.draw.draw_detections(&mut canvas, detections);
    self.store.persist(&canvas)
  }
}
