// 该文件是 Xueying （血影） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::{
  detection::{BBox, Detection},
  output::AnnotationError,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 24.0;
const LABEL_OFFSET: i32 = 10;
const BOX_THICKNESS: i32 = 3;
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
// 文字起点坐标的范围，超出部分在图像外不可见
const TEXT_LIMIT: i32 = 1 << 24;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

pub struct Draw {
  font_size: f32,
  thickness: i32,
  color: [u8; 3],
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
      color: BOX_COLOR,
      font: FontArc::try_from_slice(DEFAULT_FONT)
        .inspect_err(|e| warn!("无法加载内置字体，标注图只绘制边框: {}", e))
        .ok(),
    }
  }
}

impl Draw {
  /// 从 TrueType 字体文件加载标签字体，替换内置字体
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, AnnotationError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    info!("加载标签字体: {}", path.display());
    Ok(self)
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection);
    }
  }

  /// 标签文字左上角位置：边框左上角上方，不越过图像上边缘
  pub fn label_origin(&self, bbox: &BBox) -> (i32, i32) {
    let x = (bbox.x as i32).clamp(-TEXT_LIMIT, TEXT_LIMIT);
    let y = (bbox.y as i32)
      .saturating_sub(LABEL_OFFSET)
      .saturating_sub(self.font_size as i32)
      .clamp(0, TEXT_LIMIT);
    (x, y)
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let color = Rgb(self.color);

    let rect = self.outline(image, &detection.bbox);
    // 向外逐层加粗
    for t in 0..self.thickness {
      let layer = Rect::at(rect.left() - t, rect.top() - t)
        .of_size(rect.width() + 2 * t as u32, rect.height() + 2 * t as u32);
      draw_hollow_rect_mut(image, layer, color);
    }

    // 内置字体加载失败时只画边框
    if let Some(font) = &self.font {
      let label = format!("{} {:.2}", detection.label, detection.score);
      let (x, y) = self.label_origin(&detection.bbox);
      draw_text_mut(
        image,
        color,
        x,
        y,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }

  // 退化边框（宽或高不为正）按至少 1 像素绘制，坐标先收拢到图像附近
  fn outline(&self, image: &RgbImage, bbox: &BBox) -> Rect {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let clamp_x = |v: f32| (v as i32).clamp(-self.thickness, w + self.thickness);
    let clamp_y = |v: f32| (v as i32).clamp(-self.thickness, h + self.thickness);

    let (x1, x2) = (clamp_x(bbox.x), clamp_x(bbox.x2()));
    let (y1, y2) = (clamp_y(bbox.y), clamp_y(bbox.y2()));
    let (left, right) = (x1.min(x2), x1.max(x2));
    let (top, bottom) = (y1.min(y2), y1.max(y2));

    let width = (right - left).max(1) as u32;
    let height = (bottom - top).max(1) as u32;
    Rect::at(left, top).of_size(width, height)
  }
}
