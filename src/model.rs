// 该文件是 Xueying （血影） 项目的一部分。
// src/model.rs - 检测模型接口
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

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONF: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.45;
pub const DEFAULT_IMGSZ: u32 = 640;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  LoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("显存释放错误: {0}")]
  CacheReleaseError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 推理参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictParams {
  pub conf: f32,
  pub iou: f32,
  pub imgsz: u32,
}

impl Default for PredictParams {
  fn default() -> Self {
    Self {
      conf: DEFAULT_CONF,
      iou: DEFAULT_IOU,
      imgsz: DEFAULT_IMGSZ,
    }
  }
}

/// 一次推理的输入
pub struct ModelInput<'a> {
  /// 暂存后的图像文件
  pub path: &'a Path,
  /// 已解码的图像
  pub image: &'a RgbImage,
  /// 客户端提交时的文件名
  pub source_name: &'a str,
}

/// 模型的原始输出，按列存放
///
/// `boxes` 中每一项应为 `[x_min, y_min, x_max, y_max]` 像素坐标，
/// 三列按下标一一对应。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
  pub boxes: Vec<Vec<f32>>,
  pub classes: Vec<f32>,
  pub scores: Vec<f32>,
  /// 结果自带的类别表，存在时优先于模型的类别表
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub names: Option<ClassNames>,
}

impl RawPrediction {
  pub fn push(&mut self, bbox: [f32; 4], class_id: u32, score: f32) {
    self.boxes.push(bbox.to_vec());
    self.classes.push(class_id as f32);
    self.scores.push(score);
  }
}

/// 检测模型
///
/// 模型实例不要求可重入，所有调用都经由 [`SharedModel`] 串行化。
pub trait ModelGateway: Send {
  fn predict(
    &mut self,
    input: &ModelInput<'_>,
    params: &PredictParams,
  ) -> Result<RawPrediction, ModelError>;

  fn class_names(&self) -> &ClassNames;

  fn model_path(&self) -> &str;

  /// 释放加速器上缓存的显存，无加速器的实现保持默认即可
  fn release_cache(&mut self) -> Result<(), ModelError> {
    Ok(())
  }
}

/// 只读的模型状态，供外部查询
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
  pub model_loaded: bool,
  pub model_path: String,
  pub conf: f32,
  pub iou: f32,
  pub imgsz: u32,
  pub classes: ClassNames,
  pub classes_count: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub load_error: Option<String>,
}

mod gate;
mod labels;
#[cfg(feature = "replay_model")]
mod replay;

pub use self::gate::SharedModel;
pub use self::labels::{ClassNames, LabelTable};
#[cfg(feature = "replay_model")]
pub use self::replay::{ReplayModel, ReplayModelBuilder};
