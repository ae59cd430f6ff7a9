// 该文件是 Xueying （血影） 项目的一部分。
// src/pipeline.rs - 推理请求编排
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

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::{GenericImageView, ImageReader};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
  detection::{Detection, extract},
  janitor::{StagingArea, StagingError},
  model::{ModelGateway, ModelInfo, ModelInput, PredictParams, SharedModel},
  output::AnnotationRenderer,
  summary::{Summary, summarize},
};

/// 允许上传的图像扩展名
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];
pub const DEFAULT_URL_PREFIX: &str = "/static/outputs";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("缺少图像文件")]
  MissingImage,
  #[error("批量请求缺少图像文件")]
  MissingImages,
  #[error("不支持的图像类型: {0}")]
  UnsupportedType(String),
  #[error("无法读取图像: {0}")]
  UnreadableImage(String),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
  #[error("暂存上传文件失败: {0}")]
  Staging(#[from] StagingError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("内部错误: {0}")]
  Internal(String),
}

/// 对外的错误响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub error: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl PipelineError {
  pub fn is_client_error(&self) -> bool {
    matches!(
      self,
      PipelineError::MissingImage
        | PipelineError::MissingImages
        | PipelineError::UnsupportedType(_)
        | PipelineError::UnreadableImage(_)
        | PipelineError::InvalidParameter(_)
    )
  }

  /// 对应的 HTTP 状态码，客户端输入错误为 400，其余为 500
  pub fn status(&self) -> u16 {
    if self.is_client_error() { 400 } else { 500 }
  }

  pub fn body(&self) -> ErrorBody {
    let (error, message) = match self {
      PipelineError::MissingImage => ("file is required", None),
      PipelineError::MissingImages => ("files are required", None),
      PipelineError::UnsupportedType(name) => ("unsupported file type", Some(name.clone())),
      PipelineError::UnreadableImage(e) => ("invalid image", Some(e.clone())),
      PipelineError::InvalidParameter(e) => ("invalid parameter", Some(e.clone())),
      PipelineError::Staging(e) => ("internal server error", Some(e.to_string())),
      PipelineError::Inference(e) => ("inference failed", Some(e.clone())),
      PipelineError::Internal(e) => ("internal server error", Some(e.clone())),
    };
    ErrorBody {
      error: error.to_string(),
      message,
    }
  }

  // 批量结果中单项的错误描述
  fn item_message(&self) -> String {
    let ErrorBody { error, message } = self.body();
    match message {
      Some(message) => format!("{error}: {message}"),
      None => error,
    }
  }
}

/// 客户端上传的一张图像
#[derive(Debug, Clone)]
pub struct Upload {
  pub filename: String,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      filename: filename.into(),
      bytes,
    }
  }

  pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
    let path = path.as_ref();
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Ok(Self::new(filename, std::fs::read(path)?))
  }
}

/// 请求级参数，缺省时使用模型默认值
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InferParams {
  pub conf: Option<f32>,
  pub iou: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 标注图对外访问路径前缀
  pub url_prefix: String,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      url_prefix: DEFAULT_URL_PREFIX.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
  pub detections: Vec<Detection>,
  pub summary: Summary,
  pub annotated_image_url: Option<String>,
  pub source_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
  Done,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
  pub id: String,
  pub status: ItemStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<InferResponse>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
  pub batch_id: String,
  pub items: Vec<BatchItem>,
}

/// 推理流水线
///
/// 单张：暂存 → 解码 → 推理 → 提取 → 标注 / 统计 → 组装响应。
/// 流程内的任何错误或崩溃都在这里转换为结构化的失败结果。
/// 暂存文件和加速器缓存在所有退出路径上都会被清理。
pub struct Pipeline<G> {
  model: Arc<SharedModel<G>>,
  staging: StagingArea,
  renderer: AnnotationRenderer,
  config: PipelineConfig,
}

impl<G: ModelGateway> Pipeline<G> {
  pub fn new(
    model: Arc<SharedModel<G>>,
    staging: StagingArea,
    renderer: AnnotationRenderer,
    config: PipelineConfig,
  ) -> Self {
    Self {
      model,
      staging,
      renderer,
      config,
    }
  }

  pub fn model_info(&self) -> ModelInfo {
    self.model.info()
  }

  /// 单张图像推理
  pub fn infer(
    &self,
    upload: Option<Upload>,
    params: InferParams,
  ) -> Result<InferResponse, PipelineError> {
    let upload = upload.ok_or(PipelineError::MissingImage)?;
    let params = self.resolve(params)?;

    self
      .guarded(&upload.filename, || self.run_item(&upload, &params))
      .inspect_err(|e| {
        if e.is_client_error() {
          warn!("拒绝请求 {}: {}", upload.filename, e);
        } else {
          error!("处理 {} 失败: {}", upload.filename, e);
        }
      })
  }

  /// 批量推理，单项失败不影响其余项
  pub fn infer_batch(
    &self,
    uploads: Vec<Upload>,
    params: InferParams,
  ) -> Result<BatchResponse, PipelineError> {
    if uploads.is_empty() {
      return Err(PipelineError::MissingImages);
    }
    let params = self.resolve(params)?;

    let batch_id = Uuid::new_v4().simple().to_string();
    info!("开始批量推理 {}: {} 张图像", batch_id, uploads.len());

    let items = uploads
      .iter()
      .enumerate()
      .map(|(idx, upload)| {
        let id = Uuid::new_v4().simple().to_string();
        match self.guarded(&upload.filename, || self.run_item(upload, &params)) {
          Ok(result) => BatchItem {
            id,
            status: ItemStatus::Done,
            result: Some(result),
            error: None,
          },
          Err(e) => {
            error!("批量第 {} 项 {} 失败: {}", idx + 1, upload.filename, e);
            BatchItem {
              id,
              status: ItemStatus::Error,
              result: None,
              error: Some(e.item_message()),
            }
          }
        }
      })
      .collect::<Vec<_>>();

    info!(
      "批量推理 {} 完成: {}/{} 成功",
      batch_id,
      items.iter().filter(|item| item.status == ItemStatus::Done).count(),
      items.len()
    );
    Ok(BatchResponse { batch_id, items })
  }

  fn resolve(&self, params: InferParams) -> Result<PredictParams, PipelineError> {
    let defaults = self.model.defaults();
    let resolved = PredictParams {
      conf: params.conf.unwrap_or(defaults.conf),
      iou: params.iou.unwrap_or(defaults.iou),
      imgsz: defaults.imgsz,
    };
    for (name, value) in [("conf", resolved.conf), ("iou", resolved.iou)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::InvalidParameter(format!(
          "{name} 应在 [0, 1] 之间, 实际为 {value}"
        )));
      }
    }
    Ok(resolved)
  }

  // 编排边界上的兜底：流程内的 panic 也转换为失败结果
  fn guarded<T>(
    &self,
    source: &str,
    run: impl FnOnce() -> Result<T, PipelineError>,
  ) -> Result<T, PipelineError> {
    match panic::catch_unwind(AssertUnwindSafe(run)) {
      Ok(result) => result,
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!("处理 {} 时发生崩溃: {}", source, message);
        Err(PipelineError::Internal(message))
      }
    }
  }

  fn run_item(
    &self,
    upload: &Upload,
    params: &PredictParams,
  ) -> Result<InferResponse, PipelineError> {
    check_filename(&upload.filename)?;

    // `staged` 离开作用域时删除暂存文件
    let staged = self.staging.stage(&upload.filename, &upload.bytes)?;
    let image = ImageReader::open(staged.path())
      .and_then(|reader| reader.with_guessed_format())
      .map_err(|e| PipelineError::UnreadableImage(e.to_string()))?
      .decode()
      .map_err(|e| PipelineError::UnreadableImage(e.to_string()))?;
    let (width, height) = image.dimensions();
    let image = image.to_rgb8();

    let input = ModelInput {
      path: staged.path(),
      image: &image,
      source_name: &upload.filename,
    };

    let now = Instant::now();
    let Some(raw) = self.model.predict(&input, params) else {
      warn!("模型不可用，{} 返回空结果", upload.filename);
      return Ok(InferResponse {
        detections: Vec::new(),
        summary: summarize(&[], width, height),
        annotated_image_url: None,
        source_filename: upload.filename.clone(),
      });
    };
    let raw = raw.map_err(|e| PipelineError::Inference(e.to_string()))?;
    info!("{} 推理完成，耗时: {:.2?}", upload.filename, now.elapsed());

    let detections = extract(&raw, self.model.class_names())
      .map_err(|e| PipelineError::Inference(e.to_string()))?;

    let artifact = self.renderer.render(&image, &detections);
    let summary = summarize(&detections, width, height);
    info!(
      "{}: 检测到 {} 个对象，严重程度 {}",
      upload.filename, summary.total, summary.severity
    );

    Ok(InferResponse {
      detections,
      summary,
      annotated_image_url: artifact.map(|name| self.artifact_url(&name)),
      source_filename: upload.filename.clone(),
    })
  }

  fn artifact_url(&self, name: &str) -> String {
    format!("{}/{}", self.config.url_prefix.trim_end_matches('/'), name)
  }
}

fn check_filename(filename: &str) -> Result<(), PipelineError> {
  if filename.trim().is_empty() {
    return Err(PipelineError::MissingImage);
  }
  let supported = filename
    .rsplit_once('.')
    .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false);
  if !supported {
    return Err(PipelineError::UnsupportedType(filename.to_string()));
  }
  Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知错误".to_string()
  }
}
