// 该文件是 Xueying （血影） 项目的一部分。
// src/model/replay.rs - 离线回放模型
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

//! 从记录目录回放检测结果的模型实现。
//!
//! 目录结构：
//! - `labels.json`：类别表，对象（编号 → 名称）或数组，可选
//! - `<图像文件名去扩展名>.txt`：每行 `class_id, score, x_min, y_min, x_max, y_max`，像素坐标
//!
//! 没有对应记录文件的图像视为没有检测到目标。

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{ClassNames, ModelError, ModelGateway, ModelInput, PredictParams, RawPrediction},
};

const LABELS_FILE: &str = "labels.json";
const RECORD_EXTENSION: &str = "txt";
const RECORD_FIELDS: usize = 6;

pub struct ReplayModelBuilder {
  directory: PathBuf,
}

impl FromUrlWithScheme for ReplayModelBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(ReplayModelBuilder::new(url.path()))
  }
}

impl ReplayModelBuilder {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn build(self) -> Result<ReplayModel, ModelError> {
    info!("加载回放目录: {}", self.directory.display());
    if !self.directory.is_dir() {
      return Err(ModelError::LoadError(format!(
        "回放目录不存在: {}",
        self.directory.display()
      )));
    }

    let labels_path = self.directory.join(LABELS_FILE);
    let names = if labels_path.is_file() {
      let data = std::fs::read(&labels_path)?;
      serde_json::from_slice::<ClassNames>(&data).map_err(|e| {
        ModelError::LoadError(format!("类别表解析失败 {}: {}", labels_path.display(), e))
      })?
    } else {
      debug!("未找到类别表，使用编号生成类别名");
      ClassNames::default()
    };
    debug!("类别数量: {}", names.len());

    Ok(ReplayModel {
      model_path: self.directory.display().to_string(),
      directory: self.directory,
      names,
    })
  }
}

pub struct ReplayModel {
  directory: PathBuf,
  model_path: String,
  names: ClassNames,
}

impl ReplayModel {
  fn record_path(&self, source_name: &str) -> Option<PathBuf> {
    let stem = Path::new(source_name).file_stem()?.to_str()?;
    Some(self.directory.join(format!("{stem}.{RECORD_EXTENSION}")))
  }
}

impl ModelGateway for ReplayModel {
  fn predict(
    &mut self,
    input: &ModelInput<'_>,
    params: &PredictParams,
  ) -> Result<RawPrediction, ModelError> {
    let mut prediction = RawPrediction::default();
    let Some(path) = self.record_path(input.source_name).filter(|p| p.is_file()) else {
      debug!("没有 {} 的检测记录", input.source_name);
      return Ok(prediction);
    };

    let content = std::fs::read_to_string(&path)?;
    for (line_no, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let fields = line
        .split(',')
        .map(|field| field.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
          ModelError::InferenceError(format!("{}:{} 解析失败: {}", path.display(), line_no + 1, e))
        })?;
      if fields.len() != RECORD_FIELDS {
        return Err(ModelError::InferenceError(format!(
          "{}:{} 字段数量应为 {}, 实际为 {}",
          path.display(),
          line_no + 1,
          RECORD_FIELDS,
          fields.len()
        )));
      }

      let score = fields[1];
      if score < params.conf {
        continue;
      }
      prediction.boxes.push(fields[2..].to_vec());
      prediction.classes.push(fields[0]);
      prediction.scores.push(score);
    }

    debug!(
      "回放 {} 个检测结果 (conf={}, iou={}, imgsz={})",
      prediction.scores.len(),
      params.conf,
      params.iou,
      params.imgsz
    );
    Ok(prediction)
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }

  fn model_path(&self) -> &str {
    &self.model_path
  }
}
