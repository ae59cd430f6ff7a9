// 该文件是 Xueying （血影） 项目的一部分。
// src/model/gate.rs - 共享模型实例与单飞门
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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use crate::janitor::CacheRelease;
use crate::model::{
  ClassNames, ModelError, ModelGateway, ModelInfo, ModelInput, PredictParams, RawPrediction,
};

/// 进程内唯一的模型实例
///
/// 启动时构造一次，之后注入到各个流水线中。
/// 任意时刻至多只有一个 `predict` 在执行。
pub struct SharedModel<G> {
  slot: Mutex<Option<G>>,
  loaded: AtomicBool,
  defaults: PredictParams,
  model_path: String,
  classes: ClassNames,
  load_error: Option<String>,
}

impl<G: ModelGateway> SharedModel<G> {
  /// 用加载结果初始化
  ///
  /// 加载失败不会中止启动，模型保持不可用状态，流水线会降级为空结果。
  pub fn init(
    loaded: Result<G, ModelError>,
    model_path: impl Into<String>,
    defaults: PredictParams,
  ) -> Self {
    match loaded {
      Ok(model) => {
        info!("模型加载完成: {}", model.model_path());
        Self {
          model_path: model.model_path().to_string(),
          classes: model.class_names().clone(),
          slot: Mutex::new(Some(model)),
          loaded: AtomicBool::new(true),
          defaults,
          load_error: None,
        }
      }
      Err(e) => {
        let model_path = model_path.into();
        error!("模型加载失败 {}: {}", model_path, e);
        Self {
          slot: Mutex::new(None),
          loaded: AtomicBool::new(false),
          defaults,
          model_path,
          classes: ClassNames::default(),
          load_error: Some(e.to_string()),
        }
      }
    }
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded.load(Ordering::Acquire)
  }

  pub fn defaults(&self) -> &PredictParams {
    &self.defaults
  }

  pub fn class_names(&self) -> &ClassNames {
    &self.classes
  }

  pub fn info(&self) -> ModelInfo {
    ModelInfo {
      model_loaded: self.is_loaded(),
      model_path: self.model_path.clone(),
      conf: self.defaults.conf,
      iou: self.defaults.iou,
      imgsz: self.defaults.imgsz,
      classes_count: self.classes.len(),
      classes: self.classes.clone(),
      load_error: self.load_error.clone(),
    }
  }

  /// 获取模型的独占访问权，模型不可用时返回 `None`
  ///
  /// 返回的守卫在释放时会清理加速器缓存。
  pub fn acquire(&self) -> Option<CacheRelease<'_, G>> {
    let guard = self.lock();
    if guard.is_none() {
      return None;
    }
    Some(CacheRelease::new(guard))
  }

  /// 在单飞门内执行一次推理
  pub fn predict(
    &self,
    input: &ModelInput<'_>,
    params: &PredictParams,
  ) -> Option<Result<RawPrediction, ModelError>> {
    let mut model = self.acquire()?;
    Some(model.predict(input, params))
  }

  /// 卸载模型，之后的请求都按模型不可用处理
  pub fn shutdown(&self) {
    let mut guard = self.lock();
    if let Some(mut model) = guard.take() {
      if let Err(e) = model.release_cache() {
        warn!("卸载模型时释放显存失败: {}", e);
      }
      info!("模型已卸载: {}", self.model_path);
    }
    self.loaded.store(false, Ordering::Release);
  }

  // 推理中途 panic 会毒化锁，模型状态由实现自行保证，这里直接恢复
  fn lock(&self) -> MutexGuard<'_, Option<G>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::sync::Arc;
  use std::sync::atomic::AtomicUsize;

  use image::RgbImage;

  use super::*;

  struct CountingModel {
    names: ClassNames,
    releases: Arc<AtomicUsize>,
  }

  impl ModelGateway for CountingModel {
    fn predict(
      &mut self,
      _input: &ModelInput<'_>,
      _params: &PredictParams,
    ) -> Result<RawPrediction, ModelError> {
      Ok(RawPrediction::default())
    }

    fn class_names(&self) -> &ClassNames {
      &self.names
    }

    fn model_path(&self) -> &str {
      "counting.pt"
    }

    fn release_cache(&mut self) -> Result<(), ModelError> {
      self.releases.fetch_add(1, Ordering::SeqCst);
      Err(ModelError::CacheReleaseError("no device".into()))
    }
  }

  #[test]
  fn releases_cache_after_each_predict_even_when_release_fails() {
    let releases = Arc::new(AtomicUsize::new(0));
    let shared = SharedModel::init(
      Ok(CountingModel {
        names: ClassNames::ordered(vec!["WBC".into()]),
        releases: releases.clone(),
      }),
      "ignored",
      PredictParams::default(),
    );

    let image = RgbImage::new(4, 4);
    let input = ModelInput {
      path: Path::new("a.png"),
      image: &image,
      source_name: "a.png",
    };
    for _ in 0..3 {
      let result = shared.predict(&input, &PredictParams::default());
      assert!(matches!(result, Some(Ok(_))));
    }
    assert_eq!(releases.load(Ordering::SeqCst), 3);

    let info = shared.info();
    assert!(info.model_loaded);
    assert_eq!(info.model_path, "counting.pt");
    assert_eq!(info.classes_count, 1);
    assert_eq!(info.conf, 0.25);
    assert_eq!(info.iou, 0.45);
    assert_eq!(info.imgsz, 640);
  }

  #[test]
  fn failed_load_keeps_model_unavailable() {
    let shared: SharedModel<CountingModel> = SharedModel::init(
      Err(ModelError::LoadError("best.pt not found".into())),
      "models/best.pt",
      PredictParams::default(),
    );

    assert!(!shared.is_loaded());
    assert!(shared.acquire().is_none());
    let info = shared.info();
    assert_eq!(info.model_path, "models/best.pt");
    assert!(info.load_error.unwrap().contains("best.pt not found"));
  }

  #[test]
  fn shutdown_unloads_model() {
    let releases = Arc::new(AtomicUsize::new(0));
    let shared = SharedModel::init(
      Ok(CountingModel {
        names: ClassNames::default(),
        releases: releases.clone(),
      }),
      "ignored",
      PredictParams::default(),
    );
    shared.shutdown();
    assert!(!shared.is_loaded());
    assert!(shared.acquire().is_none());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
  }
}
