// 该文件是 Xueying （血影） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use xueying::{
  FromUrl,
  janitor::StagingArea,
  model::{PredictParams, ReplayModelBuilder, SharedModel},
  output::{AnnotationRenderer, ArtifactStore, Draw},
  pipeline::{InferParams, Pipeline, PipelineConfig, PipelineError, Upload},
};

use args::{Args, Command};

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("暂存目录: {}", args.uploads);
  info!("输出目录: {}", args.outputs);
  info!(
    "默认参数: conf={} iou={} imgsz={}",
    args.default_conf, args.default_iou, args.imgsz
  );

  let defaults = PredictParams {
    conf: args.default_conf,
    iou: args.default_iou,
    imgsz: args.imgsz,
  };
  let loaded = ReplayModelBuilder::from_url(&args.model).and_then(|builder| builder.build());
  let model = Arc::new(SharedModel::init(loaded, args.model.path(), defaults));

  let mut draw = Draw::default();
  match &args.font {
    Some(font) => draw = draw.with_font_file(font)?,
    None => info!("使用内置标签字体"),
  }
  let store = ArtifactStore::from_url(&args.outputs)?;
  info!("标注图将保存到: {}", store.directory().display());

  let pipeline = Pipeline::new(
    model.clone(),
    StagingArea::from_url(&args.uploads)?,
    AnnotationRenderer::new(draw, store),
    PipelineConfig {
      url_prefix: args.url_prefix.clone(),
    },
  );

  let code = match args.command {
    Command::Info => emit(&pipeline.model_info())?,
    Command::Infer { image, conf, iou } => {
      let upload = Upload::from_path(&image)
        .inspect_err(|e| warn!("无法读取 {}: {}", image.display(), e))
        .ok();
      match pipeline.infer(upload, InferParams { conf, iou }) {
        Ok(response) => emit(&response)?,
        Err(e) => fail(&e)?,
      }
    }
    Command::Batch { images, conf, iou } => {
      let uploads = images.iter().map(|path| read_or_empty(path)).collect();
      match pipeline.infer_batch(uploads, InferParams { conf, iou }) {
        Ok(response) => emit(&response)?,
        Err(e) => fail(&e)?,
      }
    }
  };

  model.shutdown();
  Ok(code)
}

// 读取失败的文件以空内容提交，由流水线记为该项的错误
fn read_or_empty(path: &Path) -> Upload {
  Upload::from_path(path).unwrap_or_else(|e| {
    warn!("无法读取 {}: {}", path.display(), e);
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Upload::new(filename, Vec::new())
  })
}

fn emit<T: Serialize>(value: &T) -> Result<ExitCode> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(ExitCode::SUCCESS)
}

fn fail(e: &PipelineError) -> Result<ExitCode> {
  println!("{}", serde_json::to_string_pretty(&e.body())?);
  Ok(if e.is_client_error() {
    ExitCode::from(2)
  } else {
    ExitCode::FAILURE
  })
}
