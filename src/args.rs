// 该文件是 Xueying （血影） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

use xueying::model::{DEFAULT_CONF, DEFAULT_IMGSZ, DEFAULT_IOU};
use xueying::pipeline::DEFAULT_URL_PREFIX;

/// Xueying 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 replay:///srv/xueying/records
  #[arg(long, env = "MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 默认置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "CONF", default_value_t = DEFAULT_CONF, value_name = "THRESHOLD")]
  pub default_conf: f32,

  /// 默认 NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "IOU", default_value_t = DEFAULT_IOU, value_name = "THRESHOLD")]
  pub default_iou: f32,

  /// 模型输入尺寸
  #[arg(long, env = "IMGSZ", default_value_t = DEFAULT_IMGSZ, value_name = "PIXELS")]
  pub imgsz: u32,

  /// 上传文件暂存目录
  #[arg(
    long,
    env = "UPLOAD_DIR",
    default_value = "folder:///tmp/xueying/uploads",
    value_name = "FOLDER"
  )]
  pub uploads: Url,

  /// 标注图输出目录
  #[arg(
    long,
    env = "OUTPUT_DIR",
    default_value = "folder:///tmp/xueying/outputs",
    value_name = "FOLDER"
  )]
  pub outputs: Url,

  /// 标注图对外访问路径前缀
  #[arg(long, env = "URL_PREFIX", default_value = DEFAULT_URL_PREFIX)]
  pub url_prefix: String,

  /// 标签字体文件（TrueType），不指定时使用内置字体
  #[arg(long, env = "FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 单张图像推理
  Infer {
    /// 图像文件路径，支持 png / jpg / jpeg / bmp / tiff
    image: PathBuf,
    /// 本次请求的置信度阈值
    #[arg(long)]
    conf: Option<f32>,
    /// 本次请求的 IOU 阈值
    #[arg(long)]
    iou: Option<f32>,
  },
  /// 批量推理，单张失败不影响其余图像
  Batch {
    #[arg(required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    conf: Option<f32>,
    #[arg(long)]
    iou: Option<f32>,
  },
  /// 查看模型状态
  Info,
}
