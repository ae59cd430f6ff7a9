// 该文件是 Xueying （血影） 项目的一部分。
// src/output/store.rs - 标注图存储目录
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::{FromUrl, FromUrlWithScheme, output::AnnotationError};

/// 标注图输出目录，文件只写一次，不做清理
#[derive(Debug, Clone)]
pub struct ArtifactStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for ArtifactStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ArtifactStore {
  type Error = AnnotationError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(AnnotationError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(ArtifactStore::new(uri.path()))
  }
}

impl ArtifactStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 以新生成的唯一文件名保存图像，返回文件名
  pub fn persist(&self, image: &RgbImage) -> Result<String, AnnotationError> {
    std::fs::create_dir_all(&self.directory)?;

    let name = format!("processed_{}.jpg", Uuid::new_v4().simple());
    let path = self.directory.join(&name);
    image.save(&path)?;

    info!("保存标注图到文件: {}", path.display());
    Ok(name)
  }
}
