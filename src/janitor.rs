// 该文件是 Xueying （血影） 项目的一部分。
// src/janitor.rs - 临时文件与显存清理
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

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::MutexGuard;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::{FromUrl, FromUrlWithScheme, model::ModelGateway};

#[derive(Error, Debug)]
pub enum StagingError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("文件名无效: {0}")]
  InvalidFileName(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 上传文件的暂存目录
#[derive(Debug, Clone)]
pub struct StagingArea {
  directory: PathBuf,
}

impl FromUrlWithScheme for StagingArea {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for StagingArea {
  type Error = StagingError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StagingError::SchemeMismatch(format!(
        "期望暂存方式 '{}', 实际暂存方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(StagingArea::new(url.path()))
  }
}

impl StagingArea {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 将上传内容写入暂存目录
  ///
  /// 文件名形如 `{毫秒时间戳}_{uuid}_{原文件名}`，原文件名只保留最后一段。
  pub fn stage(&self, filename: &str, bytes: &[u8]) -> Result<StagedImage, StagingError> {
    let base = Path::new(filename)
      .file_name()
      .and_then(|name| name.to_str())
      .filter(|name| !name.is_empty())
      .ok_or_else(|| StagingError::InvalidFileName(filename.to_string()))?;

    std::fs::create_dir_all(&self.directory)?;
    let path = self.directory.join(format!(
      "{}_{}_{}",
      Utc::now().timestamp_millis(),
      Uuid::new_v4().simple(),
      base
    ));
    std::fs::write(&path, bytes)?;
    debug!("暂存上传文件: {}", path.display());

    Ok(StagedImage { path })
  }
}

/// 已暂存的输入文件，离开作用域时删除
#[derive(Debug)]
pub struct StagedImage {
  path: PathBuf,
}

impl StagedImage {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for StagedImage {
  fn drop(&mut self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => debug!("已删除暂存文件: {}", self.path.display()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => warn!("删除暂存文件失败 {}: {}", self.path.display(), e),
    }
  }
}

/// 模型的独占访问守卫，离开作用域时释放加速器缓存
pub struct CacheRelease<'a, G: ModelGateway> {
  guard: MutexGuard<'a, Option<G>>,
}

impl<'a, G: ModelGateway> CacheRelease<'a, G> {
  /// 调用方需保证槽位中已有模型
  pub(crate) fn new(guard: MutexGuard<'a, Option<G>>) -> Self {
    debug_assert!(guard.is_some());
    Self { guard }
  }
}

impl<G: ModelGateway> Deref for CacheRelease<'_, G> {
  type Target = G;

  fn deref(&self) -> &G {
    match self.guard.as_ref() {
      Some(model) => model,
      None => unreachable!("模型槽位在守卫持有期间不会被清空"),
    }
  }
}

impl<G: ModelGateway> DerefMut for CacheRelease<'_, G> {
  fn deref_mut(&mut self) -> &mut G {
    match self.guard.as_mut() {
      Some(model) => model,
      None => unreachable!("模型槽位在守卫持有期间不会被清空"),
    }
  }
}

impl<G: ModelGateway> Drop for CacheRelease<'_, G> {
  fn drop(&mut self) {
    if let Some(model) = self.guard.as_mut()
      && let Err(e) = model.release_cache()
    {
      warn!("释放显存失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn staged_file_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(dir.path().join("uploads"));

    let staged = staging.stage("smear.png", b"not really a png").unwrap();
    let path = staged.path().to_path_buf();
    assert!(path.exists());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("_smear.png"));
    assert_eq!(name.split('_').count(), 3);

    drop(staged);
    assert!(!path.exists());
  }

  #[test]
  fn drop_tolerates_file_already_gone() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    let staged = staging.stage("a.jpg", b"x").unwrap();
    std::fs::remove_file(staged.path()).unwrap();
    drop(staged);
  }

  #[test]
  fn strips_directory_components_from_upload_name() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    let staged = staging.stage("../../etc/cells.png", b"x").unwrap();
    assert_eq!(staged.path().parent().unwrap(), dir.path());
  }

  #[test]
  fn rejects_empty_name_and_wrong_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    assert!(matches!(
      staging.stage("", b"x"),
      Err(StagingError::InvalidFileName(_))
    ));

    let url = Url::parse("image:///tmp/uploads").unwrap();
    assert!(matches!(
      StagingArea::from_url(&url),
      Err(StagingError::SchemeMismatch(_))
    ));
    let url = Url::parse("folder:///tmp/uploads").unwrap();
    assert_eq!(
      StagingArea::from_url(&url).unwrap().directory(),
      Path::new("/tmp/uploads")
    );
  }
}
