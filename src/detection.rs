// 该文件是 Xueying （血影） 项目的一部分。
// src/detection.rs - 检测结果定义与提取
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{LabelTable, RawPrediction};

/// 边界框，像素坐标，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl BBox {
  pub fn x2(&self) -> f32 {
    self.x + self.w
  }

  pub fn y2(&self) -> f32 {
    self.y + self.h
  }
}

/// 检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Error, Debug)]
pub enum ExtractError {
  #[error("模型输出形状不一致: {boxes} 个边框, {classes} 个类别, {scores} 个置信度")]
  ShapeMismatch {
    boxes: usize,
    classes: usize,
    scores: usize,
  },
}

#[derive(Error, Debug, PartialEq)]
enum EntryError {
  #[error("边框坐标数量应为 4, 实际为 {0}")]
  CoordinateCount(usize),
  #[error("边框坐标非有限值: {0:?}")]
  NonFiniteCoordinate(Vec<f32>),
  #[error("类别编号无效: {0}")]
  InvalidClass(f32),
  #[error("边框尺寸溢出: {0:?}")]
  SizeOverflow(Vec<f32>),
}

/// 将模型原始输出整理为检测结果序列
///
/// 单个条目无法解析时跳过该条目，其余条目不受影响；
/// 只有三列长度不一致时才视为整体输出损坏。
pub fn extract(raw: &RawPrediction, labels: &dyn LabelTable) -> Result<Vec<Detection>, ExtractError> {
  let RawPrediction {
    boxes,
    classes,
    scores,
    names,
  } = raw;

  if boxes.len() != classes.len() || boxes.len() != scores.len() {
    return Err(ExtractError::ShapeMismatch {
      boxes: boxes.len(),
      classes: classes.len(),
      scores: scores.len(),
    });
  }

  let labels: &dyn LabelTable = match names {
    Some(names) => names,
    None => labels,
  };

  let mut detections = Vec::with_capacity(boxes.len());
  for (idx, ((bbox, &class), &score)) in boxes.iter().zip(classes).zip(scores).enumerate() {
    match extract_entry(bbox, class, score, labels) {
      Ok(detection) => detections.push(detection),
      Err(e) => warn!("跳过第 {} 个检测结果: {}", idx, e),
    }
  }

  debug!("提取到 {} 个检测结果", detections.len());
  Ok(detections)
}

fn extract_entry(
  bbox: &[f32],
  class: f32,
  score: f32,
  labels: &dyn LabelTable,
) -> Result<Detection, EntryError> {
  let &[x1, y1, x2, y2] = bbox else {
    return Err(EntryError::CoordinateCount(bbox.len()));
  };
  if !bbox.iter().all(|v| v.is_finite()) {
    return Err(EntryError::NonFiniteCoordinate(bbox.to_vec()));
  }
  if !class.is_finite() || class < 0.0 || class.fract() != 0.0 || class >= u32::MAX as f32 {
    return Err(EntryError::InvalidClass(class));
  }
  let class_id = class as u32;

  // 坐标向零截断，宽高由截断后的坐标相减得到，非正值原样保留
  let (x1, y1, x2, y2) = (x1 as i64, y1 as i64, x2 as i64, y2 as i64);
  let (Some(w), Some(h)) = (x2.checked_sub(x1), y2.checked_sub(y1)) else {
    return Err(EntryError::SizeOverflow(bbox.to_vec()));
  };

  Ok(Detection {
    class_id,
    label: labels.lookup(class_id),
    score,
    bbox: BBox {
      x: x1 as f32,
      y: y1 as f32,
      w: w as f32,
      h: h as f32,
    },
  })
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use crate::model::ClassNames;

  fn names() -> ClassNames {
    ClassNames::ordered(vec!["Trophozoite".into(), "WBC".into()])
  }

  #[test]
  fn truncates_coordinates_and_keeps_corner_identity() {
    let raw = RawPrediction {
      boxes: vec![vec![10.9, 20.2, 55.7, 80.99], vec![-3.7, 0.4, 12.2, 7.9]],
      classes: vec![0.0, 1.0],
      scores: vec![0.91, 0.42],
      names: None,
    };

    let detections = extract(&raw, &names()).unwrap();
    assert_eq!(detections.len(), 2);

    let first = &detections[0];
    assert_eq!(first.label, "Trophozoite");
    assert_eq!(first.bbox, BBox { x: 10.0, y: 20.0, w: 45.0, h: 60.0 });
    assert_eq!(first.bbox.x2(), 55.0);
    assert_eq!(first.bbox.y2(), 80.0);

    let second = &detections[1];
    assert_eq!(second.label, "WBC");
    assert_eq!(second.bbox.x, -3.0);
    assert_eq!(second.bbox.x2(), 12.0);
    assert_eq!(second.bbox.y2(), 7.0);
  }

  #[test]
  fn emits_degenerate_boxes_as_is() {
    let raw = RawPrediction {
      boxes: vec![vec![50.0, 40.0, 20.0, 40.5]],
      classes: vec![0.0],
      scores: vec![0.5],
      names: None,
    };
    let detections = extract(&raw, &names()).unwrap();
    assert_eq!(detections[0].bbox.w, -30.0);
    assert_eq!(detections[0].bbox.h, 0.0);
  }

  #[test]
  fn skips_malformed_entries_only() {
    let raw = RawPrediction {
      boxes: vec![
        vec![0.0, 0.0, 5.0, 5.0],
        vec![1.0, 2.0, 3.0],
        vec![0.0, f32::NAN, 5.0, 5.0],
        vec![0.0, 0.0, 5.0, 5.0],
        vec![0.0, 0.0, 5.0, 5.0],
        vec![2.0, 2.0, 8.0, 8.0],
      ],
      classes: vec![0.0, 1.0, 1.0, -1.0, 0.5, 9.0],
      scores: vec![0.9, 0.8, 0.7, 0.6, 0.5, 0.4],
      names: None,
    };

    let detections = extract(&raw, &names()).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].score, 0.9);
    assert_eq!(detections[1].label, "class_9");
  }

  #[test]
  fn skips_boxes_whose_size_overflows() {
    let raw = RawPrediction {
      boxes: vec![vec![0.0, 0.0, 5.0, 5.0], vec![-1e30, 0.0, 1e30, 5.0]],
      classes: vec![0.0, 1.0],
      scores: vec![0.9, 0.8],
      names: None,
    };
    let detections = extract(&raw, &names()).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bbox.w, 5.0);

    let entry = extract_entry(&[0.0, -1e30, 5.0, 1e30], 0.0, 0.5, &names());
    assert!(matches!(entry, Err(EntryError::SizeOverflow(_))));
  }

  #[test]
  fn class_ids_beyond_u32_are_rejected() {
    let entry = extract_entry(&[0.0, 0.0, 1.0, 1.0], 4_294_967_296.0, 0.5, &names());
    assert_eq!(entry.unwrap_err(), EntryError::InvalidClass(4_294_967_296.0));
  }

  #[test]
  fn result_names_override_model_table() {
    let raw = RawPrediction {
      boxes: vec![vec![0.0, 0.0, 1.0, 1.0]],
      classes: vec![1.0],
      scores: vec![0.3],
      names: Some(ClassNames::keyed(BTreeMap::from([(1, "Ring Form".to_string())]))),
    };
    let detections = extract(&raw, &names()).unwrap();
    assert_eq!(detections[0].label, "Ring Form");
  }

  #[test]
  fn column_length_mismatch_is_an_error() {
    let raw = RawPrediction {
      boxes: vec![vec![0.0, 0.0, 1.0, 1.0]],
      classes: vec![],
      scores: vec![0.3],
      names: None,
    };
    assert!(matches!(
      extract(&raw, &names()),
      Err(ExtractError::ShapeMismatch { boxes: 1, classes: 0, scores: 1 })
    ));
  }
}
