// 该文件是 Xueying （血影） 项目的一部分。
// src/summary.rs - 检测结果统计与分级
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

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// 面积下限（百万像素），保证密度计算不除零
pub const AREA_EPSILON_MPX: f64 = 1e-9;

const SEVERE_ABOVE: usize = 100_000;
const MODERATE_ABOVE: usize = 1_000;

// 滋养体同义词：子串匹配 / 全等匹配
const TROPHOZOITE_SUBSTRINGS: [&str; 4] = ["troph", "tropho", "ring", "parasite"];
const TROPHOZOITE_EXACT: [&str; 3] = ["trophozoite", "ring form", "parasite"];
// 白细胞同义词
const WBC_SUBSTRINGS: [&str; 3] = ["wbc", "white blood", "leukocyte"];
const WBC_EXACT: [&str; 1] = ["wbc"];

/// 严重程度，仅由检测总数决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
  None,
  Low,
  Moderate,
  Severe,
}

impl Severity {
  pub fn from_total(total: usize) -> Self {
    if total > SEVERE_ABOVE {
      Severity::Severe
    } else if total > MODERATE_ABOVE {
      Severity::Moderate
    } else if total > 0 {
      Severity::Low
    } else {
      Severity::None
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Severity::None => "None",
      Severity::Low => "Low",
      Severity::Moderate => "Moderate",
      Severity::Severe => "Severe",
    };
    f.write_str(name)
  }
}

/// 按临床类别累计的数量，两个类别互不排斥
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
  pub trophozoites: usize,
  pub wbcs: usize,
}

/// 标签所属的类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCategories {
  pub trophozoite: bool,
  pub wbc: bool,
}

/// 按同义词表对标签分类，大小写不敏感
///
/// 同一个标签可以同时属于两个类别。
pub fn classify_label(label: &str) -> LabelCategories {
  let name = label.to_lowercase();
  let name = name.as_str();
  LabelCategories {
    trophozoite: TROPHOZOITE_SUBSTRINGS.iter().any(|s| name.contains(s))
      || TROPHOZOITE_EXACT.contains(&name),
    wbc: WBC_SUBSTRINGS.iter().any(|s| name.contains(s)) || WBC_EXACT.contains(&name),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
  pub total: usize,
  pub by_class: BTreeMap<String, usize>,
  pub counts_by_category: CategoryCounts,
  pub severity: Severity,
  pub rationale: String,
  pub image_width: u32,
  pub image_height: u32,
  pub area_megapixels: f64,
  pub density_per_megapixel: f64,
  pub avg_confidence: f64,
}

/// 根据检测结果和图像尺寸计算统计摘要
pub fn summarize(detections: &[Detection], image_width: u32, image_height: u32) -> Summary {
  let total = detections.len();

  let mut by_class = BTreeMap::new();
  for detection in detections {
    *by_class.entry(detection.label.clone()).or_insert(0usize) += 1;
  }

  let mut counts_by_category = CategoryCounts::default();
  for (label, count) in &by_class {
    let categories = classify_label(label);
    if categories.trophozoite {
      counts_by_category.trophozoites += count;
    }
    if categories.wbc {
      counts_by_category.wbcs += count;
    }
  }

  let area_megapixels =
    (image_width as f64 * image_height as f64 / 1_000_000.0).max(AREA_EPSILON_MPX);
  let density_per_megapixel = total as f64 / area_megapixels;

  let avg_confidence = if total == 0 {
    0.0
  } else {
    detections.iter().map(|d| d.score as f64).sum::<f64>() / total as f64
  };

  Summary {
    rationale: rationale(total, &by_class),
    total,
    by_class,
    counts_by_category,
    severity: Severity::from_total(total),
    image_width,
    image_height,
    area_megapixels,
    density_per_megapixel,
    avg_confidence,
  }
}

fn rationale(total: usize, by_class: &BTreeMap<String, usize>) -> String {
  let classes = by_class
    .iter()
    .map(|(label, count)| format!("'{label}': {count}"))
    .collect::<Vec<_>>()
    .join(", ");
  format!("Detected {total} objects across classes {{{classes}}}.")
}
