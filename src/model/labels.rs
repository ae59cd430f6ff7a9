// 该文件是 Xueying （血影） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use serde::{Deserialize, Serialize};

/// 类别编号到标签名的查询能力
///
/// 查询不会失败：按「编号表 → 顺序表 → `class_{id}`」三级回退。
pub trait LabelTable {
  fn lookup(&self, class_id: u32) -> String;
}

/// 模型携带的类别名称表
///
/// 上游模型给出的名称可能是以编号为键的对象，也可能是按顺序排列的数组，
/// 两种形式都可以直接从 JSON 反序列化。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "ClassNamesRepr", into = "BTreeMap<u32, String>")]
pub struct ClassNames {
  keyed: BTreeMap<u32, String>,
  ordered: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassNamesRepr {
  Keyed(BTreeMap<String, String>),
  Ordered(Vec<String>),
}

impl From<ClassNamesRepr> for ClassNames {
  fn from(repr: ClassNamesRepr) -> Self {
    match repr {
      // JSON 对象的键总是字符串，无法解析为编号的条目直接忽略
      ClassNamesRepr::Keyed(keyed) => ClassNames::keyed(
        keyed
          .into_iter()
          .filter_map(|(id, name)| id.trim().parse::<u32>().ok().map(|id| (id, name)))
          .collect(),
      ),
      ClassNamesRepr::Ordered(ordered) => ClassNames::ordered(ordered),
    }
  }
}

impl From<ClassNames> for BTreeMap<u32, String> {
  fn from(names: ClassNames) -> Self {
    let mut merged: BTreeMap<u32, String> = names
      .ordered
      .into_iter()
      .enumerate()
      .map(|(idx, name)| (idx as u32, name))
      .collect();
    // 编号表优先
    merged.extend(names.keyed);
    merged
  }
}

impl ClassNames {
  pub fn keyed(keyed: BTreeMap<u32, String>) -> Self {
    Self {
      keyed,
      ordered: Vec::new(),
    }
  }

  pub fn ordered(ordered: Vec<String>) -> Self {
    Self {
      keyed: BTreeMap::new(),
      ordered,
    }
  }

  pub fn with_ordered(mut self, ordered: Vec<String>) -> Self {
    self.ordered = ordered;
    self
  }

  pub fn len(&self) -> usize {
    let extra = self
      .ordered
      .iter()
      .enumerate()
      .filter(|(idx, _)| !self.keyed.contains_key(&(*idx as u32)))
      .count();
    self.keyed.len() + extra
  }

  pub fn is_empty(&self) -> bool {
    self.keyed.is_empty() && self.ordered.is_empty()
  }
}

impl LabelTable for ClassNames {
  fn lookup(&self, class_id: u32) -> String {
    if let Some(name) = self.keyed.get(&class_id) {
      return name.clone();
    }
    if let Some(name) = self.ordered.get(class_id as usize) {
      return name.clone();
    }
    format!("class_{class_id}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyed_table_wins_over_positional() {
    let names = ClassNames::keyed(BTreeMap::from([(1, "WBC".to_string())]))
      .with_ordered(vec!["Trophozoite".into(), "Platelet".into()]);

    assert_eq!(names.lookup(1), "WBC");
    assert_eq!(names.lookup(0), "Trophozoite");
    assert_eq!(names.lookup(7), "class_7");
    assert_eq!(names.len(), 2);
  }

  #[test]
  fn empty_table_synthesizes_names() {
    let names = ClassNames::default();
    assert!(names.is_empty());
    assert_eq!(names.lookup(0), "class_0");
  }

  #[test]
  fn deserializes_object_and_array_forms() {
    let keyed: ClassNames = serde_json::from_str(r#"{"0": "Ring Form", "3": "WBC"}"#).unwrap();
    assert_eq!(keyed.lookup(3), "WBC");
    assert_eq!(keyed.lookup(1), "class_1");

    let ordered: ClassNames = serde_json::from_str(r#"["Trophozoite", "WBC"]"#).unwrap();
    assert_eq!(ordered.lookup(1), "WBC");

    let json = serde_json::to_value(&ordered).unwrap();
    assert_eq!(json, serde_json::json!({"0": "Trophozoite", "1": "WBC"}));
  }
}
