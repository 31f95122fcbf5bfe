// 该文件是 Zhaoying （照影） 项目的一部分。
// src/labels.rs - 类别标签描述文件
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

use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("描述文件解析错误: {0}")]
  ParseError(#[from] serde_yaml::Error),
  #[error("类别数量不匹配: nc = {nc}, names 共 {names} 项")]
  CountMismatch { nc: usize, names: usize },
  #[error("类别索引不连续: 缺少 {0}")]
  MissingIndex(usize),
}

/// `names` 既可以是列表，也可以是 `{索引: 名称}` 映射
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Names {
  List(Vec<String>),
  Map(BTreeMap<usize, String>),
}

#[derive(Deserialize, Debug)]
struct Descriptor {
  names: Names,
  nc: Option<usize>,
}

/// 有序的类别名称表
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
  names: Vec<String>,
}

impl LabelSet {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn from_yaml_str(content: &str) -> Result<Self, LabelError> {
    let descriptor: Descriptor = serde_yaml::from_str(content)?;

    let names = match descriptor.names {
      Names::List(names) => names,
      Names::Map(map) => {
        let mut names = Vec::with_capacity(map.len());
        for (expected, (index, name)) in map.into_iter().enumerate() {
          if index != expected {
            return Err(LabelError::MissingIndex(expected));
          }
          names.push(name);
        }
        names
      }
    };

    if let Some(nc) = descriptor.nc
      && nc != names.len()
    {
      return Err(LabelError::CountMismatch {
        nc,
        names: names.len(),
      });
    }

    debug!("类别列表: {:?}", names);
    Ok(Self { names })
  }

  pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载类别描述文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let labels = Self::from_yaml_str(&content)?;
    info!("共 {} 个类别", labels.len());
    Ok(labels)
  }

  /// 类别数量 (nc)
  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn name(&self, class_id: usize) -> &str {
    self.get(class_id).unwrap_or(UNKNOWN_LABEL)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_list_names() {
    let labels = LabelSet::from_yaml_str("nc: 2\nnames: ['chair', 'laptop']\n").unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), "laptop");
  }

  #[test]
  fn parses_index_map_names() {
    let yaml = "names:\n  0: chair\n  1: laptop\n  2: monitor\n";
    let labels = LabelSet::from_yaml_str(yaml).unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(2), "monitor");
  }

  #[test]
  fn rejects_count_mismatch() {
    let err = LabelSet::from_yaml_str("nc: 3\nnames: ['chair', 'laptop']\n").unwrap_err();
    assert!(matches!(err, LabelError::CountMismatch { nc: 3, names: 2 }));
  }

  #[test]
  fn rejects_gap_in_index_map() {
    let err = LabelSet::from_yaml_str("names:\n  0: chair\n  2: monitor\n").unwrap_err();
    assert!(matches!(err, LabelError::MissingIndex(1)));
  }

  #[test]
  fn unknown_class_falls_back() {
    let labels = LabelSet::new(["chair"]);
    assert_eq!(labels.name(5), "unknown");
    assert_eq!(labels.get(5), None);
  }
}
