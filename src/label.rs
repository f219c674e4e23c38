// 该文件是 Jianmu （检目） 项目的一部分。
// src/label.rs - 类别标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
  #[error("类别编号 {class_id} 超出标签表范围 (共 {len} 个标签)")]
  ClassIdOutOfRange { class_id: usize, len: usize },
}

/// 类别标签表，类别编号即行号（从 0 开始）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl LabelTable {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let table = Self::parse(&text)?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 每行一个标签。末尾的空行会被忽略，中间的空行保留为空标签以维持编号。
  pub fn parse(text: &str) -> Result<Self, LabelError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut labels: Vec<String> = text.lines().map(|line| line.trim_end().to_string()).collect();

    while labels.last().is_some_and(|label| label.is_empty()) {
      labels.pop();
    }

    if labels.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id).map(String::as_str)
  }

  pub fn resolve(&self, class_id: usize) -> Result<&str, LabelError> {
    self.get(class_id).ok_or(LabelError::ClassIdOutOfRange {
      class_id,
      len: self.len(),
    })
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn resolves_by_line_position() {
    let table = LabelTable::parse("cat\ndog\n").unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.resolve(1).unwrap(), "dog");
    assert!(matches!(
      table.resolve(2),
      Err(LabelError::ClassIdOutOfRange { class_id: 2, len: 2 })
    ));
  }

  #[test]
  fn trims_trailing_whitespace_and_crlf() {
    let table = LabelTable::parse("person \r\nbicycle\t\r\n\r\n").unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["person", "bicycle"]);
  }

  #[test]
  fn keeps_interior_blank_lines() {
    let table = LabelTable::parse("background\n\nchair").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(1), Some(""));
    assert_eq!(table.get(2), Some("chair"));
  }

  #[test]
  fn rejects_empty_input() {
    assert!(matches!(LabelTable::parse(""), Err(LabelError::Empty)));
    assert!(matches!(LabelTable::parse("\n \n"), Err(LabelError::Empty)));
  }

  #[test]
  fn strips_byte_order_mark() {
    let table = LabelTable::parse("\u{feff}aeroplane\nbicycle").unwrap();
    assert_eq!(table.get(0), Some("aeroplane"));
  }

  #[test]
  fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cat").unwrap();
    writeln!(file, "dog").unwrap();
    let table = LabelTable::load(file.path()).unwrap();
    assert_eq!(table.get(0), Some("cat"));
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = LabelTable::load("/nonexistent/jianmu/labels.txt").unwrap_err();
    assert!(matches!(err, LabelError::IoError(_)));
  }
}
