// 该文件是 Jianmu （检目） 项目的一部分。
// src/output/json_record.rs - JSON Lines 结果记录
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

use std::{
  fs::{File, OpenOptions},
  io::Write,
  path::{Path, PathBuf},
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectResult, Detection},
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("记录文件锁已失效")]
  Poisoned,
}

/// 每帧一行 JSON，`jsonl:///path/to/result.jsonl`，加 `?always` 时空结果也记录
pub struct JsonRecordOutput {
  path: PathBuf,
  file: Mutex<File>,
  frame_counter: AtomicU64,
  always: bool,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordOutputError::SchemeMismatch);
    }
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Self::create(crate::decode_url_path(uri), always)
  }
}

pub(crate) fn detection_json(det: &Detection) -> Value {
  json!({
    "class_id": det.class_id,
    "label": det.label,
    "score": det.score,
    "x": det.x,
    "y": det.y,
    "width": det.width,
    "height": det.height,
  })
}

impl JsonRecordOutput {
  pub fn create<P: AsRef<Path>>(path: P, always: bool) -> Result<Self, JsonRecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    debug!("记录检测结果到文件: {}", path.display());

    Ok(JsonRecordOutput {
      path,
      file: Mutex::new(file),
      frame_counter: AtomicU64::new(0),
      always,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn frame_id(&self) -> u64 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }
}

impl Render<RgbFrame, DetectResult> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let frame_id = self.frame_id();
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let record = json!({
      "frame": frame_id,
      "time": Utc::now().to_rfc3339(),
      "width": frame.width(),
      "height": frame.height(),
      "timings": {
        "pre_process_ms": result.timings.pre_process_ms,
        "inference_ms": result.timings.inference_ms,
        "post_process_ms": result.timings.post_process_ms,
      },
      "objects": result.items.iter().map(detection_json).collect::<Vec<_>>(),
    });

    let line = serde_json::to_string(&record)?;
    let mut file = self.file.lock().map_err(|_| JsonRecordOutputError::Poisoned)?;
    if let Err(e) = writeln!(file, "{}", line) {
      warn!("写入记录文件 {} 失败: {}", self.path.display(), e);
      return Err(e.into());
    }
    Ok(())
  }
}
