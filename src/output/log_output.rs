// 该文件是 Jianmu （检目） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::DetectResult,
  output::{OutputError, Render},
};

/// 将检测结果写入日志，`log:` 或 `log:?summary`（只输出数量与耗时）
pub struct LogOutput {
  summary_only: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let summary_only = url.query_pairs().any(|(k, _)| k == "summary");
    Ok(LogOutput { summary_only })
  }
}

impl Render<RgbFrame, DetectResult> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let timings = &result.timings;
    info!(
      "{}x{} 帧: 检测到 {} 个物体, 前处理 {:.2} ms, 推理 {:.2} ms, 后处理 {:.2} ms",
      frame.width(),
      frame.height(),
      result.len(),
      timings.pre_process_ms,
      timings.inference_ms,
      timings.post_process_ms
    );
    if self.summary_only {
      return Ok(());
    }
    for det in &result.items {
      info!(
        "  - [{}] {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        det.class_id,
        det.label,
        det.score * 100.0,
        det.x,
        det.y,
        det.width,
        det.height
      );
    }
    Ok(())
  }
}
