// 该文件是 Jianmu （检目） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::model::Detection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.6;

/// 计算两个边界框的 IoU，任一框面积为 0 时结果为 0
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let area_a = a.area();
  let area_b = b.area();
  if area_a <= 0.0 || area_b <= 0.0 {
    return 0.0;
  }

  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsConfig {
  pub iou_threshold: f32,
  /// 被抑制的框按置信度加权合并到保留框中
  pub weighted_merge: bool,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      weighted_merge: false,
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Suppressor {
  config: NmsConfig,
}

impl Suppressor {
  pub fn new(config: NmsConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &NmsConfig {
    &self.config
  }

  pub fn suppress(&self, candidates: Vec<Detection>) -> Vec<Detection> {
    suppress(candidates, self.config.iou_threshold, self.config.weighted_merge)
  }
}

/// NaN 置信度排在最后
fn score_key(score: f32) -> f32 {
  if score.is_nan() { f32::NEG_INFINITY } else { score }
}

/// 按类别分别做 NMS。不同类别的框互不抑制。
///
/// 输出按类别编号升序、类内按置信度降序排列；调用方不应依赖这一顺序。
pub fn suppress(candidates: Vec<Detection>, iou_threshold: f32, use_weighted_merge: bool) -> Vec<Detection> {
  let total = candidates.len();
  let mut by_class: BTreeMap<usize, Vec<Detection>> = BTreeMap::new();
  for det in candidates {
    by_class.entry(det.class_id).or_default().push(det);
  }

  let mut kept = Vec::with_capacity(by_class.len());
  for (_, mut dets) in by_class {
    // sort_by 为稳定排序，同分时保持输入顺序
    dets.sort_by(|a, b| score_key(b.score).total_cmp(&score_key(a.score)));
    suppress_class(&dets, iou_threshold, use_weighted_merge, &mut kept);
  }

  debug!("NMS: {} 个候选框 -> {} 个", total, kept.len());
  kept
}

fn suppress_class(sorted: &[Detection], iou_threshold: f32, use_weighted_merge: bool, kept: &mut Vec<Detection>) {
  let mut suppressed = vec![false; sorted.len()];

  for i in 0..sorted.len() {
    if suppressed[i] {
      continue;
    }
    let best = &sorted[i];

    let mut weight = best.score;
    let mut acc = [
      best.x * best.score,
      best.y * best.score,
      best.width * best.score,
      best.height * best.score,
    ];

    for j in (i + 1)..sorted.len() {
      if suppressed[j] {
        continue;
      }
      let other = &sorted[j];
      if iou(best, other) > iou_threshold {
        suppressed[j] = true;
        if use_weighted_merge {
          weight += other.score;
          acc[0] += other.x * other.score;
          acc[1] += other.y * other.score;
          acc[2] += other.width * other.score;
          acc[3] += other.height * other.score;
        }
      }
    }

    let mut out = best.clone();
    if use_weighted_merge && weight > 0.0 {
      out.x = acc[0] / weight;
      out.y = acc[1] / weight;
      out.width = acc[2] / weight;
      out.height = acc[3] / weight;
    }
    kept.push(out);
  }
}
