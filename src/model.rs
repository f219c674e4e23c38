// 该文件是 Jianmu （检目） 项目的一部分。
// src/model.rs - 检测模型与结果定义
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

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测结果（候选框或最终输出），坐标为原图像素，左上角为原点
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: usize,
  /// 候选框阶段为空，输出前由标签表填充
  pub label: String,
  pub score: f32,
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Detection {
  pub fn new(class_id: usize, score: f32, x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      class_id,
      label: String::new(),
      score,
      x,
      y,
      width: width.max(0.0),
      height: height.max(0.0),
    }
  }

  /// 由左上角与右下角构造，右下角小于左上角时宽高取 0
  pub fn from_corners(class_id: usize, score: f32, x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self::new(class_id, score, x_min, y_min, x_max - x_min, y_max - y_min)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  /// 将框裁剪到 `[0, width] x [0, height]` 的图像范围内
  pub fn clamp_to(&mut self, width: f32, height: f32) {
    let x_min = self.x.clamp(0.0, width);
    let y_min = self.y.clamp(0.0, height);
    let x_max = self.right().clamp(0.0, width);
    let y_max = self.bottom().clamp(0.0, height);
    self.x = x_min;
    self.y = y_min;
    self.width = (x_max - x_min).max(0.0);
    self.height = (y_max - y_min).max(0.0);
  }
}

/// 各阶段耗时，单位毫秒
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
  pub pre_process_ms: f64,
  pub inference_ms: f64,
  pub post_process_ms: f64,
}

impl StageTimings {
  pub fn total_ms(&self) -> f64 {
    self.pre_process_ms + self.inference_ms + self.post_process_ms
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Vec<Detection>,
  pub timings: StageTimings,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_extent_collapses_to_zero() {
    let det = Detection::from_corners(0, 0.5, 10.0, 10.0, 5.0, 20.0);
    assert_eq!(det.width, 0.0);
    assert_eq!(det.height, 10.0);
  }

  #[test]
  fn clamp_keeps_box_inside_image() {
    let mut det = Detection::new(3, 0.9, -5.0, 90.0, 20.0, 30.0);
    det.clamp_to(100.0, 100.0);
    assert_eq!((det.x, det.y, det.width, det.height), (0.0, 90.0, 15.0, 10.0));
  }
}
