// 该文件是 Jianmu （检目） 项目的一部分。
// src/decode/distribution.rs - 分布式边框解码（NanoDet 风格）
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

use crate::{
  decode::{
    DecodeError, DecodeParams, Decoder, ScoreActivation, cell_center, check_grid, find_tensor,
    passes_threshold,
  },
  model::Detection,
  tensor::{OutputTensor, TensorRole},
};

/// NanoDet 默认 reg_max = 7，即每条边 8 个距离档位
pub const DEFAULT_BINS: usize = 8;

/// 边的顺序：左、上、右、下
const SIDES: usize = 4;

/// 每个网格输出类别分数，以及四条边各 `bins` 个档位上的距离分布
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionDecoder {
  bins: usize,
  activation: ScoreActivation,
}

impl Default for DistributionDecoder {
  fn default() -> Self {
    Self::new(DEFAULT_BINS, ScoreActivation::Identity)
  }
}

impl DistributionDecoder {
  pub fn new(bins: usize, activation: ScoreActivation) -> Self {
    Self {
      bins: bins.max(1),
      activation,
    }
  }

  pub fn bins(&self) -> usize {
    self.bins
  }

  /// 对一条边的档位做 softmax，返回期望档位
  fn expected_bin(&self, dis: &OutputTensor, side: usize, gy: usize, gx: usize) -> f32 {
    let base = side * self.bins;
    let max = (0..self.bins)
      .map(|i| dis.at(base + i, gy, gx))
      .fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    let mut weighted = 0.0f32;
    for i in 0..self.bins {
      let p = (dis.at(base + i, gy, gx) - max).exp();
      sum += p;
      weighted += p * i as f32;
    }
    weighted / sum
  }

  /// 类别分数取最大值，相同时取编号较小者
  fn best_class(&self, cls: &OutputTensor, gy: usize, gx: usize) -> (usize, f32) {
    let mut class_id = 0usize;
    let mut best = f32::NEG_INFINITY;
    for c in 0..cls.shape().channels {
      let value = cls.at(c, gy, gx);
      if value > best {
        best = value;
        class_id = c;
      }
    }
    (class_id, self.activation.apply(best))
  }
}

impl Decoder for DistributionDecoder {
  fn decode(
    &self,
    tensors: &[&OutputTensor],
    stride: u32,
    params: &DecodeParams,
  ) -> Result<Vec<Detection>, DecodeError> {
    let cls = find_tensor(tensors, TensorRole::ClassScores, stride)?;
    let dis = find_tensor(tensors, TensorRole::BoxDistribution, stride)?;
    let (grid_h, grid_w) = check_grid(cls, stride, params)?;
    check_grid(dis, stride, params)?;

    if cls.shape().channels == 0 {
      return Err(DecodeError::ChannelMismatch {
        name: cls.name().to_string(),
        expected: ">= 1".to_string(),
        actual: 0,
      });
    }
    if dis.shape().channels != SIDES * self.bins {
      return Err(DecodeError::ChannelMismatch {
        name: dis.name().to_string(),
        expected: format!("{}", SIDES * self.bins),
        actual: dis.shape().channels,
      });
    }

    let step = stride as f32;
    let mut items = Vec::new();
    for gy in 0..grid_h {
      for gx in 0..grid_w {
        let (class_id, score) = self.best_class(cls, gy, gx);
        // 低分网格不解码分布
        if !passes_threshold(score, params.score_threshold) {
          continue;
        }

        let (cx, cy) = cell_center(gx, gy, stride);
        let left = self.expected_bin(dis, 0, gy, gx) * step;
        let top = self.expected_bin(dis, 1, gy, gx) * step;
        let right = self.expected_bin(dis, 2, gy, gx) * step;
        let bottom = self.expected_bin(dis, 3, gy, gx) * step;

        let [x_min, y_min, x_max, y_max] =
          params
            .transform
            .to_original_corners([cx - left, cy - top, cx + right, cy + bottom]);
        items.push(Detection::from_corners(class_id, score, x_min, y_min, x_max, y_max));
      }
    }

    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decode::test_util::planar;
  use crate::preprocess::ScaleTransform;

  const BINS: usize = 4;

  fn params(threshold: f32) -> DecodeParams {
    DecodeParams {
      input_width: 16,
      input_height: 16,
      score_threshold: threshold,
      transform: ScaleTransform::identity(),
    }
  }

  /// 2x2 网格、步长 8；分布在第 `bin` 档上为尖峰
  fn peaked(bin: usize) -> OutputTensor {
    planar("dis", TensorRole::BoxDistribution, 8, (4 * BINS, 2, 2), move |c, _, _| {
      if c % BINS == bin { 30.0 } else { -30.0 }
    })
  }

  #[test]
  fn expectation_of_peaked_distribution_is_bin_distance() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (3, 2, 2), |c, y, x| {
      if (c, y, x) == (2, 1, 0) { 0.8 } else { 0.05 }
    });
    let dis = peaked(1);
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);

    let found = decoder.decode(&[&cls, &dis], 8, &params(0.5)).unwrap();
    assert_eq!(found.len(), 1);
    let det = &found[0];
    assert_eq!(det.class_id, 2);
    assert_eq!(det.score, 0.8);
    // 网格 (0, 1) 中心 (4, 12)，每边距离 1 * 8
    assert!((det.x - -4.0).abs() < 1e-4);
    assert!((det.y - 4.0).abs() < 1e-4);
    assert!((det.width - 16.0).abs() < 1e-4);
    assert!((det.height - 16.0).abs() < 1e-4);
  }

  #[test]
  fn uniform_distribution_uses_mean_bin() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, y, x| {
      if (y, x) == (0, 0) { 1.0 } else { 0.0 }
    });
    let dis = planar("dis", TensorRole::BoxDistribution, 8, (4 * BINS, 2, 2), |_, _, _| 0.0);
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);

    let found = decoder.decode(&[&dis, &cls], 8, &params(0.5)).unwrap();
    // 期望档位 1.5，距离 12
    assert!((found[0].x - (4.0 - 12.0)).abs() < 1e-4);
    assert!((found[0].width - 24.0).abs() < 1e-4);
  }

  #[test]
  fn threshold_is_inclusive() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, y, x| match (y, x) {
      (0, 0) => 0.5,
      (0, 1) => 0.49999,
      _ => 0.0,
    });
    let dis = peaked(0);
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);

    let found = decoder.decode(&[&cls, &dis], 8, &params(0.5)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].score, 0.5);
  }

  #[test]
  fn low_score_cells_ignore_distribution() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, y, x| {
      if (y, x) == (1, 1) { 0.9 } else { 0.1 }
    });
    // 低分网格的分布为 NaN，不应影响结果
    let dis = planar("dis", TensorRole::BoxDistribution, 8, (4 * BINS, 2, 2), |c, y, x| {
      if (y, x) == (1, 1) {
        if c % BINS == 0 { 30.0 } else { -30.0 }
      } else {
        f32::NAN
      }
    });
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);

    let found = decoder.decode(&[&cls, &dis], 8, &params(0.5)).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].x.is_finite() && found[0].width.is_finite());
    assert!((found[0].x - 12.0).abs() < 1e-4);
  }

  #[test]
  fn sigmoid_scores_are_gated_after_activation() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, y, x| {
      if (y, x) == (0, 0) { 0.0 } else { -5.0 }
    });
    let dis = peaked(0);
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Sigmoid);

    let found = decoder.decode(&[&cls, &dis], 8, &params(0.5)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].score, 0.5);
  }

  #[test]
  fn maps_boxes_through_scale_transform() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, y, x| {
      if (y, x) == (0, 0) { 0.9 } else { 0.0 }
    });
    let dis = peaked(1);
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);
    let p = DecodeParams {
      transform: ScaleTransform {
        scale_x: 0.5,
        scale_y: 0.5,
        pad_x: 0.0,
        pad_y: 2.0,
      },
      ..params(0.5)
    };

    let found = decoder.decode(&[&cls, &dis], 8, &p).unwrap();
    let det = &found[0];
    // 输入坐标 [-4, -4, 12, 12] -> 原图 [-8, -12, 24, 20]
    assert!((det.x - -8.0).abs() < 1e-4);
    assert!((det.y - -12.0).abs() < 1e-4);
    assert!((det.width - 32.0).abs() < 1e-4);
    assert!((det.height - 32.0).abs() < 1e-4);
  }

  #[test]
  fn repeated_decoding_is_bit_identical() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (2, 2, 2), |c, y, x| {
      0.3 + 0.1 * (c + y + x) as f32
    });
    let dis = planar("dis", TensorRole::BoxDistribution, 8, (4 * BINS, 2, 2), |c, y, x| {
      ((c * 7 + y * 3 + x) % 5) as f32 * 0.37
    });
    let decoder = DistributionDecoder::new(BINS, ScoreActivation::Identity);

    let first = decoder.decode(&[&cls, &dis], 8, &params(0.4)).unwrap();
    let second = decoder.decode(&[&cls, &dis], 8, &params(0.4)).unwrap();
    assert!(!first.is_empty());
    for (a, b) in first.iter().zip(&second) {
      assert_eq!(a.x.to_bits(), b.x.to_bits());
      assert_eq!(a.y.to_bits(), b.y.to_bits());
      assert_eq!(a.width.to_bits(), b.width.to_bits());
      assert_eq!(a.height.to_bits(), b.height.to_bits());
    }
  }

  #[test]
  fn rejects_wrong_bin_count() {
    let cls = planar("cls", TensorRole::ClassScores, 8, (1, 2, 2), |_, _, _| 0.9);
    let dis = planar("dis", TensorRole::BoxDistribution, 8, (4 * BINS, 2, 2), |_, _, _| 0.0);
    let decoder = DistributionDecoder::new(BINS + 1, ScoreActivation::Identity);
    assert!(matches!(
      decoder.decode(&[&cls, &dis], 8, &params(0.5)),
      Err(DecodeError::ChannelMismatch { .. })
    ));
  }
}
