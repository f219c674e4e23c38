// 该文件是 Jianmu （检目） 项目的一部分。
// src/decode/direct_box.rs - 直接回归边框解码（SSD 风格）
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

use crate::{
  decode::{
    DecodeError, DecodeParams, Decoder, ScoreActivation, cell_center, check_grid, find_tensor,
    passes_threshold,
  },
  model::Detection,
  tensor::{OutputTensor, TensorRole},
};

/// 中心偏移与宽高缩放的方差
pub const DEFAULT_VARIANCES: [f32; 2] = [0.1, 0.2];

const BOX_PARAMS: usize = 4;

/// 每个网格、每个锚框直接回归 (dx, dy, dw, dh)，并给出每个类别的置信度。
///
/// 回归张量通道为 `锚框数 * 4`，分数张量通道为 `锚框数 * 类别数`，
/// 均按锚框优先排列。
#[derive(Debug, Clone, PartialEq)]
pub struct DirectBoxDecoder {
  /// 步长 -> 锚框 (宽, 高)，单位为模型输入像素
  anchors: BTreeMap<u32, Vec<[f32; 2]>>,
  variances: [f32; 2],
  background_class: Option<usize>,
  activation: ScoreActivation,
}

impl DirectBoxDecoder {
  pub fn new(anchors: BTreeMap<u32, Vec<[f32; 2]>>) -> Self {
    Self {
      anchors,
      variances: DEFAULT_VARIANCES,
      background_class: None,
      activation: ScoreActivation::Identity,
    }
  }

  pub fn variances(mut self, variances: [f32; 2]) -> Self {
    self.variances = variances;
    self
  }

  /// 该类别（通常为 0）从不输出
  pub fn background_class(mut self, class_id: Option<usize>) -> Self {
    self.background_class = class_id;
    self
  }

  pub fn activation(mut self, activation: ScoreActivation) -> Self {
    self.activation = activation;
    self
  }

  pub fn anchors(&self, stride: u32) -> Option<&[[f32; 2]]> {
    self.anchors.get(&stride).map(Vec::as_slice)
  }

  /// 返回模型输入坐标下的 (x_min, y_min, x_max, y_max)
  fn regress(&self, reg: &OutputTensor, anchor: usize, size: [f32; 2], gy: usize, gx: usize, stride: u32) -> [f32; 4] {
    let (cx, cy) = cell_center(gx, gy, stride);
    let [aw, ah] = size;
    let base = anchor * BOX_PARAMS;
    let dx = reg.at(base, gy, gx);
    let dy = reg.at(base + 1, gy, gx);
    let dw = reg.at(base + 2, gy, gx);
    let dh = reg.at(base + 3, gy, gx);

    let bx = cx + dx * self.variances[0] * aw;
    let by = cy + dy * self.variances[0] * ah;
    let bw = aw * (dw * self.variances[1]).exp();
    let bh = ah * (dh * self.variances[1]).exp();

    [bx - bw / 2.0, by - bh / 2.0, bx + bw / 2.0, by + bh / 2.0]
  }
}

impl Decoder for DirectBoxDecoder {
  fn decode(
    &self,
    tensors: &[&OutputTensor],
    stride: u32,
    params: &DecodeParams,
  ) -> Result<Vec<Detection>, DecodeError> {
    let anchors = self
      .anchors(stride)
      .filter(|anchors| !anchors.is_empty())
      .ok_or(DecodeError::MissingAnchors(stride))?;
    let reg = find_tensor(tensors, TensorRole::BoxRegression, stride)?;
    let cls = find_tensor(tensors, TensorRole::ClassScores, stride)?;
    let (grid_h, grid_w) = check_grid(reg, stride, params)?;
    check_grid(cls, stride, params)?;

    let num_anchors = anchors.len();
    if reg.shape().channels != num_anchors * BOX_PARAMS {
      return Err(DecodeError::ChannelMismatch {
        name: reg.name().to_string(),
        expected: format!("{}", num_anchors * BOX_PARAMS),
        actual: reg.shape().channels,
      });
    }
    let cls_channels = cls.shape().channels;
    if cls_channels == 0 || cls_channels % num_anchors != 0 {
      return Err(DecodeError::ChannelMismatch {
        name: cls.name().to_string(),
        expected: format!("{} 的正整数倍", num_anchors),
        actual: cls_channels,
      });
    }
    let num_classes = cls_channels / num_anchors;

    let mut items = Vec::new();
    for gy in 0..grid_h {
      for gx in 0..grid_w {
        for (anchor, &size) in anchors.iter().enumerate() {
          // 同一锚框只回归一次，且仅在有类别过阈值时
          let mut corners: Option<[f32; 4]> = None;
          for class_id in 0..num_classes {
            if self.background_class == Some(class_id) {
              continue;
            }
            let score = self
              .activation
              .apply(cls.at(anchor * num_classes + class_id, gy, gx));
            if !passes_threshold(score, params.score_threshold) {
              continue;
            }

            let [x_min, y_min, x_max, y_max] = *corners.get_or_insert_with(|| {
              params
                .transform
                .to_original_corners(self.regress(reg, anchor, size, gy, gx, stride))
            });
            items.push(Detection::from_corners(class_id, score, x_min, y_min, x_max, y_max));
          }
        }
      }
    }

    Ok(items)
  }
}
