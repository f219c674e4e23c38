// 该文件是 Jianmu （检目） 项目的一部分。
// src/decode.rs - 检测头输出解码
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

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  model::Detection,
  preprocess::ScaleTransform,
  tensor::{OutputTensor, TensorRole},
};

mod direct_box;
mod distribution;

pub use self::direct_box::{DEFAULT_VARIANCES, DirectBoxDecoder};
pub use self::distribution::{DEFAULT_BINS, DistributionDecoder};

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("步长 {stride} 缺少 {role:?} 输出")]
  MissingTensor { stride: u32, role: TensorRole },
  #[error("步长 {stride} 的网格大小不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  GridMismatch {
    stride: u32,
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("张量 {name} 通道数不匹配: 期望 {expected}, 实际 {actual}")]
  ChannelMismatch {
    name: String,
    expected: String,
    actual: usize,
  },
  #[error("步长 {0} 没有锚框配置")]
  MissingAnchors(u32),
}

/// 类别分数的激活方式，阈值在激活之后比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreActivation {
  /// 模型已输出概率
  #[default]
  Identity,
  /// 模型输出 logit
  Sigmoid,
}

impl ScoreActivation {
  #[inline]
  pub fn apply(self, value: f32) -> f32 {
    match self {
      ScoreActivation::Identity => value,
      ScoreActivation::Sigmoid => sigmoid(value),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
  pub input_width: u32,
  pub input_height: u32,
  /// 包含边界：`score >= score_threshold` 的候选框保留
  pub score_threshold: f32,
  pub transform: ScaleTransform,
}

/// 一个步长上的检测头解码器，输出原图像素坐标下的候选框
pub trait Decoder {
  fn decode(
    &self,
    tensors: &[&OutputTensor],
    stride: u32,
    params: &DecodeParams,
  ) -> Result<Vec<Detection>, DecodeError>;
}

/// 两种检测头格式
#[derive(Debug, Clone, PartialEq)]
pub enum HeadDecoder {
  DirectBox(DirectBoxDecoder),
  Distribution(DistributionDecoder),
}

impl Decoder for HeadDecoder {
  fn decode(
    &self,
    tensors: &[&OutputTensor],
    stride: u32,
    params: &DecodeParams,
  ) -> Result<Vec<Detection>, DecodeError> {
    match self {
      HeadDecoder::DirectBox(decoder) => decoder.decode(tensors, stride, params),
      HeadDecoder::Distribution(decoder) => decoder.decode(tensors, stride, params),
    }
  }
}

/// 按步长分组（升序）逐个解码，并拼接所有候选框
pub fn decode_all<D: Decoder + ?Sized>(
  decoder: &D,
  tensors: &[OutputTensor],
  params: &DecodeParams,
) -> Result<Vec<Detection>, DecodeError> {
  let mut by_stride: BTreeMap<u32, Vec<&OutputTensor>> = BTreeMap::new();
  for tensor in tensors {
    by_stride.entry(tensor.stride()).or_default().push(tensor);
  }

  let mut candidates = Vec::new();
  for (stride, group) in by_stride {
    let found = decoder.decode(&group, stride, params)?;
    debug!("步长 {}: 解码得到 {} 个候选框", stride, found.len());
    candidates.extend(found);
  }
  Ok(candidates)
}

pub(crate) fn find_tensor<'a>(
  tensors: &[&'a OutputTensor],
  role: TensorRole,
  stride: u32,
) -> Result<&'a OutputTensor, DecodeError> {
  tensors
    .iter()
    .copied()
    .find(|tensor| tensor.role() == role)
    .ok_or(DecodeError::MissingTensor { stride, role })
}

/// 网格大小必须等于 `ceil(输入尺寸 / 步长)`，返回 (高, 宽)
pub(crate) fn check_grid(
  tensor: &OutputTensor,
  stride: u32,
  params: &DecodeParams,
) -> Result<(usize, usize), DecodeError> {
  let expected = (
    params.input_height.div_ceil(stride) as usize,
    params.input_width.div_ceil(stride) as usize,
  );
  let shape = tensor.shape();
  let actual = (shape.height, shape.width);
  if expected != actual {
    error!(
      "张量 {} 网格大小不匹配: 期望 {:?}, 实际 {:?}",
      tensor.name(),
      expected,
      actual
    );
    return Err(DecodeError::GridMismatch {
      stride,
      expected,
      actual,
    });
  }
  Ok(expected)
}

/// 网格中心在模型输入中的像素坐标
#[inline]
pub(crate) fn cell_center(gx: usize, gy: usize, stride: u32) -> (f32, f32) {
  let stride = stride as f32;
  ((gx as f32 + 0.5) * stride, (gy as f32 + 0.5) * stride)
}

#[inline]
pub(crate) fn passes_threshold(score: f32, threshold: f32) -> bool {
  // NaN 不通过
  score >= threshold
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
pub(crate) mod test_util {
  use crate::tensor::{OutputTensor, TensorLayout, TensorRole, TensorShape};

  /// 以 CHW 顺序的闭包构造平面张量
  pub fn planar<F: Fn(usize, usize, usize) -> f32>(
    name: &str,
    role: TensorRole,
    stride: u32,
    shape: (usize, usize, usize),
    value: F,
  ) -> OutputTensor {
    let (c, h, w) = shape;
    let mut data = Vec::with_capacity(c * h * w);
    for ch in 0..c {
      for y in 0..h {
        for x in 0..w {
          data.push(value(ch, y, x));
        }
      }
    }
    OutputTensor::new(name, role, stride, TensorShape::new(c, h, w), TensorLayout::Planar, data).unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::test_util::planar;
  use super::*;

  fn params(size: u32, threshold: f32) -> DecodeParams {
    DecodeParams {
      input_width: size,
      input_height: size,
      score_threshold: threshold,
      transform: ScaleTransform::identity(),
    }
  }

  #[test]
  fn sigmoid_activation_is_monotonic() {
    let act = ScoreActivation::Sigmoid;
    assert_eq!(act.apply(0.0), 0.5);
    assert!(act.apply(2.0) > act.apply(1.0));
    assert_eq!(ScoreActivation::Identity.apply(0.3), 0.3);
  }

  #[test]
  fn grid_must_match_input_over_stride() {
    let tensor = planar("cls", TensorRole::ClassScores, 8, (1, 3, 4), |_, _, _| 0.0);
    // 30 / 8 向上取整为 4
    let p = DecodeParams {
      input_width: 30,
      input_height: 24,
      ..params(0, 0.5)
    };
    assert_eq!(check_grid(&tensor, 8, &p).unwrap(), (3, 4));
    assert_eq!(
      check_grid(&tensor, 8, &params(32, 0.5)).unwrap_err(),
      DecodeError::GridMismatch {
        stride: 8,
        expected: (4, 4),
        actual: (3, 4)
      }
    );
  }

  #[test]
  fn decode_all_visits_every_stride() {
    let decoder = DistributionDecoder::new(2, ScoreActivation::Identity);
    let mut tensors = Vec::new();
    for stride in [16u32, 8] {
      let n = (32 / stride) as usize;
      tensors.push(planar("cls", TensorRole::ClassScores, stride, (1, n, n), |_, y, x| {
        if x == 0 && y == 0 { 0.9 } else { 0.1 }
      }));
      tensors.push(planar("dis", TensorRole::BoxDistribution, stride, (8, n, n), |_, _, _| 0.0));
    }

    let found = decode_all(&decoder, &tensors, &params(32, 0.5)).unwrap();
    assert_eq!(found.len(), 2);
    // 步长升序：先 8 后 16
    assert_eq!(found[0].x, 4.0 - 0.5 * 8.0);
    assert_eq!(found[1].x, 8.0 - 0.5 * 16.0);
  }

  #[test]
  fn missing_role_is_reported() {
    let decoder = DistributionDecoder::new(2, ScoreActivation::Identity);
    let tensors = vec![planar("cls", TensorRole::ClassScores, 8, (1, 4, 4), |_, _, _| 0.9)];
    assert_eq!(
      decode_all(&decoder, &tensors, &params(32, 0.5)).unwrap_err(),
      DecodeError::MissingTensor {
        stride: 8,
        role: TensorRole::BoxDistribution
      }
    );
  }

  #[test]
  fn empty_output_decodes_to_nothing() {
    let decoder = HeadDecoder::Distribution(DistributionDecoder::default());
    assert!(decode_all(&decoder, &[], &params(32, 0.5)).unwrap().is_empty());
  }
}
