// 该文件是 Jianmu （检目） 项目的一部分。
// src/tensor.rs - 推理输出张量描述
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

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("张量 {name} 数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    name: String,
    expected: usize,
    actual: usize,
  },
  #[error("张量 {0} 的形状过大")]
  ShapeOverflow(String),
  #[error("张量 {0} 的步长不能为 0")]
  ZeroStride(String),
  #[error("未知的张量角色: {0}")]
  UnknownRole(String),
  #[error("未知的张量布局: {0}")]
  UnknownLayout(String),
}

/// 张量在检测头中的作用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
  /// 每个网格的类别置信度
  ClassScores,
  /// 直接回归的框偏移 (dx, dy, dw, dh)
  BoxRegression,
  /// 四条边的离散距离分布
  BoxDistribution,
}

impl std::str::FromStr for TensorRole {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cls" | "class_scores" => Ok(TensorRole::ClassScores),
      "box" | "box_regression" => Ok(TensorRole::BoxRegression),
      "dis" | "box_distribution" => Ok(TensorRole::BoxDistribution),
      _ => Err(TensorError::UnknownRole(s.to_string())),
    }
  }
}

/// 数据排布：平面 (CHW，同 NCHW) 或交错 (HWC，同 NHWC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  #[default]
  Planar,
  Interleaved,
}

impl std::str::FromStr for TensorLayout {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "chw" | "nchw" | "planar" => Ok(TensorLayout::Planar),
      "hwc" | "nhwc" | "interleaved" => Ok(TensorLayout::Interleaved),
      _ => Err(TensorError::UnknownLayout(s.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub fn new(channels: usize, height: usize, width: usize) -> Self {
    Self {
      channels,
      height,
      width,
    }
  }

  pub fn spatial(&self) -> usize {
    self.height * self.width
  }

  pub fn len(&self) -> usize {
    self.channels * self.spatial()
  }

  /// 元素总数，乘法溢出时返回 `None`
  pub fn checked_len(&self) -> Option<usize> {
    self.height.checked_mul(self.width)?.checked_mul(self.channels)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 推理后端的一个输出：浮点数据、形状以及产生它的步长
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  name: String,
  role: TensorRole,
  stride: u32,
  shape: TensorShape,
  layout: TensorLayout,
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(
    name: impl Into<String>,
    role: TensorRole,
    stride: u32,
    shape: TensorShape,
    layout: TensorLayout,
    data: Vec<f32>,
  ) -> Result<Self, TensorError> {
    let name = name.into();
    if stride == 0 {
      return Err(TensorError::ZeroStride(name));
    }
    let Some(expected) = shape.checked_len() else {
      return Err(TensorError::ShapeOverflow(name));
    };
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        name,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      name,
      role,
      stride,
      shape,
      layout,
      data: data.into_boxed_slice(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn role(&self) -> TensorRole {
    self.role
  }

  pub fn stride(&self) -> u32 {
    self.stride
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  /// 读取第 `channel` 通道在网格 (gx, gy) 处的值
  #[inline]
  pub fn at(&self, channel: usize, gy: usize, gx: usize) -> f32 {
    let TensorShape {
      channels,
      height,
      width,
    } = self.shape;
    debug_assert!(channel < channels && gy < height && gx < width);
    let index = match self.layout {
      TensorLayout::Planar => channel * height * width + gy * width + gx,
      TensorLayout::Interleaved => (gy * width + gx) * channels + channel,
    };
    self.data[index]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_length_mismatch() {
    let err = OutputTensor::new(
      "cls",
      TensorRole::ClassScores,
      8,
      TensorShape::new(2, 2, 2),
      TensorLayout::Planar,
      vec![0.0; 7],
    )
    .unwrap_err();
    assert_eq!(
      err,
      TensorError::LengthMismatch {
        name: "cls".into(),
        expected: 8,
        actual: 7
      }
    );
  }

  #[test]
  fn rejects_overflowing_shape() {
    let shape = TensorShape::new(usize::MAX / 2, 2, 2);
    assert_eq!(shape.checked_len(), None);
    let err = OutputTensor::new("cls", TensorRole::ClassScores, 8, shape, TensorLayout::Planar, vec![]).unwrap_err();
    assert_eq!(err, TensorError::ShapeOverflow("cls".into()));
  }

  #[test]
  fn planar_and_interleaved_address_same_element() {
    // 2 通道, 1x2 网格
    let planar = OutputTensor::new(
      "p",
      TensorRole::ClassScores,
      8,
      TensorShape::new(2, 1, 2),
      TensorLayout::Planar,
      vec![0.1, 0.2, 0.3, 0.4],
    )
    .unwrap();
    let interleaved = OutputTensor::new(
      "i",
      TensorRole::ClassScores,
      8,
      TensorShape::new(2, 1, 2),
      TensorLayout::Interleaved,
      vec![0.1, 0.3, 0.2, 0.4],
    )
    .unwrap();

    for c in 0..2 {
      for x in 0..2 {
        assert_eq!(planar.at(c, 0, x), interleaved.at(c, 0, x));
      }
    }
    assert_eq!(planar.at(1, 0, 0), 0.3);
  }

  #[test]
  fn parses_roles_and_layouts() {
    assert_eq!("dis".parse::<TensorRole>().unwrap(), TensorRole::BoxDistribution);
    assert_eq!("NHWC".parse::<TensorLayout>().unwrap(), TensorLayout::Interleaved);
    assert!("foo".parse::<TensorRole>().is_err());
  }
}
