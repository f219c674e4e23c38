// 该文件是 Jianmu （检目） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("图像尺寸无效: {0}x{1}")]
  InvalidShape(u32, u32),
}

fn expected_len(width: u32, height: u32) -> usize {
  RGB_CHANNELS * width as usize * height as usize
}

/// 交错排布 (HWC) 的 RGB8 帧，拥有像素数据
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn with_shape(height: u32, width: u32) -> Self {
    Self {
      width,
      height,
      data: vec![0u8; expected_len(width, height)].into_boxed_slice(),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    ImageView::new(width, height, &data)?;
    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 借出只读视图，推理引擎只通过视图访问帧
  pub fn view(&self) -> ImageView<'_> {
    ImageView {
      width: self.width,
      height: self.height,
      data: &self.data,
    }
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsRef<[u8]> for RgbFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

/// 调用方图像的借用视图 (HWC, RGB8)
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
  width: u32,
  height: u32,
  data: &'a [u8],
}

impl<'a> ImageView<'a> {
  pub fn new(width: u32, height: u32, data: &'a [u8]) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape(width, height));
    }
    let expected = expected_len(width, height);
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { width, height, data })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_hwc(&self) -> &'a [u8] {
    self.data
  }

  /// 复制为 `image` 库的图像，用于缩放
  pub fn to_rgb_image(&self) -> RgbImage {
    // 长度已在构造时校验
    RgbImage::from_fn(self.width, self.height, |x, y| {
      let index = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
      image::Rgb([self.data[index], self.data[index + 1], self.data[index + 2]])
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    assert_eq!(
      RgbFrame::from_raw(2, 2, vec![0; 11]).unwrap_err(),
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn rejects_empty_shape() {
    assert!(matches!(
      ImageView::new(0, 4, &[]),
      Err(FrameError::InvalidShape(0, 4))
    ));
  }

  #[test]
  fn view_round_trips_through_rgb_image() {
    let data: Vec<u8> = (0..12).collect();
    let frame = RgbFrame::from_raw(2, 2, data.clone()).unwrap();
    let image = frame.view().to_rgb_image();
    assert_eq!(image.get_pixel(1, 1).0, [9, 10, 11]);
    assert_eq!(RgbFrame::from(image).as_ref(), data.as_slice());
  }
}
