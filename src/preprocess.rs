// 该文件是 Jianmu （检目） 项目的一部分。
// src/preprocess.rs - 推理前处理（缩放 / 留边 / 归一化）
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

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{frame::ImageView, tensor::TensorLayout};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("输入张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

const INPUT_CHANNELS: usize = 3;

/// 模型输入坐标到原图坐标的映射: `orig = (input - pad) / scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl Default for ScaleTransform {
  fn default() -> Self {
    Self::identity()
  }
}

impl ScaleTransform {
  pub const fn identity() -> Self {
    Self {
      scale_x: 1.0,
      scale_y: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
    }
  }

  pub fn to_original_x(&self, x: f32) -> f32 {
    (x - self.pad_x) / self.scale_x
  }

  pub fn to_original_y(&self, y: f32) -> f32 {
    (y - self.pad_y) / self.scale_y
  }

  /// 映射 (x_min, y_min, x_max, y_max)
  pub fn to_original_corners(&self, corners: [f32; 4]) -> [f32; 4] {
    [
      self.to_original_x(corners[0]),
      self.to_original_y(corners[1]),
      self.to_original_x(corners[2]),
      self.to_original_y(corners[3]),
    ]
  }
}

/// 送入推理后端的 3 通道浮点张量
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  width: u32,
  height: u32,
  layout: TensorLayout,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn new(width: u32, height: u32, layout: TensorLayout, data: Vec<f32>) -> Result<Self, PreprocessError> {
    let expected = INPUT_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(PreprocessError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      width,
      height,
      layout,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    INPUT_CHANNELS
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

pub trait Preprocess {
  fn preprocess(
    &self,
    image: ImageView<'_>,
    input_width: u32,
    input_height: u32,
  ) -> Result<(InputTensor, ScaleTransform), PreprocessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 各轴独立缩放到输入尺寸
  Stretch,
  /// 等比缩放并居中填充
  #[default]
  Letterbox,
}

/// 默认前处理：缩放、填充，并按 `(v - mean) * norm` 归一化
#[derive(Debug, Clone, PartialEq)]
pub struct Letterbox {
  pub mode: ResizeMode,
  pub mean: [f32; 3],
  pub norm: [f32; 3],
  /// 以 BGR 顺序写入通道
  pub bgr: bool,
  pub pad_value: u8,
  pub layout: TensorLayout,
}

impl Default for Letterbox {
  fn default() -> Self {
    Self {
      mode: ResizeMode::Letterbox,
      mean: [0.0; 3],
      norm: [1.0 / 255.0; 3],
      bgr: false,
      pad_value: 114,
      layout: TensorLayout::Planar,
    }
  }
}

impl Letterbox {
  /// NanoDet 的 BGR 均值 / 方差
  pub fn nanodet() -> Self {
    Self {
      mean: [103.53, 116.28, 123.675],
      norm: [0.017429, 0.017507, 0.017125],
      bgr: true,
      pad_value: 0,
      ..Self::default()
    }
  }

  /// MobileNet SSD 系列：映射到 [-1, 1]，直接拉伸
  pub fn mobilenet_ssd() -> Self {
    Self {
      mode: ResizeMode::Stretch,
      mean: [127.5; 3],
      norm: [1.0 / 127.5; 3],
      ..Self::default()
    }
  }

  fn transform(&self, width: u32, height: u32, input_width: u32, input_height: u32) -> (u32, u32, ScaleTransform) {
    match self.mode {
      ResizeMode::Stretch => (
        input_width,
        input_height,
        ScaleTransform {
          scale_x: input_width as f32 / width as f32,
          scale_y: input_height as f32 / height as f32,
          pad_x: 0.0,
          pad_y: 0.0,
        },
      ),
      ResizeMode::Letterbox => {
        let scale = (input_width as f32 / width as f32).min(input_height as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_width);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_height);
        let pad_x = (input_width - new_w) / 2;
        let pad_y = (input_height - new_h) / 2;
        (
          new_w,
          new_h,
          ScaleTransform {
            scale_x: new_w as f32 / width as f32,
            scale_y: new_h as f32 / height as f32,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
          },
        )
      }
    }
  }
}

impl Preprocess for Letterbox {
  fn preprocess(
    &self,
    image: ImageView<'_>,
    input_width: u32,
    input_height: u32,
  ) -> Result<(InputTensor, ScaleTransform), PreprocessError> {
    if input_width == 0 || input_height == 0 {
      return Err(PreprocessError::InvalidInputSize(input_width, input_height));
    }

    let (new_w, new_h, transform) = self.transform(image.width(), image.height(), input_width, input_height);
    debug!(
      "前处理: {}x{} -> {}x{} (填充 {}, {})",
      image.width(),
      image.height(),
      new_w,
      new_h,
      transform.pad_x,
      transform.pad_y
    );

    let source = image.to_rgb_image();
    let resized = if (new_w, new_h) == (image.width(), image.height()) {
      source
    } else {
      imageops::resize(&source, new_w, new_h, FilterType::Triangle)
    };

    let (w, h) = (input_width as usize, input_height as usize);
    let spatial = w * h;
    let mut data = vec![0.0f32; INPUT_CHANNELS * spatial];
    let pad_x = transform.pad_x as u32;
    let pad_y = transform.pad_y as u32;

    for y in 0..input_height {
      for x in 0..input_width {
        let inside = x >= pad_x && y >= pad_y && x - pad_x < new_w && y - pad_y < new_h;
        let pixel = if inside {
          resized.get_pixel(x - pad_x, y - pad_y).0
        } else {
          [self.pad_value; 3]
        };

        for c in 0..INPUT_CHANNELS {
          let src = if self.bgr { INPUT_CHANNELS - 1 - c } else { c };
          let value = (pixel[src] as f32 - self.mean[c]) * self.norm[c];
          let pos = y as usize * w + x as usize;
          let index = match self.layout {
            TensorLayout::Planar => c * spatial + pos,
            TensorLayout::Interleaved => pos * INPUT_CHANNELS + c,
          };
          data[index] = value;
        }
      }
    }

    let tensor = InputTensor::new(input_width, input_height, self.layout, data)?;
    Ok((tensor, transform))
  }
}
