// 该文件是 Jianmu （检目） 项目的一部分。
// src/backend.rs - 推理后端接口
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

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;

use crate::{preprocess::InputTensor, tensor::{OutputTensor, TensorError}};

mod replay;
pub use self::replay::ReplayBackend;

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("线程数无效: {0}")]
  InvalidThreads(usize),
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("推理失败: {0}")]
  InferenceError(String),
}

impl BackendError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    BackendError::ModelInvalid(msg.into())
  }
}

/// 模型附带的检测头元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadMetadata {
  /// 步长 -> 锚框 (宽, 高)，仅直接回归检测头使用
  pub anchors: BTreeMap<u32, Vec<[f32; 2]>>,
}

/// 推理后端：给定输入张量，输出带步长的若干张量。内部实现对引擎不透明。
pub trait InferenceBackend: Sized {
  fn load(model_path: &Path, num_threads: usize) -> Result<Self, BackendError>;

  /// 模型输入的 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn metadata(&self) -> &HeadMetadata;

  fn run(&mut self, input: &InputTensor) -> Result<Vec<OutputTensor>, BackendError>;
}
