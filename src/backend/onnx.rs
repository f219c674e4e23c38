// 该文件是 Jianmu （检目） 项目的一部分。
// src/backend/onnx.rs - ONNX Runtime 推理后端
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

use std::path::Path;

use ort::{
  inputs,
  session::{Session, builder::GraphOptimizationLevel},
  value::{Tensor, ValueType},
};
use tracing::{debug, info, warn};

use crate::{
  backend::{BackendError, HeadMetadata, InferenceBackend},
  preprocess::InputTensor,
  tensor::{OutputTensor, TensorLayout, TensorRole, TensorShape},
};

impl From<ort::Error> for BackendError {
  fn from(err: ort::Error) -> Self {
    BackendError::InferenceError(err.to_string())
  }
}

/// 输出名约定: `cls_pred_stride_8` / `dis_pred_stride_8` / `box_pred_stride_8`
fn parse_output_name(name: &str) -> Option<(TensorRole, u32)> {
  let (prefix, stride) = name.rsplit_once("_stride_")?;
  let role = match prefix {
    "cls_pred" => TensorRole::ClassScores,
    "dis_pred" => TensorRole::BoxDistribution,
    "box_pred" => TensorRole::BoxRegression,
    _ => return None,
  };
  Some((role, stride.parse().ok()?))
}

pub struct OnnxBackend {
  session: Session,
  input_name: String,
  output_names: Vec<String>,
  input_size: (u32, u32),
  metadata: HeadMetadata,
}

impl InferenceBackend for OnnxBackend {
  fn load(model_path: &Path, num_threads: usize) -> Result<Self, BackendError> {
    if num_threads == 0 {
      return Err(BackendError::InvalidThreads(num_threads));
    }

    info!("加载 ONNX 模型文件: {}", model_path.display());
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(num_threads)?
      .commit_from_file(model_path)?;

    let input = session
      .inputs
      .first()
      .ok_or_else(|| BackendError::invalid("模型没有输入"))?;
    let input_size = match &input.input_type {
      ValueType::Tensor { shape, .. } if shape.len() == 4 && shape[2] > 0 && shape[3] > 0 => {
        (shape[3] as u32, shape[2] as u32)
      }
      other => {
        return Err(BackendError::invalid(format!("不支持的模型输入: {:?}", other)));
      }
    };
    let input_name = input.name.clone();

    let output_names: Vec<String> = session
      .outputs
      .iter()
      .map(|output| output.name.clone())
      .filter(|name| {
        let known = parse_output_name(name).is_some();
        if !known {
          warn!("忽略无法识别的模型输出: {}", name);
        }
        known
      })
      .collect();
    if output_names.is_empty() {
      return Err(BackendError::invalid("模型没有可识别的检测头输出"));
    }

    debug!("模型输入 {} ({}x{})", input_name, input_size.0, input_size.1);
    debug!("模型输出: {:?}", output_names);

    Ok(Self {
      session,
      input_name,
      output_names,
      input_size,
      metadata: HeadMetadata::default(),
    })
  }

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn metadata(&self) -> &HeadMetadata {
    &self.metadata
  }

  fn run(&mut self, input: &InputTensor) -> Result<Vec<OutputTensor>, BackendError> {
    let actual = (input.width(), input.height());
    if actual != self.input_size {
      return Err(BackendError::InputMismatch {
        expected: self.input_size,
        actual,
      });
    }
    if input.layout() != TensorLayout::Planar {
      return Err(BackendError::InferenceError("ONNX 模型需要 NCHW 输入".to_string()));
    }

    let shape = [
      1usize,
      input.channels(),
      input.height() as usize,
      input.width() as usize,
    ];
    let tensor = Tensor::from_array((shape, input.data().to_vec()))?;
    let input_name = self.input_name.clone();
    let output_names = self.output_names.clone();
    let outputs = self.session.run(inputs![input_name.as_str() => tensor])?;

    let mut tensors = Vec::with_capacity(output_names.len());
    for name in &output_names {
      // 名称已在加载时校验
      let Some((role, stride)) = parse_output_name(name) else {
        continue;
      };
      let (dims, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
      let shape = match dims.len() {
        4 => TensorShape::new(dims[1] as usize, dims[2] as usize, dims[3] as usize),
        3 => TensorShape::new(dims[0] as usize, dims[1] as usize, dims[2] as usize),
        _ => {
          return Err(BackendError::InferenceError(format!(
            "输出 {} 的维度不受支持: {:?}",
            name, dims
          )));
        }
      };
      tensors.push(OutputTensor::new(
        name.as_str(),
        role,
        stride,
        shape,
        TensorLayout::Planar,
        data.to_vec(),
      )?);
    }

    Ok(tensors)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognises_head_output_names() {
    assert_eq!(
      parse_output_name("cls_pred_stride_16"),
      Some((TensorRole::ClassScores, 16))
    );
    assert_eq!(
      parse_output_name("dis_pred_stride_32"),
      Some((TensorRole::BoxDistribution, 32))
    );
    assert_eq!(parse_output_name("output0"), None);
  }
}
