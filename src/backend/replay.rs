// 该文件是 Jianmu （检目） 项目的一部分。
// src/backend/replay.rs - 回放后端（从 JSON 读取录制的输出张量）
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
//
// 模型文件格式:
//
// {
//   "input_width": 320, "input_height": 320,
//   "anchors": { "16": [[w, h], ...] },
//   "outputs": [
//     { "name": "cls_pred_stride_8", "role": "cls", "stride": 8,
//       "shape": [80, 40, 40], "layout": "chw", "data": [...] }
//   ]
// }

use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
  backend::{BackendError, HeadMetadata, InferenceBackend},
  preprocess::InputTensor,
  tensor::{OutputTensor, TensorLayout, TensorShape},
};

#[derive(Deserialize, Debug)]
struct ReplayModel {
  input_width: u32,
  input_height: u32,
  /// JSON 对象的键只能是字符串，步长在校验时解析
  #[serde(default)]
  anchors: BTreeMap<String, Vec<[f32; 2]>>,
  outputs: Vec<ReplayOutput>,
}

#[derive(Deserialize, Debug)]
struct ReplayOutput {
  name: String,
  role: String,
  stride: u32,
  shape: Vec<usize>,
  #[serde(default)]
  layout: Option<String>,
  data: Vec<f32>,
}

impl ReplayOutput {
  fn into_tensor(self) -> Result<OutputTensor, BackendError> {
    let shape = match self.shape.as_slice() {
      &[c, h, w] | &[1, c, h, w] => TensorShape::new(c, h, w),
      _ => {
        return Err(BackendError::invalid(format!(
          "张量 {} 的 shape 必须为 [C, H, W] 或 [1, C, H, W]",
          self.name
        )));
      }
    };
    let layout = match self.layout.as_deref() {
      Some(layout) => layout.parse()?,
      None => TensorLayout::Planar,
    };
    Ok(OutputTensor::new(
      self.name,
      self.role.parse()?,
      self.stride,
      shape,
      layout,
      self.data,
    )?)
  }
}

#[derive(Debug, Clone)]
pub struct ReplayBackend {
  input_size: (u32, u32),
  metadata: HeadMetadata,
  outputs: Vec<OutputTensor>,
}

impl ReplayBackend {
  pub fn new(input_size: (u32, u32), metadata: HeadMetadata, outputs: Vec<OutputTensor>) -> Self {
    Self {
      input_size,
      metadata,
      outputs,
    }
  }

  pub fn from_json_str(text: &str) -> Result<Self, BackendError> {
    let model: ReplayModel =
      serde_json::from_str(text).map_err(|e| BackendError::invalid(format!("JSON 解析失败: {}", e)))?;

    let mut metadata = HeadMetadata::default();
    for (stride, sizes) in model.anchors {
      let stride: u32 = stride
        .parse()
        .map_err(|_| BackendError::invalid(format!("无效的锚框步长: {}", stride)))?;
      metadata.anchors.insert(stride, sizes);
    }

    if model.outputs.is_empty() {
      return Err(BackendError::invalid("outputs 为空"));
    }
    let outputs = model
      .outputs
      .into_iter()
      .map(ReplayOutput::into_tensor)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self::new((model.input_width, model.input_height), metadata, outputs))
  }

  pub fn outputs(&self) -> &[OutputTensor] {
    &self.outputs
  }
}

impl InferenceBackend for ReplayBackend {
  fn load(model_path: &Path, num_threads: usize) -> Result<Self, BackendError> {
    if num_threads == 0 {
      return Err(BackendError::InvalidThreads(num_threads));
    }
    info!("加载回放模型文件: {}", model_path.display());
    let text = std::fs::read_to_string(model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      text.len() as f64 / (1024.0 * 1024.0)
    );
    let backend = Self::from_json_str(&text)?;
    debug!(
      "模型输入 {}x{}, 输出数量 {}",
      backend.input_size.0,
      backend.input_size.1,
      backend.outputs.len()
    );
    Ok(backend)
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
    Ok(self.outputs.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::TensorError;

  const MODEL: &str = r#"{
    "input_width": 16, "input_height": 16,
    "anchors": { "16": [[16, 16], [8.5, 4]] },
    "outputs": [
      { "name": "box", "role": "box", "stride": 16, "shape": [1, 8, 1, 1],
        "data": [0, 0, 0, 0, 0, 0, 0, 0] },
      { "name": "cls", "role": "cls", "stride": 16, "shape": [2, 1, 1], "layout": "hwc",
        "data": [0.25, 0.75] }
    ]
  }"#;

  #[test]
  fn parses_model_description() {
    let backend = ReplayBackend::from_json_str(MODEL).unwrap();
    assert_eq!(backend.input_size(), (16, 16));
    assert_eq!(backend.metadata().anchors[&16], vec![[16.0, 16.0], [8.5, 4.0]]);
    assert_eq!(backend.outputs().len(), 2);
    assert_eq!(backend.outputs()[0].shape(), TensorShape::new(8, 1, 1));
    assert_eq!(backend.outputs()[1].layout(), TensorLayout::Interleaved);
    assert_eq!(backend.outputs()[1].at(1, 0, 0), 0.75);
  }

  #[test]
  fn rejects_bad_shape_and_length() {
    let bad_shape = MODEL.replace("[2, 1, 1]", "[2, 1]");
    assert!(matches!(
      ReplayBackend::from_json_str(&bad_shape),
      Err(BackendError::ModelInvalid(_))
    ));
    let bad_len = MODEL.replace("[0.25, 0.75]", "[0.25]");
    assert!(matches!(
      ReplayBackend::from_json_str(&bad_len),
      Err(BackendError::TensorError(_))
    ));
    assert!(ReplayBackend::from_json_str("not json").is_err());
  }

  #[test]
  fn rejects_overflowing_shape_without_panicking() {
    let huge = MODEL.replace("[2, 1, 1]", "[4611686018427387904, 2, 2]").replace("[0.25, 0.75]", "[]");
    assert!(matches!(
      ReplayBackend::from_json_str(&huge),
      Err(BackendError::TensorError(TensorError::ShapeOverflow(_)))
    ));
  }

  #[test]
  fn rejects_non_integer_dims() {
    let text_dim = MODEL.replace("[2, 1, 1]", "[1, \"2\", 1, 1]");
    assert!(matches!(
      ReplayBackend::from_json_str(&text_dim),
      Err(BackendError::ModelInvalid(_))
    ));
    let bad_stride = MODEL.replace(r#""16": [[16"#, r#""x": [[16"#);
    assert!(matches!(
      ReplayBackend::from_json_str(&bad_stride),
      Err(BackendError::ModelInvalid(_))
    ));
  }

  #[test]
  fn run_checks_input_size() {
    let mut backend = ReplayBackend::from_json_str(MODEL).unwrap();
    let wrong = InputTensor::new(8, 8, TensorLayout::Planar, vec![0.0; 3 * 64]).unwrap();
    assert!(matches!(
      backend.run(&wrong),
      Err(BackendError::InputMismatch { .. })
    ));
    let right = InputTensor::new(16, 16, TensorLayout::Planar, vec![0.0; 3 * 256]).unwrap();
    assert_eq!(backend.run(&right).unwrap().len(), 2);
  }

  #[test]
  fn load_rejects_zero_threads() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), MODEL).unwrap();
    assert!(matches!(
      ReplayBackend::load(file.path(), 0),
      Err(BackendError::InvalidThreads(0))
    ));
    assert!(ReplayBackend::load(file.path(), 2).is_ok());
  }
}
