// 该文件是 Jianmu （检目） 项目的一部分。
// src/engine.rs - 检测引擎
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  backend::{BackendError, InferenceBackend},
  decode::{DecodeError, DecodeParams, DirectBoxDecoder, DistributionDecoder, HeadDecoder, decode_all},
  frame::{ImageView, RgbFrame},
  label::{LabelError, LabelTable},
  model::{DetectResult, Detection, Model, StageTimings},
  nms::Suppressor,
  preprocess::{Preprocess, PreprocessError},
};

mod config;
pub use self::config::{
  ConfigError, DEFAULT_MAX_RESULTS, DEFAULT_NUM_THREADS, DEFAULT_SCORE_THRESHOLD, EngineConfig,
  HeadFormat, UNKNOWN_LABEL, UnknownLabelPolicy,
};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("引擎已初始化")]
  AlreadyInitialized,
  #[error("引擎未初始化")]
  NotInitialized,
  #[error("引擎已释放")]
  Finalized,
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("推理后端错误: {0}")]
  BackendError(#[from] BackendError),
  #[error("前处理错误: {0}")]
  PreprocessError(#[from] PreprocessError),
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
  Uninitialized,
  Ready,
  Finalized,
}

struct Loaded<B> {
  backend: B,
  labels: LabelTable,
  preprocessor: Box<dyn Preprocess>,
  decoder: HeadDecoder,
  suppressor: Suppressor,
  score_threshold: f32,
  max_results: usize,
  unknown_label: UnknownLabelPolicy,
}

enum EngineState<B> {
  Uninitialized,
  Ready(Box<Loaded<B>>),
  Finalized,
}

/// 检测引擎：前处理 -> 推理 -> 解码 -> NMS -> 标签 -> 截断。
///
/// 每个实例独立拥有自己的标签表与推理后端。`process` 需要 `&mut self`，
/// 同一实例同一时刻只处理一帧。
pub struct DetectionEngine<B: InferenceBackend> {
  state: EngineState<B>,
}

impl<B: InferenceBackend> Default for DetectionEngine<B> {
  fn default() -> Self {
    Self::new()
  }
}

fn elapsed_ms(start: Instant) -> f64 {
  start.elapsed().as_secs_f64() * 1000.0
}

impl<B: InferenceBackend> DetectionEngine<B> {
  pub fn new() -> Self {
    Self {
      state: EngineState::Uninitialized,
    }
  }

  pub fn status(&self) -> EngineStatus {
    match self.state {
      EngineState::Uninitialized => EngineStatus::Uninitialized,
      EngineState::Ready(_) => EngineStatus::Ready,
      EngineState::Finalized => EngineStatus::Finalized,
    }
  }

  pub fn labels(&self) -> Option<&LabelTable> {
    match &self.state {
      EngineState::Ready(loaded) => Some(&loaded.labels),
      _ => None,
    }
  }

  pub fn backend(&self) -> Option<&B> {
    match &self.state {
      EngineState::Ready(loaded) => Some(&loaded.backend),
      _ => None,
    }
  }

  /// 使用配置中的默认前处理初始化
  pub fn initialize(&mut self, config: EngineConfig) -> Result<(), EngineError> {
    let preprocess = config.preprocess.clone();
    self.initialize_with(config, preprocess)
  }

  /// 使用自定义前处理初始化。失败时保持未初始化状态。
  pub fn initialize_with<P: Preprocess + 'static>(
    &mut self,
    config: EngineConfig,
    preprocessor: P,
  ) -> Result<(), EngineError> {
    match self.state {
      EngineState::Uninitialized => {}
      EngineState::Ready(_) => {
        error!("引擎已初始化");
        return Err(EngineError::AlreadyInitialized);
      }
      EngineState::Finalized => {
        error!("引擎已释放，无法再次初始化");
        return Err(EngineError::Finalized);
      }
    }

    config.validate()?;

    let labels = LabelTable::load(&config.label_path)?;
    info!("加载模型文件: {}", config.model_path.display());
    let backend = B::load(&config.model_path, config.num_threads)?;
    let (input_width, input_height) = backend.input_size();
    if input_width == 0 || input_height == 0 {
      return Err(BackendError::invalid(format!("模型输入尺寸无效: {}x{}", input_width, input_height)).into());
    }

    let decoder = match config.head {
      HeadFormat::Distribution => {
        HeadDecoder::Distribution(DistributionDecoder::new(config.bins, config.activation))
      }
      HeadFormat::DirectBox => {
        let mut anchors = backend.metadata().anchors.clone();
        anchors.extend(config.anchors.clone());
        HeadDecoder::DirectBox(
          DirectBoxDecoder::new(anchors)
            .variances(config.variances)
            .background_class(config.background_class)
            .activation(config.activation),
        )
      }
    };

    info!(
      "引擎初始化完成: 检测头 {:?}, 输入 {}x{}, 标签 {} 个, 线程 {}",
      config.head,
      input_width,
      input_height,
      labels.len(),
      config.num_threads
    );

    self.state = EngineState::Ready(Box::new(Loaded {
      backend,
      labels,
      preprocessor: Box::new(preprocessor),
      decoder,
      suppressor: Suppressor::new(config.nms),
      score_threshold: config.score_threshold,
      max_results: config.max_results,
      unknown_label: config.unknown_label,
    }));
    Ok(())
  }

  fn loaded_mut(&mut self) -> Result<&mut Loaded<B>, EngineError> {
    match &mut self.state {
      EngineState::Ready(loaded) => Ok(loaded),
      EngineState::Uninitialized => {
        error!("引擎未初始化");
        Err(EngineError::NotInitialized)
      }
      EngineState::Finalized => {
        error!("引擎已释放");
        Err(EngineError::Finalized)
      }
    }
  }

  pub fn process(&mut self, image: ImageView<'_>) -> Result<DetectResult, EngineError> {
    let loaded = self.loaded_mut()?;
    let (input_width, input_height) = loaded.backend.input_size();
    let mut timings = StageTimings::default();

    let start = Instant::now();
    let (input, transform) = loaded
      .preprocessor
      .preprocess(image, input_width, input_height)?;
    timings.pre_process_ms = elapsed_ms(start);

    let start = Instant::now();
    debug!("执行模型推理");
    let outputs = loaded.backend.run(&input)?;
    timings.inference_ms = elapsed_ms(start);

    let start = Instant::now();
    let params = DecodeParams {
      input_width,
      input_height,
      score_threshold: loaded.score_threshold,
      transform,
    };
    let candidates = decode_all(&loaded.decoder, &outputs, &params)?;
    debug!("候选框数量: {}", candidates.len());

    let mut items = loaded.suppressor.suppress(candidates);
    for item in items.iter_mut() {
      item.label = resolve_label(&loaded.labels, item, loaded.unknown_label)?;
    }
    let items = truncate(items, loaded.max_results);
    timings.post_process_ms = elapsed_ms(start);

    debug!(
      "检测到 {} 个物体, 耗时 {:.2} / {:.2} / {:.2} ms",
      items.len(),
      timings.pre_process_ms,
      timings.inference_ms,
      timings.post_process_ms
    );

    Ok(DetectResult { items, timings })
  }

  /// 释放推理后端与标签表
  pub fn finalize(&mut self) -> Result<(), EngineError> {
    match self.state {
      EngineState::Ready(_) => {
        self.state = EngineState::Finalized;
        info!("引擎已释放");
        Ok(())
      }
      EngineState::Uninitialized => {
        error!("引擎未初始化");
        Err(EngineError::NotInitialized)
      }
      EngineState::Finalized => {
        error!("引擎已释放");
        Err(EngineError::Finalized)
      }
    }
  }
}

fn resolve_label(
  labels: &LabelTable,
  item: &Detection,
  policy: UnknownLabelPolicy,
) -> Result<String, LabelError> {
  match labels.resolve(item.class_id) {
    Ok(label) => Ok(label.to_string()),
    Err(err) => match policy {
      UnknownLabelPolicy::Fail => {
        error!("{}", err);
        Err(err)
      }
      UnknownLabelPolicy::Sentinel => {
        warn!("{}, 使用标签 {}", err, UNKNOWN_LABEL);
        Ok(UNKNOWN_LABEL.to_string())
      }
    },
  }
}

/// 按置信度降序（稳定）排列后保留前 `max_results` 个
fn truncate(mut items: Vec<Detection>, max_results: usize) -> Vec<Detection> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  if items.len() > max_results {
    debug!("结果数 {} 超过上限 {}, 截断", items.len(), max_results);
    items.truncate(max_results);
  }
  items
}

impl<B: InferenceBackend> Model for DetectionEngine<B> {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = EngineError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.process(input.view())
  }
}
