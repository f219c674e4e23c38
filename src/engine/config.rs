// 该文件是 Jianmu （检目） 项目的一部分。
// src/engine/config.rs - 引擎配置
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

use std::{collections::BTreeMap, path::PathBuf};

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl,
  decode::{DEFAULT_BINS, DEFAULT_VARIANCES, ScoreActivation},
  nms::NmsConfig,
  preprocess::Letterbox,
};

pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.35;
pub const DEFAULT_MAX_RESULTS: usize = 100;

const NANODET_SCHEME: &str = "nanodet";
const SSD_SCHEME: &str = "ssd";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("模型路径必须使用 nanodet 或 ssd 方案, 实际为 {0}")]
  SchemeMismatch(String),
  #[error("缺少标签文件参数 labels")]
  MissingLabels,
  #[error("参数 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("未知参数: {0}")]
  UnknownKey(String),
  #[error("线程数必须大于 0")]
  ZeroThreads,
  #[error("阈值 {name} 必须位于 [0, 1] 区间, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("最大结果数必须大于 0")]
  ZeroMaxResults,
  #[error("分布档位数必须大于 0")]
  ZeroBins,
}

/// 检测头格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadFormat {
  /// SSD 风格，直接回归框
  DirectBox,
  /// NanoDet 风格，距离分布
  Distribution,
}

/// 类别编号超出标签表时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownLabelPolicy {
  /// 整个 `process` 调用失败
  #[default]
  Fail,
  /// 使用 [`UNKNOWN_LABEL`] 作为标签
  Sentinel,
}

pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
  pub head: HeadFormat,
  pub model_path: PathBuf,
  pub label_path: PathBuf,
  pub num_threads: usize,
  pub score_threshold: f32,
  pub nms: NmsConfig,
  /// 抑制之后报告的最大结果数
  pub max_results: usize,
  pub unknown_label: UnknownLabelPolicy,
  pub activation: ScoreActivation,
  /// 分布检测头每条边的档位数
  pub bins: usize,
  /// 直接回归检测头的方差
  pub variances: [f32; 2],
  pub background_class: Option<usize>,
  /// 步长 -> 锚框 (宽, 高)，覆盖模型元数据中同一步长的锚框
  pub anchors: BTreeMap<u32, Vec<[f32; 2]>>,
  pub preprocess: Letterbox,
}

impl EngineConfig {
  pub fn new(head: HeadFormat, model_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
    let preprocess = match head {
      HeadFormat::Distribution => Letterbox::nanodet(),
      HeadFormat::DirectBox => Letterbox::mobilenet_ssd(),
    };
    Self {
      head,
      model_path: model_path.into(),
      label_path: label_path.into(),
      num_threads: DEFAULT_NUM_THREADS,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      nms: NmsConfig::default(),
      max_results: DEFAULT_MAX_RESULTS,
      unknown_label: UnknownLabelPolicy::default(),
      activation: ScoreActivation::default(),
      bins: DEFAULT_BINS,
      variances: DEFAULT_VARIANCES,
      background_class: None,
      anchors: BTreeMap::new(),
      preprocess,
    }
  }

  pub fn threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.nms.iou_threshold = threshold;
    self
  }

  pub fn weighted_merge(mut self, enabled: bool) -> Self {
    self.nms.weighted_merge = enabled;
    self
  }

  pub fn max_results(mut self, max_results: usize) -> Self {
    self.max_results = max_results;
    self
  }

  pub fn unknown_label(mut self, policy: UnknownLabelPolicy) -> Self {
    self.unknown_label = policy;
    self
  }

  pub fn activation(mut self, activation: ScoreActivation) -> Self {
    self.activation = activation;
    self
  }

  pub fn bins(mut self, bins: usize) -> Self {
    self.bins = bins;
    self
  }

  pub fn background_class(mut self, class_id: Option<usize>) -> Self {
    self.background_class = class_id;
    self
  }

  pub fn anchors(mut self, stride: u32, sizes: Vec<[f32; 2]>) -> Self {
    self.anchors.insert(stride, sizes);
    self
  }

  pub fn preprocess(mut self, preprocess: Letterbox) -> Self {
    self.preprocess = preprocess;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.num_threads == 0 {
      return Err(ConfigError::ZeroThreads);
    }
    if self.max_results == 0 {
      return Err(ConfigError::ZeroMaxResults);
    }
    if self.head == HeadFormat::Distribution && self.bins == 0 {
      return Err(ConfigError::ZeroBins);
    }
    for (name, value) in [
      ("score", self.score_threshold),
      ("iou", self.nms.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }
    Ok(())
  }
}

fn invalid(key: &str, value: &str) -> ConfigError {
  ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| invalid(key, value))
}

/// `16x16,32x8` 形式的锚框列表
fn parse_anchors(key: &str, value: &str) -> Result<Vec<[f32; 2]>, ConfigError> {
  value
    .split(',')
    .map(|size| {
      let (w, h) = size.split_once('x').ok_or_else(|| invalid(key, value))?;
      Ok([parse_value(key, w)?, parse_value(key, h)?])
    })
    .collect()
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(invalid(key, value)),
  }
}

/// `nanodet:///models/nanodet.json?labels=/models/coco.txt&threads=4&score=0.35&iou=0.6&merge=true&max=100`
impl FromUrl for EngineConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let head = match url.scheme() {
      NANODET_SCHEME => HeadFormat::Distribution,
      SSD_SCHEME => HeadFormat::DirectBox,
      other => {
        error!("模型路径方案不匹配: {}", other);
        return Err(ConfigError::SchemeMismatch(other.to_string()));
      }
    };

    let label_path = url
      .query_pairs()
      .find(|(k, _)| k == "labels")
      .map(|(_, v)| v.into_owned())
      .ok_or(ConfigError::MissingLabels)?;

    let mut config = EngineConfig::new(head, crate::decode_url_path(url), label_path);

    for (key, value) in url.query_pairs() {
      let value = value.as_ref();
      match key.as_ref() {
        "labels" => {}
        "threads" => config.num_threads = parse_value(&key, value)?,
        "score" => config.score_threshold = parse_value(&key, value)?,
        "iou" => config.nms.iou_threshold = parse_value(&key, value)?,
        "merge" => config.nms.weighted_merge = parse_flag(&key, value)?,
        "max" => config.max_results = parse_value(&key, value)?,
        "bins" => config.bins = parse_value(&key, value)?,
        "background" => config.background_class = Some(parse_value(&key, value)?),
        "unknown" => {
          config.unknown_label = match value {
            "fail" => UnknownLabelPolicy::Fail,
            "sentinel" => UnknownLabelPolicy::Sentinel,
            _ => return Err(invalid(&key, value)),
          }
        }
        "activation" => {
          config.activation = match value {
            "identity" | "none" => ScoreActivation::Identity,
            "sigmoid" => ScoreActivation::Sigmoid,
            _ => return Err(invalid(&key, value)),
          }
        }
        other => match other.strip_prefix("anchors").map(str::parse::<u32>) {
          Some(Ok(stride)) => {
            config.anchors.insert(stride, parse_anchors(other, value)?);
          }
          _ => return Err(ConfigError::UnknownKey(other.to_string())),
        },
      }
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(url: &str) -> Result<EngineConfig, ConfigError> {
    EngineConfig::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn parses_full_nanodet_url() {
    let config = parse(
      "nanodet:///models/nano%20det.json?labels=/models/coco.txt&threads=2&score=0.4&iou=0.5&merge=true&max=10&unknown=sentinel&activation=sigmoid&bins=8",
    )
    .unwrap();
    assert_eq!(config.head, HeadFormat::Distribution);
    assert_eq!(config.model_path, PathBuf::from("/models/nano det.json"));
    assert_eq!(config.label_path, PathBuf::from("/models/coco.txt"));
    assert_eq!(config.num_threads, 2);
    assert_eq!(config.score_threshold, 0.4);
    assert_eq!(config.nms.iou_threshold, 0.5);
    assert!(config.nms.weighted_merge);
    assert_eq!(config.max_results, 10);
    assert_eq!(config.unknown_label, UnknownLabelPolicy::Sentinel);
    assert_eq!(config.activation, ScoreActivation::Sigmoid);
  }

  #[test]
  fn defaults_apply_for_ssd() {
    let config = parse("ssd:///m.json?labels=/l.txt&background=0").unwrap();
    assert_eq!(config.head, HeadFormat::DirectBox);
    assert_eq!(config.num_threads, DEFAULT_NUM_THREADS);
    assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
    assert_eq!(config.background_class, Some(0));
    assert!(!config.nms.weighted_merge);
    assert_eq!(config.unknown_label, UnknownLabelPolicy::Fail);
  }

  #[test]
  fn anchors_per_stride_from_query() {
    let config = parse("ssd:///m.json?labels=/l.txt&anchors16=16x16,32x8&anchors32=64x64").unwrap();
    assert_eq!(config.anchors[&16], vec![[16.0, 16.0], [32.0, 8.0]]);
    assert_eq!(config.anchors[&32], vec![[64.0, 64.0]]);
    assert!(matches!(
      parse("ssd:///m.json?labels=/l.txt&anchors16=16"),
      Err(ConfigError::InvalidValue { .. })
    ));
  }

  #[test]
  fn rejects_bad_urls() {
    assert_eq!(
      parse("yolo:///m.json?labels=/l.txt").unwrap_err(),
      ConfigError::SchemeMismatch("yolo".into())
    );
    assert_eq!(parse("nanodet:///m.json").unwrap_err(), ConfigError::MissingLabels);
    assert_eq!(
      parse("nanodet:///m.json?labels=/l.txt&threads=0").unwrap_err(),
      ConfigError::ZeroThreads
    );
    assert_eq!(
      parse("nanodet:///m.json?labels=/l.txt&bins=0").unwrap_err(),
      ConfigError::ZeroBins
    );
    assert_eq!(
      EngineConfig::new(HeadFormat::Distribution, "/m.json", "/l.txt").bins(0).validate(),
      Err(ConfigError::ZeroBins)
    );
    assert_eq!(
      parse("nanodet:///m.json?labels=/l.txt&threads=many").unwrap_err(),
      ConfigError::InvalidValue {
        key: "threads".into(),
        value: "many".into()
      }
    );
    assert_eq!(
      parse("nanodet:///m.json?labels=/l.txt&colour=red").unwrap_err(),
      ConfigError::UnknownKey("colour".into())
    );
    assert!(matches!(
      parse("nanodet:///m.json?labels=/l.txt&score=1.5"),
      Err(ConfigError::ThresholdOutOfRange { name: "score", .. })
    ));
    assert!(matches!(
      parse("nanodet:///m.json?labels=/l.txt&unknown=maybe"),
      Err(ConfigError::InvalidValue { .. })
    ));
  }
}
