// 该文件是 Jianmu （检目） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续多帧检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use jianmu::{
  FromUrl,
  engine::{DetectionEngine, EngineConfig},
  task::{ContinuousTask, Task},
};
use tracing::info;

#[cfg(feature = "onnx")]
type Backend = jianmu::backend::OnnxBackend;
#[cfg(not(feature = "onnx"))]
type Backend = jianmu::backend::ReplayBackend;

/// Jianmu 连续检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型配置
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 folder:///data/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型配置: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = jianmu::input::InputWrapper::from_url(&args.input)?;
  let config = EngineConfig::from_url(&args.model)?;
  let mut engine = DetectionEngine::<Backend>::new();
  engine.initialize(config)?;
  let output = jianmu::output::OutputWrapper::from_url(&args.output)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, engine, output)?;

  Ok(())
}
