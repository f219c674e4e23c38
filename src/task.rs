// 该文件是 Jianmu （检目） 项目的一部分。
// src/task.rs - 推理任务循环
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

use std::{thread, time::Duration};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

/// 重复推理时默认的次数
pub const DEFAULT_REPEAT_TIMES: usize = 1000;
/// 统计平均耗时时跳过的预热次数
const WARMUP_TIMES: usize = 2;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  if times.len() <= WARMUP_TIMES {
    return None;
  }
  let measured = &times[WARMUP_TIMES..];
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

/// 只处理第一帧
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧反复推理，用于测量耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: DEFAULT_REPEAT_TIMES,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理 {} 次...", self.repeat_times);
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = std::time::Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    match average_after_warmup(&times) {
      Some(average) => warn!("平均推理时间: {:.2?}", average),
      None => warn!("推理次数不足 {} 次，不统计平均时间", WARMUP_TIMES + 1),
    }

    Ok(())
  }
}

/// 逐帧处理输入，直到输入结束、达到指定帧数或收到 Ctrl-C
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index: usize = 0;
    let mut now = std::time::Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, convert::Infallible, rc::Rc};

  use super::*;

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = std::io::Error;

    fn infer(&mut self, input: &u32) -> Result<u32, Self::Error> {
      Ok(input * 2)
    }
  }

  #[derive(Clone, Default)]
  struct Collect(Rc<RefCell<Vec<u32>>>);

  #[derive(Debug, thiserror::Error)]
  #[error("never")]
  struct Never(Infallible);

  impl Render<u32, u32> for Collect {
    type Error = Never;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), Self::Error> {
      self.0.borrow_mut().push(*result);
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_frame_only() {
    let sink = Collect::default();
    OneShotTask
      .run_task(vec![3, 4].into_iter(), Doubler, sink.clone())
      .unwrap();
    assert_eq!(*sink.0.borrow(), vec![6]);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let result = OneShotTask.run_task(Vec::<u32>::new().into_iter(), Doubler, Collect::default());
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_runs_requested_times() {
    let sink = Collect::default();
    RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(vec![1].into_iter(), Doubler, sink.clone())
      .unwrap();
    assert_eq!(*sink.0.borrow(), vec![2; 5]);
  }

  #[test]
  fn average_skips_warmup() {
    let times = [10, 10, 1, 3].map(Duration::from_millis);
    assert_eq!(average_after_warmup(&times), Some(Duration::from_millis(2)));
    assert_eq!(average_after_warmup(&times[..2]), None);
  }
}
