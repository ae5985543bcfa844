// 该文件是 Kanche（看车）项目的一部分。
// src/task.rs - 检测任务与工作线程
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Kanche contributors

use std::{
  sync::{Arc, Condvar, Mutex, PoisonError, mpsc},
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::{
  detector::CarDetector,
  frame::{RgbTensor, Yuv420Frame},
  model::Model,
  output::Render,
  store::DetectionStore,
};

/// 深度为 1 的“只保留最新帧”槽位：新帧覆盖未处理的旧帧，从不排队
#[derive(Debug)]
pub struct LatestFrameSlot<T> {
  state: Mutex<SlotState<T>>,
  ready: Condvar,
}

#[derive(Debug)]
struct SlotState<T> {
  latest: Option<T>,
  closed: bool,
  dropped: u64,
}

impl<T> Default for LatestFrameSlot<T> {
  fn default() -> Self {
    Self {
      state: Mutex::new(SlotState {
        latest: None,
        closed: false,
        dropped: 0,
      }),
      ready: Condvar::new(),
    }
  }
}

impl<T> LatestFrameSlot<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// 放入新帧，返回不会再被处理的帧（被覆盖的旧帧，或槽位关闭后被拒绝的新帧）
  pub fn push(&self, item: T) -> Option<T> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.closed {
      return Some(item);
    }
    let displaced = state.latest.replace(item);
    if displaced.is_some() {
      state.dropped += 1;
    }
    drop(state);
    self.ready.notify_one();
    displaced
  }

  /// 阻塞直到有帧可取；槽位关闭且为空时返回 `None`
  pub fn take(&self) -> Option<T> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if let Some(item) = state.latest.take() {
        return Some(item);
      }
      if state.closed {
        return None;
      }
      state = self
        .ready
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  pub fn try_take(&self) -> Option<T> {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .latest
      .take()
  }

  pub fn close(&self) {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .closed = true;
    self.ready.notify_all();
  }

  pub fn dropped(&self) -> u64 {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .dropped
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  pub processed: u64,
  pub dropped: u64,
}

/// 独立的检测线程：从槽位取最新帧，检测后整体更新存储
pub struct DetectionWorker {
  slot: Arc<LatestFrameSlot<Arc<Yuv420Frame>>>,
  handle: Option<JoinHandle<u64>>,
}

impl DetectionWorker {
  pub fn spawn<M, const S: u32>(
    detector: CarDetector<M, S>,
    store: Arc<DetectionStore>,
  ) -> std::io::Result<Self>
  where
    M: Model<Input = RgbTensor<S>> + Send + 'static,
  {
    let slot = Arc::new(LatestFrameSlot::<Arc<Yuv420Frame>>::new());
    let handle = thread::Builder::new()
      .name("kanche-detect".to_string())
      .spawn({
        let slot = Arc::clone(&slot);
        move || {
          info!("检测线程启动");
          let mut processed = 0u64;
          while let Some(frame) = slot.take() {
            let now = Instant::now();
            let detections = detector.detect(&frame);
            store.update(detections, frame.width(), frame.height());
            processed += 1;
            debug!("第 {} 帧检测完成，耗时: {:.2?}", processed, now.elapsed());
          }
          info!("检测线程退出，共处理 {} 帧", processed);
          processed
        }
      })?;

    Ok(Self {
      slot,
      handle: Some(handle),
    })
  }

  pub fn submit(&self, frame: Arc<Yuv420Frame>) {
    if self.slot.push(frame).is_some() {
      debug!("检测线程繁忙，丢弃积压帧");
    }
  }

  /// 关闭槽位并等待线程处理完最后一帧
  pub fn shutdown(mut self) -> WorkerStats {
    self.slot.close();
    let processed = match self.handle.take().map(JoinHandle::join) {
      Some(Ok(processed)) => processed,
      Some(Err(_)) => {
        error!("检测线程异常退出");
        0
      }
      None => 0,
    };
    WorkerStats {
      processed,
      dropped: self.slot.dropped(),
    }
  }
}

impl Drop for DetectionWorker {
  fn drop(&mut self) {
    self.slot.close();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("检测线程异常退出");
    }
  }
}

pub trait Task<I, D, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: D, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<I, M, O, RE, const S: u32> Task<I, CarDetector<M, S>, O> for OneShotTask
where
  I: Iterator<Item = Yuv420Frame>,
  M: Model<Input = RgbTensor<S>>,
  O: Render<Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: CarDetector<M, S>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let store = DetectionStore::new();
    let now = Instant::now();
    let detections = detector.detect(&frame);
    info!(
      "推理完成，检测到 {} 辆车，耗时: {:.2?}",
      detections.len(),
      now.elapsed()
    );
    store.update(detections, frame.width(), frame.height());

    output.render_result(&frame, &store.snapshot())?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  frame_interval: Option<Duration>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 按固定间隔投递帧，模拟相机节奏
  pub fn with_frame_interval(mut self, frame_interval: Option<Duration>) -> Self {
    self.frame_interval = frame_interval;
    self
  }
}

impl<I, M, O, RE, const S: u32> Task<I, CarDetector<M, S>, O> for ContinuousTask
where
  I: Iterator<Item = Yuv420Frame>,
  M: Model<Input = RgbTensor<S>> + Send + 'static,
  O: Render<Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: CarDetector<M, S>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理函数")?;

    let store = Arc::new(DetectionStore::new());
    let worker = DetectionWorker::spawn(detector, Arc::clone(&store)).context("无法启动检测线程")?;

    let mut frame_index = 0usize;
    let mut preview = None;
    for frame in input {
      frame_index += 1;
      debug!("投递第 {} 帧图像", frame_index);
      let frame = Arc::new(frame);
      worker.submit(Arc::clone(&frame));

      if store.take_redraw() {
        output.render_result(&frame, &store.snapshot())?;
      }
      preview = Some(frame);

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(interval) = self.frame_interval {
        thread::sleep(interval);
      }
    }

    let stats = worker.shutdown();
    if let Some(frame) = preview
      && store.take_redraw()
    {
      output.render_result(&frame, &store.snapshot())?;
    }

    info!(
      "任务完成，投递 {} 帧，检测 {} 帧，丢弃 {} 帧",
      frame_index, stats.processed, stats.dropped
    );
    Ok(())
  }
}
