// 该文件是 Kanche（看车）项目的一部分。
// src/store.rs - 最新检测结果存储
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

use std::sync::{
  Arc, Mutex, PoisonError,
  atomic::{AtomicBool, Ordering},
};

use crate::model::Detection;

/// 一次完整的检测结果及产生它的源帧尺寸
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewDetections {
  pub detections: Vec<Detection>,
  pub source_width: u32,
  pub source_height: u32,
}

/// 工作线程与渲染线程之间唯一的交接点，整组结果原子替换
#[derive(Debug, Default)]
pub struct DetectionStore {
  current: Mutex<Arc<ViewDetections>>,
  redraw: AtomicBool,
}

impl DetectionStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&self, detections: Vec<Detection>, source_width: u32, source_height: u32) {
    let next = Arc::new(ViewDetections {
      detections,
      source_width,
      source_height,
    });
    *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
    self.redraw.store(true, Ordering::Release);
  }

  pub fn snapshot(&self) -> Arc<ViewDetections> {
    self
      .current
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// 读取并清除待重绘标记
  pub fn take_redraw(&self) -> bool {
    self.redraw.swap(false, Ordering::AcqRel)
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;
  use crate::model::BBox;

  fn cars(count: usize) -> Vec<Detection> {
    (0..count)
      .map(|i| Detection {
        bbox: BBox::from_corners(i as f32, i as f32, i as f32 + 1.0, i as f32 + 1.0),
        label: "car",
        score: 0.5,
      })
      .collect()
  }

  #[test]
  fn empty_store_has_zero_source() {
    let store = DetectionStore::new();
    let snapshot = store.snapshot();
    assert!(snapshot.detections.is_empty());
    assert_eq!((snapshot.source_width, snapshot.source_height), (0, 0));
    assert!(!store.take_redraw());
  }

  #[test]
  fn update_supersedes_previous_state() {
    let store = DetectionStore::new();
    store.update(cars(3), 640, 480);
    let old = store.snapshot();
    store.update(cars(1), 1280, 720);

    assert_eq!(old.detections.len(), 3);
    let current = store.snapshot();
    assert_eq!(current.detections.len(), 1);
    assert_eq!((current.source_width, current.source_height), (1280, 720));
  }

  #[test]
  fn redraw_flag_is_consumed_once() {
    let store = DetectionStore::new();
    store.update(Vec::new(), 10, 10);
    assert!(store.take_redraw());
    assert!(!store.take_redraw());
  }

  #[test]
  fn readers_never_see_torn_triples() {
    let store = Arc::new(DetectionStore::new());
    let writer = {
      let store = Arc::clone(&store);
      thread::spawn(move || {
        for i in 1..=500u32 {
          store.update(cars(i as usize % 7), i, i);
        }
      })
    };

    for _ in 0..500 {
      let snapshot = store.snapshot();
      assert_eq!(snapshot.source_width, snapshot.source_height);
      if snapshot.source_width > 0 {
        assert_eq!(snapshot.detections.len(), snapshot.source_width as usize % 7);
      }
    }
    writer.join().unwrap();
  }
}
