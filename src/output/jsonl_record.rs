// 该文件是 Kanche（看车）项目的一部分。
// src/output/jsonl_record.rs - 检测结果记录
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
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Yuv420Frame,
  mapper::project_to_view,
  output::{Render, decode_path, parse_view_size},
  store::ViewDetections,
};

#[derive(Error, Debug)]
pub enum JsonlRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("URI 参数错误: {0}")]
  InvalidQuery(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// `jsonl:///path/out.jsonl?view_width=W&view_height=H`，每次渲染追加一行
pub struct JsonlRecordOutput {
  path: PathBuf,
  view_size: Option<(u32, u32)>,
  writer: Mutex<BufWriter<File>>,
  frame_counter: AtomicU64,
}

impl FromUrlWithScheme for JsonlRecordOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonlRecordOutput {
  type Error = JsonlRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonlRecordOutputError::SchemeMismatch);
    }

    let path = PathBuf::from(decode_path(uri).map_err(JsonlRecordOutputError::InvalidQuery)?);
    let view_size = parse_view_size(uri).map_err(JsonlRecordOutputError::InvalidQuery)?;
    Self::create(path, view_size)
  }
}

impl JsonlRecordOutput {
  pub fn create(
    path: impl AsRef<Path>,
    view_size: Option<(u32, u32)>,
  ) -> Result<Self, JsonlRecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Self {
      path,
      view_size,
      writer: Mutex::new(BufWriter::new(file)),
      frame_counter: AtomicU64::new(0),
    })
  }

  fn record(&self, result: &ViewDetections) -> Value {
    let frame = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
    let (view_width, view_height) = self
      .view_size
      .unwrap_or((result.source_width, result.source_height));
    let projected = project_to_view(result, view_width, view_height);

    let detections: Vec<Value> = result
      .detections
      .iter()
      .enumerate()
      .map(|(index, detection)| {
        json!({
          "label": detection.label,
          "score": detection.score,
          "caption": detection.caption(),
          "source_box": detection.bbox.to_array(),
          "view_box": projected.get(index).map(|d| d.bbox.to_array()),
        })
      })
      .collect();

    json!({
      "frame": frame,
      "timestamp": Utc::now().to_rfc3339(),
      "source": { "width": result.source_width, "height": result.source_height },
      "view": { "width": view_width, "height": view_height },
      "detections": detections,
    })
  }
}

impl Render for JsonlRecordOutput {
  type Error = JsonlRecordOutputError;

  fn render_result(&self, _preview: &Yuv420Frame, result: &ViewDetections) -> Result<(), Self::Error> {
    let record = self.record(result);
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", record)?;
    writer.flush()?;
    debug!("检测记录写入 {}", self.path.display());
    Ok(())
  }
}
