// 该文件是 Kanche（看车）项目的一部分。
// src/model/replay.rs - 回放录制输出的模型
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

//! 把事先录制的原始模型输出当作模型资产使用，每次推理按顺序循环回放一帧。
//!
//! 资产文件为 JSON：
//!
//! ```json
//! {
//!   "input_size": 640,
//!   "layout": "interleaved",
//!   "frames": [
//!     { "outputs": [ { "shape": [1, 2, 6], "data": [0, 0, 64, 64, 0.9, 2, 1, 1, 2, 2, 0.1, 2] } ] }
//!   ]
//! }
//! ```
//!
//! `input_size` 与 `layout` 可省略；只有一帧时也可以直接写顶层 `outputs`。

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::LayoutHint,
  frame::RgbTensor,
  model::{Model, OutputTensor, RawOutput, TensorShape},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型格式错误: {0}")]
  ModelFormatError(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

pub struct ReplayModelBuilder {
  model_path: String,
  layout: Option<LayoutHint>,
}

impl FromUrlWithScheme for ReplayModelBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModelBuilder {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = urlencoding::decode(url.path())
      .map_err(|e| ReplayModelError::ModelPathError(e.to_string()))?
      .into_owned();

    let mut layout = None;
    for (k, v) in url.query_pairs() {
      if k == "layout" {
        layout = Some(parse_layout(&v)?);
      }
    }

    Ok(ReplayModelBuilder { model_path, layout })
  }
}

impl ReplayModelBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      layout: None,
    }
  }

  /// 显式指定输出布局，覆盖资产文件中的声明
  pub fn layout(mut self, layout: LayoutHint) -> Self {
    self.layout = Some(layout);
    self
  }

  pub fn build<const S: u32>(self) -> Result<ReplayModel<S>, ReplayModelError> {
    info!("加载模型文件: {}", self.model_path);
    let content = std::fs::read_to_string(&self.model_path)?;
    debug!("模型文件大小: {:.2} KB", content.len() as f64 / 1024.0);

    let root: Value = serde_json::from_str(&content)?;
    let model = ReplayModel::from_value(&root, self.layout)?;
    info!(
      "回放模型就绪: {} 帧, {} 个输出",
      model.frames.len(),
      model.shapes.len()
    );
    Ok(model)
  }
}

pub struct ReplayModel<const S: u32> {
  frames: Box<[RawOutput]>,
  shapes: Box<[TensorShape]>,
  layout: LayoutHint,
  cursor: AtomicUsize,
}

impl<const S: u32> ReplayModel<S> {
  pub fn from_value(root: &Value, layout: Option<LayoutHint>) -> Result<Self, ReplayModelError> {
    if let Some(size) = root.get("input_size") {
      let size = size
        .as_u64()
        .ok_or_else(|| ReplayModelError::ModelInvalid("input_size 必须是整数".to_string()))?;
      if size != S as u64 {
        return Err(ReplayModelError::ModelInvalid(format!(
          "预期模型输入边长为 {}, 实际为 {}",
          S, size
        )));
      }
    }

    let layout = match (layout, root.get("layout").and_then(Value::as_str)) {
      (Some(layout), _) => layout,
      (None, Some(declared)) => parse_layout(declared)?,
      (None, None) => LayoutHint::Auto,
    };

    let frames: Vec<RawOutput> = match (root.get("frames"), root.get("outputs")) {
      (Some(Value::Array(frames)), _) => frames
        .iter()
        .map(|frame| {
          let outputs = frame
            .get("outputs")
            .ok_or_else(|| ReplayModelError::ModelInvalid("帧缺少 outputs 字段".to_string()))?;
          parse_outputs(outputs)
        })
        .collect::<Result<_, _>>()?,
      (None, Some(outputs)) => vec![parse_outputs(outputs)?],
      _ => {
        return Err(ReplayModelError::ModelInvalid(
          "缺少 frames 或 outputs 字段".to_string(),
        ));
      }
    };

    let first = frames
      .first()
      .ok_or_else(|| ReplayModelError::ModelInvalid("没有可回放的帧".to_string()))?;
    let shapes = first
      .tensors()
      .iter()
      .map(|tensor| TensorShape::from(tensor.shape()))
      .collect();

    Ok(Self {
      frames: frames.into_boxed_slice(),
      shapes,
      layout,
      cursor: AtomicUsize::new(0),
    })
  }
}

impl<const S: u32> Model for ReplayModel<S> {
  type Input = RgbTensor<S>;
  type Error = ReplayModelError;

  fn output_shapes(&self) -> &[TensorShape] {
    &self.shapes
  }

  fn layout_hint(&self) -> LayoutHint {
    self.layout
  }

  fn infer(&self, input: &Self::Input) -> Result<RawOutput, Self::Error> {
    debug!("回放推理, 输入形状 {:?}", input.shape());
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
    Ok(self.frames[index].clone())
  }
}

fn parse_layout(value: &str) -> Result<LayoutHint, ReplayModelError> {
  match value {
    "auto" => Ok(LayoutHint::Auto),
    "interleaved" => Ok(LayoutHint::Interleaved),
    "split" => Ok(LayoutHint::Split),
    other => Err(ReplayModelError::ModelInvalid(format!(
      "未知的输出布局: {}",
      other
    ))),
  }
}

fn parse_outputs(value: &Value) -> Result<RawOutput, ReplayModelError> {
  let outputs = value
    .as_array()
    .ok_or_else(|| ReplayModelError::ModelInvalid("outputs 必须是数组".to_string()))?;

  let tensors = outputs
    .iter()
    .enumerate()
    .map(|(index, output)| {
      let shape = output
        .get("shape")
        .and_then(Value::as_array)
        .ok_or_else(|| ReplayModelError::ModelInvalid(format!("第 {} 个输出缺少 shape", index)))?
        .iter()
        .map(|dim| dim.as_u64().map(|dim| dim as usize))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ReplayModelError::ModelInvalid(format!("第 {} 个输出 shape 无效", index)))?;
      let data = output
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ReplayModelError::ModelInvalid(format!("第 {} 个输出缺少 data", index)))?
        .iter()
        .map(|v| v.as_f64().map(|v| v as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ReplayModelError::ModelInvalid(format!("第 {} 个输出 data 无效", index)))?;
      Ok(OutputTensor::new(shape, data))
    })
    .collect::<Result<Vec<_>, ReplayModelError>>()?;

  Ok(RawOutput::new(tensors))
}
