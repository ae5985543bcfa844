// 该文件是 Kanche（看车）项目的一部分。
// src/detector.rs - 车辆检测器
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

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  convert::{self, ConvertError},
  decode::{DecodeError, DetectionDecoder, LayoutHint, OutputLayout},
  frame::{RgbTensor, Yuv420Frame},
  mapper::ModelToSource,
  model::{Detection, Model, ModelHandle},
};

/// 置信度阈值
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.25;
/// 模型类别表中汽车的编号
pub const DEFAULT_TARGET_CLASS_ID: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub score_threshold: f32,
  pub target_class_id: f32,
  pub layout: LayoutHint,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      target_class_id: DEFAULT_TARGET_CLASS_ID,
      layout: LayoutHint::Auto,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
  #[error("帧数据畸形: {0}")]
  MalformedFrame(String),
  #[error("不支持的输出布局: {0}")]
  UnsupportedOutputLayout(String),
  #[error("输出形状不匹配: {0}")]
  OutputShapeMismatch(String),
  #[error("推理失败: {0}")]
  InferenceFailure(String),
  #[error("模型不可用: {0}")]
  ModelUnavailable(String),
}

impl From<ConvertError> for PipelineError {
  fn from(err: ConvertError) -> Self {
    match err {
      ConvertError::MalformedFrame(reason) => PipelineError::MalformedFrame(reason),
    }
  }
}

impl From<DecodeError> for PipelineError {
  fn from(err: DecodeError) -> Self {
    match err {
      DecodeError::UnsupportedOutputLayout { .. } => {
        PipelineError::UnsupportedOutputLayout(err.to_string())
      }
      DecodeError::ShapeMismatch(reason) => PipelineError::OutputShapeMismatch(reason),
    }
  }
}

/// 帧 -> 张量 -> 推理 -> 解码 -> 源帧坐标
pub struct CarDetector<M, const S: u32> {
  model: ModelHandle<M>,
  decoder: DetectionDecoder,
}

impl<M, const S: u32> CarDetector<M, S>
where
  M: Model<Input = RgbTensor<S>>,
{
  pub fn new(model: ModelHandle<M>, config: &DetectorConfig) -> Self {
    let layout = match (&model, config.layout) {
      (ModelHandle::Ready(m), LayoutHint::Auto) => m.layout_hint(),
      (_, layout) => layout,
    };

    match &model {
      ModelHandle::Ready(m) => {
        let shapes = m.output_shapes();
        debug!("模型输出形状: {:?}", shapes);
        match OutputLayout::resolve(layout, shapes.len()) {
          Ok(resolved) => info!("模型输出布局: {:?}", resolved),
          Err(e) => error!("模型输出布局无法识别，每帧都将没有检测结果: {}", e),
        }
      }
      ModelHandle::Unavailable(reason) => {
        warn!("模型不可用，检测将始终返回空结果: {}", reason);
      }
    }

    Self {
      model,
      decoder: DetectionDecoder::new(layout, config.score_threshold, config.target_class_id),
    }
  }

  pub fn is_available(&self) -> bool {
    self.model.is_available()
  }

  /// 返回源帧坐标下的检测结果；任何单帧错误都降级为空列表
  pub fn detect(&self, frame: &Yuv420Frame) -> Vec<Detection> {
    match self.try_detect(frame) {
      Ok(detections) => detections,
      Err(PipelineError::ModelUnavailable(_)) => Vec::new(),
      Err(e) => {
        warn!("跳过本帧: {}", e);
        Vec::new()
      }
    }
  }

  pub fn try_detect(&self, frame: &Yuv420Frame) -> Result<Vec<Detection>, PipelineError> {
    let model = match &self.model {
      ModelHandle::Ready(model) => model,
      ModelHandle::Unavailable(reason) => {
        return Err(PipelineError::ModelUnavailable(reason.clone()));
      }
    };

    let tensor = convert::convert::<S>(frame)?;
    let output = model
      .infer(&tensor)
      .map_err(|e| PipelineError::InferenceFailure(e.to_string()))?;
    drop(tensor);

    let detections = self.decoder.try_decode(&output)?;
    let mapper = ModelToSource::new(S, frame.width(), frame.height());
    debug!(
      "帧 {}x{} 检测到 {} 辆车",
      frame.width(),
      frame.height(),
      detections.len()
    );
    Ok(mapper.apply(detections))
  }
}
