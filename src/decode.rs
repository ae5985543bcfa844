// 该文件是 Kanche（看车）项目的一部分。
// src/decode.rs - 模型原始输出解码
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

//! 支持两种输出布局：
//!
//! - 交错布局：单个 `[1, N, 6]` 缓冲区，每个候选为 `(x1, y1, x2, y2, score, class_id)`
//! - 拆分布局：`[1, N, 4]` 边界框、`[1, N]` 分数、`[1, N]` 类别三个缓冲区
//!
//! 坐标均为模型输入空间像素。候选按模型原始顺序输出，不做排序和 NMS。

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{BBox, CAR_LABEL, Detection, OutputTensor, RawOutput};

const INTERLEAVED_STRIDE: usize = 6;
const BOX_STRIDE: usize = 4;
const SPLIT_OUTPUTS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("不支持的输出布局: {hint:?} 不接受 {count} 个输出")]
  UnsupportedOutputLayout { hint: LayoutHint, count: usize },
  #[error("输出形状不匹配: {0}")]
  ShapeMismatch(String),
}

/// 模型加载时的布局声明；`Auto` 按输出数量推断（1 个为交错，3 个为拆分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LayoutHint {
  #[default]
  Auto,
  Interleaved,
  Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  Interleaved,
  Split,
}

impl OutputLayout {
  /// 显式声明时只要求输出数量足够，多余输出（例如检测数量）被忽略；
  /// `Auto` 只接受恰好 1 个或 3 个输出。
  pub fn resolve(hint: LayoutHint, count: usize) -> Result<Self, DecodeError> {
    match (hint, count) {
      (LayoutHint::Auto, 1) => Ok(OutputLayout::Interleaved),
      (LayoutHint::Auto, SPLIT_OUTPUTS) => Ok(OutputLayout::Split),
      (LayoutHint::Interleaved, n) if n >= 1 => Ok(OutputLayout::Interleaved),
      (LayoutHint::Split, n) if n >= SPLIT_OUTPUTS => Ok(OutputLayout::Split),
      (hint, count) => Err(DecodeError::UnsupportedOutputLayout { hint, count }),
    }
  }
}

#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  layout: LayoutHint,
  score_threshold: f32,
  target_class_id: f32,
}

impl DetectionDecoder {
  pub fn new(layout: LayoutHint, score_threshold: f32, target_class_id: f32) -> Self {
    Self {
      layout,
      score_threshold,
      target_class_id,
    }
  }

  pub fn layout(&self) -> LayoutHint {
    self.layout
  }

  /// 解码失败时降级为空结果，从不向调用方传播错误
  pub fn decode(&self, outputs: &RawOutput) -> Vec<Detection> {
    match self.try_decode(outputs) {
      Ok(detections) => detections,
      Err(e) => {
        warn!("输出解码失败，本帧无检测结果: {}", e);
        Vec::new()
      }
    }
  }

  /// 要么全部成功，要么返回错误，不产生部分结果
  pub fn try_decode(&self, outputs: &RawOutput) -> Result<Vec<Detection>, DecodeError> {
    let layout = OutputLayout::resolve(self.layout, outputs.len())?;
    let detections = match layout {
      OutputLayout::Interleaved => self.decode_interleaved(&outputs.tensors()[0])?,
      OutputLayout::Split => {
        let tensors = outputs.tensors();
        self.decode_split(&tensors[0], &tensors[1], &tensors[2])
      }
    };
    debug!("{:?} 布局解码得到 {} 个检测结果", layout, detections.len());
    Ok(detections)
  }

  fn accepts(&self, score: f32, class_id: f32) -> bool {
    // 类别编号按整数浮点数输出，这里按原样做精确比较
    score >= self.score_threshold && class_id == self.target_class_id
  }

  fn detection(&self, bbox: &[f32], score: f32) -> Detection {
    Detection {
      bbox: BBox::from_corners(bbox[0], bbox[1], bbox[2], bbox[3]),
      label: CAR_LABEL,
      score,
    }
  }

  fn decode_interleaved(&self, tensor: &OutputTensor) -> Result<Vec<Detection>, DecodeError> {
    let data = tensor.data();
    let shape = tensor.shape();
    let count = if shape.len() >= 3 {
      shape[1]
    } else {
      data.len() / INTERLEAVED_STRIDE
    };

    let needed = count
      .checked_mul(INTERLEAVED_STRIDE)
      .ok_or_else(|| DecodeError::ShapeMismatch(format!("候选数量溢出: {}", count)))?;
    if needed > data.len() {
      return Err(DecodeError::ShapeMismatch(format!(
        "形状 {:?} 需要 {} 个值, 缓冲区只有 {} 个",
        shape,
        needed,
        data.len()
      )));
    }

    Ok(
      data[..needed]
        .chunks_exact(INTERLEAVED_STRIDE)
        .filter(|row| self.accepts(row[4], row[5]))
        .map(|row| self.detection(&row[..4], row[4]))
        .collect(),
    )
  }

  fn decode_split(
    &self,
    boxes: &OutputTensor,
    scores: &OutputTensor,
    classes: &OutputTensor,
  ) -> Vec<Detection> {
    let (boxes, scores, classes) = (boxes.data(), scores.data(), classes.data());
    let count = scores
      .len()
      .min(classes.len())
      .min(boxes.len() / BOX_STRIDE);

    boxes
      .chunks_exact(BOX_STRIDE)
      .zip(scores.iter().zip(classes))
      .take(count)
      .filter(|(_, (score, class_id))| self.accepts(**score, **class_id))
      .map(|(bbox, (score, _))| self.detection(bbox, *score))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn car_decoder(layout: LayoutHint) -> DetectionDecoder {
    DetectionDecoder::new(layout, 0.25, 2.0)
  }

  fn interleaved(shape: Vec<usize>, data: Vec<f32>) -> RawOutput {
    RawOutput::new(vec![OutputTensor::new(shape, data)])
  }

  fn split(boxes: Vec<f32>, scores: Vec<f32>, classes: Vec<f32>) -> RawOutput {
    RawOutput::new(vec![
      OutputTensor::new(vec![1, boxes.len() / 4, 4], boxes),
      OutputTensor::new(vec![1, scores.len()], scores),
      OutputTensor::new(vec![1, classes.len()], classes),
    ])
  }

  #[test]
  fn interleaved_filters_score_and_class() {
    #[rustfmt::skip]
    let outputs = interleaved(vec![1, 4, 6], vec![
      10.0, 20.0, 30.0, 40.0, 0.90, 2.0,
      11.0, 21.0, 31.0, 41.0, 0.10, 2.0,
      12.0, 22.0, 32.0, 42.0, 0.95, 0.0,
      13.0, 23.0, 33.0, 43.0, 0.25, 2.0,
    ]);
    let detections = car_decoder(LayoutHint::Auto).decode(&outputs);

    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].bbox.to_array(), [10.0, 20.0, 30.0, 40.0]);
    assert_eq!(detections[0].label, "car");
    assert_eq!(detections[0].score, 0.90);
    // 阈值边界包含在内
    assert_eq!(detections[1].score, 0.25);
  }

  #[test]
  fn interleaved_count_comes_from_shape() {
    // 声明 N = 1，第二个候选不参与解码
    let outputs = interleaved(
      vec![1, 1, 6],
      vec![0.0, 0.0, 5.0, 5.0, 0.9, 2.0, 1.0, 1.0, 6.0, 6.0, 0.9, 2.0],
    );
    assert_eq!(car_decoder(LayoutHint::Auto).decode(&outputs).len(), 1);
  }

  #[test]
  fn interleaved_count_inferred_from_flat_buffer() {
    let outputs = interleaved(
      vec![13],
      vec![0.0, 0.0, 5.0, 5.0, 0.9, 2.0, 1.0, 1.0, 6.0, 6.0, 0.9, 2.0, 7.0],
    );
    assert_eq!(car_decoder(LayoutHint::Auto).decode(&outputs).len(), 2);
  }

  #[test]
  fn interleaved_short_buffer_fails_closed() {
    let outputs = interleaved(vec![1, 3, 6], vec![0.0, 0.0, 5.0, 5.0, 0.9, 2.0]);
    let decoder = car_decoder(LayoutHint::Auto);
    assert!(matches!(
      decoder.try_decode(&outputs),
      Err(DecodeError::ShapeMismatch(_))
    ));
    assert!(decoder.decode(&outputs).is_empty());
  }

  #[test]
  fn class_id_uses_exact_equality() {
    // 脆弱点：模型若输出 2.0000002 而不是 2.0，该候选会被丢弃
    let outputs = interleaved(
      vec![1, 2, 6],
      vec![0.0, 0.0, 5.0, 5.0, 0.9, 2.000_000_2, 0.0, 0.0, 5.0, 5.0, 0.9, 1.999_999_9],
    );
    assert!(car_decoder(LayoutHint::Auto).decode(&outputs).is_empty());
  }

  #[test]
  fn split_uses_shortest_buffer() {
    let outputs = split(
      vec![
        0.0, 0.0, 4.0, 4.0, //
        1.0, 1.0, 5.0, 5.0, //
        2.0, 2.0, 6.0, 6.0, //
        3.0, 3.0, //
      ],
      vec![0.9, 0.8, 0.7, 0.6],
      vec![2.0, 2.0],
    );
    let detections = car_decoder(LayoutHint::Auto).decode(&outputs);
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[1].bbox.to_array(), [1.0, 1.0, 5.0, 5.0]);
    assert_eq!(detections[1].score, 0.8);
  }

  #[test]
  fn split_filters_per_index() {
    let outputs = split(
      vec![0.0, 0.0, 4.0, 4.0, 1.0, 1.0, 5.0, 5.0, 2.0, 2.0, 6.0, 6.0],
      vec![0.9, 0.1, 0.7],
      vec![7.0, 2.0, 2.0],
    );
    let detections = car_decoder(LayoutHint::Auto).decode(&outputs);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bbox.to_array(), [2.0, 2.0, 6.0, 6.0]);
  }

  #[test]
  fn unsupported_output_counts_yield_empty() {
    let decoder = car_decoder(LayoutHint::Auto);
    assert!(decoder.decode(&RawOutput::default()).is_empty());

    let two = RawOutput::new(vec![
      OutputTensor::new(vec![1, 1, 4], vec![0.0, 0.0, 1.0, 1.0]),
      OutputTensor::new(vec![1, 1], vec![0.9]),
    ]);
    assert!(decoder.decode(&two).is_empty());
    assert_eq!(
      decoder.try_decode(&two),
      Err(DecodeError::UnsupportedOutputLayout {
        hint: LayoutHint::Auto,
        count: 2
      })
    );
  }

  #[test]
  fn auto_rejects_split_with_count_output() {
    let mut tensors = split(vec![0.0, 0.0, 4.0, 4.0], vec![0.9], vec![2.0])
      .tensors()
      .to_vec();
    tensors.push(OutputTensor::new(vec![1], vec![1.0]));
    let outputs = RawOutput::new(tensors);

    assert!(car_decoder(LayoutHint::Auto).decode(&outputs).is_empty());
    assert_eq!(car_decoder(LayoutHint::Split).decode(&outputs).len(), 1);
  }

  #[test]
  fn three_flat_interleaved_outputs_need_explicit_layout() {
    // 三个一维输出的交错模型会被按数量误判为拆分布局
    let first = vec![0.0, 0.0, 8.0, 8.0, 0.9, 2.0];
    let outputs = RawOutput::new(vec![
      OutputTensor::new(vec![6], first.clone()),
      OutputTensor::new(vec![6], first.clone()),
      OutputTensor::new(vec![6], first),
    ]);

    let guessed = car_decoder(LayoutHint::Auto).decode(&outputs);
    assert!(guessed.is_empty());

    let declared = car_decoder(LayoutHint::Interleaved).decode(&outputs);
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].bbox.to_array(), [0.0, 0.0, 8.0, 8.0]);
  }

  #[test]
  fn decoding_is_pure_and_order_preserving() {
    #[rustfmt::skip]
    let outputs = interleaved(vec![1, 3, 6], vec![
      50.0, 50.0, 60.0, 60.0, 0.30, 2.0,
      0.0, 0.0, 10.0, 10.0, 0.99, 2.0,
      52.0, 52.0, 61.0, 61.0, 0.50, 2.0,
    ]);
    let decoder = car_decoder(LayoutHint::Auto);
    let first = decoder.decode(&outputs);
    let second = decoder.decode(&outputs);

    assert_eq!(first, second);
    let scores: Vec<f32> = first.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.30, 0.99, 0.50]);
  }
}
