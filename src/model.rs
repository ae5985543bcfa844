// 该文件是 Kanche（看车）项目的一部分。
// src/model.rs - 模型协作者接口与检测结果
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

use tracing::{info, warn};

use crate::decode::LayoutHint;

/// 检测结果的固定标签，与目标类别编号无关
pub const CAR_LABEL: &str = "car";

/// 轴对齐边界框，单位为当前所在坐标空间的像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  /// 由任意两个对角点构造，保证 `left <= right`、`top <= bottom`
  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      left: x1.min(x2),
      top: y1.min(y2),
      right: x1.max(x2),
      bottom: y1.max(y2),
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub label: &'static str,
  pub score: f32,
}

impl Detection {
  /// 叠加层标签文本，例如 `car 87%`
  pub fn caption(&self) -> String {
    format!("{} {}%", self.label, (self.score * 100.0) as i32)
  }
}

pub type TensorShape = Box<[usize]>;

/// 模型的单个输出缓冲区及其声明形状
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(shape: impl Into<TensorShape>, data: impl Into<Box<[f32]>>) -> Self {
    Self {
      shape: shape.into(),
      data: data.into(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

/// 一次推理的全部输出，按模型声明的输出顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
  tensors: Box<[OutputTensor]>,
}

impl RawOutput {
  pub fn new(tensors: impl Into<Box<[OutputTensor]>>) -> Self {
    Self {
      tensors: tensors.into(),
    }
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&OutputTensor> {
    self.tensors.get(index)
  }

  pub fn tensors(&self) -> &[OutputTensor] {
    &self.tensors
  }
}

/// 推理协作者：接收一个输入张量，返回一组输出缓冲区
pub trait Model {
  type Input;
  type Error: std::fmt::Display;

  /// 推理前即可查询的输出形状
  fn output_shapes(&self) -> &[TensorShape];

  /// 模型加载时声明的输出布局，默认按输出数量推断
  fn layout_hint(&self) -> LayoutHint {
    LayoutHint::Auto
  }

  fn infer(&self, input: &Self::Input) -> Result<RawOutput, Self::Error>;
}

/// 启动时创建的模型句柄，加载失败时保留原因并停用推理路径
#[derive(Debug)]
pub enum ModelHandle<M> {
  Ready(M),
  Unavailable(String),
}

impl<M> ModelHandle<M> {
  pub fn load<E: std::fmt::Display>(result: Result<M, E>) -> Self {
    match result {
      Ok(model) => {
        info!("模型加载完成");
        ModelHandle::Ready(model)
      }
      Err(e) => {
        warn!("模型不可用，推理路径已停用: {}", e);
        ModelHandle::Unavailable(e.to_string())
      }
    }
  }

  pub fn is_available(&self) -> bool {
    matches!(self, ModelHandle::Ready(_))
  }

  pub fn as_ready(&self) -> Option<&M> {
    match self {
      ModelHandle::Ready(model) => Some(model),
      ModelHandle::Unavailable(_) => None,
    }
  }
}

mod replay;
pub use self::replay::{ReplayModel, ReplayModelBuilder, ReplayModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bbox_orders_corners() {
    let bbox = BBox::from_corners(10.0, 40.0, 2.0, 8.0);
    assert_eq!(bbox.to_array(), [2.0, 8.0, 10.0, 40.0]);
    assert_eq!(bbox.width(), 8.0);
    assert_eq!(bbox.height(), 32.0);
  }

  #[test]
  fn caption_truncates_percent() {
    let detection = Detection {
      bbox: BBox::from_corners(0.0, 0.0, 1.0, 1.0),
      label: "car",
      score: 0.876,
    };
    assert_eq!(detection.caption(), "car 87%");
  }

  #[test]
  fn unavailable_handle_keeps_reason() {
    let handle: ModelHandle<()> = ModelHandle::load(Err::<(), _>("missing asset"));
    assert!(!handle.is_available());
    assert!(matches!(handle, ModelHandle::Unavailable(ref reason) if reason == "missing asset"));
  }
}
