// 该文件是 Kanche（看车）项目的一部分。
// src/mapper.rs - 坐标映射
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

use crate::{
  model::{BBox, Detection},
  store::ViewDetections,
};

/// 第一阶段：模型输入空间 -> 源帧空间，X、Y 比例独立（与非等比缩放对应）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelToSource {
  sx: f32,
  sy: f32,
}

impl ModelToSource {
  pub fn new(input_size: u32, source_width: u32, source_height: u32) -> Self {
    let side = input_size.max(1) as f32;
    Self {
      sx: source_width as f32 / side,
      sy: source_height as f32 / side,
    }
  }

  pub fn map_box(&self, bbox: &BBox) -> BBox {
    BBox {
      left: bbox.left * self.sx,
      top: bbox.top * self.sy,
      right: bbox.right * self.sx,
      bottom: bbox.bottom * self.sy,
    }
  }

  pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
    detections
      .into_iter()
      .map(|detection| Detection {
        bbox: self.map_box(&detection.bbox),
        ..detection
      })
      .collect()
  }
}

/// 第二阶段：源帧空间 -> 视图空间，等比缩放后居中（信箱模式）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub dx: f32,
  pub dy: f32,
}

impl Letterbox {
  /// 源尺寸为零（尚未处理任何帧）时返回 `None`
  pub fn fit(source_width: u32, source_height: u32, view_width: u32, view_height: u32) -> Option<Self> {
    if source_width == 0 || source_height == 0 {
      return None;
    }

    let (sw, sh) = (source_width as f32, source_height as f32);
    let (vw, vh) = (view_width as f32, view_height as f32);
    let scale = (vw / sw).min(vh / sh);

    Some(Self {
      scale,
      dx: (vw - sw * scale) / 2.0,
      dy: (vh - sh * scale) / 2.0,
    })
  }

  pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.dx, y * self.scale + self.dy)
  }

  pub fn map_box(&self, bbox: &BBox) -> BBox {
    let (left, top) = self.map_point(bbox.left, bbox.top);
    let (right, bottom) = self.map_point(bbox.right, bbox.bottom);
    BBox {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn project(&self, detections: &[Detection]) -> Vec<Detection> {
    detections
      .iter()
      .map(|detection| Detection {
        bbox: self.map_box(&detection.bbox),
        ..detection.clone()
      })
      .collect()
  }
}

/// 渲染时调用：按当前视图尺寸投影最新的检测结果
pub fn project_to_view(view: &ViewDetections, view_width: u32, view_height: u32) -> Vec<Detection> {
  Letterbox::fit(
    view.source_width,
    view.source_height,
    view_width,
    view_height,
  )
  .map(|letterbox| letterbox.project(&view.detections))
  .unwrap_or_default()
}

/// 标签背景与文字之间的留白（视图像素）
pub const CAPTION_PADDING: f32 = 6.0;

/// 视图空间中标签背景的位置：左边与框对齐，底边贴住框的上边，向上延伸。
/// 超出视图的部分由渲染端裁剪。
pub fn caption_rect(view_box: &BBox, text_width: f32, text_height: f32) -> BBox {
  BBox {
    left: view_box.left,
    top: view_box.top - text_height - 2.0 * CAPTION_PADDING,
    right: view_box.left + text_width + 2.0 * CAPTION_PADDING,
    bottom: view_box.top,
  }
}

/// 标签文字左上角
pub fn caption_origin(rect: &BBox) -> (f32, f32) {
  (rect.left + CAPTION_PADDING, rect.top + CAPTION_PADDING)
}
