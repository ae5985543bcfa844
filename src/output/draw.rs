// 该文件是 Kanche（看车）项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  mapper::{Letterbox, caption_origin, caption_rect, project_to_view},
  model::{BBox, Detection},
  store::ViewDetections,
};

const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 4;
const CAPTION_FONT_SIZE: f32 = 32.0;
const CAPTION_CHAR_WIDTH: f32 = 0.6; // 无字体时按字号估算字符宽度
const CAPTION_COLOR: [u8; 3] = [255, 255, 255];
const CAPTION_BACKGROUND: [u8; 3] = [48, 48, 48];

pub struct Draw {
  box_color: [u8; 3],
  box_thickness: i32,
  font_size: f32,
  caption_color: [u8; 3],
  caption_background: [u8; 3],
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      box_thickness: BOX_THICKNESS,
      font_size: CAPTION_FONT_SIZE,
      caption_color: CAPTION_COLOR,
      caption_background: CAPTION_BACKGROUND,
      font: None,
    }
  }
}

impl Draw {
  /// 设置标签字体；没有字体时只绘制标签背景
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 生成视图画布：预览画面按信箱方式居中，再叠加视图空间的检测框与标签
  pub fn compose_view(
    &self,
    preview: Option<&RgbImage>,
    result: &ViewDetections,
    view_width: u32,
    view_height: u32,
  ) -> RgbImage {
    let mut canvas = RgbImage::new(view_width, view_height);

    if let Some(preview) = preview
      && let Some(letterbox) = Letterbox::fit(preview.width(), preview.height(), view_width, view_height)
    {
      let width = ((preview.width() as f32 * letterbox.scale).round() as u32).max(1);
      let height = ((preview.height() as f32 * letterbox.scale).round() as u32).max(1);
      let scaled = image::imageops::resize(preview, width, height, FilterType::Triangle);
      image::imageops::overlay(
        &mut canvas,
        &scaled,
        letterbox.dx.round() as i64,
        letterbox.dy.round() as i64,
      );
    }

    for detection in project_to_view(result, view_width, view_height) {
      self.draw_bbox(&mut canvas, &detection.bbox);
      self.draw_caption(&mut canvas, &detection);
    }

    canvas
  }

  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BBox) {
    let left = bbox.left.floor() as i32;
    let top = bbox.top.floor() as i32;
    let right = bbox.right.ceil() as i32;
    let bottom = bbox.bottom.ceil() as i32;

    // 向内加粗
    for t in 0..self.box_thickness {
      let width = right - left - 2 * t;
      let height = bottom - top - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(left + t, top + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }
  }

  fn caption_size(&self, caption: &str) -> (f32, f32) {
    let scale = PxScale::from(self.font_size);
    match &self.font {
      Some(font) => {
        let (width, _) = text_size(scale, font, caption);
        (width as f32, font.as_scaled(scale).height())
      }
      None => (
        caption.chars().count() as f32 * self.font_size * CAPTION_CHAR_WIDTH,
        self.font_size,
      ),
    }
  }

  fn draw_caption(&self, image: &mut RgbImage, detection: &Detection) {
    let caption = detection.caption();
    let (text_width, text_height) = self.caption_size(&caption);
    let rect = caption_rect(&detection.bbox, text_width, text_height);

    let left = rect.left.floor() as i32;
    let top = rect.top.floor() as i32;
    let width = (rect.right.ceil() as i32 - left).max(1) as u32;
    let height = (rect.bottom.ceil() as i32 - top).max(1) as u32;
    draw_filled_rect_mut(
      image,
      Rect::at(left, top).of_size(width, height),
      Rgb(self.caption_background),
    );

    if let Some(font) = &self.font {
      let (x, y) = caption_origin(&rect);
      draw_text_mut(
        image,
        Rgb(self.caption_color),
        x.round() as i32,
        y.round() as i32,
        PxScale::from(self.font_size),
        font,
        &caption,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn boxes_land_in_view_space() {
    let result = ViewDetections {
      detections: vec![Detection {
        bbox: BBox::from_corners(0.0, 0.0, 20.0, 10.0),
        label: "car",
        score: 0.9,
      }],
      source_width: 20,
      source_height: 10,
    };
    // 20x10 放入 40x40：scale = 2, dy = 10
    let canvas = Draw::default().compose_view(None, &result, 40, 40);

    assert_eq!(canvas.get_pixel(0, 10).0, BOX_COLOR);
    assert_eq!(canvas.get_pixel(20, 10).0, BOX_COLOR);
    assert_eq!(canvas.get_pixel(20, 20).0, [0, 0, 0]);
    // 框上方被裁剪的标签背景
    assert_eq!(canvas.get_pixel(20, 5).0, CAPTION_BACKGROUND);
  }

  #[test]
  fn preview_is_letterboxed() {
    let preview = RgbImage::from_pixel(20, 10, Rgb([200, 10, 10]));
    let canvas = Draw::default().compose_view(Some(&preview), &ViewDetections::default(), 40, 40);

    assert_eq!(canvas.get_pixel(20, 5).0, [0, 0, 0]);
    assert_eq!(canvas.get_pixel(20, 20).0, [200, 10, 10]);
    assert_eq!(canvas.get_pixel(20, 35).0, [0, 0, 0]);
  }

  #[test]
  fn caption_background_sits_above_box() {
    let result = ViewDetections {
      detections: vec![Detection {
        bbox: BBox::from_corners(50.0, 100.0, 150.0, 150.0),
        label: "car",
        score: 0.9,
      }],
      source_width: 200,
      source_height: 200,
    };
    let canvas = Draw::default().compose_view(None, &result, 200, 200);

    // "car 90%"：7 个字符，估算宽度 7 * 32 * 0.6 = 134.4，背景为 [50, 56] 到 [196.4, 100]
    assert_eq!(canvas.get_pixel(60, 80).0, CAPTION_BACKGROUND);
    assert_eq!(canvas.get_pixel(195, 57).0, CAPTION_BACKGROUND);
    assert_eq!(canvas.get_pixel(60, 50).0, [0, 0, 0]);
    assert_eq!(canvas.get_pixel(49, 80).0, [0, 0, 0]);
    assert_eq!(canvas.get_pixel(198, 80).0, [0, 0, 0]);
    assert_eq!(canvas.get_pixel(60, 100).0, BOX_COLOR);
  }
}
