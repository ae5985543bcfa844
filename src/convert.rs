// 该文件是 Kanche（看车）项目的一部分。
// src/convert.rs - YUV 帧到模型输入张量的转换
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

//! 帧转换分三步：
//!
//! 1. 色度重建：按 `x / 2`、`y / 2` 查找色度样本，遵循各平面自己的行跨度与像素跨度，
//!    再用 BT.601 全范围（JFIF）矩阵转为 RGB：
//!    - `R = Y + 1.402 (V - 128)`
//!    - `G = Y - 0.344136 (U - 128) - 0.714136 (V - 128)`
//!    - `B = Y + 1.772 (U - 128)`
//! 2. 缩放：双线性（`FilterType::Triangle`）缩放到 `S x S`，X、Y 方向比例各自独立。
//! 3. 归一化：每个字节除以 255，NHWC 排列，RGB 顺序。

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Plane, RgbTensor, Yuv420Frame};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
  #[error("帧数据畸形: {0}")]
  MalformedFrame(String),
}

/// 将相机帧转换为 `[1, S, S, 3]` 的归一化张量
pub fn convert<const S: u32>(frame: &Yuv420Frame) -> Result<RgbTensor<S>, ConvertError> {
  let image = to_rgb_image(frame)?;
  Ok(resize_to_tensor::<S>(&image))
}

/// 色度重建，得到全分辨率交错 RGB 图像
pub fn to_rgb_image(frame: &Yuv420Frame) -> Result<RgbImage, ConvertError> {
  validate(frame)?;

  let luma = frame.luma();
  let chroma_u = frame.chroma_u();
  let chroma_v = frame.chroma_v();

  Ok(ImageBuffer::from_fn(frame.width(), frame.height(), |x, y| {
    let (x, y) = (x as usize, y as usize);
    let l = luma.sample(x, y);
    let u = chroma_u.sample(x / 2, y / 2);
    let v = chroma_v.sample(x / 2, y / 2);
    Rgb(yuv_to_rgb(l, u, v))
  }))
}

/// 缩放并归一化
pub fn resize_to_tensor<const S: u32>(image: &RgbImage) -> RgbTensor<S> {
  let resized = image::imageops::resize(image, S, S, FilterType::Triangle);
  debug!(
    "帧缩放: {}x{} -> {}x{}",
    image.width(),
    image.height(),
    S,
    S
  );

  let data: Box<[f32]> = resized
    .as_raw()
    .iter()
    .map(|&value| value as f32 / 255.0)
    .collect();
  RgbTensor::from_raw(data)
}

fn validate(frame: &Yuv420Frame) -> Result<(), ConvertError> {
  let (width, height) = (frame.width() as usize, frame.height() as usize);
  if width == 0 || height == 0 {
    return Err(ConvertError::MalformedFrame(format!(
      "帧尺寸为空: {}x{}",
      width, height
    )));
  }

  let (chroma_w, chroma_h) = frame.chroma_dimensions();
  validate_plane("Y", frame.luma(), width, height)?;
  validate_plane("U", frame.chroma_u(), chroma_w, chroma_h)?;
  validate_plane("V", frame.chroma_v(), chroma_w, chroma_h)?;
  Ok(())
}

fn validate_plane(
  name: &str,
  plane: &Plane,
  cols: usize,
  rows: usize,
) -> Result<(), ConvertError> {
  if plane.pixel_stride() == 0 {
    return Err(ConvertError::MalformedFrame(format!(
      "{} 平面像素跨度为 0",
      name
    )));
  }

  let overflow = || {
    ConvertError::MalformedFrame(format!(
      "{} 平面跨度溢出: 行跨度 {}, 像素跨度 {}",
      name,
      plane.row_stride(),
      plane.pixel_stride()
    ))
  };

  let row_span = (cols - 1)
    .checked_mul(plane.pixel_stride())
    .and_then(|span| span.checked_add(1))
    .ok_or_else(overflow)?;
  if rows > 1 && plane.row_stride() < row_span {
    return Err(ConvertError::MalformedFrame(format!(
      "{} 平面行跨度 {} 小于单行所需 {}",
      name,
      plane.row_stride(),
      row_span
    )));
  }

  let required = plane.required_len(cols, rows).ok_or_else(overflow)?;
  if plane.data().len() < required {
    return Err(ConvertError::MalformedFrame(format!(
      "{} 平面长度不足: 需要 {} 字节, 实际 {} 字节",
      name,
      required,
      plane.data().len()
    )));
  }

  Ok(())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;

  let r = y + 1.402 * v;
  let g = y - 0.344_136 * u - 0.714_136 * v;
  let b = y + 1.772 * u;

  [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

/// RGB 图像转 I420（BT.601 全范围），色度取 2x2 块均值
impl From<&RgbImage> for Yuv420Frame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let (chroma_w, chroma_h) = (w.div_ceil(2), h.div_ceil(2));

    let mut luma = vec![0u8; w * h];
    let mut chroma_u = vec![0u8; chroma_w * chroma_h];
    let mut chroma_v = vec![0u8; chroma_w * chroma_h];

    for (x, y, pixel) in image.enumerate_pixels() {
      let [r, g, b] = pixel.0.map(|c| c as f32);
      luma[y as usize * w + x as usize] = clamp_u8(0.299 * r + 0.587 * g + 0.114 * b);
    }

    for cy in 0..chroma_h {
      for cx in 0..chroma_w {
        let (mut u_sum, mut v_sum, mut count) = (0.0f32, 0.0f32, 0.0f32);
        for y in (cy * 2)..((cy * 2 + 2).min(h)) {
          for x in (cx * 2)..((cx * 2 + 2).min(w)) {
            let [r, g, b] = image.get_pixel(x as u32, y as u32).0.map(|c| c as f32);
            u_sum += 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
            v_sum += 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
            count += 1.0;
          }
        }
        chroma_u[cy * chroma_w + cx] = clamp_u8(u_sum / count);
        chroma_v[cy * chroma_w + cx] = clamp_u8(v_sum / count);
      }
    }

    Yuv420Frame::new(
      width,
      height,
      Plane::packed(luma, w),
      Plane::packed(chroma_u, chroma_w),
      Plane::packed(chroma_v, chroma_w),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn uniform_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> Yuv420Frame {
    let (cw, ch) = (width.div_ceil(2) as usize, height.div_ceil(2) as usize);
    Yuv420Frame::new(
      width,
      height,
      Plane::packed(vec![y; (width * height) as usize], width as usize),
      Plane::packed(vec![u; cw * ch], cw),
      Plane::packed(vec![v; cw * ch], cw),
    )
  }

  #[test]
  fn tensor_has_model_shape_and_unit_range() {
    let frame = uniform_frame(16, 12, 200, 40, 230);
    let tensor = convert::<8>(&frame).unwrap();
    assert_eq!(tensor.shape(), [1, 8, 8, 3]);
    assert_eq!(tensor.as_nhwc().len(), 8 * 8 * 3);
    assert!(tensor.as_nhwc().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn neutral_chroma_yields_grey() {
    let frame = uniform_frame(6, 4, 128, 128, 128);
    let tensor = convert::<3>(&frame).unwrap();
    for value in tensor.as_nhwc() {
      assert!((value - 128.0 / 255.0).abs() < 1e-6);
    }
  }

  #[test]
  fn channel_order_is_rgb() {
    // 纯红色在 BT.601 全范围下约为 Y=76, U=85, V=255
    let frame = uniform_frame(4, 4, 76, 85, 255);
    let tensor = convert::<2>(&frame).unwrap();
    let pixel = &tensor.as_nhwc()[..3];
    assert!(pixel[0] > 0.95);
    assert!(pixel[1] < 0.05);
    assert!(pixel[2] < 0.05);
  }

  #[test]
  fn chroma_lookup_halves_coordinates() {
    let luma = Plane::packed(vec![128u8; 8], 4);
    let chroma_u = Plane::packed(vec![128u8, 255], 2);
    let chroma_v = Plane::packed(vec![128u8, 128], 2);
    let frame = Yuv420Frame::new(4, 2, luma, chroma_u, chroma_v);

    let image = to_rgb_image(&frame).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [128, 128, 128]);
    assert_eq!(image.get_pixel(1, 1).0, [128, 128, 128]);
    assert_eq!(image.get_pixel(2, 0).0[2], 255);
    assert_eq!(image.get_pixel(3, 1).0[2], 255);
  }

  #[test]
  fn strided_chroma_skips_padding_and_gaps() {
    // 色度平面像素跨度 2，行跨度 8（每行只有 3 个有效样本，其余为填充）
    let width = 6;
    let height = 4;
    let mut chroma = vec![255u8; 8 * 2];
    for row in 0..2 {
      for col in 0..3 {
        chroma[row * 8 + col * 2] = 128;
      }
    }
    let frame = Yuv420Frame::new(
      width,
      height,
      Plane::packed(vec![100u8; 24], 6),
      Plane::new(chroma.clone(), 8, 2),
      Plane::new(chroma, 8, 2),
    );

    let image = to_rgb_image(&frame).unwrap();
    assert!(image.pixels().all(|p| p.0 == [100, 100, 100]));
  }

  #[test]
  fn unpadded_last_chroma_row_is_accepted() {
    let chroma = vec![128u8; 8 + 5];
    let frame = Yuv420Frame::new(
      6,
      4,
      Plane::packed(vec![50u8; 24], 6),
      Plane::new(chroma.clone(), 8, 2),
      Plane::new(chroma, 8, 2),
    );
    assert!(to_rgb_image(&frame).is_ok());
  }

  #[test]
  fn short_luma_plane_is_malformed() {
    let frame = Yuv420Frame::new(
      4,
      4,
      Plane::packed(vec![0u8; 15], 4),
      Plane::packed(vec![0u8; 4], 2),
      Plane::packed(vec![0u8; 4], 2),
    );
    assert!(matches!(
      convert::<4>(&frame),
      Err(ConvertError::MalformedFrame(_))
    ));
  }

  #[test]
  fn short_chroma_plane_is_malformed() {
    let frame = Yuv420Frame::new(
      4,
      4,
      Plane::packed(vec![0u8; 16], 4),
      Plane::new(vec![0u8; 4], 4, 2),
      Plane::packed(vec![0u8; 4], 2),
    );
    assert!(matches!(
      convert::<4>(&frame),
      Err(ConvertError::MalformedFrame(_))
    ));
  }

  #[test]
  fn oversized_strides_are_malformed() {
    let huge_row = Yuv420Frame::new(
      6,
      6,
      Plane::packed(vec![128u8; 36], 6),
      Plane::new(vec![128u8; 9], usize::MAX / 2 + 1, 1),
      Plane::packed(vec![128u8; 9], 3),
    );
    assert!(matches!(
      convert::<4>(&huge_row),
      Err(ConvertError::MalformedFrame(_))
    ));

    let huge_pixel = Yuv420Frame::new(
      6,
      6,
      Plane::packed(vec![128u8; 36], 6),
      Plane::packed(vec![128u8; 9], 3),
      Plane::new(vec![128u8; 9], 3, usize::MAX),
    );
    assert!(matches!(
      convert::<4>(&huge_pixel),
      Err(ConvertError::MalformedFrame(_))
    ));
  }

  #[test]
  fn empty_frame_is_malformed() {
    let frame = uniform_frame(0, 4, 0, 0, 0);
    assert!(convert::<4>(&frame).is_err());
  }

  #[test]
  fn rgb_round_trip_stays_close() {
    let image = RgbImage::from_pixel(4, 4, Rgb([30, 160, 220]));
    let frame = Yuv420Frame::from(&image);
    let back = to_rgb_image(&frame).unwrap();
    for (a, b) in back.get_pixel(1, 2).0.iter().zip([30u8, 160, 220]) {
      assert!((*a as i32 - b as i32).abs() <= 2);
    }
  }
}
