// 该文件是 Kanche（看车）项目的一部分。
// src/frame.rs - YUV 帧与 NHWC 张量定义
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

use crate::convert::ConvertError;

pub const RGB_CHANNELS: usize = 3;

/// 模型输入边长 S，输入张量形状为 `[1, S, S, 3]`
pub const MODEL_INPUT_SIZE: u32 = 640;

/// 单个图像平面，样本之间可能存在间隔，行尾可能存在硬件填充
#[derive(Debug, Clone)]
pub struct Plane {
  data: Box<[u8]>,
  row_stride: usize,
  pixel_stride: usize,
}

impl Plane {
  pub fn new(data: impl Into<Box<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data: data.into(),
      row_stride,
      pixel_stride,
    }
  }

  /// 紧密排列的平面：行跨度等于宽度，像素跨度为 1
  pub fn packed(data: impl Into<Box<[u8]>>, width: usize) -> Self {
    Self::new(data, width, 1)
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn row_stride(&self) -> usize {
    self.row_stride
  }

  pub fn pixel_stride(&self) -> usize {
    self.pixel_stride
  }

  /// 读取 `cols x rows` 个样本所需的最小缓冲区长度（最后一行不要求填充），跨度过大溢出时返回 `None`
  pub fn required_len(&self, cols: usize, rows: usize) -> Option<usize> {
    if cols == 0 || rows == 0 {
      return Some(0);
    }
    (rows - 1)
      .checked_mul(self.row_stride)?
      .checked_add((cols - 1).checked_mul(self.pixel_stride)?)?
      .checked_add(1)
  }

  #[inline]
  pub(crate) fn sample(&self, x: usize, y: usize) -> u8 {
    self.data[y * self.row_stride + x * self.pixel_stride]
  }
}

/// 平面 4:2:0 相机帧：全分辨率亮度平面 + 两个在两个方向上各下采样 2 倍的色度平面
#[derive(Debug, Clone)]
pub struct Yuv420Frame {
  width: u32,
  height: u32,
  luma: Plane,
  chroma_u: Plane,
  chroma_v: Plane,
}

impl Yuv420Frame {
  pub fn new(width: u32, height: u32, luma: Plane, chroma_u: Plane, chroma_v: Plane) -> Self {
    Self {
      width,
      height,
      luma,
      chroma_u,
      chroma_v,
    }
  }

  /// 从紧密排列的 I420 缓冲区（Y 平面后接 U、V 平面）构建帧
  pub fn from_i420(width: u32, height: u32, data: &[u8]) -> Result<Self, ConvertError> {
    let luma_len = width as usize * height as usize;
    let (chroma_w, chroma_h) = chroma_dimensions(width, height);
    let chroma_len = chroma_w * chroma_h;
    let expected = luma_len + 2 * chroma_len;

    if data.len() < expected {
      return Err(ConvertError::MalformedFrame(format!(
        "I420 缓冲区长度不足: 期望 {} 字节, 实际 {} 字节",
        expected,
        data.len()
      )));
    }

    let (luma, rest) = data.split_at(luma_len);
    let (chroma_u, rest) = rest.split_at(chroma_len);
    let chroma_v = &rest[..chroma_len];

    Ok(Self::new(
      width,
      height,
      Plane::packed(luma, width as usize),
      Plane::packed(chroma_u, chroma_w),
      Plane::packed(chroma_v, chroma_w),
    ))
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn luma(&self) -> &Plane {
    &self.luma
  }

  pub fn chroma_u(&self) -> &Plane {
    &self.chroma_u
  }

  pub fn chroma_v(&self) -> &Plane {
    &self.chroma_v
  }

  /// 色度平面的样本列数与行数（奇数尺寸向上取整）
  pub fn chroma_dimensions(&self) -> (usize, usize) {
    chroma_dimensions(self.width, self.height)
  }
}

fn chroma_dimensions(width: u32, height: u32) -> (usize, usize) {
  (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// 归一化的 NHWC 浮点张量，形状固定为 `[1, S, S, 3]`，通道顺序 RGB，取值 `[0, 1]`
#[derive(Debug, Clone)]
pub struct RgbTensor<const S: u32> {
  data: Box<[f32]>,
}

impl<const S: u32> RgbTensor<S> {
  pub const SIDE: u32 = S;

  pub(crate) fn from_raw(data: Box<[f32]>) -> Self {
    debug_assert_eq!(data.len(), Self::len());
    Self { data }
  }

  pub const fn len() -> usize {
    RGB_CHANNELS * S as usize * S as usize
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, S as usize, S as usize, RGB_CHANNELS]
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

impl<const S: u32> Default for RgbTensor<S> {
  fn default() -> Self {
    Self {
      data: vec![0.0f32; Self::len()].into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn required_len_ignores_last_row_padding() {
    let plane = Plane::new(vec![0u8; 10], 8, 2);
    // 两行，每行 3 个样本：(2-1)*8 + (3-1)*2 + 1
    assert_eq!(plane.required_len(3, 2), Some(13));
    assert_eq!(plane.required_len(0, 2), Some(0));
  }

  #[test]
  fn required_len_reports_overflow() {
    let plane = Plane::new(vec![0u8; 10], usize::MAX / 2 + 1, 1);
    assert_eq!(plane.required_len(3, 3), None);
    let plane = Plane::new(vec![0u8; 10], 8, usize::MAX);
    assert_eq!(plane.required_len(3, 1), None);
  }

  #[test]
  fn i420_split_uses_rounded_up_chroma() {
    let data: Vec<u8> = (0..(5 * 3 + 2 * 3 * 2)).map(|v| v as u8).collect();
    let frame = Yuv420Frame::from_i420(5, 3, &data).unwrap();
    assert_eq!(frame.chroma_dimensions(), (3, 2));
    assert_eq!(frame.chroma_u().data()[0], 15);
    assert_eq!(frame.chroma_v().data()[0], 21);
  }

  #[test]
  fn i420_rejects_short_buffer() {
    let result = Yuv420Frame::from_i420(4, 4, &[0u8; 20]);
    assert!(matches!(result, Err(ConvertError::MalformedFrame(_))));
  }

  #[test]
  fn tensor_shape_is_fixed() {
    let tensor = RgbTensor::<4>::default();
    assert_eq!(tensor.shape(), [1, 4, 4, 3]);
    assert_eq!(tensor.as_nhwc().len(), 48);
  }
}
