// 该文件是 Kanche（看车）项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Yuv420Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid URI parameter: {0}")]
  InvalidQuery(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// `image:///path/car.jpg?repeat=N`：读取图像并转为 I420 帧，重复输出 N 次（默认 1 次）
pub struct ImageFileInput {
  frame: Yuv420Frame,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut repeat = 1usize;
    for (k, v) in url.query_pairs() {
      if k == "repeat" {
        repeat = v
          .parse()
          .map_err(|e| ImageFileInputError::InvalidQuery(format!("repeat: {}", e)))?;
      }
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::InvalidQuery(e.to_string()))?;
    let image = ImageReader::open(&*path)?.decode()?.to_rgb8();
    info!(
      "读取图像文件: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      frame: Yuv420Frame::from(&image),
      remaining: repeat,
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Yuv420Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.frame.clone())
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;

  #[test]
  fn repeats_decoded_frame() {
    let dir = std::env::temp_dir().join(format!("kanche-image-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("frame.png");
    RgbImage::from_pixel(6, 4, Rgb([10, 20, 30])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}?repeat=2", path.display())).unwrap();
    let frames: Vec<_> = ImageFileInput::from_url(&url).unwrap().collect();

    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].width(), frames[0].height()), (6, 4));
    assert_eq!(frames[1].chroma_dimensions(), (3, 2));
    let _ = std::fs::remove_dir_all(&dir);
  }
}
