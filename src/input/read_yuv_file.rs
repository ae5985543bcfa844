// 该文件是 Kanche（看车）项目的一部分。
// src/input/read_yuv_file.rs - 原始 I420 视频流输入
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
  fs::File,
  io::{BufReader, ErrorKind, Read},
};

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Yuv420Frame};

#[derive(Error, Debug)]
pub enum YuvFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid URI parameter: {0}")]
  InvalidQuery(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// `yuv:///path/stream.yuv?width=W&height=H`：逐帧读取紧密排列的 I420 数据，直到文件结束
pub struct YuvFileInput<R = BufReader<File>> {
  reader: R,
  width: u32,
  height: u32,
  frame_len: usize,
  frame_index: u64,
}

impl FromUrlWithScheme for YuvFileInput {
  const SCHEME: &'static str = "yuv";
}

impl FromUrl for YuvFileInput {
  type Error = YuvFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(YuvFileInputError::SchemaMismatch);
    }

    let mut width = None;
    let mut height = None;
    for (k, v) in url.query_pairs() {
      let parsed = || {
        v.parse::<u32>()
          .map_err(|e| YuvFileInputError::InvalidQuery(format!("{}: {}", k, e)))
      };
      match k.as_ref() {
        "width" => width = Some(parsed()?),
        "height" => height = Some(parsed()?),
        _ => {}
      }
    }

    let (width, height) = match (width, height) {
      (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
      _ => {
        return Err(YuvFileInputError::InvalidQuery(
          "必须指定非零的 width 与 height".to_string(),
        ));
      }
    };

    let path = urlencoding::decode(url.path())
      .map_err(|e| YuvFileInputError::InvalidQuery(e.to_string()))?;
    let file = File::open(&*path)?;
    info!("打开 I420 视频流: {} ({}x{})", path, width, height);

    Ok(Self::with_reader(BufReader::new(file), width, height))
  }
}

impl<R: Read> YuvFileInput<R> {
  pub fn with_reader(reader: R, width: u32, height: u32) -> Self {
    let luma = width as usize * height as usize;
    let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
    Self {
      reader,
      width,
      height,
      frame_len: luma + 2 * chroma,
      frame_index: 0,
    }
  }
}

impl<R: Read> Iterator for YuvFileInput<R> {
  type Item = Yuv420Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut buffer = vec![0u8; self.frame_len];
    match self.reader.read_exact(&mut buffer) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        info!("I420 视频流结束，共 {} 帧", self.frame_index);
        return None;
      }
      Err(e) => {
        error!("读取第 {} 帧失败: {}", self.frame_index + 1, e);
        return None;
      }
    }

    self.frame_index += 1;
    match Yuv420Frame::from_i420(self.width, self.height, &buffer) {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("第 {} 帧数据无效: {}", self.frame_index, e);
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;

  #[test]
  fn reads_whole_frames_and_stops_at_partial_tail() {
    // 4x2: 8 字节亮度 + 2 x 2 字节色度 = 12 字节每帧
    let mut data = vec![1u8; 12];
    data.extend(vec![2u8; 12]);
    data.extend(vec![3u8; 5]);

    let frames: Vec<_> = YuvFileInput::with_reader(Cursor::new(data), 4, 2).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].luma().data()[0], 2);
    assert_eq!(frames[1].chroma_v().data(), &[2, 2]);
  }

  #[test]
  fn url_requires_dimensions() {
    let url = Url::parse("yuv:///tmp/stream.yuv?width=640").unwrap();
    assert!(matches!(
      <YuvFileInput>::from_url(&url),
      Err(YuvFileInputError::InvalidQuery(_))
    ));
  }
}
