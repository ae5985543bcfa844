// 该文件是 Kanche（看车）项目的一部分。
// src/output/save_image_file.rs - 保存视图叠加图像
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

use std::path::Path;

use thiserror::Error;
use ab_glyph::FontVec;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, convert,
  frame::Yuv420Frame,
  output::{Render, decode_path, draw::Draw, parse_view_size},
  store::ViewDetections,
};

/// `image:///path/out.png?view_width=W&view_height=H&font=/path/font.ttf`，
/// 未指定视图尺寸时使用预览帧尺寸，未指定字体时标签只绘制背景
pub struct SaveImageFileOutput {
  path: String,
  view_size: Option<(u32, u32)>,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 参数错误: {0}")]
  InvalidQuery(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut draw = Draw::default();
    if let Some((_, font_path)) = uri.query_pairs().find(|(k, _)| k == "font") {
      match load_font(&font_path) {
        Ok(font) => draw = draw.with_font(font),
        Err(e) => warn!("无法加载标签字体 {}，标签只绘制背景: {}", font_path, e),
      }
    }

    Ok(SaveImageFileOutput {
      path: decode_path(uri).map_err(SaveImageFileError::InvalidQuery)?,
      view_size: parse_view_size(uri).map_err(SaveImageFileError::InvalidQuery)?,
      draw,
    })
  }
}

fn load_font(path: &str) -> Result<FontVec, String> {
  let data = std::fs::read(path).map_err(|e| e.to_string())?;
  FontVec::try_from_vec(data).map_err(|e| e.to_string())
}

impl SaveImageFileOutput {
  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path);
    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, preview: &Yuv420Frame, result: &ViewDetections) -> Result<(), Self::Error> {
    let background = match convert::to_rgb_image(preview) {
      Ok(image) => Some(image),
      Err(e) => {
        warn!("预览帧无法转换，仅绘制检测框: {}", e);
        None
      }
    };

    let (view_width, view_height) = self
      .view_size
      .unwrap_or((preview.width(), preview.height()));
    let canvas = self
      .draw
      .compose_view(background.as_ref(), result, view_width, view_height);
    self.save_image(canvas)
  }
}
