// 该文件是 Kanche（看车）项目的一部分。
// src/output.rs - 渲染输出定义
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
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "jsonl_record"))]
use crate::FromUrlWithScheme;
use crate::{frame::Yuv420Frame, store::ViewDetections};

/// 渲染协作者：消费最新的检测快照，自行决定视图尺寸并完成第二阶段映射
pub trait Render: Sized {
  type Error;
  fn render_result(&self, preview: &Yuv420Frame, result: &ViewDetections) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "jsonl_record")]
mod jsonl_record;
#[cfg(feature = "jsonl_record")]
pub use self::jsonl_record::{JsonlRecordOutput, JsonlRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "jsonl_record")]
  #[error("检测记录输出错误: {0}")]
  JsonlRecordOutputError(#[from] JsonlRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "jsonl_record")]
  JsonlRecordOutput(JsonlRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "jsonl_record")]
      JsonlRecordOutput::SCHEME => {
        let output = JsonlRecordOutput::from_url(url)?;
        Ok(OutputWrapper::JsonlRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  #[allow(unused_variables)]
  fn render_result(&self, preview: &Yuv420Frame, result: &ViewDetections) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(preview, result)
        .map_err(OutputError::from),
      #[cfg(feature = "jsonl_record")]
      OutputWrapper::JsonlRecordOutput(output) => output
        .render_result(preview, result)
        .map_err(OutputError::from),
    }
  }
}

/// 解析 `view_width` / `view_height` 查询参数，两者必须同时出现
pub(crate) fn parse_view_size(url: &Url) -> Result<Option<(u32, u32)>, String> {
  let mut width = None;
  let mut height = None;
  for (k, v) in url.query_pairs() {
    match k.as_ref() {
      "view_width" => width = Some(v.parse::<u32>().map_err(|e| format!("view_width: {}", e))?),
      "view_height" => height = Some(v.parse::<u32>().map_err(|e| format!("view_height: {}", e))?),
      _ => {}
    }
  }

  match (width, height) {
    (Some(w), Some(h)) => Ok(Some((w, h))),
    (None, None) => Ok(None),
    _ => Err("view_width 与 view_height 必须同时指定".to_string()),
  }
}

pub(crate) fn decode_path(url: &Url) -> Result<String, String> {
  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .map_err(|e| e.to_string())
}
