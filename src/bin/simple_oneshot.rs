// 该文件是 Kanche（看车）项目的一部分。
// src/bin/simple_oneshot.rs - 单帧检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use kanche::{
  FromUrl,
  decode::LayoutHint,
  detector::{CarDetector, DEFAULT_SCORE_THRESHOLD, DEFAULT_TARGET_CLASS_ID, DetectorConfig},
  frame::MODEL_INPUT_SIZE,
  input::InputWrapper,
  model::{ModelHandle, ReplayModelBuilder},
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Kanche 单帧检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型资产，例如 replay:///path/model.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
  pub score_threshold: f32,
  /// 目标类别编号
  #[arg(long, default_value_t = DEFAULT_TARGET_CLASS_ID)]
  pub target_class: f32,
  /// 模型输出布局
  #[arg(long, value_enum, default_value_t = LayoutHint::Auto)]
  pub layout: LayoutHint,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = DetectorConfig {
    score_threshold: args.score_threshold,
    target_class_id: args.target_class,
    layout: args.layout,
  };
  let model = ModelHandle::load(
    ReplayModelBuilder::from_url(&args.model).and_then(|b| b.build::<MODEL_INPUT_SIZE>()),
  );
  let detector = CarDetector::<_, MODEL_INPUT_SIZE>::new(model, &config);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, detector, output)?;

  Ok(())
}
