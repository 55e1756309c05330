// 该文件是 Naoying （脑影） 项目的一部分。
// src/bin/repeatshot.rs - 多线程重复扫描
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use naoying::{
  backend::backend_name,
  config::{ServiceConfig, init_logging},
  task::{RepeatShotTask, Task},
};

/// Naoying 重复扫描（并发与耗时测试）
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub config: ServiceConfig,
  /// 输入图像文件
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 扫描次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
  /// 工作线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub workers: usize,
}

fn main() -> Result<()> {
  init_logging();

  let args = Args::parse();
  info!("输入图像: {}", args.input.display());
  info!("计算后端: {}", backend_name());

  let pipeline = args.config.pipeline()?;
  let bytes: Arc<[u8]> = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入图像 {}", args.input.display()))?
    .into();

  let task = RepeatShotTask {
    repeat: args.repeat,
    workers: args.workers,
    output_dir: args.config.output_dir.clone(),
    extension: args.config.extension.clone(),
  };
  let stats = task.run_task(&pipeline, bytes)?;

  println!("{}", serde_json::to_string_pretty(&stats)?);

  Ok(())
}
