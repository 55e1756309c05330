// 该文件是 Naoying （脑影） 项目的一部分。
// src/model/handle.rs - 延迟加载的共享模型句柄
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

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicUsize, Ordering},
  },
};

use tracing::{debug, info};

use crate::model::{ClassifierModel, ModelLoadError};

/// 进程内共享的分类器句柄
///
/// 首次 [`ModelHandle::get`] 时从配置路径加载模型；并发的首次调用只会加载一次。
/// 加载完成后读取不再加锁。
#[derive(Debug)]
pub struct ModelHandle {
  path: Option<PathBuf>,
  model: OnceLock<Arc<ClassifierModel>>,
  init: Mutex<()>,
  loads: AtomicUsize,
}

impl ModelHandle {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      model: OnceLock::new(),
      init: Mutex::new(()),
      loads: AtomicUsize::new(0),
    }
  }

  /// 使用已加载的模型构造句柄，没有模型文件路径，`load_count` 为 0
  pub fn with_model(model: ClassifierModel) -> Self {
    Self {
      path: None,
      model: OnceLock::from(Arc::new(model)),
      init: Mutex::new(()),
      loads: AtomicUsize::new(0),
    }
  }

  /// 模型文件路径，由 [`ModelHandle::with_model`] 构造时为 `None`
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  pub fn get(&self) -> Result<Arc<ClassifierModel>, ModelLoadError> {
    if let Some(model) = self.model.get() {
      return Ok(model.clone());
    }

    // 锁中毒只意味着另一次加载 panic，OnceLock 仍然一致
    let _guard = self.init.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(model) = self.model.get() {
      debug!("模型已由其他请求加载");
      return Ok(model.clone());
    }

    let path = self
      .path
      .as_deref()
      .ok_or_else(|| ModelLoadError::Missing(PathBuf::new()))?;
    let model = Arc::new(ClassifierModel::load(path)?);
    self.loads.fetch_add(1, Ordering::SeqCst);
    let _ = self.model.set(model.clone());
    Ok(model)
  }

  /// 服务启动时调用，失败视为致命错误
  pub fn preload(&self) -> Result<(), ModelLoadError> {
    let now = std::time::Instant::now();
    let model = self.get()?;
    info!("模型 {} 预加载完成，耗时: {:.2?}", model.name(), now.elapsed());
    Ok(())
  }

  pub fn is_loaded(&self) -> bool {
    self.model.get().is_some()
  }

  /// 从文件成功加载的次数
  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}
