// 该文件是 Naoying （脑影） 项目的一部分。
// src/record.rs - 扫描记录与统计
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

use serde::{Deserialize, Serialize};

use crate::predict::Label;

#[cfg(feature = "scan_record")]
mod scan {
  use std::path::{Path, PathBuf};

  use chrono::{DateTime, Utc};
  use serde::{Deserialize, Serialize};
  use thiserror::Error;
  use tracing::info;
  use uuid::Uuid;

  use crate::{
    predict::Label,
    task::{CompositeKind, ScanOutcome},
  };

  #[derive(Error, Debug)]
  pub enum RecordError {
    #[error("I/O 错误: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),
  }

  /// 单次扫描的唯一文件路径
  #[derive(Debug, Clone, PartialEq, Eq)]
  pub struct ScanPaths {
    pub id: Uuid,
    pub original: PathBuf,
    pub gradcam: PathBuf,
  }

  impl ScanPaths {
    /// `{uuid}_original.{ext}` 与 `{uuid}_gradcam.{ext}`
    pub fn allocate(directory: &Path, extension: &str) -> Self {
      let id = Uuid::new_v4();
      Self {
        id,
        original: directory.join(format!("{id}_original.{extension}")),
        gradcam: directory.join(format!("{id}_gradcam.{extension}")),
      }
    }

    pub fn sidecar(&self) -> PathBuf {
      self.original.with_file_name(format!("{}.json", self.id))
    }
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  pub struct ScanRecord {
    pub id: Uuid,
    pub label: Label,
    pub confidence_pct: f32,
    pub image_path: PathBuf,
    pub gradcam_path: PathBuf,
    pub composite: CompositeKind,
    pub scan_date: DateTime<Utc>,
  }

  impl ScanRecord {
    pub fn new(paths: &ScanPaths, outcome: &ScanOutcome) -> Self {
      Self {
        id: paths.id,
        label: outcome.prediction.label,
        confidence_pct: outcome.prediction.confidence_pct,
        image_path: paths.original.clone(),
        gradcam_path: paths.gradcam.clone(),
        composite: outcome.composite.clone(),
        scan_date: Utc::now(),
      }
    }

    pub fn write_sidecar(&self, path: &Path) -> Result<(), RecordError> {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
      info!("保存扫描记录: {}", path.display());
      Ok(())
    }

    pub fn read_sidecar(path: &Path) -> Result<Self, RecordError> {
      let data = std::fs::read(path)?;
      Ok(serde_json::from_slice(&data)?)
    }
  }
}

#[cfg(feature = "scan_record")]
pub use self::scan::{RecordError, ScanPaths, ScanRecord};

/// 扫描结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
  pub total_scans: usize,
  pub tumor_detected: usize,
  pub no_tumor: usize,
}

impl ScanStats {
  pub fn tally(labels: impl IntoIterator<Item = Label>) -> Self {
    labels.into_iter().fold(Self::default(), |mut stats, label| {
      stats.add(label);
      stats
    })
  }

  pub fn add(&mut self, label: Label) {
    self.total_scans += 1;
    match label {
      Label::TumorDetected => self.tumor_detected += 1,
      Label::NoTumorDetected => self.no_tumor += 1,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tally_counts_each_label() {
    let stats = ScanStats::tally([
      Label::TumorDetected,
      Label::NoTumorDetected,
      Label::TumorDetected,
    ]);
    assert_eq!(
      stats,
      ScanStats {
        total_scans: 3,
        tumor_detected: 2,
        no_tumor: 1,
      }
    );
    assert_eq!(ScanStats::tally([]), ScanStats::default());
  }

  #[cfg(feature = "scan_record")]
  #[test]
  fn allocated_paths_are_unique() {
    let dir = std::path::Path::new("uploads");
    let a = ScanPaths::allocate(dir, "jpg");
    let b = ScanPaths::allocate(dir, "jpg");
    assert_ne!(a.id, b.id);
    assert_ne!(a.original, b.original);
    assert_eq!(a.original, dir.join(format!("{}_original.jpg", a.id)));
    assert_eq!(a.gradcam, dir.join(format!("{}_gradcam.jpg", a.id)));
    assert_eq!(a.sidecar(), dir.join(format!("{}.json", a.id)));
  }

  #[cfg(feature = "scan_record")]
  #[test]
  fn record_round_trips_through_sidecar() {
    use crate::{
      predict::PredictionResult,
      task::{CompositeKind, ScanOutcome},
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let paths = ScanPaths::allocate(dir.path(), "png");
    let outcome = ScanOutcome {
      prediction: PredictionResult::from_probability(0.2).expect("valid"),
      composite: CompositeKind::Fallback("no conv".to_string()),
    };
    let record = ScanRecord::new(&paths, &outcome);

    record.write_sidecar(&paths.sidecar()).expect("write");
    let read = ScanRecord::read_sidecar(&paths.sidecar()).expect("read");

    assert_eq!(read, record);
    assert_eq!(read.label, Label::NoTumorDetected);
  }
}
