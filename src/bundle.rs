//! Persisted scorer bundle: the fitted scaler, both fitted detectors and their
//! thresholds. This is the only artifact the prediction server needs.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ensemble::{FittedEnsemble, Verdict};
use crate::error::{FraudError, Result};
use crate::features::{feature_matrix, FeatureVector, FEATURE_COLUMNS};
use crate::scaler::Scaler;

/// Bumped whenever the serialized layout changes
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerBundle {
    format_version: u32,
    feature_columns: Vec<String>,
    scaler: Scaler,
    ensemble: FittedEnsemble,
}

impl ScorerBundle {
    pub fn new(scaler: Scaler, ensemble: FittedEnsemble) -> Self {
        ScorerBundle {
            format_version: BUNDLE_FORMAT_VERSION,
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            scaler,
            ensemble,
        }
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn ensemble(&self) -> &FittedEnsemble {
        &self.ensemble
    }

    pub fn threshold_iso(&self) -> f64 {
        self.ensemble.threshold_iso()
    }

    pub fn threshold_lof(&self) -> f64 {
        self.ensemble.threshold_lof()
    }

    /// Scale raw feature rows with the fitted scaler, then score them
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<Verdict>> {
        let scaled = self.scaler.transform(features)?;
        self.ensemble.predict(scaled.view())
    }

    pub fn predict_one(&self, vector: &FeatureVector) -> Result<Verdict> {
        let matrix = feature_matrix(&[vector.to_array()]);
        self.predict(matrix.view())?
            .into_iter()
            .next()
            .ok_or_else(|| FraudError::InvalidRequest("no prediction produced".to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bundle: ScorerBundle = bincode::deserialize(bytes)?;
        bundle.check_compatible()?;
        Ok(bundle)
    }

    fn check_compatible(&self) -> Result<()> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(FraudError::Bundle(format!(
                "unsupported bundle format version {} (expected {})",
                self.format_version, BUNDLE_FORMAT_VERSION
            )));
        }
        if self.feature_columns.iter().map(String::as_str).ne(FEATURE_COLUMNS) {
            return Err(FraudError::Bundle(format!(
                "bundle feature columns {:?} do not match {:?}",
                self.feature_columns, FEATURE_COLUMNS
            )));
        }
        Ok(())
    }

    /// Write through a sibling temp file and rename it into place, so a reader
    /// sees either the old bundle or the complete new one.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = staging_path(path);
        fs::write(&staging, self.to_bytes()?)?;
        fs::rename(&staging, path)?;
        info!(path = %path.display(), "Scorer bundle saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let bundle = ScorerBundle::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            threshold_iso = bundle.threshold_iso(),
            threshold_lof = bundle.threshold_lof(),
            "Scorer bundle loaded"
        );
        Ok(bundle)
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
