//! Cell record loading and storage.
//!
//! Two on-disk shapes are understood: the clustering tool's CSV export and
//! the DX point/colour format. Both produce [`RecordRow`]s that are fed to
//! [`RecordSet::from_rows`].

pub mod csv;
pub mod dx;
pub mod jitter;
pub mod record;

pub use jitter::{JitterPolicy, JitterTable, JITTER_SEED};
pub use record::{
    CellRecord, ClusterColorTable, FileGlobals, LoadOptions, RecordRow, RecordSet, Rgb, DELTA_FLAG,
};

use std::path::Path;

/// Largest cluster count accepted from point-only files.
pub const MAX_POINT_CLUSTERS: usize = 256;

/// Errors that reject a whole file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is empty")]
    Empty,
    #[error("not a cell .csv file this program can use (unrecognised header)")]
    UnrecognizedHeader,
    #[error("first data row must be a GLOBALS: row")]
    MissingGlobals,
    #[error("does not appear to be a dx file")]
    NotDx,
    #[error("mismatch between the number of positions ({positions}) and colors ({colors})")]
    CountMismatch { positions: usize, colors: usize },
    #[error("dx block ends before its declared item count")]
    Truncated,
    #[error("found {0} clusters, which is too many for a cell file")]
    TooManyClusters(usize),
    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),
    #[error("anatomy mesh parse error: {0}")]
    Mesh(#[from] ron::error::SpannedError),
}

/// Where a record is drawn, derived from its experimental period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisplayCategory {
    Control,
    Stim,
    Delta,
}

impl DisplayCategory {
    pub const ALL: [DisplayCategory; 3] = [Self::Control, Self::Stim, Self::Delta];

    pub fn index(self) -> usize {
        match self {
            Self::Control => 0,
            Self::Stim => 1,
            Self::Delta => 2,
        }
    }

    /// Route a period label. Unknown labels return `None`.
    pub fn from_period(label: &str) -> Option<Self> {
        match label {
            "CONTROL" | "CCO2CTL" | "VCO2CTL" | "TBCGHCTL" | "LARCGHCTL" => Some(Self::Control),
            "CCO2STIM" | "VCO2STIM" | "TBCGHSTIM" | "LARCGHSTIM" | "SWALLOW1STIM"
            | "LAREFLEXSTIM" => Some(Self::Stim),
            "CS-DELTA" => Some(Self::Delta),
            _ => None,
        }
    }
}

/// Enabled experiments. An empty mask enables everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentMask {
    enabled: Vec<bool>,
}

impl ExperimentMask {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_flags(enabled: Vec<bool>) -> Self {
        Self { enabled }
    }

    pub fn set(&mut self, experiment: usize, on: bool, experiment_count: usize) {
        if self.enabled.is_empty() {
            self.enabled = vec![true; experiment_count];
        }
        if experiment >= self.enabled.len() {
            self.enabled.resize(experiment + 1, true);
        }
        self.enabled[experiment] = on;
    }

    /// Records without an experiment always pass.
    pub fn allows(&self, experiment: Option<usize>) -> bool {
        match experiment {
            None => true,
            Some(_) if self.enabled.is_empty() => true,
            Some(e) => self.enabled.get(e).copied().unwrap_or(true),
        }
    }
}

/// Load a record file, picking the reader from the extension.
pub fn load_file(path: &Path) -> Result<RecordSet, LoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let text = std::fs::read_to_string(path)?;
    let set = match extension.as_str() {
        "csv" => csv::load_csv_str(&text)?,
        "dx" => dx::load_dx_str(&text)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    set.log_summary(&path.display().to_string());
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_routing() {
        assert_eq!(DisplayCategory::from_period("CCO2CTL"), Some(DisplayCategory::Control));
        assert_eq!(DisplayCategory::from_period("LAREFLEXSTIM"), Some(DisplayCategory::Stim));
        assert_eq!(DisplayCategory::from_period("CS-DELTA"), Some(DisplayCategory::Delta));
        assert_eq!(DisplayCategory::from_period("SWALLOW1CTL"), None);
    }

    #[test]
    fn test_experiment_mask() {
        let mut mask = ExperimentMask::all();
        assert!(mask.allows(Some(3)));
        mask.set(1, false, 3);
        assert!(mask.allows(Some(0)));
        assert!(!mask.allows(Some(1)));
        assert!(mask.allows(None));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = std::env::temp_dir().join("brainstem_viz_load_ext");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cells.txt");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(load_file(&path), Err(LoadError::UnsupportedFormat(_))));
    }
}
