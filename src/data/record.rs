//! In-memory record store.
//!
//! Records are grouped by display category and colour cluster. Cluster
//! numbers are handed out in file order by exact RGB match, and records
//! without a stereotaxic coordinate are kept for bookkeeping but never
//! join a cluster.

use super::jitter::{JitterPolicy, JitterTable};
use super::{DisplayCategory, LoadError};
use glam::Vec3;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Red channel value marking a delta (stim minus control) record.
pub const DELTA_FLAG: f64 = -1.0;

/// Base colour of a record, also its cluster identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Exact bit pattern used for cluster lookup. `-0.0` and `0.0` compare equal.
    fn key(&self) -> [u64; 3] {
        [
            (self.r + 0.0).to_bits(),
            (self.g + 0.0).to_bits(),
            (self.b + 0.0).to_bits(),
        ]
    }

    pub fn is_delta_flag(&self) -> bool {
        self.r == DELTA_FLAG
    }

    pub fn to_vec3(&self) -> Vec3 {
        Vec3::new(self.r as f32, self.g as f32, self.b as f32)
    }
}

/// One row handed to the store, before clustering and jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub name: String,
    pub channel: i32,
    /// Atlas coordinate as (ap, rl, dp).
    pub atlas: [f64; 3],
    pub color: Rgb,
    /// Experiment name, `None` for formats without experiments.
    pub experiment: Option<String>,
    pub period: String,
    pub archetype: i32,
    pub raw_bins: Vec<f32>,
    pub norm_bins: Vec<f32>,
}

/// A loaded cell record. Immutable once the store is built.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub name: String,
    pub channel: i32,
    pub atlas: [f64; 3],
    /// Render-space position with jitter applied.
    pub position: Vec3,
    pub color: Rgb,
    pub category: DisplayCategory,
    /// Colour cluster. `None` for delta records and for records without a coordinate.
    pub cluster: Option<usize>,
    pub experiment: Option<usize>,
    pub period: String,
    pub archetype: i32,
    pub raw_bins: Vec<f32>,
    pub norm_bins: Vec<f32>,
}

impl CellRecord {
    /// Records at the atlas origin have no stereotaxic coordinate.
    pub fn has_coordinate(&self) -> bool {
        !(self.atlas[0] == 0.0 && self.atlas[1] == 0.0 && self.atlas[2] == 0.0)
    }

    /// Normalised value for a time bin (0-based). Missing bins read as zero.
    pub fn norm_value(&self, bin: usize) -> f32 {
        self.norm_bins.get(bin).copied().unwrap_or(0.0)
    }
}

/// Dense cluster index to base colour mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterColorTable {
    colors: Vec<Rgb>,
    lookup: HashMap<[u64; 3], usize>,
}

impl ClusterColorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster index for a colour, assigning the next index on first sight.
    pub fn index_or_insert(&mut self, color: Rgb) -> usize {
        let next = self.colors.len();
        let index = *self.lookup.entry(color.key()).or_insert(next);
        if index == next {
            self.colors.push(color);
        }
        index
    }

    pub fn index_of(&self, color: &Rgb) -> Option<usize> {
        self.lookup.get(&color.key()).copied()
    }

    pub fn color(&self, cluster: usize) -> Option<Rgb> {
        self.colors.get(cluster).copied()
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Options controlling how rows are turned into a record set.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub jitter: JitterPolicy,
    pub jitter_seed: u64,
    /// Reject the load when more clusters than this are found.
    pub max_clusters: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            jitter: JitterPolicy::PerIdentity,
            jitter_seed: super::jitter::JITTER_SEED,
            max_clusters: None,
        }
    }
}

/// Header metadata from tabular files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGlobals {
    pub distance: String,
    pub linkage: String,
    pub bins: usize,
}

impl FileGlobals {
    pub fn has_archetypes(&self) -> bool {
        self.linkage == "archetype"
    }
}

/// Loaded records for the current file session.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    groups: [BTreeMap<usize, Vec<CellRecord>>; 3],
    unplaced: Vec<CellRecord>,
    clusters: ClusterColorTable,
    experiments: Vec<String>,
    archetypes: BTreeSet<i32>,
    globals: Option<FileGlobals>,
    num_bins: usize,
    skipped: usize,
}

impl RecordSet {
    /// Build a record set from rows in file order.
    pub fn from_rows<I>(rows: I, options: &LoadOptions) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = RecordRow>,
    {
        let mut set = RecordSet::default();
        let mut jitter = JitterTable::new(options.jitter, options.jitter_seed);
        let mut experiment_lookup: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let Some(category) = DisplayCategory::from_period(&row.period) else {
                log::warn!("Unsupported period '{}', record {} skipped", row.period, row.name);
                set.skipped += 1;
                continue;
            };

            let experiment = row.experiment.as_ref().map(|name| {
                let next = set.experiments.len();
                let index = *experiment_lookup.entry(name.clone()).or_insert(next);
                if index == next {
                    set.experiments.push(name.clone());
                }
                index
            });

            let mut record = CellRecord {
                name: row.name,
                channel: row.channel,
                atlas: row.atlas,
                position: Vec3::new(row.atlas[0] as f32, row.atlas[1] as f32, row.atlas[2] as f32),
                color: row.color,
                category,
                cluster: None,
                experiment,
                period: row.period,
                archetype: row.archetype,
                raw_bins: row.raw_bins,
                norm_bins: row.norm_bins,
            };

            if !record.has_coordinate() {
                set.unplaced.push(record);
                continue;
            }

            let group_key = match category {
                DisplayCategory::Delta => 0,
                _ if record.color.is_delta_flag() => {
                    log::warn!(
                        "Record {} carries the delta flag in period {}, skipped",
                        record.name,
                        record.period
                    );
                    set.skipped += 1;
                    continue;
                }
                _ => {
                    let cluster = set.clusters.index_or_insert(record.color);
                    record.cluster = Some(cluster);
                    cluster
                }
            };

            let identity = experiment.map(|e| (e, record.channel));
            record.position += jitter.offset(record.atlas, identity);

            if record.archetype != 0 && record.archetype != 400 {
                set.archetypes.insert(record.archetype);
            }
            set.num_bins = set.num_bins.max(record.norm_bins.len());
            set.groups[category.index()]
                .entry(group_key)
                .or_default()
                .push(record);
        }

        if let Some(max) = options.max_clusters {
            if set.clusters.len() > max {
                return Err(LoadError::TooManyClusters(set.clusters.len()));
            }
        }

        Ok(set)
    }

    pub(crate) fn set_globals(&mut self, globals: FileGlobals) {
        self.globals = Some(globals);
    }

    pub(crate) fn add_skipped(&mut self, count: usize) {
        self.skipped += count;
    }

    /// Records of one cluster in one category, in load order.
    pub fn cluster_records(&self, category: DisplayCategory, cluster: usize) -> &[CellRecord] {
        self.groups[category.index()]
            .get(&cluster)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Delta records (a single group with no cluster identity).
    pub fn delta_records(&self) -> &[CellRecord] {
        self.cluster_records(DisplayCategory::Delta, 0)
    }

    /// All placed records of a category.
    pub fn records(&self, category: DisplayCategory) -> impl Iterator<Item = &CellRecord> {
        self.groups[category.index()].values().flatten()
    }

    /// Records without a stereotaxic coordinate.
    pub fn unplaced(&self) -> &[CellRecord] {
        &self.unplaced
    }

    pub fn has_category(&self, category: DisplayCategory) -> bool {
        !self.groups[category.index()].is_empty()
    }

    pub fn has_delta(&self) -> bool {
        self.has_category(DisplayCategory::Delta)
    }

    pub fn clusters(&self) -> &ClusterColorTable {
        &self.clusters
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn experiments(&self) -> &[String] {
        &self.experiments
    }

    pub fn archetypes(&self) -> &BTreeSet<i32> {
        &self.archetypes
    }

    pub fn globals(&self) -> Option<&FileGlobals> {
        self.globals.as_ref()
    }

    /// Number of time bins carried by the records (0 when there is no bin data).
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Placed records over all categories.
    pub fn placed_count(&self) -> usize {
        DisplayCategory::ALL
            .iter()
            .map(|c| self.records(*c).count())
            .sum()
    }

    /// Placed plus unplaced records.
    pub fn total_count(&self) -> usize {
        self.placed_count() + self.unplaced.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    /// Axis-aligned bounds of placed records.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        DisplayCategory::ALL
            .iter()
            .flat_map(|c| self.records(*c))
            .map(|r| r.position)
            .fold(None, |acc, p| match acc {
                None => Some((p, p)),
                Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
            })
    }

    pub fn log_summary(&self, name: &str) {
        log::info!("Loaded: {}", name);
        log::info!(
            "Found {} records ({} without coordinates, {} skipped), {} bins, {} clusters, {} experiments",
            self.total_count(),
            self.unplaced.len(),
            self.skipped,
            self.num_bins,
            self.cluster_count(),
            self.experiments.len()
        );
        if let Some(globals) = &self.globals {
            log::info!(
                "Distance algorithm: {}, linkage algorithm: {}",
                globals.distance,
                globals.linkage
            );
        }
    }
}
