//! Per-(cluster, bin) instance buffers.
//!
//! Building happens in two steps. [`InstancePlan::build`] gathers positions
//! and colour-table indices on the CPU (one cluster per rayon task), then
//! [`InstanceBufferManager::rebuild`] uploads the plan into a flat arena of
//! [`InstanceSet`]s addressed by [`SetKey`].

use crate::data::{CellRecord, DisplayCategory, ExperimentMask, RecordSet};
use crate::rendering::shades::{
    base_color_index, bin_color_index, delta_color_index, DELTA_BASE_INDEX,
};
use rayon::prelude::*;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Which colour group a set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetGroup {
    Cluster(usize),
    /// Delta records form a single group with no cluster identity.
    Delta,
}

/// Arena key. Bin 0 is the static base colour, bins 1..=N are time bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetKey {
    pub group: SetGroup,
    pub bin: usize,
}

impl SetKey {
    pub fn cluster(cluster: usize, bin: usize) -> Self {
        Self {
            group: SetGroup::Cluster(cluster),
            bin,
        }
    }

    pub fn delta(bin: usize) -> Self {
        Self {
            group: SetGroup::Delta,
            bin,
        }
    }
}

/// CPU side of one category within a set. Both vectors always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanePlan {
    pub positions: Vec<[f32; 3]>,
    pub color_indices: Vec<u32>,
}

impl LanePlan {
    fn push(&mut self, record: &CellRecord, color_index: u32) {
        self.positions.push(record.position.to_array());
        self.color_indices.push(color_index);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPlan {
    pub key: SetKey,
    /// Indexed by [`DisplayCategory::index`].
    pub lanes: [LanePlan; 3],
}

impl SetPlan {
    pub fn lane(&self, category: DisplayCategory) -> &LanePlan {
        &self.lanes[category.index()]
    }
}

/// Everything needed to upload one file's instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePlan {
    pub sets: Vec<SetPlan>,
    pub cluster_count: usize,
    pub num_bins: usize,
}

fn color_for_bin(record: &CellRecord, cluster: usize, bin: usize) -> u32 {
    if bin == 0 {
        base_color_index(cluster)
    } else {
        bin_color_index(cluster, record.norm_value(bin - 1))
    }
}

fn delta_color_for_bin(record: &CellRecord, bin: usize) -> u32 {
    if bin == 0 {
        DELTA_BASE_INDEX
    } else {
        delta_color_index(record.norm_value(bin - 1))
    }
}

impl InstancePlan {
    pub fn build(records: &RecordSet, mask: &ExperimentMask) -> Self {
        let num_bins = records.num_bins();
        let cluster_count = records.cluster_count();
        let visible = |r: &&CellRecord| r.has_coordinate() && mask.allows(r.experiment);

        let mut sets: Vec<SetPlan> = (0..cluster_count)
            .into_par_iter()
            .flat_map_iter(|cluster| {
                let members: [Vec<&CellRecord>; 2] = [
                    records
                        .cluster_records(DisplayCategory::Control, cluster)
                        .iter()
                        .filter(visible)
                        .collect(),
                    records
                        .cluster_records(DisplayCategory::Stim, cluster)
                        .iter()
                        .filter(visible)
                        .collect(),
                ];
                (0..=num_bins)
                    .map(|bin| {
                        let mut lanes: [LanePlan; 3] = Default::default();
                        for (lane, group) in lanes.iter_mut().zip(members.iter()) {
                            for record in group {
                                lane.push(record, color_for_bin(record, cluster, bin));
                            }
                        }
                        SetPlan {
                            key: SetKey::cluster(cluster, bin),
                            lanes,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        if records.has_delta() {
            let deltas: Vec<&CellRecord> = records.delta_records().iter().filter(visible).collect();
            sets.extend((0..=num_bins).map(|bin| {
                let mut lanes: [LanePlan; 3] = Default::default();
                let lane = &mut lanes[DisplayCategory::Delta.index()];
                for record in &deltas {
                    lane.push(record, delta_color_for_bin(record, bin));
                }
                SetPlan {
                    key: SetKey::delta(bin),
                    lanes,
                }
            }));
        }

        Self {
            sets,
            cluster_count,
            num_bins,
        }
    }

    /// Instances across all groups and categories for one bin.
    pub fn instance_count(&self, bin: usize) -> usize {
        self.sets
            .iter()
            .filter(|s| s.key.bin == bin)
            .flat_map(|s| s.lanes.iter())
            .map(LanePlan::len)
            .sum()
    }
}

/// GPU buffers for one category of a set. Empty lanes own no buffers.
#[derive(Debug, Default)]
pub struct InstanceLane {
    positions: Option<wgpu::Buffer>,
    colors: Option<wgpu::Buffer>,
    count: u32,
}

impl InstanceLane {
    fn upload(device: &wgpu::Device, label: &str, plan: &LanePlan) -> Self {
        if plan.is_empty() {
            return Self::default();
        }
        let positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Positions", label)),
            contents: bytemuck::cast_slice(&plan.positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let colors = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Color Indices", label)),
            contents: bytemuck::cast_slice(&plan.color_indices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self {
            positions: Some(positions),
            colors: Some(colors),
            count: plan.len() as u32,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Position and colour-index buffers, `None` when the lane is empty.
    pub fn buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer)> {
        match (&self.positions, &self.colors) {
            (Some(p), Some(c)) if self.count > 0 => Some((p, c)),
            _ => None,
        }
    }

    fn release(&mut self) {
        for buffer in [self.positions.take(), self.colors.take()].into_iter().flatten() {
            buffer.destroy();
        }
        self.count = 0;
    }
}

#[derive(Debug)]
pub struct InstanceSet {
    pub key: SetKey,
    lanes: [InstanceLane; 3],
}

impl InstanceSet {
    pub fn lane(&self, category: DisplayCategory) -> &InstanceLane {
        &self.lanes[category.index()]
    }

    pub fn count(&self, category: DisplayCategory) -> u32 {
        self.lane(category).count()
    }

    pub fn total(&self) -> u32 {
        self.lanes.iter().map(InstanceLane::count).sum()
    }
}

/// Summary of one rebuild, for logging and the scene's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub sets: usize,
    pub base_instances: usize,
    pub buffers: usize,
}

/// Owns every instance buffer of the current file.
#[derive(Debug, Default)]
pub struct InstanceBufferManager {
    arena: Vec<InstanceSet>,
    index: HashMap<SetKey, usize>,
    visible: Vec<bool>,
    cluster_count: usize,
    num_bins: usize,
    generation: u64,
}

impl InstanceBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all sets with ones built from `records`. Previous buffers are
    /// destroyed before any new ones are allocated.
    pub fn rebuild(
        &mut self,
        device: &wgpu::Device,
        records: &RecordSet,
        on_off: &[bool],
        mask: &ExperimentMask,
    ) -> RebuildStats {
        self.release_all();
        let plan = InstancePlan::build(records, mask);
        self.upload(device, &plan);
        self.cluster_count = plan.cluster_count;
        self.num_bins = plan.num_bins;
        self.visible = (0..plan.cluster_count)
            .map(|c| on_off.get(c).copied().unwrap_or(true))
            .collect();

        let stats = RebuildStats {
            sets: self.arena.len(),
            base_instances: plan.instance_count(0),
            buffers: self
                .arena
                .iter()
                .flat_map(|s| s.lanes.iter())
                .filter(|l| l.buffers().is_some())
                .count()
                * 2,
        };
        log::debug!(
            "Rebuilt instance arena (generation {}): {} sets, {} base instances, {} buffers",
            self.generation,
            stats.sets,
            stats.base_instances,
            stats.buffers
        );
        stats
    }

    fn upload(&mut self, device: &wgpu::Device, plan: &InstancePlan) {
        self.arena.reserve(plan.sets.len());
        for set in &plan.sets {
            let label = match set.key.group {
                SetGroup::Cluster(c) => format!("Cluster {} Bin {}", c, set.key.bin),
                SetGroup::Delta => format!("Delta Bin {}", set.key.bin),
            };
            let lanes = [
                InstanceLane::upload(device, &format!("{} Control", label), &set.lanes[0]),
                InstanceLane::upload(device, &format!("{} Stim", label), &set.lanes[1]),
                InstanceLane::upload(device, &format!("{} Delta", label), &set.lanes[2]),
            ];
            self.index.insert(set.key, self.arena.len());
            self.arena.push(InstanceSet { key: set.key, lanes });
        }
        self.generation += 1;
    }

    /// Destroy every buffer and forget all sets.
    pub fn release_all(&mut self) {
        if self.arena.is_empty() {
            return;
        }
        for set in &mut self.arena {
            for lane in &mut set.lanes {
                lane.release();
            }
        }
        log::debug!("Released {} instance sets", self.arena.len());
        self.arena.clear();
        self.index.clear();
        self.visible.clear();
        self.cluster_count = 0;
        self.num_bins = 0;
    }

    pub fn set_visibility(&mut self, cluster: usize, on: bool) {
        if let Some(v) = self.visible.get_mut(cluster) {
            *v = on;
        }
    }

    pub fn set_all_visible(&mut self, on: bool) {
        self.visible.iter_mut().for_each(|v| *v = on);
    }

    pub fn is_visible(&self, group: SetGroup) -> bool {
        match group {
            SetGroup::Cluster(c) => self.visible.get(c).copied().unwrap_or(false),
            SetGroup::Delta => true,
        }
    }

    pub fn visibility(&self) -> &[bool] {
        &self.visible
    }

    pub fn get(&self, key: SetKey) -> Option<&InstanceSet> {
        self.index.get(&key).map(|&i| &self.arena[i])
    }

    /// Visible sets for one bin, in arena order.
    pub fn visible_sets(&self, bin: usize) -> impl Iterator<Item = &InstanceSet> {
        self.arena
            .iter()
            .filter(move |s| s.key.bin == bin && self.is_visible(s.key.group))
    }

    pub fn sets(&self) -> &[InstanceSet] {
        &self.arena
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

impl Drop for InstanceBufferManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LoadOptions, RecordRow, Rgb};
    use crate::rendering::shades::COLOR_STEPS;

    fn row(name: &str, x: f64, rgb: (f64, f64, f64), exp: &str, period: &str, bins: Vec<f32>) -> RecordRow {
        RecordRow {
            name: name.to_string(),
            channel: 1,
            atlas: [x, 1.0, 1.0],
            color: Rgb::new(rgb.0, rgb.1, rgb.2),
            experiment: Some(exp.to_string()),
            period: period.to_string(),
            archetype: 0,
            raw_bins: bins.clone(),
            norm_bins: bins,
        }
    }

    fn two_cluster_set() -> RecordSet {
        let rows = vec![
            row("a", 1.0, (1.0, 0.0, 0.0), "e1", "CONTROL", vec![1.0, 0.5, 0.0]),
            row("b", 2.0, (1.0, 0.0, 0.0), "e2", "CONTROL", vec![0.0, 0.5, 1.0]),
            row("c", 3.0, (0.0, 0.0, 1.0), "e1", "CCO2STIM", vec![0.2, 0.4, 0.6]),
            row("d", 0.0, (0.0, 0.0, 1.0), "e1", "CONTROL", vec![0.2, 0.4, 0.6]),
        ];
        let mut rows = rows;
        rows[3].atlas = [0.0, 0.0, 0.0];
        RecordSet::from_rows(rows, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_bins_plus_one_sets_per_cluster() {
        let records = two_cluster_set();
        let plan = InstancePlan::build(&records, &ExperimentMask::all());
        assert_eq!(plan.num_bins, 3);
        assert_eq!(plan.sets.len(), 2 * 4);
        for cluster in 0..2 {
            let sets: Vec<_> = plan
                .sets
                .iter()
                .filter(|s| s.key.group == SetGroup::Cluster(cluster))
                .collect();
            assert_eq!(sets.len(), 4);
            let counts: Vec<_> = sets.iter().map(|s| s.lanes.iter().map(LanePlan::len).sum::<usize>()).collect();
            assert!(counts.windows(2).all(|w| w[0] == w[1]));
        }
        assert!(plan.sets.iter().all(|s| s.lane(DisplayCategory::Delta).is_empty()));
    }

    #[test]
    fn test_count_matches_placed_filtered_records() {
        let records = two_cluster_set();
        let plan = InstancePlan::build(&records, &ExperimentMask::all());
        assert_eq!(plan.instance_count(0), 3);

        let mut mask = ExperimentMask::all();
        mask.set(1, false, records.experiments().len());
        let plan = InstancePlan::build(&records, &mask);
        assert_eq!(plan.instance_count(0), 2);
        for bin in 0..=plan.num_bins {
            assert_eq!(plan.instance_count(bin), 2);
        }
    }

    #[test]
    fn test_color_indices() {
        let records = two_cluster_set();
        let plan = InstancePlan::build(&records, &ExperimentMask::all());
        let base = &plan.sets[0];
        assert_eq!(base.key, SetKey::cluster(0, 0));
        assert_eq!(base.lane(DisplayCategory::Control).color_indices, vec![0, 0]);

        let bin1 = &plan.sets[1];
        assert_eq!(bin1.key, SetKey::cluster(0, 1));
        assert_eq!(
            bin1.lane(DisplayCategory::Control).color_indices,
            vec![0, (COLOR_STEPS - 1) as u32]
        );

        let stim_base = &plan.sets[4];
        assert_eq!(stim_base.key, SetKey::cluster(1, 0));
        assert_eq!(
            stim_base.lane(DisplayCategory::Stim).color_indices,
            vec![COLOR_STEPS as u32]
        );
    }

    #[test]
    fn test_delta_sets_use_delta_table() {
        let mut rows = vec![row("a", 1.0, (1.0, 0.0, 0.0), "e1", "CONTROL", vec![1.0])];
        rows.push(row("d", 1.0, (-1.0, 0.0, 0.0), "e1", "CS-DELTA", vec![-1.0]));
        let records = RecordSet::from_rows(rows, &LoadOptions::default()).unwrap();
        let plan = InstancePlan::build(&records, &ExperimentMask::all());
        let delta: Vec<_> = plan.sets.iter().filter(|s| s.key.group == SetGroup::Delta).collect();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].lane(DisplayCategory::Delta).color_indices, vec![DELTA_BASE_INDEX]);
        assert_eq!(delta[1].lane(DisplayCategory::Delta).color_indices, vec![16]);
    }

    #[test]
    fn test_empty_cluster_still_planned() {
        let records = two_cluster_set();
        let mut mask = ExperimentMask::all();
        mask.set(0, false, 2);
        mask.set(1, false, 2);
        let plan = InstancePlan::build(&records, &mask);
        assert_eq!(plan.sets.len(), 8);
        assert_eq!(plan.instance_count(0), 0);
    }
}
