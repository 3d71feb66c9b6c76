// Copyright 2025 Streamstore Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Pure compaction planner: block map in, ordered read plans out. No I/O,
//! deterministic for a given input and configuration.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use config::meta::compact::{CompactedObject, CompactionPlan, CompactionType, StreamDataBlock};

pub struct AnalyzerConfig {
    pub stream_split_size: u64,
    pub max_stream_object_num_per_commit: usize,
    pub max_stream_num_per_stream_set_object: usize,
    pub cache_size: u64,
}

#[derive(Debug, Default)]
pub struct AnalyzeResult {
    pub plans: Vec<CompactionPlan>,
    pub excluded_object_ids: Vec<i64>,
}

/// Plan the rewrite of `block_map` under the given budgets.
///
/// Runs over the fanout ceiling or streams over the stream-set ceiling are
/// resolved by excluding whole source objects and replanning: an excluded
/// object is never partially rewritten, it just stays for the next run.
pub fn analyze(
    block_map: &HashMap<i64, Vec<StreamDataBlock>>,
    cfg: &AnalyzerConfig,
) -> AnalyzeResult {
    let mut map = block_map.clone();
    let mut excluded: BTreeSet<i64> = BTreeSet::new();

    loop {
        let runs = stream_runs(&map);

        // distinct-stream ceiling of the compact portion
        let compact_streams = runs
            .iter()
            .filter(|(_, rs)| rs.iter().any(|r| run_size(r) < cfg.stream_split_size))
            .map(|(stream_id, _)| *stream_id)
            .collect::<Vec<_>>();
        if compact_streams.len() > cfg.max_stream_num_per_stream_set_object {
            let excess = &compact_streams[cfg.max_stream_num_per_stream_set_object..];
            let offenders = excess
                .iter()
                .flat_map(|stream_id| {
                    runs[stream_id]
                        .iter()
                        .filter(|r| run_size(r) < cfg.stream_split_size)
                        .flatten()
                        .map(|b| b.object_id)
                })
                .collect::<BTreeSet<_>>();
            for object_id in offenders {
                map.remove(&object_id);
                excluded.insert(object_id);
            }
            continue;
        }

        let plans = pack(&runs, cfg);

        // fanout ceiling of the split portion
        let mut splits = 0;
        let mut offenders: BTreeSet<i64> = BTreeSet::new();
        for plan in plans.iter() {
            for co in plan.compacted_objects.iter() {
                if co.compaction_type == CompactionType::Split {
                    splits += 1;
                    if splits > cfg.max_stream_object_num_per_commit {
                        offenders.extend(co.stream_data_blocks.iter().map(|b| b.object_id));
                    }
                }
            }
        }
        if offenders.is_empty() {
            return AnalyzeResult {
                plans,
                excluded_object_ids: excluded.into_iter().collect(),
            };
        }
        for object_id in offenders {
            map.remove(&object_id);
            excluded.insert(object_id);
        }
    }
}

/// Group all blocks by stream and split every stream into contiguous
/// offset runs, sorted by start offset. Streams ascend, runs ascend.
pub fn stream_runs(
    block_map: &HashMap<i64, Vec<StreamDataBlock>>,
) -> BTreeMap<i64, Vec<Vec<StreamDataBlock>>> {
    let mut streams: BTreeMap<i64, Vec<StreamDataBlock>> = BTreeMap::new();
    for blocks in block_map.values() {
        for b in blocks {
            streams.entry(b.stream_id).or_default().push(b.clone());
        }
    }
    let mut runs = BTreeMap::new();
    for (stream_id, mut blocks) in streams {
        blocks.sort_by_key(|b| b.start_offset);
        let mut stream_runs: Vec<Vec<StreamDataBlock>> = Vec::new();
        for b in blocks {
            match stream_runs.last_mut() {
                Some(run) if run.last().unwrap().is_adjacent(&b) => run.push(b),
                _ => stream_runs.push(vec![b]),
            }
        }
        runs.insert(stream_id, stream_runs);
    }
    runs
}

pub fn run_size(run: &[StreamDataBlock]) -> u64 {
    run.iter().map(|b| b.block_size()).sum()
}

/// Pack runs into plans under the read budget. A run cut at a plan
/// boundary yields one compacted object per piece; blocks never span
/// plans.
fn pack(
    runs: &BTreeMap<i64, Vec<Vec<StreamDataBlock>>>,
    cfg: &AnalyzerConfig,
) -> Vec<CompactionPlan> {
    let mut plans = Vec::new();
    let mut plan = CompactionPlan::default();
    let mut plan_size = 0u64;
    for stream_runs in runs.values() {
        for run in stream_runs {
            let compaction_type = if run_size(run) >= cfg.stream_split_size {
                CompactionType::Split
            } else {
                CompactionType::Compact
            };
            let mut acc: Vec<StreamDataBlock> = Vec::new();
            for b in run {
                if plan_size > 0 && plan_size + b.block_size() > cfg.cache_size {
                    if !acc.is_empty() {
                        plan.compacted_objects
                            .push(CompactedObject::new(compaction_type, std::mem::take(&mut acc)));
                    }
                    plans.push(std::mem::take(&mut plan));
                    plan_size = 0;
                }
                plan.stream_data_blocks
                    .entry(b.object_id)
                    .or_default()
                    .push(b.clone());
                plan_size += b.block_size();
                acc.push(b.clone());
            }
            if !acc.is_empty() {
                plan.compacted_objects
                    .push(CompactedObject::new(compaction_type, acc));
            }
        }
    }
    if !plan.is_empty() {
        plans.push(plan);
    }
    plans
}
