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

//! Stream-set object compaction: periodically rewrites many small mixed
//! objects into fewer, larger, per-stream ones, keeping every live byte
//! addressable.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use config::{
    meta::compact::{CommitStreamSetObjectRequest, NOOP_OBJECT_ID, StreamObject},
    metrics,
    utils::{size::bytes_to_human_readable, time},
};
use infra::{
    errors::{Error, Result},
    object_manager::{ObjectManager, StreamManager},
    storage,
};
use tokio_util::sync::CancellationToken;

pub mod analyzer;
pub mod block_index;
pub mod codec;
pub mod executor;
pub mod sanity;
pub mod throttle;
pub mod uploader;

use analyzer::AnalyzerConfig;
use executor::{CompactionExecutor, build_stream_ranges};
use throttle::Throttle;
use uploader::Uploader;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompactionStatus {
    Idle,
    Running,
    Cancelled,
    ShutDown,
}

/// Top-level compaction state machine. One run at a time per node; a run
/// owns its block map, throttle, and uploader, nothing survives it.
pub struct CompactionManager {
    object_manager: Arc<dyn ObjectManager>,
    stream_manager: Arc<dyn StreamManager>,
    compact_cfg: config::Compact,
    network_baseline_bandwidth: u64,
    index_concurrency: usize,
    bucket: String,
    status: parking_lot::Mutex<CompactionStatus>,
    has_remaining_objects: AtomicBool,
    shutdown_token: CancellationToken,
    run_lock: tokio::sync::Mutex<()>,
}

impl CompactionManager {
    pub fn new(
        object_manager: Arc<dyn ObjectManager>,
        stream_manager: Arc<dyn StreamManager>,
    ) -> Self {
        let cfg = config::get_config();
        Self::with_config(
            object_manager,
            stream_manager,
            cfg.compact.clone(),
            cfg.limit.network_baseline_bandwidth,
            cfg.limit.cpu_num,
            &cfg.s3.bucket_name,
        )
    }

    pub fn with_config(
        object_manager: Arc<dyn ObjectManager>,
        stream_manager: Arc<dyn StreamManager>,
        compact_cfg: config::Compact,
        network_baseline_bandwidth: u64,
        index_concurrency: usize,
        bucket: &str,
    ) -> Self {
        Self {
            object_manager,
            stream_manager,
            compact_cfg,
            network_baseline_bandwidth,
            index_concurrency,
            bucket: bucket.to_string(),
            status: parking_lot::Mutex::new(CompactionStatus::Idle),
            has_remaining_objects: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// One full compaction run, completing on commit ack.
    pub async fn compact(&self) -> Result<()> {
        self.run(false).await
    }

    /// Force-split every current candidate regardless of age.
    pub async fn force_split_all(&self) -> Result<()> {
        self.run(true).await
    }

    async fn run(&self, force_all: bool) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Shutdown);
        }
        self.set_status(CompactionStatus::Running);
        let token = self.shutdown_token.child_token();
        let result = tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            r = self.run_inner(force_all) => r,
        };
        match &result {
            Ok(()) => {
                self.set_status(CompactionStatus::Idle);
                metrics::COMPACTION_RUNS.with_label_values(&["success"]).inc();
            }
            Err(Error::Cancelled) => {
                self.set_status(CompactionStatus::Cancelled);
                metrics::COMPACTION_RUNS.with_label_values(&["cancelled"]).inc();
            }
            Err(_) => {
                self.set_status(CompactionStatus::Idle);
                metrics::COMPACTION_RUNS.with_label_values(&["failure"]).inc();
            }
        }
        result
    }

    async fn run_inner(&self, force_all: bool) -> Result<()> {
        let cfg = &self.compact_cfg;
        let started = Instant::now();

        let mut objects = self.object_manager.get_server_objects().await?;
        if objects.is_empty() {
            self.has_remaining_objects.store(false, Ordering::Relaxed);
            log::info!("[COMPACTOR] no stream-set objects to compact");
            return Ok(());
        }

        // keep the most recent candidates, the rest waits for the next run
        objects.sort_by_key(|o| std::cmp::Reverse(o.data_time_in_ms));
        let has_remaining = objects.len() > cfg.max_object_num;
        if has_remaining {
            objects.truncate(cfg.max_object_num);
        }
        self.has_remaining_objects
            .store(has_remaining, Ordering::Relaxed);

        let now = time::now_millis();
        let force_split_period_ms = cfg.force_split_object_period as i64 * 60_000;
        let force_ids = objects
            .iter()
            .filter(|o| force_all || now - o.data_time_in_ms >= force_split_period_ms)
            .map(|o| o.object_id)
            .collect::<HashSet<_>>();

        let total_bytes = objects.iter().map(|o| o.object_size as u64).sum::<u64>();
        let throttle = Arc::new(self.build_throttle(total_bytes));
        log::info!(
            "[COMPACTOR] start compaction, {} candidates ({} force split), {} total, throttled: {}",
            objects.len(),
            force_ids.len(),
            bytes_to_human_readable(total_bytes as f64),
            throttle.is_enabled()
        );

        let index_map =
            block_index::fetch(&objects, cfg.cache_size, self.index_concurrency).await?;
        let stream_ids = block_index::distinct_stream_ids(&index_map);
        let streams = self.stream_manager.get_streams(&stream_ids).await?;
        let (block_map, out_of_date) = block_index::filter_trimmed(index_map.clone(), &streams);
        log::info!(
            "[COMPACTOR] indexed {} objects, {} live streams, {} out-of-date objects, took {} ms",
            index_map.len(),
            streams.len(),
            out_of_date.len(),
            started.elapsed().as_millis()
        );

        let store = storage::get_bucket(&self.bucket).ok_or_else(|| {
            Error::ConfigurationInvalid(format!("bucket {} not registered", self.bucket))
        })?;
        let uploader = Arc::new(Uploader::new(
            self.object_manager.clone(),
            store,
            &self.bucket,
            cfg.object_part_size,
            cfg.prepare_object_ttl * 60_000,
        ));
        let object_metas = objects
            .iter()
            .map(|o| (o.object_id, o.clone()))
            .collect::<HashMap<_, _>>();
        let executor = CompactionExecutor::new(
            uploader.clone(),
            throttle.clone(),
            object_metas,
            self.network_baseline_bandwidth,
        );

        let mut compacted_object_ids = out_of_date;
        let mut stream_objects: Vec<StreamObject> = Vec::new();
        let mut force_map = HashMap::new();
        let mut compact_map = HashMap::new();
        for (object_id, blocks) in block_map {
            if force_ids.contains(&object_id) {
                force_map.insert(object_id, blocks);
            } else {
                compact_map.insert(object_id, blocks);
            }
        }

        // force-split phase, per-object errors are isolated
        let mut force_object_ids = force_map.keys().copied().collect::<Vec<_>>();
        force_object_ids.sort_unstable();
        for object_id in force_object_ids {
            let blocks = &force_map[&object_id];
            match executor
                .force_split_object(object_id, blocks, cfg.cache_size)
                .await
            {
                Ok(split_objects) => {
                    stream_objects.extend(split_objects);
                    compacted_object_ids.push(object_id);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::error!("[COMPACTOR] force split object {object_id} error: {e}");
                }
            }
        }

        // compact phase; force-split outputs already used part of the
        // commit fanout budget
        let analyzer_cfg = AnalyzerConfig {
            stream_split_size: cfg.stream_split_size,
            max_stream_object_num_per_commit: cfg
                .max_stream_object_num_per_commit
                .saturating_sub(stream_objects.len()),
            max_stream_num_per_stream_set_object: cfg.max_stream_num_per_stream_set_object,
            cache_size: cfg.cache_size,
        };
        let planned = analyzer::analyze(&compact_map, &analyzer_cfg);
        if !planned.excluded_object_ids.is_empty() {
            log::warn!(
                "[COMPACTOR] {} objects deferred to the next run by fanout/stream budgets",
                planned.excluded_object_ids.len()
            );
            self.has_remaining_objects.store(true, Ordering::Relaxed);
            compact_map.retain(|object_id, _| !planned.excluded_object_ids.contains(object_id));
        }
        log::info!(
            "[COMPACTOR] planned {} iterations over {} objects",
            planned.plans.len(),
            compact_map.len()
        );

        stream_objects.extend(executor.execute(&planned.plans).await?);
        compacted_object_ids.extend(compact_map.keys().copied());

        let (object_id, object_size) = match uploader.complete().await? {
            Some((object_id, object_size)) => (object_id, object_size as i64),
            None => (NOOP_OBJECT_ID, 0),
        };
        let stream_ranges = build_stream_ranges(&uploader.sorted_stream_data_blocks().await);
        compacted_object_ids.sort_unstable();
        compacted_object_ids.dedup();
        stream_objects.sort_by_key(|so| (so.stream_id, so.start_offset));

        let req = CommitStreamSetObjectRequest {
            object_id,
            order_id: compacted_object_ids.first().copied().unwrap_or(NOOP_OBJECT_ID),
            object_size,
            stream_ranges,
            stream_objects,
            compacted_object_ids,
        };
        if req.is_empty() {
            log::info!("[COMPACTOR] nothing to commit, took {} ms", started.elapsed().as_millis());
            return Ok(());
        }

        sanity::check(&req, &index_map, &streams)?;

        self.object_manager
            .commit_stream_set_object(&req)
            .await
            .map_err(|e| Error::CommitFailure(e.to_string()))?;
        log::info!("[COMPACT] {}", serde_json::to_string(&req)?);
        log::info!(
            "[COMPACTOR] compaction done, {} inputs -> {} ranges + {} stream objects, took {} ms",
            req.compacted_object_ids.len(),
            req.stream_ranges.len(),
            req.stream_objects.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Size the per-run token bucket so the run finishes within the
    /// schedule. The floor at `target_secs` keeps tiny workloads from
    /// degenerating to a zero-rate bucket.
    fn build_throttle(&self, total_bytes: u64) -> Throttle {
        let target_secs = self.compact_cfg.interval.saturating_sub(1).max(1) * 60;
        let rate = target_secs.max(total_bytes / target_secs);
        Throttle::new(rate)
    }

    /// Idempotent: cancels the in-flight run and refuses further ones.
    pub fn shutdown(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        self.shutdown_token.cancel();
        self.set_status(CompactionStatus::ShutDown);
        log::info!("[COMPACTOR] shutdown");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn status(&self) -> CompactionStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: CompactionStatus) {
        let mut guard = self.status.lock();
        // shutdown is terminal
        if *guard != CompactionStatus::ShutDown {
            *guard = status;
        }
    }

    pub fn has_remaining_objects(&self) -> bool {
        self.has_remaining_objects.load(Ordering::Relaxed)
    }

    /// Age of the oldest uncompacted object, by commit time. Sampled into
    /// [`metrics::COMPACTION_DELAY_TIME`] by the utility loop.
    pub async fn compaction_delay_ms(&self) -> Result<i64> {
        let objects = self.object_manager.get_server_objects().await?;
        Ok(objects
            .iter()
            .map(|o| o.committed_timestamp)
            .min()
            .map(|t| time::now_millis() - t)
            .unwrap_or(0))
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.compact_cfg.interval * 60)
    }
}
