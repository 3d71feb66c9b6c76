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

use std::{collections::HashMap, sync::Arc, time::Instant};

use bytes::Bytes;
use config::{
    meta::{
        compact::{
            CompactedObject, CompactionPlan, CompactionType, ObjectStreamRange, StreamDataBlock,
            StreamObject,
        },
        stream::S3ObjectMetadata,
    },
    utils::size::bytes_to_human_readable,
};
use infra::{
    errors::{Error, Result},
    storage,
};
use tokio::task::JoinSet;

use super::{
    analyzer::{run_size, stream_runs},
    codec::DataBlockReader,
    throttle::Throttle,
    uploader::Uploader,
};

/// Drives planned iterations: one read pass per plan through the throttle,
/// COMPACT portions chained onto the stream-set writer, SPLIT portions
/// written in parallel.
pub struct CompactionExecutor {
    uploader: Arc<Uploader>,
    throttle: Arc<Throttle>,
    object_metas: HashMap<i64, S3ObjectMetadata>,
    max_batch_bytes: u64,
}

impl CompactionExecutor {
    pub fn new(
        uploader: Arc<Uploader>,
        throttle: Arc<Throttle>,
        object_metas: HashMap<i64, S3ObjectMetadata>,
        max_batch_bytes: u64,
    ) -> Self {
        Self {
            uploader,
            throttle,
            object_metas,
            max_batch_bytes,
        }
    }

    /// Execute plans in planner order. Returns the stream objects written
    /// for SPLIT outputs; COMPACT output accumulates in the uploader.
    pub async fn execute(&self, plans: &[CompactionPlan]) -> Result<Vec<StreamObject>> {
        let mut stream_objects = Vec::new();
        for (iteration, plan) in plans.iter().enumerate() {
            let started = Instant::now();
            let data = match self.read_plan(plan).await {
                Ok(data) => data,
                Err(e) => {
                    self.uploader.force_flush().await;
                    return Err(e);
                }
            };

            let mut splits: JoinSet<Result<_>> = JoinSet::new();
            let mut chain_result: Result<()> = Ok(());
            for co in plan.compacted_objects.iter() {
                let payloads = match collect_payloads(co, &data) {
                    Ok(payloads) => payloads,
                    Err(e) => {
                        chain_result = Err(e);
                        break;
                    }
                };
                match co.compaction_type {
                    CompactionType::Split => {
                        let uploader = self.uploader.clone();
                        let co = co.clone();
                        splits.spawn(async move {
                            uploader.write_stream_object(&co, payloads).await
                        });
                    }
                    CompactionType::Compact => {
                        if let Err(e) =
                            self.uploader.chain_write_stream_set_object(co, payloads).await
                        {
                            chain_result = Err(e);
                            break;
                        }
                    }
                }
            }

            let mut split_result: Result<()> = Ok(());
            while let Some(joined) = splits.join_next().await {
                match joined {
                    Ok(Ok(stream_object)) => stream_objects.push(stream_object),
                    Ok(Err(e)) => split_result = Err(e),
                    Err(e) => split_result = Err(Error::WriteFailure(e.to_string())),
                }
            }
            if let Err(e) = chain_result.and(split_result) {
                self.uploader.force_flush().await;
                return Err(e);
            }

            log::info!(
                "[COMPACTOR] iteration {}/{} done, read {} from {} objects, {} outputs, took {} ms",
                iteration + 1,
                plans.len(),
                bytes_to_human_readable(plan.read_size() as f64),
                plan.stream_data_blocks.len(),
                plan.compacted_objects.len(),
                started.elapsed().as_millis()
            );
            // data map dropped here, block buffers released
        }
        stream_objects.sort_by_key(|so| (so.stream_id, so.start_offset));
        Ok(stream_objects)
    }

    /// Rewrite one aged object into per-stream objects, batched under the
    /// read budget, ids reserved per batch.
    pub async fn force_split_object(
        &self,
        object_id: i64,
        blocks: &[StreamDataBlock],
        cache_size: u64,
    ) -> Result<Vec<StreamObject>> {
        let mut single = HashMap::new();
        single.insert(object_id, blocks.to_vec());
        let runs = stream_runs(&single)
            .into_values()
            .flatten()
            .collect::<Vec<_>>();

        let mut batches: Vec<Vec<Vec<StreamDataBlock>>> = Vec::new();
        let mut batch: Vec<Vec<StreamDataBlock>> = Vec::new();
        let mut batch_size = 0u64;
        for run in runs {
            let size = run_size(&run);
            if size > cache_size {
                return Err(Error::Message(format!(
                    "object {object_id} stream {} has a {size} bytes run that does not fit the compaction cache",
                    run[0].stream_id
                )));
            }
            if batch_size + size > cache_size && !batch.is_empty() {
                batches.push(std::mem::take(&mut batch));
                batch_size = 0;
            }
            batch_size += size;
            batch.push(run);
        }
        if !batch.is_empty() {
            batches.push(batch);
        }

        let mut stream_objects = Vec::new();
        for batch in batches {
            let first_id = self.uploader.prepare_objects(batch.len()).await?;
            let flat = batch.iter().flatten().cloned().collect::<Vec<_>>();
            let meta = self.object_meta(object_id)?;
            let store = storage::get_bucket(&meta.bucket).ok_or_else(|| {
                Error::ReadFailure(format!("bucket {} not registered", meta.bucket))
            })?;
            let payloads = DataBlockReader::new(meta.clone(), store)
                .read_blocks(&flat, self.max_batch_bytes, &self.throttle)
                .await?;
            let data = flat
                .iter()
                .map(|b| b.block_start_position)
                .zip(payloads)
                .collect::<HashMap<_, _>>();
            for (i, run) in batch.into_iter().enumerate() {
                let payloads = run
                    .iter()
                    .map(|b| data[&b.block_start_position].clone())
                    .collect::<Vec<_>>();
                let co = CompactedObject::new(CompactionType::Split, run);
                let stream_object = self
                    .uploader
                    .write_stream_object_with_id(first_id + i as i64, &co, payloads)
                    .await?;
                stream_objects.push(stream_object);
            }
        }
        Ok(stream_objects)
    }

    async fn read_plan(&self, plan: &CompactionPlan) -> Result<HashMap<(i64, u64), Bytes>> {
        let reads = plan.stream_data_blocks.iter().map(|(object_id, blocks)| {
            let throttle = self.throttle.clone();
            async move {
                let meta = self.object_meta(*object_id)?;
                let store = storage::get_bucket(&meta.bucket).ok_or_else(|| {
                    Error::ReadFailure(format!("bucket {} not registered", meta.bucket))
                })?;
                let payloads = DataBlockReader::new(meta.clone(), store)
                    .read_blocks(blocks, self.max_batch_bytes, &throttle)
                    .await?;
                Ok::<_, Error>(
                    blocks
                        .iter()
                        .map(|b| (b.object_id, b.block_start_position))
                        .zip(payloads)
                        .collect::<Vec<_>>(),
                )
            }
        });
        let results = futures::future::try_join_all(reads).await?;
        Ok(results.into_iter().flatten().collect())
    }

    fn object_meta(&self, object_id: i64) -> Result<&S3ObjectMetadata> {
        self.object_metas
            .get(&object_id)
            .ok_or_else(|| Error::Message(format!("object {object_id} metadata missing")))
    }
}

fn collect_payloads(
    co: &CompactedObject,
    data: &HashMap<(i64, u64), Bytes>,
) -> Result<Vec<Bytes>> {
    co.stream_data_blocks
        .iter()
        .map(|b| {
            data.get(&(b.object_id, b.block_start_position))
                .cloned()
                .ok_or_else(|| {
                    Error::ReadFailure(format!(
                        "block of stream {} at object {} position {} was not loaded",
                        b.stream_id, b.object_id, b.block_start_position
                    ))
                })
        })
        .collect()
}

/// Re-group chained blocks into contiguous per-stream ranges. The input is
/// already in append order: streams ascending, offsets ascending.
pub fn build_stream_ranges(blocks: &[StreamDataBlock]) -> Vec<ObjectStreamRange> {
    let mut ranges: Vec<ObjectStreamRange> = Vec::new();
    for b in blocks {
        match ranges.last_mut() {
            Some(r) if r.stream_id == b.stream_id && r.end_offset == b.start_offset => {
                r.end_offset = b.end_offset;
            }
            _ => ranges.push(ObjectStreamRange {
                stream_id: b.stream_id,
                start_offset: b.start_offset,
                end_offset: b.end_offset,
            }),
        }
    }
    ranges
}
