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

use std::collections::HashMap;

use config::meta::{
    compact::StreamDataBlock,
    stream::{S3ObjectMetadata, StreamMetadata},
};
use futures::{StreamExt, TryStreamExt};
use infra::{
    errors::{Error, Result},
    storage,
};

use super::codec::DataBlockReader;

/// Fetch the block index of every candidate object, `concurrency` objects
/// at a time. Fails the whole run when any block exceeds the read budget:
/// such data cannot be loaded within one plan, so compaction is
/// structurally impossible.
pub async fn fetch(
    objects: &[S3ObjectMetadata],
    cache_size: u64,
    concurrency: usize,
) -> Result<HashMap<i64, Vec<StreamDataBlock>>> {
    let results = futures::stream::iter(objects.iter().cloned().map(|meta| async move {
        let store = storage::get_bucket(&meta.bucket).ok_or_else(|| {
            Error::ReadFailure(format!("bucket {} not registered", meta.bucket))
        })?;
        let object_id = meta.object_id;
        let blocks = DataBlockReader::new(meta, store).read_block_index().await?;
        for b in blocks.iter() {
            if b.block_size() > cache_size {
                return Err(Error::BlockTooLargeForCache {
                    object_id,
                    block_size: b.block_size(),
                    cache_size,
                });
            }
        }
        Ok::<_, Error>((object_id, blocks))
    }))
    .buffer_unordered(concurrency.max(1))
    .try_collect::<Vec<_>>()
    .await?;
    Ok(results.into_iter().collect())
}

/// Drop blocks whose data is gone: trimmed below the stream watermark, or
/// belonging to a deleted stream. Sources left without any live block are
/// out-of-date, returned separately so commit can retire them without
/// producing output.
pub fn filter_trimmed(
    mut block_map: HashMap<i64, Vec<StreamDataBlock>>,
    streams: &[StreamMetadata],
) -> (HashMap<i64, Vec<StreamDataBlock>>, Vec<i64>) {
    let watermarks = streams
        .iter()
        .map(|s| (s.stream_id, s.start_offset))
        .collect::<HashMap<_, _>>();
    for blocks in block_map.values_mut() {
        blocks.retain(|b| {
            watermarks
                .get(&b.stream_id)
                .is_some_and(|start_offset| b.end_offset > *start_offset)
        });
    }
    let mut out_of_date = Vec::new();
    block_map.retain(|object_id, blocks| {
        if blocks.is_empty() {
            out_of_date.push(*object_id);
            false
        } else {
            true
        }
    });
    out_of_date.sort_unstable();
    (block_map, out_of_date)
}

pub fn distinct_stream_ids(block_map: &HashMap<i64, Vec<StreamDataBlock>>) -> Vec<i64> {
    let mut ids = block_map
        .values()
        .flatten()
        .map(|b| b.stream_id)
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    ids
}
