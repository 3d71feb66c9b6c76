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

//! Block-level object codec.
//!
//! Object layout: `[data blocks..][index block][footer]`. The footer is
//! fixed-size so a reader can locate the index with two ranged reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use config::meta::{compact::StreamDataBlock, stream::S3ObjectMetadata};
use infra::{
    errors::{Error, Result},
    storage::{ObjectStoreRef, object_key},
};
use tokio::io::AsyncWriteExt;

use super::throttle::Throttle;

pub const FOOTER_SIZE: u64 = 24;
pub const INDEX_ENTRY_SIZE: usize = 40;
const FOOTER_MAGIC: u64 = 0x5353_4f31_424c_4f43; // "SSO1BLOC"

/// Streams data blocks into one object via multipart upload, then appends
/// the block index and the footer on close.
pub struct DataBlockWriter {
    object_id: i64,
    bucket: String,
    writer: object_store::buffered::BufWriter,
    index: Vec<StreamDataBlock>,
    position: u64,
}

impl DataBlockWriter {
    pub fn new(object_id: i64, storage: ObjectStoreRef, part_size: usize, bucket: &str) -> Self {
        let path = object_key(object_id);
        Self {
            object_id,
            bucket: bucket.to_string(),
            writer: object_store::buffered::BufWriter::with_capacity(storage, path, part_size),
            index: Vec::new(),
            position: 0,
        }
    }

    /// Append one block payload. The index entry is rewritten for this
    /// object: same stream interval, new byte positions.
    pub async fn write(&mut self, block: &StreamDataBlock, payload: Bytes) -> Result<()> {
        let start = self.position;
        self.writer
            .write_all(&payload)
            .await
            .map_err(|e| Error::WriteFailure(e.to_string()))?;
        self.position += payload.len() as u64;
        self.index.push(StreamDataBlock {
            stream_id: block.stream_id,
            start_offset: block.start_offset,
            end_offset: block.end_offset,
            object_id: self.object_id,
            block_start_position: start,
            block_end_position: self.position,
        });
        Ok(())
    }

    /// Finish the object: write index + footer, complete the upload.
    /// Returns the final object size.
    pub async fn close(mut self) -> Result<u64> {
        let index_position = self.position;
        let mut buf = BytesMut::with_capacity(self.index.len() * INDEX_ENTRY_SIZE + 24);
        for block in self.index.iter() {
            buf.put_i64_le(block.stream_id);
            buf.put_i64_le(block.start_offset);
            buf.put_i64_le(block.end_offset);
            buf.put_u64_le(block.block_start_position);
            buf.put_u32_le(block.block_size() as u32);
            buf.put_u32_le(0);
        }
        let index_size = buf.len() as u32;
        buf.put_u64_le(index_position);
        buf.put_u32_le(index_size);
        buf.put_u32_le(0);
        buf.put_u64_le(FOOTER_MAGIC);
        self.writer
            .write_all(&buf)
            .await
            .map_err(|e| Error::WriteFailure(e.to_string()))?;
        self.writer
            .shutdown()
            .await
            .map_err(|e| Error::WriteFailure(e.to_string()))?;
        Ok(index_position + index_size as u64 + FOOTER_SIZE)
    }

    /// Abandon the upload, discarding parts already sent.
    pub async fn abort(self) {
        let mut writer = self.writer;
        if let Err(e) = writer.abort().await {
            log::warn!(
                "[COMPACTOR] abort upload of object {} error: {}",
                self.object_id,
                e
            );
        }
    }

    pub fn size(&self) -> u64 {
        self.position
    }

    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Ranged reader for one committed object.
pub struct DataBlockReader {
    meta: S3ObjectMetadata,
    storage: ObjectStoreRef,
}

impl DataBlockReader {
    pub fn new(meta: S3ObjectMetadata, storage: ObjectStoreRef) -> Self {
        Self { meta, storage }
    }

    /// Fetch and parse the block index from the object footer.
    pub async fn read_block_index(&self) -> Result<Vec<StreamDataBlock>> {
        let path = object_key(self.meta.object_id);
        let object_size = self.meta.object_size as u64;
        if object_size < FOOTER_SIZE {
            return Err(Error::ReadFailure(format!(
                "object {} too small for footer: {} bytes",
                self.meta.object_id, object_size
            )));
        }
        let mut footer = self
            .storage
            .get_range(&path, object_size - FOOTER_SIZE..object_size)
            .await
            .map_err(|e| Error::ReadFailure(e.to_string()))?;
        let index_position = footer.get_u64_le();
        let index_size = footer.get_u32_le() as u64;
        let _reserved = footer.get_u32_le();
        let magic = footer.get_u64_le();
        if magic != FOOTER_MAGIC {
            return Err(Error::ReadFailure(format!(
                "object {} footer magic mismatch",
                self.meta.object_id
            )));
        }
        if index_size % INDEX_ENTRY_SIZE as u64 != 0
            || index_position + index_size + FOOTER_SIZE != object_size
        {
            return Err(Error::ReadFailure(format!(
                "object {} block index corrupted",
                self.meta.object_id
            )));
        }
        let mut index = self
            .storage
            .get_range(&path, index_position..index_position + index_size)
            .await
            .map_err(|e| Error::ReadFailure(e.to_string()))?;
        let mut blocks = Vec::with_capacity(index_size as usize / INDEX_ENTRY_SIZE);
        while index.remaining() >= INDEX_ENTRY_SIZE {
            let stream_id = index.get_i64_le();
            let start_offset = index.get_i64_le();
            let end_offset = index.get_i64_le();
            let block_start_position = index.get_u64_le();
            let block_size = index.get_u32_le() as u64;
            let _reserved = index.get_u32_le();
            if start_offset >= end_offset || block_size == 0 {
                return Err(Error::ReadFailure(format!(
                    "object {} has an invalid index entry for stream {}",
                    self.meta.object_id, stream_id
                )));
            }
            blocks.push(StreamDataBlock {
                stream_id,
                start_offset,
                end_offset,
                object_id: self.meta.object_id,
                block_start_position,
                block_end_position: block_start_position + block_size,
            });
        }
        Ok(blocks)
    }

    /// Load payloads for the given blocks. Adjacent byte ranges are
    /// coalesced up to `max_batch_bytes` per request, each request paced
    /// through the throttle. Returns payloads aligned with the input
    /// order.
    pub async fn read_blocks(
        &self,
        blocks: &[StreamDataBlock],
        max_batch_bytes: u64,
        throttle: &Throttle,
    ) -> Result<Vec<Bytes>> {
        let path = object_key(self.meta.object_id);
        let mut order = (0..blocks.len()).collect::<Vec<_>>();
        order.sort_by_key(|i| blocks[*i].block_start_position);

        let mut results: Vec<Option<Bytes>> = vec![None; blocks.len()];
        let mut batch: Vec<usize> = Vec::new();
        let mut batch_start = 0;
        let mut batch_end = 0;
        for idx in order {
            let b = &blocks[idx];
            if batch.is_empty() {
                batch_start = b.block_start_position;
                batch_end = b.block_end_position;
                batch.push(idx);
                continue;
            }
            if b.block_start_position == batch_end
                && b.block_end_position - batch_start <= max_batch_bytes
            {
                batch_end = b.block_end_position;
                batch.push(idx);
            } else {
                self.read_batch(&path, &batch, batch_start, batch_end, blocks, &mut results, throttle)
                    .await?;
                batch_start = b.block_start_position;
                batch_end = b.block_end_position;
                batch = vec![idx];
            }
        }
        if !batch.is_empty() {
            self.read_batch(&path, &batch, batch_start, batch_end, blocks, &mut results, throttle)
                .await?;
        }
        Ok(results.into_iter().map(|b| b.unwrap_or_default()).collect())
    }

    async fn read_batch(
        &self,
        path: &object_store::path::Path,
        batch: &[usize],
        batch_start: u64,
        batch_end: u64,
        blocks: &[StreamDataBlock],
        results: &mut [Option<Bytes>],
        throttle: &Throttle,
    ) -> Result<()> {
        throttle.acquire(batch_end - batch_start).await;
        let data = self
            .storage
            .get_range(path, batch_start..batch_end)
            .await
            .map_err(|e| Error::ReadFailure(e.to_string()))?;
        config::metrics::COMPACTION_READ_BYTES
            .with_label_values(&["data"])
            .inc_by(batch_end - batch_start);
        for idx in batch {
            let b = &blocks[*idx];
            let from = (b.block_start_position - batch_start) as usize;
            let to = (b.block_end_position - batch_start) as usize;
            results[*idx] = Some(data.slice(from..to));
        }
        Ok(())
    }
}
