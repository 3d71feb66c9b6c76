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

use std::sync::Arc;

use bytes::Bytes;
use config::meta::compact::{CompactedObject, StreamDataBlock, StreamObject};
use infra::{
    errors::{Error, Result},
    object_manager::ObjectManager,
    storage::ObjectStoreRef,
};
use tokio::sync::Mutex;

use super::codec::DataBlockWriter;

/// Writes compaction output. The single stream-set object is chain-written
/// (one portion after another, planner order), stream objects are written
/// independently.
pub struct Uploader {
    object_manager: Arc<dyn ObjectManager>,
    storage: ObjectStoreRef,
    bucket: String,
    part_size: usize,
    prepare_ttl_ms: u64,
    state: Mutex<StreamSetState>,
}

#[derive(Default)]
struct StreamSetState {
    writer: Option<DataBlockWriter>,
    sorted_stream_data_blocks: Vec<StreamDataBlock>,
}

impl Uploader {
    pub fn new(
        object_manager: Arc<dyn ObjectManager>,
        storage: ObjectStoreRef,
        bucket: &str,
        part_size: usize,
        prepare_ttl_ms: u64,
    ) -> Self {
        Self {
            object_manager,
            storage,
            bucket: bucket.to_string(),
            part_size,
            prepare_ttl_ms,
            state: Mutex::new(StreamSetState::default()),
        }
    }

    pub async fn prepare_objects(&self, count: usize) -> Result<i64> {
        self.object_manager
            .prepare_object(count, self.prepare_ttl_ms)
            .await
    }

    /// Append one COMPACT portion to the output stream-set object. The id
    /// is reserved lazily on the first portion.
    pub async fn chain_write_stream_set_object(
        &self,
        co: &CompactedObject,
        payloads: Vec<Bytes>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.writer.is_none() {
            let object_id = self.prepare_objects(1).await?;
            state.writer = Some(DataBlockWriter::new(
                object_id,
                self.storage.clone(),
                self.part_size,
                &self.bucket,
            ));
        }
        let writer = state.writer.as_mut().unwrap();
        for (block, payload) in co.stream_data_blocks.iter().zip(payloads) {
            writer.write(block, payload).await?;
        }
        state
            .sorted_stream_data_blocks
            .extend(co.stream_data_blocks.iter().cloned());
        Ok(())
    }

    /// Write one SPLIT output into a freshly reserved stream object.
    pub async fn write_stream_object(
        &self,
        co: &CompactedObject,
        payloads: Vec<Bytes>,
    ) -> Result<StreamObject> {
        let object_id = self.prepare_objects(1).await?;
        self.write_stream_object_with_id(object_id, co, payloads)
            .await
    }

    pub async fn write_stream_object_with_id(
        &self,
        object_id: i64,
        co: &CompactedObject,
        payloads: Vec<Bytes>,
    ) -> Result<StreamObject> {
        let blocks = &co.stream_data_blocks;
        let (first, last) = match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::Message("empty stream object write".to_string())),
        };
        let mut writer =
            DataBlockWriter::new(object_id, self.storage.clone(), self.part_size, &self.bucket);
        for (block, payload) in blocks.iter().zip(payloads) {
            if let Err(e) = writer.write(block, payload).await {
                writer.abort().await;
                return Err(e);
            }
        }
        let stream_id = first.stream_id;
        let start_offset = first.start_offset;
        let end_offset = last.end_offset;
        let object_size = writer.close().await?;
        Ok(StreamObject {
            object_id,
            stream_id,
            start_offset,
            end_offset,
            object_size: object_size as i64,
            bucket: self.bucket.clone(),
        })
    }

    /// Close the stream-set writer. `None` when no COMPACT portion was
    /// ever written.
    pub async fn complete(&self) -> Result<Option<(i64, u64)>> {
        let mut state = self.state.lock().await;
        match state.writer.take() {
            Some(writer) => {
                let object_id = writer.object_id();
                let object_size = writer.close().await?;
                Ok(Some((object_id, object_size)))
            }
            None => Ok(None),
        }
    }

    /// Abandon the chained upload after a failure and drop tracked blocks.
    pub async fn force_flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.take() {
            writer.abort().await;
        }
        state.sorted_stream_data_blocks.clear();
    }

    /// COMPACT blocks in append order, grouped by stream, offsets
    /// ascending.
    pub async fn sorted_stream_data_blocks(&self) -> Vec<StreamDataBlock> {
        self.state.lock().await.sorted_stream_data_blocks.clone()
    }
}

#[cfg(test)]
mod tests {
    use config::meta::{compact::CompactionType, stream::S3ObjectMetadata};
    use infra::object_manager::MemoryObjectManager;

    use super::{super::codec::DataBlockReader, *};

    fn co(stream_id: i64, start: i64, end: i64, size: u64) -> (CompactedObject, Vec<Bytes>) {
        let block = StreamDataBlock {
            stream_id,
            start_offset: start,
            end_offset: end,
            object_id: 1,
            block_start_position: 0,
            block_end_position: size,
        };
        (
            CompactedObject::new(CompactionType::Compact, vec![block]),
            vec![Bytes::from(vec![stream_id as u8; size as usize])],
        )
    }

    fn uploader() -> (Uploader, ObjectStoreRef) {
        let store = infra::storage::memory();
        let object_manager = Arc::new(MemoryObjectManager::default());
        (
            Uploader::new(object_manager, store.clone(), "up-test", 1024 * 1024, 60_000),
            store,
        )
    }

    #[tokio::test]
    async fn test_chain_write_then_complete() {
        let (uploader, store) = uploader();
        let (co1, p1) = co(1, 0, 100, 64);
        let (co2, p2) = co(2, 0, 50, 32);
        uploader.chain_write_stream_set_object(&co1, p1).await.unwrap();
        uploader.chain_write_stream_set_object(&co2, p2).await.unwrap();
        let (object_id, object_size) = uploader.complete().await.unwrap().unwrap();
        assert!(object_size > 96);

        let meta = S3ObjectMetadata::new(object_id, object_size as i64, 0, "up-test");
        let index = DataBlockReader::new(meta, store)
            .read_block_index()
            .await
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].stream_id, 1);
        assert_eq!(index[1].stream_id, 2);
        assert_eq!(index[1].block_start_position, 64);

        let blocks = uploader.sorted_stream_data_blocks().await;
        assert_eq!(blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_without_writes() {
        let (uploader, _) = uploader();
        assert!(uploader.complete().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_stream_object_descriptor() {
        let (uploader, _) = uploader();
        let block1 = StreamDataBlock {
            stream_id: 9,
            start_offset: 100,
            end_offset: 200,
            object_id: 1,
            block_start_position: 0,
            block_end_position: 64,
        };
        let block2 = StreamDataBlock {
            stream_id: 9,
            start_offset: 200,
            end_offset: 300,
            object_id: 1,
            block_start_position: 64,
            block_end_position: 128,
        };
        let co = CompactedObject::new(CompactionType::Split, vec![block1, block2]);
        let payloads = vec![Bytes::from(vec![0u8; 64]), Bytes::from(vec![1u8; 64])];
        let so = uploader.write_stream_object(&co, payloads).await.unwrap();
        assert_eq!(so.stream_id, 9);
        assert_eq!(so.start_offset, 100);
        assert_eq!(so.end_offset, 300);
        assert_eq!(so.bucket, "up-test");
        assert!(so.object_size > 128);
    }

    #[tokio::test]
    async fn test_force_flush_clears_state() {
        let (uploader, _) = uploader();
        let (co1, p1) = co(1, 0, 100, 64);
        uploader.chain_write_stream_set_object(&co1, p1).await.unwrap();
        uploader.force_flush().await;
        assert!(uploader.sorted_stream_data_blocks().await.is_empty());
        assert!(uploader.complete().await.unwrap().is_none());
    }
}
