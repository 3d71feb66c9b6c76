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

use std::{
    collections::HashMap,
    sync::atomic::{AtomicI64, Ordering},
};

use async_trait::async_trait;
use config::meta::{
    compact::{CommitStreamSetObjectRequest, NOOP_OBJECT_ID, StreamObject},
    stream::{S3ObjectMetadata, StreamMetadata},
};
use parking_lot::RwLock;

use crate::errors::{Error, Result};

/// Metadata manager owning the object list. Commit atomically publishes the
/// rewritten objects and retires the compacted inputs.
#[async_trait]
pub trait ObjectManager: Sync + Send + 'static {
    async fn get_server_objects(&self) -> Result<Vec<S3ObjectMetadata>>;
    /// Reserve `count` consecutive object ids, valid for `ttl_ms`. Returns
    /// the first id.
    async fn prepare_object(&self, count: usize, ttl_ms: u64) -> Result<i64>;
    async fn commit_stream_set_object(&self, req: &CommitStreamSetObjectRequest) -> Result<()>;
}

#[async_trait]
pub trait StreamManager: Sync + Send + 'static {
    async fn get_streams(&self, stream_ids: &[i64]) -> Result<Vec<StreamMetadata>>;
}

/// In-memory [`ObjectManager`], used by tests and local development.
#[derive(Default)]
pub struct MemoryObjectManager {
    next_object_id: AtomicI64,
    objects: RwLock<Vec<S3ObjectMetadata>>,
    stream_objects: RwLock<Vec<StreamObject>>,
    committed: RwLock<Vec<CommitStreamSetObjectRequest>>,
}

impl MemoryObjectManager {
    pub fn with_objects(objects: Vec<S3ObjectMetadata>) -> Self {
        let next = objects.iter().map(|o| o.object_id).max().unwrap_or(0) + 1;
        Self {
            next_object_id: AtomicI64::new(next),
            objects: RwLock::new(objects),
            ..Default::default()
        }
    }

    pub fn add_object(&self, meta: S3ObjectMetadata) {
        let mut next = self.next_object_id.load(Ordering::SeqCst);
        while next <= meta.object_id {
            match self.next_object_id.compare_exchange(
                next,
                meta.object_id + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(v) => next = v,
            }
        }
        self.objects.write().push(meta);
    }

    pub fn objects(&self) -> Vec<S3ObjectMetadata> {
        self.objects.read().clone()
    }

    pub fn stream_objects(&self) -> Vec<StreamObject> {
        self.stream_objects.read().clone()
    }

    pub fn committed_requests(&self) -> Vec<CommitStreamSetObjectRequest> {
        self.committed.read().clone()
    }
}

#[async_trait]
impl ObjectManager for MemoryObjectManager {
    async fn get_server_objects(&self) -> Result<Vec<S3ObjectMetadata>> {
        Ok(self.objects.read().clone())
    }

    async fn prepare_object(&self, count: usize, _ttl_ms: u64) -> Result<i64> {
        if count == 0 {
            return Err(Error::Message("prepare_object count is 0".to_string()));
        }
        Ok(self.next_object_id.fetch_add(count as i64, Ordering::SeqCst))
    }

    async fn commit_stream_set_object(&self, req: &CommitStreamSetObjectRequest) -> Result<()> {
        let mut objects = self.objects.write();
        for id in req.compacted_object_ids.iter() {
            if !objects.iter().any(|o| o.object_id == *id) {
                return Err(Error::CommitFailure(format!(
                    "compacted object {id} not found"
                )));
            }
        }
        objects.retain(|o| !req.compacted_object_ids.contains(&o.object_id));
        if req.object_id != NOOP_OBJECT_ID {
            let mut meta = S3ObjectMetadata::new(
                req.object_id,
                req.object_size,
                config::utils::time::now_millis(),
                "",
            );
            meta.committed_timestamp = config::utils::time::now_millis();
            objects.push(meta);
        }
        drop(objects);
        self.stream_objects
            .write()
            .extend(req.stream_objects.iter().cloned());
        self.committed.write().push(req.clone());
        Ok(())
    }
}

/// In-memory [`StreamManager`] holding the live stream set.
#[derive(Default)]
pub struct MemoryStreamManager {
    streams: RwLock<HashMap<i64, StreamMetadata>>,
}

impl MemoryStreamManager {
    pub fn with_streams(streams: Vec<StreamMetadata>) -> Self {
        Self {
            streams: RwLock::new(streams.into_iter().map(|s| (s.stream_id, s)).collect()),
        }
    }

    pub fn set_start_offset(&self, stream_id: i64, start_offset: i64) {
        self.streams
            .write()
            .insert(stream_id, StreamMetadata::new(stream_id, start_offset));
    }

    pub fn remove_stream(&self, stream_id: i64) {
        self.streams.write().remove(&stream_id);
    }
}

#[async_trait]
impl StreamManager for MemoryStreamManager {
    async fn get_streams(&self, stream_ids: &[i64]) -> Result<Vec<StreamMetadata>> {
        let streams = self.streams.read();
        Ok(stream_ids
            .iter()
            .filter_map(|id| streams.get(id).copied())
            .collect())
    }
}
