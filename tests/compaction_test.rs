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
use config::meta::{
    compact::{NOOP_OBJECT_ID, StreamDataBlock},
    stream::S3ObjectMetadata,
};
use infra::{
    errors::Error,
    object_manager::{MemoryObjectManager, MemoryStreamManager},
    storage::{self, ObjectStoreRef},
};
use streamstore::service::compact::{
    CompactionManager, CompactionStatus,
    codec::{DataBlockReader, DataBlockWriter},
};

struct TestEnv {
    bucket: String,
    store: ObjectStoreRef,
    object_manager: Arc<MemoryObjectManager>,
    stream_manager: Arc<MemoryStreamManager>,
}

impl TestEnv {
    fn new(bucket: &str) -> Self {
        let store = storage::memory();
        storage::register_bucket(bucket, store.clone());
        Self {
            bucket: bucket.to_string(),
            store,
            object_manager: Arc::new(MemoryObjectManager::default()),
            stream_manager: Arc::new(MemoryStreamManager::default()),
        }
    }

    /// Write a stream-set object with the given `(stream_id, start, end,
    /// byte_size)` blocks and register it, `age_minutes` old.
    async fn put_object(&self, object_id: i64, age_minutes: i64, blocks: &[(i64, i64, i64, u64)]) {
        let mut writer = DataBlockWriter::new(object_id, self.store.clone(), 1024 * 1024, &self.bucket);
        for (stream_id, start, end, size) in blocks {
            let block = StreamDataBlock {
                stream_id: *stream_id,
                start_offset: *start,
                end_offset: *end,
                object_id,
                block_start_position: 0,
                block_end_position: *size,
            };
            let payload = Bytes::from(vec![*stream_id as u8; *size as usize]);
            writer.write(&block, payload).await.unwrap();
        }
        let object_size = writer.close().await.unwrap();
        let data_time = config::utils::time::now_millis() - age_minutes * 60_000;
        self.object_manager.add_object(S3ObjectMetadata::new(
            object_id,
            object_size as i64,
            data_time,
            &self.bucket,
        ));
    }

    fn manager(&self, compact_cfg: config::Compact) -> CompactionManager {
        CompactionManager::with_config(
            self.object_manager.clone(),
            self.stream_manager.clone(),
            compact_cfg,
            100 * 1024 * 1024,
            4,
            &self.bucket,
        )
    }
}

fn compact_cfg() -> config::Compact {
    config::Compact {
        enabled: true,
        interval: 20,
        force_split_object_period: 120,
        max_object_num: 500,
        max_stream_num_per_stream_set_object: 10_000,
        max_stream_object_num_per_commit: 10_000,
        cache_size: 200 * 1024 * 1024,
        stream_split_size: 10_000,
        object_part_size: 1024 * 1024,
        prepare_object_ttl: 30,
    }
}

#[tokio::test]
async fn test_single_small_object_single_stream() {
    let env = TestEnv::new("it-single");
    env.put_object(1, 0, &[(1, 0, 100, 512), (1, 100, 200, 512)]).await;
    env.stream_manager.set_start_offset(1, 0);

    env.manager(compact_cfg()).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_ne!(req.object_id, NOOP_OBJECT_ID);
    assert_eq!(req.order_id, 1);
    assert_eq!(req.compacted_object_ids, vec![1]);
    assert!(req.stream_objects.is_empty());
    assert_eq!(req.stream_ranges.len(), 1);
    assert_eq!(req.stream_ranges[0].stream_id, 1);
    assert_eq!(req.stream_ranges[0].start_offset, 0);
    assert_eq!(req.stream_ranges[0].end_offset, 200);
}

#[tokio::test]
async fn test_aged_object_force_split() {
    let cfg = compact_cfg();
    let env = TestEnv::new("it-aged");
    env.put_object(1, cfg.force_split_object_period as i64 + 1, &[
        (1, 0, 100, 512),
        (1, 100, 200, 512),
    ])
    .await;
    env.stream_manager.set_start_offset(1, 0);

    env.manager(cfg).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.object_id, NOOP_OBJECT_ID);
    assert!(req.stream_ranges.is_empty());
    assert_eq!(req.compacted_object_ids, vec![1]);
    assert_eq!(req.stream_objects.len(), 1);
    let so = &req.stream_objects[0];
    assert_eq!((so.stream_id, so.start_offset, so.end_offset), (1, 0, 200));
}

#[tokio::test]
async fn test_cross_object_merge() {
    let env = TestEnv::new("it-merge");
    env.put_object(1, 0, &[(1, 0, 50, 256), (2, 0, 50, 256)]).await;
    env.put_object(2, 0, &[(1, 50, 100, 256), (2, 50, 100, 256)]).await;
    env.stream_manager.set_start_offset(1, 0);
    env.stream_manager.set_start_offset(2, 0);

    env.manager(compact_cfg()).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.compacted_object_ids, vec![1, 2]);
    assert_eq!(req.order_id, 1);
    let ranges = req
        .stream_ranges
        .iter()
        .map(|r| (r.stream_id, r.start_offset, r.end_offset))
        .collect::<Vec<_>>();
    assert_eq!(ranges, vec![(1, 0, 100), (2, 0, 100)]);

    // the rewritten object is readable and carries the merged layout
    let meta = S3ObjectMetadata::new(req.object_id, req.object_size, 0, "it-merge");
    let index = DataBlockReader::new(meta, env.store.clone())
        .read_block_index()
        .await
        .unwrap();
    let layout = index
        .iter()
        .map(|b| (b.stream_id, b.start_offset))
        .collect::<Vec<_>>();
    assert_eq!(layout, vec![(1, 0), (1, 50), (2, 0), (2, 50)]);
}

#[tokio::test]
async fn test_read_budget_splits_iterations() {
    let mut cfg = compact_cfg();
    cfg.cache_size = 120;
    cfg.stream_split_size = 10_000;
    let env = TestEnv::new("it-budget");
    env.put_object(1, 0, &[(1, 0, 100, 100), (2, 0, 100, 100)]).await;
    env.stream_manager.set_start_offset(1, 0);
    env.stream_manager.set_start_offset(2, 0);

    env.manager(cfg).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    // two plans, still one output stream-set object with both ranges
    assert_ne!(req.object_id, NOOP_OBJECT_ID);
    let ranges = req
        .stream_ranges
        .iter()
        .map(|r| (r.stream_id, r.start_offset, r.end_offset))
        .collect::<Vec<_>>();
    assert_eq!(ranges, vec![(1, 0, 100), (2, 0, 100)]);
}

#[tokio::test]
async fn test_trimmed_object_becomes_out_of_date() {
    let env = TestEnv::new("it-trim");
    env.put_object(1, 0, &[(1, 0, 50, 256)]).await;
    env.stream_manager.set_start_offset(1, 50);

    env.manager(compact_cfg()).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.object_id, NOOP_OBJECT_ID);
    assert!(req.stream_ranges.is_empty());
    assert!(req.stream_objects.is_empty());
    assert_eq!(req.compacted_object_ids, vec![1]);
    assert!(env.object_manager.objects().is_empty());
}

#[tokio::test]
async fn test_fanout_cap_defers_objects() {
    let mut cfg = compact_cfg();
    cfg.max_stream_object_num_per_commit = 2;
    cfg.stream_split_size = 200;
    let env = TestEnv::new("it-fanout");
    for i in 1..=5 {
        // one run each, over the split threshold, eligible for SPLIT only
        env.put_object(i, 0, &[(i, 0, 100, 256)]).await;
        env.stream_manager.set_start_offset(i, 0);
    }

    let manager = env.manager(cfg);
    manager.compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.stream_objects.len(), 2);
    assert_eq!(req.compacted_object_ids, vec![1, 2]);
    assert!(manager.has_remaining_objects());
    // deferred sources are untouched
    let mut remaining = env
        .object_manager
        .objects()
        .iter()
        .map(|o| o.object_id)
        .collect::<Vec<_>>();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_empty_candidate_set_is_a_noop() {
    let env = TestEnv::new("it-noop");
    let manager = env.manager(compact_cfg());
    manager.compact().await.unwrap();
    assert!(env.object_manager.committed_requests().is_empty());
    assert_eq!(manager.status(), CompactionStatus::Idle);
    assert!(!manager.has_remaining_objects());
}

#[tokio::test]
async fn test_force_split_all_ignores_age() {
    let env = TestEnv::new("it-forceall");
    env.put_object(1, 0, &[(1, 0, 100, 512)]).await;
    env.put_object(2, 0, &[(2, 0, 100, 512)]).await;
    env.stream_manager.set_start_offset(1, 0);
    env.stream_manager.set_start_offset(2, 0);

    env.manager(compact_cfg()).force_split_all().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.object_id, NOOP_OBJECT_ID);
    assert!(req.stream_ranges.is_empty());
    assert_eq!(req.stream_objects.len(), 2);
    assert_eq!(req.compacted_object_ids, vec![1, 2]);
}

#[tokio::test]
async fn test_shutdown_refuses_new_runs() {
    let env = TestEnv::new("it-shutdown");
    env.put_object(1, 0, &[(1, 0, 100, 512)]).await;
    env.stream_manager.set_start_offset(1, 0);

    let manager = env.manager(compact_cfg());
    manager.shutdown();
    manager.shutdown(); // idempotent
    assert_eq!(manager.status(), CompactionStatus::ShutDown);
    assert!(matches!(manager.compact().await, Err(Error::Shutdown)));
    assert!(env.object_manager.committed_requests().is_empty());
}

#[tokio::test]
async fn test_mixed_run_commits_ranges_and_stream_objects() {
    // an aged object and two fresh ones in one run
    let cfg = compact_cfg();
    let env = TestEnv::new("it-mixed");
    env.put_object(1, cfg.force_split_object_period as i64 + 5, &[(7, 0, 10, 128)]).await;
    env.put_object(2, 0, &[(8, 0, 50, 256)]).await;
    env.put_object(3, 0, &[(8, 50, 100, 256)]).await;
    env.stream_manager.set_start_offset(7, 0);
    env.stream_manager.set_start_offset(8, 0);

    env.manager(cfg).compact().await.unwrap();

    let committed = env.object_manager.committed_requests();
    assert_eq!(committed.len(), 1);
    let req = &committed[0];
    assert_eq!(req.compacted_object_ids, vec![1, 2, 3]);
    assert_eq!(req.order_id, 1);
    assert_eq!(req.stream_objects.len(), 1);
    assert_eq!(req.stream_objects[0].stream_id, 7);
    let ranges = req
        .stream_ranges
        .iter()
        .map(|r| (r.stream_id, r.start_offset, r.end_offset))
        .collect::<Vec<_>>();
    assert_eq!(ranges, vec![(8, 0, 100)]);
}
