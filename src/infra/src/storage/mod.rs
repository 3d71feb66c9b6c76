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

use dashmap::DashMap;
use object_store::{ObjectStore, path::Path};
use once_cell::sync::Lazy;

pub mod remote;

pub const CONCURRENT_REQUESTS: usize = 1000;

pub type ObjectStoreRef = Arc<dyn ObjectStore>;

static BUCKETS: Lazy<DashMap<String, ObjectStoreRef>> = Lazy::new(DashMap::new);

/// Resolve the store backing a bucket. The configured default bucket is
/// created lazily from the S3 config; every other bucket must have been
/// registered first.
pub fn get_bucket(bucket: &str) -> Option<ObjectStoreRef> {
    if let Some(store) = BUCKETS.get(bucket) {
        return Some(store.clone());
    }
    let cfg = config::get_config();
    if bucket == cfg.s3.bucket_name {
        let store = remote::remote();
        BUCKETS.insert(bucket.to_string(), store.clone());
        return Some(store);
    }
    None
}

pub fn register_bucket(bucket: &str, store: ObjectStoreRef) {
    BUCKETS.insert(bucket.to_string(), store);
}

/// In-memory store, used by tests and local development.
pub fn memory() -> ObjectStoreRef {
    Arc::new(object_store::memory::InMemory::new())
}

/// Key of an object in its bucket. Ids are zero-padded so listings sort in
/// id order.
pub fn object_key(object_id: i64) -> Path {
    let cfg = config::get_config();
    Path::from(format!(
        "{}objects/{:020}",
        cfg.s3.bucket_prefix, object_id
    ))
}
