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

use serde::{Deserialize, Serialize};

/// Metadata of a live stream, `start_offset` is the trim watermark: every
/// offset below it has been deleted and must not survive a rewrite.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub stream_id: i64,
    pub start_offset: i64,
}

impl StreamMetadata {
    pub fn new(stream_id: i64, start_offset: i64) -> Self {
        Self {
            stream_id,
            start_offset,
        }
    }
}

/// Metadata of one committed object in the object store.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct S3ObjectMetadata {
    pub object_id: i64,
    pub object_size: i64,
    /// logical creation time of the packed data, milliseconds
    pub data_time_in_ms: i64,
    /// wall-clock commit time, milliseconds
    pub committed_timestamp: i64,
    pub bucket: String,
}

impl S3ObjectMetadata {
    pub fn new(object_id: i64, object_size: i64, data_time_in_ms: i64, bucket: &str) -> Self {
        Self {
            object_id,
            object_size,
            data_time_in_ms,
            committed_timestamp: data_time_in_ms,
            bucket: bucket.to_string(),
        }
    }
}
