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

use serde::{Deserialize, Serialize};

/// Sentinel object id for a commit request that produced no stream-set
/// output (everything was split or deleted).
pub const NOOP_OBJECT_ID: i64 = -1;

/// An interval of a single stream inside one physical object.
///
/// `[start_offset, end_offset)` is the logical range,
/// `[block_start_position, block_end_position)` the byte range in the
/// source object.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamDataBlock {
    pub stream_id: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub object_id: i64,
    pub block_start_position: u64,
    pub block_end_position: u64,
}

impl StreamDataBlock {
    pub fn block_size(&self) -> u64 {
        self.block_end_position - self.block_start_position
    }

    /// Whether `next` continues this block's stream range without a gap.
    pub fn is_adjacent(&self, next: &StreamDataBlock) -> bool {
        self.stream_id == next.stream_id && self.end_offset == next.start_offset
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CompactionType {
    Compact,
    Split,
}

/// One output unit of a plan: a SPLIT becomes its own stream object, a
/// COMPACT contributes a portion of the single rewritten stream-set object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompactedObject {
    pub compaction_type: CompactionType,
    pub stream_data_blocks: Vec<StreamDataBlock>,
    pub size: u64,
}

impl CompactedObject {
    pub fn new(compaction_type: CompactionType, stream_data_blocks: Vec<StreamDataBlock>) -> Self {
        let size = stream_data_blocks.iter().map(|b| b.block_size()).sum();
        Self {
            compaction_type,
            stream_data_blocks,
            size,
        }
    }
}

/// One read iteration: which blocks to load from which source objects, and
/// the outputs the loaded bytes will be written into. The sum of block
/// sizes never exceeds the compaction cache size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompactionPlan {
    pub stream_data_blocks: HashMap<i64, Vec<StreamDataBlock>>,
    pub compacted_objects: Vec<CompactedObject>,
}

impl CompactionPlan {
    pub fn is_empty(&self) -> bool {
        self.compacted_objects.is_empty()
    }

    pub fn read_size(&self) -> u64 {
        self.stream_data_blocks
            .values()
            .flatten()
            .map(|b| b.block_size())
            .sum()
    }
}

/// A freshly written per-stream object.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamObject {
    pub object_id: i64,
    pub stream_id: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub object_size: i64,
    pub bucket: String,
}

/// A contiguous per-stream span inside the new stream-set object.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ObjectStreamRange {
    pub stream_id: i64,
    pub start_offset: i64,
    pub end_offset: i64,
}

/// The atomic output artifact of one compaction run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommitStreamSetObjectRequest {
    pub object_id: i64,
    /// smallest input object id, keeps the rewritten object ordered with
    /// its surviving peers
    pub order_id: i64,
    pub object_size: i64,
    pub stream_ranges: Vec<ObjectStreamRange>,
    pub stream_objects: Vec<StreamObject>,
    pub compacted_object_ids: Vec<i64>,
}

impl CommitStreamSetObjectRequest {
    pub fn is_empty(&self) -> bool {
        self.stream_ranges.is_empty()
            && self.stream_objects.is_empty()
            && self.compacted_object_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(stream_id: i64, start: i64, end: i64, pos: u64, size: u64) -> StreamDataBlock {
        StreamDataBlock {
            stream_id,
            start_offset: start,
            end_offset: end,
            object_id: 1,
            block_start_position: pos,
            block_end_position: pos + size,
        }
    }

    #[test]
    fn test_block_size() {
        let b = block(1, 0, 100, 16, 256);
        assert_eq!(b.block_size(), 256);
    }

    #[test]
    fn test_is_adjacent() {
        let a = block(1, 0, 100, 0, 64);
        let b = block(1, 100, 200, 64, 64);
        let c = block(1, 150, 200, 64, 64);
        let d = block(2, 100, 200, 64, 64);
        assert!(a.is_adjacent(&b));
        assert!(!a.is_adjacent(&c));
        assert!(!a.is_adjacent(&d));
    }

    #[test]
    fn test_compacted_object_size() {
        let co = CompactedObject::new(
            CompactionType::Compact,
            vec![block(1, 0, 100, 0, 64), block(1, 100, 200, 64, 100)],
        );
        assert_eq!(co.size, 164);
    }
}
