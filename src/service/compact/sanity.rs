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
    compact::{CommitStreamSetObjectRequest, StreamDataBlock},
    stream::StreamMetadata,
};
use infra::errors::{Error, Result};

/// Verify that every live input block is still addressable through the
/// commit request: covered either by a range of the new stream-set object
/// or by a new stream object. A miss means the rewrite would lose data,
/// the commit must not happen.
pub fn check(
    req: &CommitStreamSetObjectRequest,
    input_blocks: &HashMap<i64, Vec<StreamDataBlock>>,
    streams: &[StreamMetadata],
) -> Result<()> {
    let mut intervals: HashMap<i64, Vec<(i64, i64)>> = HashMap::new();
    for r in req.stream_ranges.iter() {
        intervals
            .entry(r.stream_id)
            .or_default()
            .push((r.start_offset, r.end_offset));
    }
    for so in req.stream_objects.iter() {
        intervals
            .entry(so.stream_id)
            .or_default()
            .push((so.start_offset, so.end_offset));
    }
    for ranges in intervals.values_mut() {
        ranges.sort_unstable();
        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges.drain(..) {
            match merged.last_mut() {
                Some((_, e)) if *e >= start => *e = (*e).max(end),
                _ => merged.push((start, end)),
            }
        }
        *ranges = merged;
    }

    let watermarks = streams
        .iter()
        .map(|s| (s.stream_id, s.start_offset))
        .collect::<HashMap<_, _>>();

    for object_id in req.compacted_object_ids.iter() {
        let Some(blocks) = input_blocks.get(object_id) else {
            continue;
        };
        for b in blocks {
            let Some(start_offset) = watermarks.get(&b.stream_id) else {
                continue; // stream deleted since
            };
            if b.end_offset <= *start_offset {
                continue; // trimmed
            }
            let covered = intervals.get(&b.stream_id).is_some_and(|ranges| {
                ranges
                    .iter()
                    .any(|(s, e)| *s <= b.start_offset && b.end_offset <= *e)
            });
            if !covered {
                return Err(Error::SanityViolation(format!(
                    "block [{}, {}) of stream {} from object {} is not covered by the commit request",
                    b.start_offset, b.end_offset, b.stream_id, object_id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use config::meta::compact::{ObjectStreamRange, StreamObject};

    use super::*;

    fn block(object_id: i64, stream_id: i64, start: i64, end: i64) -> StreamDataBlock {
        StreamDataBlock {
            stream_id,
            start_offset: start,
            end_offset: end,
            object_id,
            block_start_position: 0,
            block_end_position: 1,
        }
    }

    fn range(stream_id: i64, start: i64, end: i64) -> ObjectStreamRange {
        ObjectStreamRange {
            stream_id,
            start_offset: start,
            end_offset: end,
        }
    }

    fn inputs(blocks: Vec<StreamDataBlock>) -> HashMap<i64, Vec<StreamDataBlock>> {
        let mut m: HashMap<i64, Vec<StreamDataBlock>> = HashMap::new();
        for b in blocks {
            m.entry(b.object_id).or_default().push(b);
        }
        m
    }

    #[test]
    fn test_covered_by_range() {
        let req = CommitStreamSetObjectRequest {
            stream_ranges: vec![range(1, 0, 200)],
            compacted_object_ids: vec![1],
            ..Default::default()
        };
        let inputs = inputs(vec![block(1, 1, 0, 100), block(1, 1, 100, 200)]);
        let streams = vec![StreamMetadata::new(1, 0)];
        assert!(check(&req, &inputs, &streams).is_ok());
    }

    #[test]
    fn test_covered_by_stream_object() {
        let req = CommitStreamSetObjectRequest {
            stream_objects: vec![StreamObject {
                object_id: 10,
                stream_id: 1,
                start_offset: 0,
                end_offset: 200,
                object_size: 1,
                bucket: "b".to_string(),
            }],
            compacted_object_ids: vec![1],
            ..Default::default()
        };
        let inputs = inputs(vec![block(1, 1, 0, 200)]);
        let streams = vec![StreamMetadata::new(1, 0)];
        assert!(check(&req, &inputs, &streams).is_ok());
    }

    #[test]
    fn test_missing_coverage_fails() {
        let req = CommitStreamSetObjectRequest {
            stream_ranges: vec![range(1, 0, 100)],
            compacted_object_ids: vec![1],
            ..Default::default()
        };
        let inputs = inputs(vec![block(1, 1, 0, 100), block(1, 1, 100, 200)]);
        let streams = vec![StreamMetadata::new(1, 0)];
        assert!(matches!(
            check(&req, &inputs, &streams),
            Err(Error::SanityViolation(_))
        ));
    }

    #[test]
    fn test_trimmed_and_deleted_blocks_are_skipped() {
        let req = CommitStreamSetObjectRequest {
            compacted_object_ids: vec![1],
            ..Default::default()
        };
        // stream 1 trimmed past the block, stream 2 deleted
        let inputs = inputs(vec![block(1, 1, 0, 50), block(1, 2, 0, 50)]);
        let streams = vec![StreamMetadata::new(1, 50)];
        assert!(check(&req, &inputs, &streams).is_ok());
    }

    #[test]
    fn test_adjacent_intervals_merge() {
        // coverage stitched from a range and a stream object
        let req = CommitStreamSetObjectRequest {
            stream_ranges: vec![range(1, 0, 100)],
            stream_objects: vec![StreamObject {
                object_id: 10,
                stream_id: 1,
                start_offset: 100,
                end_offset: 200,
                object_size: 1,
                bucket: "b".to_string(),
            }],
            compacted_object_ids: vec![1],
            ..Default::default()
        };
        let inputs = inputs(vec![block(1, 1, 50, 150)]);
        let streams = vec![StreamMetadata::new(1, 0)];
        assert!(check(&req, &inputs, &streams).is_ok());
    }
}
