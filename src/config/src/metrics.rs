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

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

pub const NAMESPACE: &str = "ss";

/// Age of the oldest uncompacted stream-set object, milliseconds.
pub static COMPACTION_DELAY_TIME: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "compaction_delay_time",
            "Age of the oldest uncompacted stream-set object in ms",
        )
        .namespace(NAMESPACE),
    )
    .expect("Metric created")
});

pub static COMPACTION_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("compaction_runs", "Compaction runs by outcome").namespace(NAMESPACE),
        &["status"],
    )
    .expect("Metric created")
});

pub static COMPACTION_READ_BYTES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("compaction_read_bytes", "Bytes read by the compactor").namespace(NAMESPACE),
        &["kind"],
    )
    .expect("Metric created")
});

pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(COMPACTION_DELAY_TIME.clone()))?;
    registry.register(Box::new(COMPACTION_RUNS.clone()))?;
    registry.register(Box::new(COMPACTION_READ_BYTES.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let registry = Registry::new();
        register(&registry).unwrap();
        COMPACTION_DELAY_TIME.set(1234);
        assert_eq!(COMPACTION_DELAY_TIME.get(), 1234);
    }
}
