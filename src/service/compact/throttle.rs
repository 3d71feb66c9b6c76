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

use std::num::NonZeroU32;

use config::MAX_THROTTLE_BYTES_PER_SEC;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Token bucket pacing compaction read throughput. One bucket per run;
/// refill `rate` bytes per second, capacity `rate`. Pending waiters are
/// cancelled by dropping the run future.
pub struct Throttle {
    limiter: Option<DefaultDirectRateLimiter>,
    rate: u64,
}

impl Throttle {
    /// Rates at or above [`MAX_THROTTLE_BYTES_PER_SEC`] disable pacing.
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        if rate_bytes_per_sec == 0 || rate_bytes_per_sec >= MAX_THROTTLE_BYTES_PER_SEC {
            return Self::disabled();
        }
        // the rate is below 1 GiB/s here, it always fits u32
        let rate = NonZeroU32::new(rate_bytes_per_sec as u32).unwrap();
        Self {
            limiter: Some(RateLimiter::direct(Quota::per_second(rate))),
            rate: rate_bytes_per_sec,
        }
    }

    pub fn disabled() -> Self {
        Self {
            limiter: None,
            rate: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until `bytes` tokens are available. Requests larger than the
    /// bucket capacity are drained in capacity-sized waits.
    pub async fn acquire(&self, bytes: u64) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let mut remaining = bytes;
        while remaining > 0 {
            let n = remaining.min(self.rate) as u32;
            let n = NonZeroU32::new(n).unwrap();
            let _ = limiter.until_n_ready(n).await;
            remaining -= n.get() as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_rate_disables_throttle() {
        assert!(!Throttle::new(MAX_THROTTLE_BYTES_PER_SEC).is_enabled());
        assert!(!Throttle::new(0).is_enabled());
        assert!(Throttle::new(1024 * 1024).is_enabled());
    }

    #[tokio::test]
    async fn test_acquire_within_capacity() {
        let throttle = Throttle::new(1024 * 1024);
        throttle.acquire(1024).await;
        throttle.acquire(0).await;
    }

    #[tokio::test]
    async fn test_acquire_disabled_is_noop() {
        let throttle = Throttle::disabled();
        throttle.acquire(u64::MAX).await;
    }

    #[tokio::test]
    async fn test_oversized_acquire_drains_in_chunks() {
        // 1.5x the bucket capacity, needs one refill cycle
        let throttle = Throttle::new(100_000);
        let start = std::time::Instant::now();
        throttle.acquire(150_000).await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(300));
    }
}
