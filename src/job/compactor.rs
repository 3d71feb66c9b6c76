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

use tokio::time;

use crate::service::compact::CompactionManager;

/// Floor between two runs, also the quick-reschedule delay when candidates
/// were left over.
const MIN_DELAY: time::Duration = time::Duration::from_millis(10_000);

pub async fn run(manager: Arc<CompactionManager>) -> Result<(), anyhow::Error> {
    let cfg = config::get_config();
    if !cfg.compact.enabled {
        return Ok(());
    }

    tokio::task::spawn(run_compact(manager.clone()));
    tokio::task::spawn(run_delay_metric(manager));

    Ok(())
}

/// Compaction runs, first one a full interval after startup.
async fn run_compact(manager: Arc<CompactionManager>) -> Result<(), anyhow::Error> {
    let interval = manager.interval();
    time::sleep(interval).await;
    loop {
        if manager.is_shutdown() {
            break;
        }
        let started = std::time::Instant::now();
        if let Err(e) = manager.compact().await {
            log::error!("[COMPACTOR:JOB] run compaction error: {e}");
        }
        if manager.is_shutdown() {
            break;
        }
        let delay = if manager.has_remaining_objects() {
            MIN_DELAY
        } else {
            interval.saturating_sub(started.elapsed()).max(MIN_DELAY)
        };
        time::sleep(delay).await;
    }
    Ok(())
}

/// Sample the oldest-uncompacted-object age every minute.
async fn run_delay_metric(manager: Arc<CompactionManager>) -> Result<(), anyhow::Error> {
    let mut interval = time::interval(time::Duration::from_secs(60));
    interval.tick().await; // the first tick is immediate
    loop {
        interval.tick().await;
        if manager.is_shutdown() {
            break;
        }
        match manager.compaction_delay_ms().await {
            Ok(delay) => config::metrics::COMPACTION_DELAY_TIME.set(delay),
            Err(e) => {
                log::error!("[COMPACTOR:JOB] sample compaction delay error: {e}");
            }
        }
    }
    Ok(())
}
