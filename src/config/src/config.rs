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

use arc_swap::ArcSwap;
use dotenv_config::EnvConfig;
use dotenvy::dotenv_override;
use once_cell::sync::Lazy;

pub const SIZE_IN_MB: f64 = 1024.0 * 1024.0;
pub const SIZE_IN_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Above this read rate the compaction throttle is a no-op.
pub const MAX_THROTTLE_BYTES_PER_SEC: u64 = 1024 * 1024 * 1024;

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from(Arc::new(init())));

pub fn get_config() -> Arc<Config> {
    CONFIG.load().clone()
}

pub fn refresh_config() -> Result<(), anyhow::Error> {
    CONFIG.store(Arc::new(init()));
    Ok(())
}

#[derive(EnvConfig)]
pub struct Config {
    pub limit: Limit,
    pub compact: Compact,
    pub s3: S3,
}

#[derive(EnvConfig)]
pub struct Limit {
    #[env_config(name = "SS_CPU_NUM", default = 0)]
    pub cpu_num: usize,
    #[env_config(name = "SS_NETWORK_BASELINE_BANDWIDTH", default = 104857600)] // bytes/s
    pub network_baseline_bandwidth: u64,
}

#[derive(Clone, EnvConfig)]
pub struct Compact {
    #[env_config(name = "SS_COMPACT_ENABLED", default = true)]
    pub enabled: bool,
    #[env_config(name = "SS_COMPACT_INTERVAL", default = 20)] // minutes
    pub interval: u64,
    #[env_config(name = "SS_COMPACT_FORCE_SPLIT_PERIOD", default = 120)] // minutes
    pub force_split_object_period: u64,
    #[env_config(name = "SS_COMPACT_MAX_OBJECT_NUM", default = 500)]
    pub max_object_num: usize,
    #[env_config(name = "SS_COMPACT_MAX_STREAM_NUM_PER_STREAM_SET_OBJECT", default = 10000)]
    pub max_stream_num_per_stream_set_object: usize,
    #[env_config(name = "SS_COMPACT_MAX_STREAM_OBJECT_NUM_PER_COMMIT", default = 10000)]
    pub max_stream_object_num_per_commit: usize,
    #[env_config(name = "SS_COMPACT_CACHE_SIZE", default = 209715200)] // bytes, 200 MB
    pub cache_size: u64,
    #[env_config(name = "SS_COMPACT_STREAM_SPLIT_SIZE", default = 16777216)] // bytes, 16 MB
    pub stream_split_size: u64,
    #[env_config(name = "SS_COMPACT_OBJECT_PART_SIZE", default = 16777216)] // bytes, 16 MB
    pub object_part_size: usize,
    #[env_config(name = "SS_COMPACT_PREPARE_OBJECT_TTL", default = 30)] // minutes
    pub prepare_object_ttl: u64,
}

#[derive(EnvConfig)]
pub struct S3 {
    #[env_config(name = "SS_S3_PROVIDER", default = "")]
    pub provider: String,
    #[env_config(name = "SS_S3_SERVER_URL", default = "")]
    pub server_url: String,
    #[env_config(name = "SS_S3_REGION_NAME", default = "")]
    pub region_name: String,
    #[env_config(name = "SS_S3_ACCESS_KEY", default = "")]
    pub access_key: String,
    #[env_config(name = "SS_S3_SECRET_KEY", default = "")]
    pub secret_key: String,
    #[env_config(name = "SS_S3_BUCKET_NAME", default = "")]
    pub bucket_name: String,
    #[env_config(name = "SS_S3_BUCKET_PREFIX", default = "")]
    pub bucket_prefix: String,
    #[env_config(name = "SS_S3_CONNECT_TIMEOUT", default = 10)] // seconds
    pub connect_timeout: u64,
    #[env_config(name = "SS_S3_REQUEST_TIMEOUT", default = 3600)] // seconds
    pub request_timeout: u64,
    #[env_config(name = "SS_S3_FEATURE_FORCE_PATH_STYLE", default = false)]
    pub feature_force_path_style: bool,
    #[env_config(name = "SS_S3_ALLOW_INVALID_CERTIFICATES", default = false)]
    pub allow_invalid_certificates: bool,
}

pub fn init() -> Config {
    dotenv_override().ok();
    let mut cfg = Config::init().expect("config load error");
    if cfg.limit.cpu_num == 0 {
        cfg.limit.cpu_num = std::thread::available_parallelism()
            .map(|v| v.get())
            .unwrap_or(1);
    }
    if let Err(e) = check_compact_config(&cfg) {
        panic!("compact config error: {e}");
    }
    cfg
}

fn check_compact_config(cfg: &Config) -> Result<(), anyhow::Error> {
    if cfg.compact.interval == 0 {
        return Err(anyhow::anyhow!("SS_COMPACT_INTERVAL must be greater than 0"));
    }
    if cfg.compact.cache_size == 0 {
        return Err(anyhow::anyhow!("SS_COMPACT_CACHE_SIZE must be greater than 0"));
    }
    if cfg.compact.stream_split_size == 0 {
        return Err(anyhow::anyhow!(
            "SS_COMPACT_STREAM_SPLIT_SIZE must be greater than 0"
        ));
    }
    if cfg.compact.object_part_size == 0 {
        return Err(anyhow::anyhow!(
            "SS_COMPACT_OBJECT_PART_SIZE must be greater than 0"
        ));
    }
    if cfg.compact.max_object_num == 0 {
        return Err(anyhow::anyhow!("SS_COMPACT_MAX_OBJECT_NUM must be greater than 0"));
    }
    if cfg.limit.network_baseline_bandwidth == 0 {
        return Err(anyhow::anyhow!(
            "SS_NETWORK_BASELINE_BANDWIDTH must be greater than 0"
        ));
    }
    Ok(())
}
