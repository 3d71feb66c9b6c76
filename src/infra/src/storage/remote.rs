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

use object_store::limit::LimitStore;

use super::{CONCURRENT_REQUESTS, ObjectStoreRef};

/// Build the remote store for the configured provider.
pub fn remote() -> ObjectStoreRef {
    Arc::new(LimitStore::new(init_client(), CONCURRENT_REQUESTS))
}

fn init_aws_config() -> object_store::Result<object_store::aws::AmazonS3> {
    let cfg = config::get_config();
    let opts = object_store::ClientOptions::default()
        .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
        .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
        .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates)
        .with_allow_http(true);
    let mut builder = object_store::aws::AmazonS3Builder::from_env()
        .with_client_options(opts)
        .with_bucket_name(&cfg.s3.bucket_name)
        .with_virtual_hosted_style_request(!cfg.s3.feature_force_path_style);
    if !cfg.s3.server_url.is_empty() {
        builder = builder.with_endpoint(&cfg.s3.server_url);
    }
    if !cfg.s3.region_name.is_empty() {
        builder = builder.with_region(&cfg.s3.region_name);
    }
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_access_key_id(&cfg.s3.access_key);
    }
    if !cfg.s3.secret_key.is_empty() {
        builder = builder.with_secret_access_key(&cfg.s3.secret_key);
    }
    builder.build()
}

fn init_azure_config() -> object_store::Result<object_store::azure::MicrosoftAzure> {
    let cfg = config::get_config();
    let mut builder = object_store::azure::MicrosoftAzureBuilder::from_env()
        .with_client_options(
            object_store::ClientOptions::default()
                .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
                .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
                .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates),
        )
        .with_container_name(&cfg.s3.bucket_name);
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_account(&cfg.s3.access_key);
    }
    if !cfg.s3.secret_key.is_empty() {
        builder = builder.with_access_key(&cfg.s3.secret_key);
    }
    builder.build()
}

fn init_gcp_config() -> object_store::Result<object_store::gcp::GoogleCloudStorage> {
    let cfg = config::get_config();
    let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env()
        .with_client_options(
            object_store::ClientOptions::default()
                .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
                .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
                .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates),
        )
        .with_bucket_name(&cfg.s3.bucket_name);
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_service_account_path(&cfg.s3.access_key);
    }
    builder.build()
}

fn init_client() -> Box<dyn object_store::ObjectStore> {
    let cfg = config::get_config();
    match cfg.s3.provider.as_str() {
        "azure" => match init_azure_config() {
            Ok(client) => Box::new(client),
            Err(e) => {
                panic!("azure init config error: {:?}", e);
            }
        },
        "gcs" | "gcp" => match init_gcp_config() {
            Ok(client) => Box::new(client),
            Err(e) => {
                panic!("gcp init config error: {:?}", e);
            }
        },
        _ => match init_aws_config() {
            Ok(client) => Box::new(client),
            Err(e) => {
                panic!("s3 init config error: {:?}", e);
            }
        },
    }
}
