// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use reqwest::Client;

use crate::cache::CacheService;
use crate::configuration::BrokerOptions;
use crate::constants::{
    ALIBABA_CLOUD_METADATA_ENDPOINT, AWS_METADATA_ENDPOINT, AZURE_METADATA_ENDPOINT,
    DOT_ALIYUN_DIR, GCP_METADATA_ENDPOINT, IDAAS_DIR,
};
use crate::errors::{BrokerError, Result};
use crate::http::build_http_client;

/// Base URLs of the cloud metadata services used for instance identity.
#[derive(Debug, Clone)]
pub struct MetadataEndpoints {
    pub alibaba_cloud: String,
    pub aws: String,
    pub azure: String,
    pub gcp: String,
}

impl Default for MetadataEndpoints {
    fn default() -> Self {
        Self {
            alibaba_cloud: ALIBABA_CLOUD_METADATA_ENDPOINT.to_string(),
            aws: AWS_METADATA_ENDPOINT.to_string(),
            azure: AZURE_METADATA_ENDPOINT.to_string(),
            gcp: GCP_METADATA_ENDPOINT.to_string(),
        }
    }
}

impl MetadataEndpoints {
    /// Points every metadata service at one base URL.
    pub fn all(base: &str) -> Self {
        Self {
            alibaba_cloud: base.to_string(),
            aws: base.to_string(),
            azure: base.to_string(),
            gcp: base.to_string(),
        }
    }
}

/// Everything a fetch needs, built once per process and passed down.
#[derive(Debug)]
pub struct Application {
    pub cache: CacheService,
    pub http: Client,
    pub metadata: MetadataEndpoints,
}

impl Application {
    #[tracing::instrument(skip(options))]
    pub fn build(options: &BrokerOptions) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| BrokerError::config("unable to determine home directory"))?;
        let cache_root = options
            .cache_dir
            .clone()
            .unwrap_or_else(|| default_cache_dir(&home));
        tracing::debug!("[cache] cache root: {}", cache_root.display());

        let cache = CacheService::open(cache_root, &home)?;
        Ok(Self::new(cache, build_http_client()?, MetadataEndpoints::default()))
    }

    pub fn new(cache: CacheService, http: Client, metadata: MetadataEndpoints) -> Self {
        Self {
            cache,
            http,
            metadata,
        }
    }
}

fn default_cache_dir(home: &std::path::Path) -> PathBuf {
    home.join(DOT_ALIYUN_DIR).join(IDAAS_DIR)
}
