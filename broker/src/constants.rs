// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const DOT_ALIYUN_DIR: &str = ".aliyun";
pub const IDAAS_DIR: &str = "alibaba-cloud-idaas";
pub const CONFIG_FILE_NAME: &str = "alibaba-cloud-idaas.json";
pub const CONFIG_VERSION: &str = "1";
pub const DEFAULT_PROFILE: &str = "default";
pub const TEMP_PROFILE_PREFIX: &str = "temp-";

// cache categories, one directory each under the cache root
pub const CATEGORY_CLOUD_TOKEN: &str = "cloud_token";
pub const CATEGORY_OIDC: &str = "oidc";
pub const CATEGORY_OIDC_TOKEN: &str = "oidc_token";
pub const CACHE_CATEGORIES: [&str; 3] = [CATEGORY_OIDC, CATEGORY_OIDC_TOKEN, CATEGORY_CLOUD_TOKEN];

pub const SEED1_FILE_NAME: &str = ".alibaba_cloud_idaas_seed1";
pub const SEED1_LEN: usize = 1024;
pub const SEED2_FILE_NAME: &str = ".alibaba_cloud_idaas_seed2";
pub const SEED2_LEN: usize = 2048;
pub const KEY_STATIC_PART: &str = "ALIBABA_CLOUD_IDAAS_STATIC_PART";
pub const UNKNOWN_MAC: &str = "unknown_mac";
pub const ENCRYPTED_PREFIX: &str = "encrypted";

pub const DEFAULT_SOFT_EXPIRY: Duration = Duration::from_secs(60 * 60); // 1 hour
pub const DEFAULT_HARD_EXPIRY: Duration = Duration::from_secs(3 * 24 * 60 * 60); // 3 days

pub const OIDC_TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(2 * 60);
pub const OIDC_TOKEN_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);
pub const RAW_OIDC_REFRESH_THRESHOLD: Duration = Duration::from_secs(3 * 60);
pub const RAW_OIDC_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);
pub const STS_REFRESH_THRESHOLD: Duration = Duration::from_secs(20 * 60);
pub const STS_EXPIRY_THRESHOLD: Duration = Duration::from_secs(3 * 60);

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const USER_AGENT_PRODUCT: &str = "AlibabaCloudIDaaS/2.0";

pub const DEFAULT_DEVICE_CODE_SCOPE: &str = "openid";
pub const DEVICE_CODE_REQUEST_ATTEMPTS: usize = 3;
pub const DEVICE_POLL_MAX_ITERATIONS: usize = 100;
pub const DEVICE_POLL_MAX_TRANSPORT_FAILURES: usize = 3;
pub const DEVICE_POLL_MIN_INTERVAL: Duration = Duration::from_secs(2);
pub const DEVICE_POLL_MAX_INTERVAL: Duration = Duration::from_secs(5);
pub const CLIENT_ASSERTION_VALIDITY: Duration = Duration::from_secs(5 * 60);
pub const WELL_KNOWN_OPENID_CONFIGURATION: &str = "/.well-known/openid-configuration";

pub const ALIBABA_CLOUD_METADATA_ENDPOINT: &str = "http://100.100.100.200";
pub const AWS_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const AZURE_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const GCP_METADATA_ENDPOINT: &str = "http://metadata";
pub const METADATA_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_IDENTITY_AUDIENCE: &str = "alibaba-cloud-idaas";

pub const ROLE_SESSION_NAME_MAX_LEN: usize = 64;
pub const DEFAULT_ROLE_SESSION_PREFIX: &str = "idaas-assumed-role";
pub const ROLE_SESSION_NONCE_LEN: usize = 6;
pub const STS_MAX_ATTEMPTS: u32 = 3;
pub const ALIBABA_STS_API_VERSION: &str = "2015-04-01";

pub const ENV_USER_AGENT: &str = "ALIBABA_CLOUD_IDAAS_USER_AGENT";
pub const ENV_UNSAFE_DEBUG: &str = "ALIBABA_CLOUD_IDAAS_UNSAFE_DEBUG";
pub const ENV_CONFIG_FILE: &str = "ALIBABA_CLOUD_IDAAS_CONFIG";
pub const ENV_CACHE_DIR: &str = "ALIBABA_CLOUD_IDAAS_CACHE_DIR";
