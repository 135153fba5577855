// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # IDaaS Broker
//!
//! Turns one configured machine identity into short-lived cloud credentials.
//!
//! A profile names a single target (Alibaba Cloud STS, AWS STS or a raw OIDC
//! token) and the OIDC provider that authenticates it. Every network fetch
//! along the way goes through an encrypted, host-bound disk cache, so that
//! repeated invocations reuse tokens until they approach expiry.
//!
//! ## Architecture
//!
//! ```text
//! profile -> dispatch -> sts (cached) -> token (cached) -> oidc grant
//!                                                            |
//!                                                            +-> signer (JWT assertions)
//!                                                            +-> imds (instance identity)
//!                                                            +-> discovery (cached)
//! ```
//!
//! ## Modules
//!
//! - [`application`]: the cache, HTTP client and metadata endpoints passed to every fetch
//! - [`cache`]: AES-GCM encrypted fetch-or-reuse cache
//! - [`commands`]: subcommand bodies of the `alibaba-cloud-idaas` binary
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: paths, thresholds and protocol constants
//! - [`dispatch`]: profile target selection
//! - [`errors`]: the broker error type
//! - [`http`]: shared reqwest helpers
//! - [`imds`]: PKCS#7 documents and identity tokens from cloud metadata services
//! - [`models`]: normalized cloud credentials and their output shapes
//! - [`oidc`]: token endpoint, client credentials and device authorization grants
//! - [`profile`]: the profile file model and configuration digests
//! - [`sts`]: Alibaba Cloud and AWS role assumption
//! - [`token`]: cached OIDC tokens
//!
//! ## Usage
//!
//! ```bash
//! alibaba-cloud-idaas fetch-token --profile dev
//! alibaba-cloud-idaas execute --profile dev -- aliyun sts GetCallerIdentity
//! ```
//!
//! ## Security Considerations
//!
//! - Cache files are encrypted with a key derived from per-host seed files and MAC addresses
//! - Secrets are redacted from `Debug` output and token material is only logged
//!   when `ALIBABA_CLOUD_IDAAS_UNSAFE_DEBUG=true`
//! - Private keys stay behind the signer; the broker only ever sees signatures
#![recursion_limit = "256"]

pub mod application;
pub mod cache;
pub mod commands;
pub mod configuration;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod imds;
pub mod models;
pub mod oidc;
pub mod profile;
pub mod sts;
pub mod token;
