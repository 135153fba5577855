// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Encrypted on-disk cache shared by every fetch path.
//!
//! Each `(category, key)` pair maps to one file holding
//! `encrypted:<b64url nonce>:<b64url ciphertext>`. The plaintext is a JSON
//! [`CachedEnvelope`]. The AES-256-GCM key is derived from two per-host seed
//! files, the local MAC addresses and a static string, so a copied cache
//! directory cannot be read elsewhere.

use std::fmt;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use aws_lc_rs::digest;
use data_encoding::BASE64URL_NOPAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

use crate::constants::{
    DEFAULT_HARD_EXPIRY, DEFAULT_SOFT_EXPIRY, ENCRYPTED_PREFIX, KEY_STATIC_PART, SEED1_FILE_NAME,
    SEED1_LEN, SEED2_FILE_NAME, SEED2_LEN, UNKNOWN_MAC,
};
use crate::errors::{BrokerError, Result};

#[derive(Clone, Serialize, Deserialize)]
pub struct CachedEnvelope {
    /// Capture time in unix milliseconds.
    pub cache_time: i64,
    #[serde(default)]
    pub context: Value,
    pub content: String,
}

impl fmt::Debug for CachedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedEnvelope")
            .field("cache_time", &self.cache_time)
            .field("context", &self.context)
            .field("content_len", &self.content.len())
            .finish()
    }
}

impl CachedEnvelope {
    pub fn new(context: Value, content: String) -> Self {
        Self {
            cache_time: chrono::Utc::now().timestamp_millis(),
            context,
            content,
        }
    }

    pub fn age(&self) -> Duration {
        let millis = chrono::Utc::now().timestamp_millis() - self.cache_time;
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub fn is_expiring_or_expired(&self) -> bool {
        self.is_older_than(DEFAULT_SOFT_EXPIRY)
    }

    pub fn is_expired(&self) -> bool {
        self.is_older_than(DEFAULT_HARD_EXPIRY)
    }
}

pub type ExpiryPredicate<'a> = Box<dyn Fn(&CachedEnvelope) -> bool + Send + Sync + 'a>;

/// Per-call cache policy for [`CacheService::fetch_or_reuse`].
pub struct FetchOptions<'a> {
    /// Diagnostic metadata stored alongside the content.
    pub context: Value,
    /// Skip the freshness decision and never fall back to cached content.
    pub force_new: bool,
    /// Fall back to cached content even past hard expiry.
    pub allow_expired: bool,
    pub is_expiring_or_expired: ExpiryPredicate<'a>,
    pub is_expired: ExpiryPredicate<'a>,
}

impl Default for FetchOptions<'_> {
    fn default() -> Self {
        Self {
            context: Value::Null,
            force_new: false,
            allow_expired: false,
            is_expiring_or_expired: Box::new(CachedEnvelope::is_expiring_or_expired),
            is_expired: Box::new(CachedEnvelope::is_expired),
        }
    }
}

impl<'a> FetchOptions<'a> {
    pub fn with_predicates<S, H>(is_expiring_or_expired: S, is_expired: H) -> Self
    where
        S: Fn(&CachedEnvelope) -> bool + Send + Sync + 'a,
        H: Fn(&CachedEnvelope) -> bool + Send + Sync + 'a,
    {
        Self {
            is_expiring_or_expired: Box::new(is_expiring_or_expired),
            is_expired: Box::new(is_expired),
            ..Default::default()
        }
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn force_new(mut self, force_new: bool) -> Self {
        self.force_new = force_new;
        self
    }

    pub fn allow_expired(mut self, allow_expired: bool) -> Self {
        self.allow_expired = allow_expired;
        self
    }
}

/// One cache file as seen by [`CacheService::list`].
#[derive(Debug)]
pub struct CacheEntry {
    pub category: String,
    pub key: String,
    pub envelope: std::result::Result<CachedEnvelope, String>,
}

pub struct CacheService {
    root: PathBuf,
    key: LessSafeKey,
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("root", &self.root)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CacheService {
    /// Derives the host-bound key from the seed files in `seed_dir`
    /// (created on first use) and the local MAC addresses.
    #[tracing::instrument]
    pub fn open(root: PathBuf, seed_dir: &Path) -> Result<Self> {
        let seed1 = read_or_create_seed(&seed_dir.join(SEED1_FILE_NAME), SEED1_LEN);
        let seed2 = read_or_create_seed(&seed_dir.join(SEED2_FILE_NAME), SEED2_LEN);
        let macs = local_macs();

        let mut context = digest::Context::new(&digest::SHA256);
        context.update(&seed1);
        context.update(&seed2);
        context.update(macs.as_bytes());
        context.update(KEY_STATIC_PART.as_bytes());
        let mut key_bytes = context.finish().as_ref().to_vec();
        let key = UnboundKey::new(&AES_256_GCM, &key_bytes);
        key_bytes.zeroize();

        Ok(Self {
            root,
            key: LessSafeKey::new(key?),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns cached content when fresh, otherwise fetches and stores it.
    ///
    /// A failed fetch falls back to cached content unless `force_new` is set,
    /// the failure is an explicit denial, or the content is hard-expired and
    /// `allow_expired` is unset.
    #[tracing::instrument(skip(self, options, fetch))]
    pub async fn fetch_or_reuse<F, Fut>(
        &self,
        category: &str,
        key: &str,
        options: FetchOptions<'_>,
        fetch: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cached = match self.read(category, key) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(
                    "[cache] read cache file [{}, {}] failed: {}, ignore error",
                    category,
                    key,
                    e
                );
                None
            }
        };

        let stale = options.force_new
            || cached
                .as_ref()
                .is_none_or(|envelope| (options.is_expiring_or_expired)(envelope));
        if !stale {
            if let Some(envelope) = cached {
                tracing::debug!("[cache] reuse cache file [{}, {}]", category, key);
                return Ok(envelope.content);
            }
        }

        let err = match fetch().await {
            Ok(content) => {
                let envelope = CachedEnvelope::new(options.context, content);
                if let Err(e) = self.write(category, key, &envelope) {
                    tracing::error!("[cache] write cache file [{}, {}] failed: {}", category, key, e);
                }
                return Ok(envelope.content);
            }
            Err(e) => e,
        };
        tracing::error!("[cache] fetch content failed: {}", err);

        if options.force_new {
            return Err(BrokerError::ForceNewFailed(Box::new(err)));
        }
        if err.is_stop_fallback() {
            return Err(err);
        }
        if let Some(envelope) = cached {
            if !(options.is_expired)(&envelope) {
                tracing::warn!(
                    "[cache] using stale cache file [{}, {}], not expired",
                    category,
                    key
                );
                return Ok(envelope.content);
            }
            if options.allow_expired {
                tracing::error!(
                    "[cache] using expired cache file [{}, {}], allow expired",
                    category,
                    key
                );
                return Ok(envelope.content);
            }
        }
        Err(err.context(format!("read cache file [{category}, {key}]")))
    }

    /// Reads and decrypts one envelope. A missing file is `Ok(None)`.
    pub fn read(&self, category: &str, key: &str) -> Result<Option<CachedEnvelope>> {
        let path = self.cache_file(category, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let ciphertext = fs::read_to_string(&path)?;
        let plaintext = decrypt_text(&self.key, ciphertext.trim(), &additional_data(category, key))?;
        Ok(Some(serde_json::from_str(&plaintext)?))
    }

    /// Encrypts and atomically replaces one envelope.
    pub fn write(&self, category: &str, key: &str, envelope: &CachedEnvelope) -> Result<()> {
        let path = self.cache_file(category, key)?;
        let dir = self.category_dir(category)?;
        create_private_dir(&dir)?;

        let plaintext = serde_json::to_string(envelope)?;
        let ciphertext = encrypt_text(&self.key, &plaintext, &additional_data(category, key))?;

        // NamedTempFile is created user-only
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(ciphertext.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&path)?;
        tracing::debug!("[cache] wrote cache file [{}, {}]", category, key);
        Ok(())
    }

    /// Deletes every cache file in the given categories.
    #[tracing::instrument(skip(self))]
    pub fn clear(&self, categories: &[&str]) -> Result<usize> {
        let mut removed = 0;
        for category in categories {
            for path in self.category_files(category)? {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::info!("[cache] removed {} cache files", removed);
        Ok(removed)
    }

    /// Decrypts every envelope of a category. Undecryptable files are
    /// reported in place.
    pub fn list(&self, category: &str) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in self.category_files(category)? {
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let envelope = match self.read(category, key) {
                Ok(Some(envelope)) => Ok(envelope),
                Ok(None) => continue,
                Err(e) => Err(e.to_string()),
            };
            entries.push(CacheEntry {
                category: category.to_string(),
                key: key.to_string(),
                envelope,
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn category_files(&self, category: &str) -> Result<Vec<PathBuf>> {
        let dir = self.category_dir(category)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn category_dir(&self, category: &str) -> Result<PathBuf> {
        check_path_component(category)?;
        Ok(self.root.join(category))
    }

    fn cache_file(&self, category: &str, key: &str) -> Result<PathBuf> {
        check_path_component(key)?;
        Ok(self.category_dir(category)?.join(key))
    }
}

fn check_path_component(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BrokerError::Cache(format!("invalid cache name: {name:?}")));
    }
    Ok(())
}

fn additional_data(category: &str, key: &str) -> String {
    format!("{category}-{key}")
}

pub fn encrypt_text(key: &LessSafeKey, plaintext: &str, aad: &str) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    aws_lc_rs::rand::fill(&mut nonce)?;
    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce),
        Aad::from(aad.as_bytes()),
        &mut in_out,
    )?;
    Ok(format!(
        "{ENCRYPTED_PREFIX}:{}:{}",
        BASE64URL_NOPAD.encode(&nonce),
        BASE64URL_NOPAD.encode(&in_out)
    ))
}

pub fn decrypt_text(key: &LessSafeKey, ciphertext: &str, aad: &str) -> Result<String> {
    let parts: Vec<&str> = ciphertext.split(':').collect();
    if parts.len() != 3 {
        return Err(BrokerError::Cache(format!(
            "invalid ciphertext, {} parts",
            parts.len()
        )));
    }
    if parts[0] != ENCRYPTED_PREFIX {
        return Err(BrokerError::Cache(
            "invalid ciphertext, not starts with encrypted".to_string(),
        ));
    }
    let nonce = BASE64URL_NOPAD.decode(parts[1].as_bytes())?;
    let mut in_out = BASE64URL_NOPAD.decode(parts[2].as_bytes())?;
    let nonce = Nonce::try_assume_unique_for_key(&nonce)?;
    let plaintext = key.open_in_place(nonce, Aad::from(aad.as_bytes()), &mut in_out)?;
    String::from_utf8(plaintext.to_vec())
        .map_err(|_| BrokerError::Cache("plaintext is not utf-8".to_string()))
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

/// Seed material is best effort: an unreadable or uncreatable seed degrades
/// to an empty contribution instead of disabling the cache.
fn read_or_create_seed(path: &Path, len: usize) -> Vec<u8> {
    match fs::read(path) {
        Ok(seed) => return seed,
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!("[cache] read seed {} failed: {}", path.display(), e);
            return Vec::new();
        }
        Err(_) => {}
    }
    match create_seed(path, len) {
        Ok(seed) => seed,
        Err(e) => {
            tracing::warn!("[cache] create seed {} failed: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn create_seed(path: &Path, len: usize) -> Result<Vec<u8>> {
    let mut seed = vec![0u8; len];
    aws_lc_rs::rand::fill(&mut seed)?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&seed)?;
    Ok(seed)
}

fn local_macs() -> String {
    let iter = match mac_address::MacAddressIterator::new() {
        Ok(iter) => iter,
        Err(e) => {
            tracing::debug!("[cache] list interfaces failed: {}", e);
            return UNKNOWN_MAC.to_string();
        }
    };
    let mut macs: Vec<String> = iter
        .filter(|mac| mac.bytes() != [0u8; 6])
        .map(|mac| mac.to_string().to_lowercase())
        .collect();
    if macs.is_empty() {
        return UNKNOWN_MAC.to_string();
    }
    macs.sort();
    macs.dedup();
    macs.join(",")
}
