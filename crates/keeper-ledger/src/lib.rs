//! Durable per-owner ledger of contacts Keeper considers saved.
//!
//! The ledger is a whole-document JSON store: owner key to a map of
//! canonical phone number to [`LedgerRecord`]. Reads load the document,
//! writes rewrite it atomically. Every record carries a [`Provenance`], the
//! reason it is trusted as saved.
//!
//! Writes go through [`LedgerStore::save_and_invalidate`], which persists
//! the record and then drops the owner's cached merged directory. New write
//! sites must use the funnel; a bare upsert that skips invalidation leaves a
//! stale directory answering lookups for up to one TTL.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keeper_core::write_text_atomic;
use keeper_phone::PhoneKey;

const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Why a ledger record is trusted as saved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// The device owner had already saved this contact locally.
    DevicePhonebook,
    /// Found in a linked account's directory or by a remote lookup.
    VerifiedExternally,
    /// The contact confirmed their own name through the capture dialog.
    DialogConfirmed,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::DevicePhonebook => "device-phonebook",
            Provenance::VerifiedExternally => "verified-externally",
            Provenance::DialogConfirmed => "dialog-confirmed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerRecord {
    pub phone_key: PhoneKey,
    pub name: String,
    pub raw_name: String,
    pub external_id: Option<String>,
    pub saved_unix_ms: u64,
    pub provenance: Provenance,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    schema_version: u32,
    owners: BTreeMap<String, BTreeMap<PhoneKey, LedgerRecord>>,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            owners: BTreeMap::new(),
        }
    }
}

/// Downstream cache that must be told when an owner's ledger changes.
#[async_trait]
pub trait DirectoryInvalidation: Send + Sync {
    async fn invalidate(&self, owner_key: &str);
}

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, owner_key: &str, phone: &PhoneKey) -> Result<Option<LedgerRecord>> {
        let document = self.load_document()?;
        Ok(document
            .owners
            .get(owner_key)
            .and_then(|records| records.get(phone))
            .cloned())
    }

    pub fn records_for_owner(&self, owner_key: &str) -> Result<BTreeMap<PhoneKey, LedgerRecord>> {
        let document = self.load_document()?;
        Ok(document.owners.get(owner_key).cloned().unwrap_or_default())
    }

    /// Persists a record and invalidates the owner's directory cache. This is
    /// the only write entry point callers should use.
    pub async fn save_and_invalidate(
        &self,
        owner_key: &str,
        record: LedgerRecord,
        invalidator: &dyn DirectoryInvalidation,
    ) -> Result<()> {
        self.upsert(owner_key, record)?;
        invalidator.invalidate(owner_key).await;
        Ok(())
    }

    /// Removes a record (explicit owner action only); returns whether one
    /// existed.
    pub async fn remove_and_invalidate(
        &self,
        owner_key: &str,
        phone: &PhoneKey,
        invalidator: &dyn DirectoryInvalidation,
    ) -> Result<bool> {
        let mut document = self.load_document()?;
        let removed = document
            .owners
            .get_mut(owner_key)
            .map(|records| records.remove(phone).is_some())
            .unwrap_or(false);
        if removed {
            self.store_document(&document)?;
            invalidator.invalidate(owner_key).await;
        }
        Ok(removed)
    }

    fn upsert(&self, owner_key: &str, record: LedgerRecord) -> Result<()> {
        let mut document = self.load_document()?;
        document
            .owners
            .entry(owner_key.to_string())
            .or_default()
            .insert(record.phone_key.clone(), record);
        self.store_document(&document)
    }

    fn load_document(&self) -> Result<LedgerDocument> {
        if !self.path.exists() {
            return Ok(LedgerDocument::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read ledger {}", self.path.display()))?;
        let document: LedgerDocument = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse ledger {}", self.path.display()))?;
        if document.schema_version != LEDGER_SCHEMA_VERSION {
            bail!(
                "ledger {} has schema version {}, expected {}",
                self.path.display(),
                document.schema_version,
                LEDGER_SCHEMA_VERSION
            );
        }
        Ok(document)
    }

    fn store_document(&self, document: &LedgerDocument) -> Result<()> {
        let raw = serde_json::to_string_pretty(document).context("failed to encode ledger")?;
        write_text_atomic(&self.path, &raw)
    }
}

/// Invalidator for writes that have no directory cache to care about, e.g.
/// single-process tooling.
pub struct NoopInvalidation;

#[async_trait]
impl DirectoryInvalidation for NoopInvalidation {
    async fn invalidate(&self, _owner_key: &str) {}
}
