//! Merges every linked account's contacts into one fuzzy-keyed directory.
//!
//! Each account is fetched independently (primary bucket before secondary)
//! and reduced to a per-account map keyed by [`FuzzyKey`]. The per-account
//! maps are then folded in account-link order with first-linked-account-wins
//! on key collisions; completion order of the fetches never influences the
//! merge result. A failing account contributes an error note to its stats
//! and nothing else; sibling accounts are unaffected.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use keeper_core::current_unix_timestamp_ms;
use keeper_phone::FuzzyKey;

use crate::account_links::LinkedAccount;
use crate::directory_cache::DirectoryCache;
use crate::service_contract::{
    AddressBookService, PersonRecord, ServiceError, ServiceFactory, ServiceResult,
};

/// Defensive bound on pagination so a misbehaving service cannot spin a
/// directory build forever. Hitting it is recorded as an account error.
const MAX_BUCKET_PAGES: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactBucket {
    Primary,
    Secondary,
}

impl ContactBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactBucket::Primary => "primary",
            ContactBucket::Secondary => "secondary",
        }
    }
}

/// One directory hit: the remote record this fuzzy key resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub external_id: String,
    pub display_name: String,
    pub bucket: ContactBucket,
    pub source_account: String,
}

/// Outcome of fetching one account during a directory build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountFetchStats {
    pub account_id: String,
    pub entries: usize,
    pub error: Option<String>,
}

/// All linked accounts folded into one lookup table.
#[derive(Debug, Clone)]
pub struct MergedDirectory {
    pub entries: BTreeMap<FuzzyKey, DirectoryEntry>,
    pub built_unix_ms: u64,
    pub account_stats: Vec<AccountFetchStats>,
}

impl MergedDirectory {
    pub fn lookup(&self, key: &FuzzyKey) -> Option<&DirectoryEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DirectoryAggregator {
    factory: Arc<dyn ServiceFactory>,
    cache: DirectoryCache,
}

impl DirectoryAggregator {
    pub fn new(factory: Arc<dyn ServiceFactory>) -> Self {
        Self {
            factory,
            cache: DirectoryCache::default(),
        }
    }

    pub fn with_cache_ttl_ms(factory: Arc<dyn ServiceFactory>, ttl_ms: u64) -> Self {
        Self {
            factory,
            cache: DirectoryCache::new(ttl_ms),
        }
    }

    /// Returns the owner's merged directory, building and caching it when the
    /// cache is cold. Zero linked accounts yields `None`: no directory is a
    /// different statement than an empty one, and callers must not treat
    /// directory absence as proof a contact is unsaved.
    pub async fn merged_directory(
        &self,
        owner_key: &str,
        accounts: &[LinkedAccount],
    ) -> Option<Arc<MergedDirectory>> {
        if accounts.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.get(owner_key).await {
            return Some(cached);
        }
        let directory = Arc::new(self.build(accounts).await);
        self.cache.store(owner_key, Arc::clone(&directory)).await;
        Some(directory)
    }

    /// Drops the owner's cached directory. Callers that write to the ledger
    /// go through the ledger's write funnel, which calls this.
    pub async fn invalidate(&self, owner_key: &str) {
        self.cache.invalidate(owner_key).await;
    }

    async fn build(&self, accounts: &[LinkedAccount]) -> MergedDirectory {
        // Account fetches interleave freely; `join_all` hands results back in
        // argument order, which keeps the merge deterministic.
        let fetches = accounts.iter().map(|account| {
            let client = self.factory.client_for(account);
            fetch_account_map(client, account.account_id.clone())
        });
        let per_account = join_all(fetches).await;

        let mut stats = Vec::with_capacity(per_account.len());
        let mut maps = Vec::with_capacity(per_account.len());
        for (map, account_stats) in per_account {
            if let Some(error) = &account_stats.error {
                warn!(
                    account_id = %account_stats.account_id,
                    error = %error,
                    "directory fetch degraded for account"
                );
            }
            stats.push(account_stats);
            maps.push(map);
        }

        MergedDirectory {
            entries: merge_account_maps(maps),
            built_unix_ms: current_unix_timestamp_ms(),
            account_stats: stats,
        }
    }
}

/// Folds per-account maps in link order; the first account to claim a fuzzy
/// key keeps it. This is the whole cross-account precedence policy.
fn merge_account_maps(
    maps: Vec<BTreeMap<FuzzyKey, DirectoryEntry>>,
) -> BTreeMap<FuzzyKey, DirectoryEntry> {
    let mut merged = BTreeMap::new();
    for map in maps {
        for (key, entry) in map {
            merged.entry(key).or_insert(entry);
        }
    }
    merged
}

/// Fetches both buckets of one account and reduces them to a fuzzy-keyed map.
///
/// Primary is inserted before secondary, so within one account a primary
/// contact always beats an auto-collected one for the same number. Records
/// gathered before a bucket failure are kept.
async fn fetch_account_map(
    client: Arc<dyn AddressBookService>,
    account_id: String,
) -> (BTreeMap<FuzzyKey, DirectoryEntry>, AccountFetchStats) {
    let mut map = BTreeMap::new();
    let mut errors = Vec::new();

    for bucket in [ContactBucket::Primary, ContactBucket::Secondary] {
        match collect_bucket(client.as_ref(), bucket).await {
            Ok(records) => insert_bucket_records(&mut map, &account_id, bucket, &records),
            Err(error) => errors.push(format!("{} bucket: {error}", bucket.as_str())),
        }
    }

    let stats = AccountFetchStats {
        entries: map.len(),
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
        account_id,
    };
    (map, stats)
}

async fn collect_bucket(
    client: &dyn AddressBookService,
    bucket: ContactBucket,
) -> ServiceResult<Vec<PersonRecord>> {
    let mut records = Vec::new();
    let mut page_token: Option<String> = None;
    for _ in 0..MAX_BUCKET_PAGES {
        let page = match bucket {
            ContactBucket::Primary => client.list_primary(page_token.as_deref()).await?,
            ContactBucket::Secondary => client.list_secondary(page_token.as_deref()).await?,
        };
        records.extend(page.records);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => return Ok(records),
        }
    }
    Err(ServiceError::Remote(format!(
        "pagination exceeded {MAX_BUCKET_PAGES} pages"
    )))
}

fn insert_bucket_records(
    map: &mut BTreeMap<FuzzyKey, DirectoryEntry>,
    account_id: &str,
    bucket: ContactBucket,
    records: &[PersonRecord],
) {
    for record in records {
        let Some(name) = record.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        for phone in &record.phones {
            let Ok(key) = FuzzyKey::from_raw(phone) else {
                continue;
            };
            if !key.is_trusted() {
                continue;
            }
            map.entry(key).or_insert_with(|| DirectoryEntry {
                external_id: record.external_id.clone(),
                display_name: name.to_string(),
                bucket,
                source_account: account_id.to_string(),
            });
        }
    }
}
