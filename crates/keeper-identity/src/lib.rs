//! Resolves opaque chat handles to canonical phone numbers.
//!
//! Chat transports hand Keeper handles that may or may not embed a phone
//! number (`2348051378960@host`, `482215@anon`, bare dial strings). The
//! resolver tries the cheap derivations first and only then the remote
//! resolver, first hit wins:
//!
//! 1. phone-shaped handle, canonicalized directly;
//! 2. exact cache hit for the handle;
//! 3. reverse scan of cached identities for a matching number fragment;
//! 4. remote `resolve` over a small set of candidate representations.
//!
//! When everything misses the handle is [`IdentityError::Unresolved`] and
//! callers must skip the contact; guessing a number writes garbage into the
//! owner's address book.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use keeper_phone::{looks_phone_shaped, FuzzyKey, PhoneKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unresolved identity for handle '{0}'")]
    Unresolved(String),
}

/// Remote handle-to-number resolution, e.g. via the transport's own lookup.
/// Returns the first phone number any candidate representation resolves to.
#[async_trait]
pub trait HandleLookup: Send + Sync {
    async fn resolve(&self, candidates: &[String]) -> anyhow::Result<Option<String>>;
}

pub struct IdentityResolver {
    lookup: Arc<dyn HandleLookup>,
    cache: Mutex<BTreeMap<String, PhoneKey>>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn HandleLookup>) -> Self {
        Self {
            lookup,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seeds the identity cache, e.g. from a transport roster dump.
    pub async fn remember(&self, handle: &str, phone: PhoneKey) {
        let mut cache = self.cache.lock().await;
        cache.insert(handle.to_string(), phone);
    }

    pub async fn resolve_phone(&self, handle: &str) -> Result<PhoneKey, IdentityError> {
        let fragment = handle_fragment(handle);

        if looks_phone_shaped(fragment) {
            if let Ok(key) = PhoneKey::canonicalize(fragment) {
                self.remember(handle, key.clone()).await;
                return Ok(key);
            }
        }

        {
            let cache = self.cache.lock().await;
            if let Some(key) = cache.get(handle) {
                return Ok(key.clone());
            }
            if let Some(key) = reverse_fragment_scan(&cache, fragment) {
                debug!(handle, "identity resolved by cached fragment scan");
                return Ok(key);
            }
        }

        let candidates = candidate_representations(handle, fragment);
        match self.lookup.resolve(&candidates).await {
            Ok(Some(raw)) => {
                if let Ok(key) = PhoneKey::canonicalize(&raw) {
                    self.remember(handle, key.clone()).await;
                    return Ok(key);
                }
                warn!(handle, raw, "remote resolver returned an unusable number");
            }
            Ok(None) => {}
            Err(error) => {
                warn!(handle, error = %error, "remote identity resolution failed");
            }
        }

        Err(IdentityError::Unresolved(handle.to_string()))
    }
}

/// The handle with any transport suffix (`@host`, `:device`) removed.
fn handle_fragment(handle: &str) -> &str {
    let head = handle.split('@').next().unwrap_or(handle);
    head.split(':').next().unwrap_or(head)
}

/// Matches the fragment's trailing digits against already-resolved numbers.
fn reverse_fragment_scan(cache: &BTreeMap<String, PhoneKey>, fragment: &str) -> Option<PhoneKey> {
    let wanted = FuzzyKey::from_raw(fragment).ok()?;
    if !wanted.is_trusted() {
        return None;
    }
    cache
        .values()
        .find(|key| key.fuzzy() == wanted)
        .cloned()
}

/// Small set of shapes the remote resolver may recognize the handle under.
fn candidate_representations(handle: &str, fragment: &str) -> Vec<String> {
    let digits: String = fragment.chars().filter(char::is_ascii_digit).collect();
    let mut candidates = vec![handle.to_string()];
    for candidate in [fragment.to_string(), digits] {
        if !candidate.is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
