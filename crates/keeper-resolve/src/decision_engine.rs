use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use keeper_address_book::{
    AccountLinkRegistry, DirectoryAggregator, LinkedAccount, ServiceFactory,
};
use keeper_core::current_unix_timestamp_ms;
use keeper_ledger::{DirectoryInvalidation, LedgerRecord, LedgerStore, Provenance};
use keeper_phone::PhoneKey;

/// Name evidence accompanying a resolution request.
///
/// Only a name the device owner saved locally proves the contact is saved.
/// A push/display name is whatever the contact typed about themselves and
/// must never be treated as save-proof; keeping the two as distinct variants
/// makes that policy a type rather than a conditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameEvidence {
    DeviceLocal(String),
    Push(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    AlreadySaved { provenance: Provenance, name: String },
    NotSaved,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Whether the single-record remote lookup fallback runs. One-off checks
    /// want it; bulk runs skip it and rely on the merged directory.
    pub remote_fallback: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            remote_fallback: true,
        }
    }
}

/// Bridges the ledger's invalidation seam to the directory cache.
pub struct AggregatorInvalidation(pub Arc<DirectoryAggregator>);

#[async_trait]
impl DirectoryInvalidation for AggregatorInvalidation {
    async fn invalidate(&self, owner_key: &str) {
        self.0.invalidate(owner_key).await;
    }
}

pub struct DecisionEngine {
    ledger: Arc<LedgerStore>,
    aggregator: Arc<DirectoryAggregator>,
    factory: Arc<dyn ServiceFactory>,
    accounts: Arc<RwLock<AccountLinkRegistry>>,
}

impl DecisionEngine {
    pub fn new(
        ledger: Arc<LedgerStore>,
        aggregator: Arc<DirectoryAggregator>,
        factory: Arc<dyn ServiceFactory>,
        accounts: Arc<RwLock<AccountLinkRegistry>>,
    ) -> Self {
        Self {
            ledger,
            aggregator,
            factory,
            accounts,
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn aggregator(&self) -> &Arc<DirectoryAggregator> {
        &self.aggregator
    }

    pub fn factory(&self) -> &Arc<dyn ServiceFactory> {
        &self.factory
    }

    pub async fn linked_accounts(&self, owner_key: &str) -> Vec<LinkedAccount> {
        self.accounts.read().await.accounts_for(owner_key)
    }

    pub async fn resolve_save_state(
        &self,
        owner_key: &str,
        phone: &PhoneKey,
        evidence: Option<&NameEvidence>,
    ) -> Result<SaveState> {
        self.resolve_save_state_with(owner_key, phone, evidence, ResolveOptions::default())
            .await
    }

    pub async fn resolve_save_state_with(
        &self,
        owner_key: &str,
        phone: &PhoneKey,
        evidence: Option<&NameEvidence>,
        options: ResolveOptions,
    ) -> Result<SaveState> {
        // 1. Ledger: authoritative for anything previously written or cached.
        if let Some(record) = self.ledger.get(owner_key, phone)? {
            return Ok(SaveState::AlreadySaved {
                provenance: record.provenance,
                name: record.name,
            });
        }

        // 2. Device-local phonebook evidence. Push names fall through.
        if let Some(NameEvidence::DeviceLocal(name)) = evidence {
            let name = name.trim();
            if !name.is_empty() {
                self.write_back(owner_key, phone, name, None, Provenance::DevicePhonebook)
                    .await;
                return Ok(SaveState::AlreadySaved {
                    provenance: Provenance::DevicePhonebook,
                    name: name.to_string(),
                });
            }
        }

        let accounts = self.linked_accounts(owner_key).await;

        // 3. Merged directory, only when one exists. Absence of a directory
        //    proves nothing either way.
        if let Some(directory) = self.aggregator.merged_directory(owner_key, &accounts).await {
            if let Some(entry) = directory.lookup(&phone.fuzzy()) {
                let name = entry.display_name.clone();
                let external_id = Some(entry.external_id.clone());
                self.write_back(
                    owner_key,
                    phone,
                    &name,
                    external_id,
                    Provenance::VerifiedExternally,
                )
                .await;
                return Ok(SaveState::AlreadySaved {
                    provenance: Provenance::VerifiedExternally,
                    name,
                });
            }
        }

        // 4. One-off remote lookup against the first linked account.
        if options.remote_fallback {
            if let Some(account) = accounts.first() {
                let client = self.factory.client_for(account);
                match client.find_by_phone(phone.as_str()).await {
                    Ok(Some(record)) => {
                        if let Some(name) =
                            record.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
                        {
                            self.write_back(
                                owner_key,
                                phone,
                                name,
                                Some(record.external_id.clone()),
                                Provenance::VerifiedExternally,
                            )
                            .await;
                            return Ok(SaveState::AlreadySaved {
                                provenance: Provenance::VerifiedExternally,
                                name: name.to_string(),
                            });
                        }
                    }
                    Ok(None) => {
                        debug!(phone = %phone, "remote lookup found no record");
                    }
                    Err(error) => {
                        // Inconclusive, not negative: degrade to NotSaved.
                        warn!(phone = %phone, error = %error, "remote lookup failed");
                    }
                }
            }
        }

        Ok(SaveState::NotSaved)
    }

    /// Caches a positive verdict in the ledger. Failure never flips the
    /// verdict; the next resolution just re-derives it.
    async fn write_back(
        &self,
        owner_key: &str,
        phone: &PhoneKey,
        name: &str,
        external_id: Option<String>,
        provenance: Provenance,
    ) {
        let record = LedgerRecord {
            phone_key: phone.clone(),
            name: name.to_string(),
            raw_name: name.to_string(),
            external_id,
            saved_unix_ms: current_unix_timestamp_ms(),
            provenance,
        };
        let invalidation = AggregatorInvalidation(Arc::clone(&self.aggregator));
        if let Err(error) = self
            .ledger
            .save_and_invalidate(owner_key, record, &invalidation)
            .await
        {
            warn!(owner_key, phone = %phone, error = %error, "ledger write-back failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_address_book::testing::InMemoryFactory;
    use keeper_address_book::PersonRecord;

    struct Harness {
        engine: DecisionEngine,
        factory: Arc<InMemoryFactory>,
        _tempdir: tempfile::TempDir,
    }

    fn harness(linked: &[&str]) -> Harness {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let ledger = Arc::new(LedgerStore::new(tempdir.path().join("ledger.json")));
        let factory = Arc::new(InMemoryFactory::default());
        let aggregator = Arc::new(DirectoryAggregator::new(
            Arc::clone(&factory) as Arc<dyn ServiceFactory>
        ));
        let mut registry = AccountLinkRegistry::new();
        for account_id in linked {
            registry.link("owner", account_id, "token", None);
        }
        let engine = DecisionEngine::new(
            ledger,
            aggregator,
            Arc::clone(&factory) as Arc<dyn ServiceFactory>,
            Arc::new(RwLock::new(registry)),
        );
        Harness {
            engine,
            factory,
            _tempdir: tempdir,
        }
    }

    fn person(external_id: &str, name: &str, phones: &[&str]) -> PersonRecord {
        PersonRecord {
            external_id: external_id.to_string(),
            name: Some(name.to_string()),
            phones: phones.iter().map(|p| p.to_string()).collect(),
            etag: Some("etag-1".to_string()),
        }
    }

    fn phone(raw: &str) -> PhoneKey {
        PhoneKey::canonicalize(raw).expect("canonical")
    }

    #[tokio::test]
    async fn ledger_hit_short_circuits_every_remote_source() {
        let h = harness(&["acct-1"]);
        let key = phone("2348051378960");
        let record = LedgerRecord {
            phone_key: key.clone(),
            name: "Justice Tech".to_string(),
            raw_name: "Justice Tech".to_string(),
            external_id: None,
            saved_unix_ms: 0,
            provenance: Provenance::DialogConfirmed,
        };
        h.engine
            .ledger()
            .save_and_invalidate("owner", record, &keeper_ledger::NoopInvalidation)
            .await
            .expect("seed");

        let state = h
            .engine
            .resolve_save_state("owner", &key, None)
            .await
            .expect("resolve");
        assert_eq!(
            state,
            SaveState::AlreadySaved {
                provenance: Provenance::DialogConfirmed,
                name: "Justice Tech".to_string(),
            }
        );
        assert_eq!(h.factory.book("acct-1").listing_calls(), 0);
    }

    #[tokio::test]
    async fn device_local_name_is_save_proof_and_cached() {
        let h = harness(&["acct-1"]);
        let key = phone("2348051378960");
        let evidence = NameEvidence::DeviceLocal("Mum".to_string());

        let state = h
            .engine
            .resolve_save_state("owner", &key, Some(&evidence))
            .await
            .expect("resolve");
        assert_eq!(
            state,
            SaveState::AlreadySaved {
                provenance: Provenance::DevicePhonebook,
                name: "Mum".to_string(),
            }
        );

        let cached = h
            .engine
            .ledger()
            .get("owner", &key)
            .expect("read")
            .expect("record");
        assert_eq!(cached.provenance, Provenance::DevicePhonebook);
    }

    #[tokio::test]
    async fn push_name_is_never_save_proof() {
        let h = harness(&[]);
        let key = phone("2348051378960");
        let evidence = NameEvidence::Push("Cool Guy 99".to_string());

        let state = h
            .engine
            .resolve_save_state("owner", &key, Some(&evidence))
            .await
            .expect("resolve");
        assert_eq!(state, SaveState::NotSaved);
        assert!(h.engine.ledger().get("owner", &key).expect("read").is_none());
    }

    #[tokio::test]
    async fn first_linked_account_wins_across_buckets() {
        let h = harness(&["acct-1", "acct-2"]);
        h.factory
            .book("acct-1")
            .seed_primary(vec![person("p-1", "Amaka", &["2348051378960"])]);
        h.factory
            .book("acct-2")
            .seed_secondary(vec![person("p-2", "A. N. Okoro", &["+2348051378960"])]);

        let state = h
            .engine
            .resolve_save_state("owner", &phone("2348051378960"), None)
            .await
            .expect("resolve");
        assert_eq!(
            state,
            SaveState::AlreadySaved {
                provenance: Provenance::VerifiedExternally,
                name: "Amaka".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn directory_hit_writes_back_external_id() {
        let h = harness(&["acct-1"]);
        h.factory
            .book("acct-1")
            .seed_primary(vec![person("p-7", "Amaka", &["2348051378960"])]);
        let key = phone("2348051378960");

        h.engine
            .resolve_save_state("owner", &key, None)
            .await
            .expect("resolve");

        let cached = h
            .engine
            .ledger()
            .get("owner", &key)
            .expect("read")
            .expect("record");
        assert_eq!(cached.external_id.as_deref(), Some("p-7"));
        assert_eq!(cached.provenance, Provenance::VerifiedExternally);
    }

    #[tokio::test]
    async fn zero_linked_accounts_never_saved_via_directory() {
        let h = harness(&[]);
        let state = h
            .engine
            .resolve_save_state("owner", &phone("2348051378960"), None)
            .await
            .expect("resolve");
        assert_eq!(state, SaveState::NotSaved);
    }

    #[tokio::test]
    async fn remote_fallback_finds_one_off_records() {
        let h = harness(&["acct-1"]);
        // Not in any listing page the aggregator sees, but findable directly.
        let book = h.factory.book("acct-1");
        book.seed_secondary(vec![PersonRecord {
            external_id: "p-9".to_string(),
            name: Some("Nkechi".to_string()),
            phones: vec!["0805 137 8999".to_string()],
            etag: None,
        }]);
        book.fail_listings("listing quota exhausted");

        let state = h
            .engine
            .resolve_save_state("owner", &phone("2348051378999"), None)
            .await
            .expect("resolve");
        assert_eq!(
            state,
            SaveState::AlreadySaved {
                provenance: Provenance::VerifiedExternally,
                name: "Nkechi".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn remote_failures_degrade_to_not_saved() {
        let h = harness(&["acct-1"]);
        let book = h.factory.book("acct-1");
        book.fail_listings("listing quota exhausted");
        book.fail_finds("lookup backend down");

        let state = h
            .engine
            .resolve_save_state("owner", &phone("2348051378960"), None)
            .await
            .expect("resolve");
        assert_eq!(state, SaveState::NotSaved);
    }

    #[tokio::test]
    async fn bulk_options_skip_the_remote_fallback() {
        let h = harness(&["acct-1"]);
        // Findable by a direct lookup, invisible to the directory build.
        let book = h.factory.book("acct-1");
        book.seed_primary(vec![person("p-1", "Amaka", &["2348051378960"])]);
        book.fail_listings("listing quota exhausted");

        let state = h
            .engine
            .resolve_save_state_with(
                "owner",
                &phone("2348051378960"),
                None,
                ResolveOptions {
                    remote_fallback: false,
                },
            )
            .await
            .expect("resolve");
        assert_eq!(state, SaveState::NotSaved);
    }
}
