use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use keeper_address_book::{AddressBookService, PersonRecord, WriteReceipt};
use keeper_core::current_unix_timestamp_ms;
use keeper_identity::IdentityResolver;
use keeper_ledger::{LedgerRecord, Provenance};
use keeper_phone::PhoneKey;
use keeper_resolve::{
    AggregatorInvalidation, DecisionEngine, NameEvidence, ResolveOptions, SaveState,
};

const BULK_RUN_REPORT_SCHEMA: &str = "bulk_run_report_v1";
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_INTER_WRITE_DELAY_MS: u64 = 1_500;

/// One contact pulled from chat history.
#[derive(Debug, Clone)]
pub struct BulkCandidate {
    pub handle: String,
    /// Name the device owner saved locally, when the history source knows it.
    pub device_local_name: Option<String>,
}

impl BulkCandidate {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            device_local_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkOutcome {
    /// No remote record existed; one was created.
    SavedNew,
    /// A remote record existed (nameless or unnoticed); the write improved it.
    Upgraded,
    AlreadySaved,
    /// No usable phone number could be derived; never retried.
    SkippedInvalid,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItemReport {
    pub handle: String,
    pub phone: Option<String>,
    pub outcome: BulkOutcome,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkRunReport {
    pub schema: String,
    pub dry_run: bool,
    pub saved_new: usize,
    pub upgraded: usize,
    pub already_saved: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
    pub items: Vec<BulkItemReport>,
    pub started_unix_ms: u64,
    pub completed_unix_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BulkRunOptions {
    pub worker_count: usize,
    pub inter_write_delay_ms: u64,
    /// Classify and count without writing anything, remote or local.
    pub dry_run: bool,
}

impl Default for BulkRunOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            inter_write_delay_ms: DEFAULT_INTER_WRITE_DELAY_MS,
            dry_run: false,
        }
    }
}

pub struct BulkRunner {
    engine: Arc<DecisionEngine>,
    identities: Arc<IdentityResolver>,
}

impl BulkRunner {
    pub fn new(engine: Arc<DecisionEngine>, identities: Arc<IdentityResolver>) -> Self {
        Self { engine, identities }
    }

    pub async fn run(
        &self,
        owner_key: &str,
        candidates: Vec<BulkCandidate>,
        options: BulkRunOptions,
    ) -> Result<BulkRunReport> {
        let started_unix_ms = current_unix_timestamp_ms();
        let total = candidates.len();
        info!(owner_key, total, dry_run = options.dry_run, "bulk run starting");

        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let items: Arc<Mutex<Vec<BulkItemReport>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let mut workers = Vec::new();
        for _ in 0..options.worker_count.max(1) {
            let queue = Arc::clone(&queue);
            let items = Arc::clone(&items);
            let engine = Arc::clone(&self.engine);
            let identities = Arc::clone(&self.identities);
            let owner_key = owner_key.to_string();
            workers.push(tokio::spawn(async move {
                loop {
                    let candidate = { queue.lock().await.pop_front() };
                    let Some(candidate) = candidate else { break };
                    let report =
                        process_candidate(&engine, &identities, &owner_key, candidate, options)
                            .await;
                    let wrote = matches!(
                        report.outcome,
                        BulkOutcome::SavedNew | BulkOutcome::Upgraded
                    ) && !options.dry_run;
                    items.lock().await.push(report);
                    if wrote && options.inter_write_delay_ms > 0 {
                        sleep(Duration::from_millis(options.inter_write_delay_ms)).await;
                    }
                }
            }));
        }
        for worker in workers {
            worker.await.context("bulk worker panicked")?;
        }

        let items = Arc::try_unwrap(items)
            .map_err(|_| anyhow::anyhow!("bulk item sink still shared after join"))?
            .into_inner();
        let (mut saved_new, mut upgraded, mut already_saved, mut skipped_invalid, mut failed) =
            (0, 0, 0, 0, 0);
        for item in &items {
            match item.outcome {
                BulkOutcome::SavedNew => saved_new += 1,
                BulkOutcome::Upgraded => upgraded += 1,
                BulkOutcome::AlreadySaved => already_saved += 1,
                BulkOutcome::SkippedInvalid => skipped_invalid += 1,
                BulkOutcome::Failed => failed += 1,
            }
        }
        let report = BulkRunReport {
            schema: BULK_RUN_REPORT_SCHEMA.to_string(),
            dry_run: options.dry_run,
            saved_new,
            upgraded,
            already_saved,
            skipped_invalid,
            failed,
            items,
            started_unix_ms,
            completed_unix_ms: current_unix_timestamp_ms(),
        };
        info!(
            owner_key,
            saved_new = report.saved_new,
            upgraded = report.upgraded,
            already_saved = report.already_saved,
            skipped_invalid = report.skipped_invalid,
            failed = report.failed,
            "bulk run complete"
        );
        Ok(report)
    }
}

async fn process_candidate(
    engine: &DecisionEngine,
    identities: &IdentityResolver,
    owner_key: &str,
    candidate: BulkCandidate,
    options: BulkRunOptions,
) -> BulkItemReport {
    let handle = candidate.handle.clone();

    let phone = match identities.resolve_phone(&handle).await {
        Ok(phone) => phone,
        Err(error) => {
            return BulkItemReport {
                handle,
                phone: None,
                outcome: BulkOutcome::SkippedInvalid,
                detail: Some(error.to_string()),
            };
        }
    };

    let evidence = candidate
        .device_local_name
        .as_deref()
        .map(|name| NameEvidence::DeviceLocal(name.to_string()));
    let state = match engine
        .resolve_save_state_with(
            owner_key,
            &phone,
            evidence.as_ref(),
            ResolveOptions {
                remote_fallback: false,
            },
        )
        .await
    {
        Ok(state) => state,
        Err(error) => {
            return item_report(handle, &phone, BulkOutcome::Failed, format!("{error:#}"));
        }
    };
    if let SaveState::AlreadySaved { name, .. } = state {
        return item_report(handle, &phone, BulkOutcome::AlreadySaved, name);
    }

    let accounts = engine.linked_accounts(owner_key).await;
    let Some(account) = accounts.first() else {
        return item_report(
            handle,
            &phone,
            BulkOutcome::Failed,
            "no linked account to write to".to_string(),
        );
    };
    let client = engine.factory().client_for(account);

    let prior = match client.find_by_phone(phone.as_str()).await {
        Ok(prior) => prior,
        Err(error) => {
            return item_report(handle, &phone, BulkOutcome::Failed, error.to_string());
        }
    };
    let (name, outcome) = passive_name(&phone, prior.as_ref());

    if options.dry_run {
        return item_report(handle, &phone, outcome, name);
    }

    let written = match write_contact(client.as_ref(), &phone, &name, prior.as_ref()).await {
        Ok(receipt) => receipt,
        Err(error) => {
            warn!(handle, phone = %phone, error = %error, "bulk write failed");
            return item_report(handle, &phone, BulkOutcome::Failed, error.to_string());
        }
    };

    // Incremental progress: each item lands in the ledger as it completes.
    let record = LedgerRecord {
        phone_key: phone.clone(),
        name: name.clone(),
        raw_name: name.clone(),
        external_id: Some(written.external_id),
        saved_unix_ms: current_unix_timestamp_ms(),
        provenance: Provenance::VerifiedExternally,
    };
    let invalidation = AggregatorInvalidation(Arc::clone(engine.aggregator()));
    if let Err(error) = engine
        .ledger()
        .save_and_invalidate(owner_key, record, &invalidation)
        .await
    {
        return item_report(handle, &phone, BulkOutcome::Failed, format!("{error:#}"));
    }

    item_report(handle, &phone, outcome, name)
}

/// The best name available without asking anyone: the remote record's own
/// display name when it has one, else a generic label built from the number.
fn passive_name(phone: &PhoneKey, prior: Option<&PersonRecord>) -> (String, BulkOutcome) {
    match prior {
        Some(record) => {
            let name = record
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| generic_label(phone));
            (name, BulkOutcome::Upgraded)
        }
        None => (generic_label(phone), BulkOutcome::SavedNew),
    }
}

fn generic_label(phone: &PhoneKey) -> String {
    format!("Contact +{phone}")
}

async fn write_contact(
    client: &dyn AddressBookService,
    phone: &PhoneKey,
    name: &str,
    prior: Option<&PersonRecord>,
) -> Result<WriteReceipt> {
    if let Some(record) = prior {
        return Ok(client
            .update(&record.external_id, name, phone.as_str(), record.etag.as_deref())
            .await?);
    }
    Ok(client.create(name, phone.as_str()).await?)
}

fn item_report(
    handle: String,
    phone: &PhoneKey,
    outcome: BulkOutcome,
    detail: String,
) -> BulkItemReport {
    BulkItemReport {
        handle,
        phone: Some(phone.as_str().to_string()),
        outcome,
        detail: Some(detail),
    }
}
