//! End-to-end flows across the whole stack: identity resolution, save-state
//! arbitration, the capture dialog, and a bulk run sharing one ledger.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use keeper_address_book::testing::InMemoryFactory;
use keeper_address_book::{
    AccountLinkRegistry, DirectoryAggregator, PersonRecord, ServiceFactory,
};
use keeper_bulk::{BulkCandidate, BulkRunOptions, BulkRunner};
use keeper_capture::{CaptureOutcome, CaptureRuntime, DeliveryReceipt, MessageChannel, SendOptions};
use keeper_core::current_unix_timestamp_ms;
use keeper_identity::{HandleLookup, IdentityResolver};
use keeper_ledger::{LedgerStore, Provenance};
use keeper_phone::PhoneKey;
use keeper_resolve::{DecisionEngine, SaveState};

const OWNER: &str = "owner";

#[derive(Default)]
struct SilentChannel {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageChannel for SilentChannel {
    async fn send(
        &self,
        target: &str,
        text: &str,
        _options: &SendOptions,
    ) -> anyhow::Result<DeliveryReceipt> {
        self.sent.lock().expect("lock").push(text.to_string());
        Ok(DeliveryReceipt {
            target: target.to_string(),
            sent_unix_ms: current_unix_timestamp_ms(),
        })
    }
}

struct NoLookup;

#[async_trait]
impl HandleLookup for NoLookup {
    async fn resolve(&self, _candidates: &[String]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

struct Stack {
    engine: Arc<DecisionEngine>,
    factory: Arc<InMemoryFactory>,
    identities: Arc<IdentityResolver>,
    _tempdir: tempfile::TempDir,
}

fn stack(linked: &[&str]) -> Stack {
    keeper_integration_tests::init_test_logging();
    let tempdir = tempfile::tempdir().expect("tempdir");
    let ledger = Arc::new(LedgerStore::new(tempdir.path().join("ledger.json")));
    let factory = Arc::new(InMemoryFactory::default());
    let aggregator = Arc::new(DirectoryAggregator::new(
        Arc::clone(&factory) as Arc<dyn ServiceFactory>
    ));
    let mut registry = AccountLinkRegistry::new();
    for account_id in linked {
        registry.link(OWNER, account_id, "token", None);
    }
    let engine = Arc::new(DecisionEngine::new(
        ledger,
        aggregator,
        Arc::clone(&factory) as Arc<dyn ServiceFactory>,
        Arc::new(RwLock::new(registry)),
    ));
    let identities = Arc::new(IdentityResolver::new(Arc::new(NoLookup)));
    Stack {
        engine,
        factory,
        identities,
        _tempdir: tempdir,
    }
}

#[tokio::test]
async fn dialog_confirmation_is_visible_to_a_following_bulk_run() {
    let s = stack(&["acct-1"]);
    let channel = Arc::new(SilentChannel::default());
    let runtime = CaptureRuntime::new(
        Arc::clone(&s.engine),
        Arc::clone(&channel) as Arc<dyn MessageChannel>,
    );
    let contact = PhoneKey::canonicalize("2348051378960").expect("canonical");
    let target = "2348051378960@host";

    runtime
        .trigger(OWNER, &contact, target, None)
        .await
        .expect("trigger");
    runtime
        .on_inbound_text(OWNER, &contact, target, "Justice Tech", None)
        .await
        .expect("name");
    let outcome = runtime
        .on_inbound_text(OWNER, &contact, target, "yes", None)
        .await
        .expect("confirm");
    assert!(matches!(outcome, CaptureOutcome::Saved { .. }));

    // A bulk run over the same contact sees the dialog's work and does not
    // write a second external record.
    let runner = BulkRunner::new(Arc::clone(&s.engine), Arc::clone(&s.identities));
    let report = runner
        .run(
            OWNER,
            vec![BulkCandidate::new("2348051378960@host")],
            BulkRunOptions {
                worker_count: 1,
                inter_write_delay_ms: 0,
                dry_run: false,
            },
        )
        .await
        .expect("bulk run");
    assert_eq!(report.already_saved, 1);
    assert_eq!(s.factory.book("acct-1").all_records().len(), 1);
}

#[tokio::test]
async fn bulk_generic_save_stays_verified_after_ledger_removal() {
    let s = stack(&["acct-1"]);

    let runner = BulkRunner::new(Arc::clone(&s.engine), Arc::clone(&s.identities));
    let report = runner
        .run(
            OWNER,
            vec![BulkCandidate::new("2348051378960@host")],
            BulkRunOptions {
                worker_count: 1,
                inter_write_delay_ms: 0,
                dry_run: false,
            },
        )
        .await
        .expect("bulk run");
    assert_eq!(report.saved_new, 1);

    let contact = PhoneKey::canonicalize("2348051378960").expect("canonical");
    let record = s
        .engine
        .ledger()
        .get(OWNER, &contact)
        .expect("read")
        .expect("record");
    assert_eq!(record.name, "Contact +2348051378960");
    let external_id = record.external_id.clone().expect("external id");

    // The bulk-saved contact is AlreadySaved now, so no dialog would open.
    let state = s
        .engine
        .resolve_save_state(OWNER, &contact, None)
        .await
        .expect("resolve");
    assert!(matches!(state, SaveState::AlreadySaved { .. }));

    s.engine
        .ledger()
        .remove_and_invalidate(OWNER, &contact, &keeper_ledger::NoopInvalidation)
        .await
        .expect("remove");
    // Remote record still exists under the generic label; the directory
    // still finds it, which keeps the contact AlreadySaved externally.
    let state = s
        .engine
        .resolve_save_state(OWNER, &contact, None)
        .await
        .expect("re-resolve");
    match state {
        SaveState::AlreadySaved { provenance, name } => {
            assert_eq!(provenance, Provenance::VerifiedExternally);
            assert_eq!(name, "Contact +2348051378960");
        }
        SaveState::NotSaved => panic!("expected externally verified contact"),
    }
    let record = s
        .engine
        .ledger()
        .get(OWNER, &contact)
        .expect("read")
        .expect("write-back record");
    assert_eq!(record.external_id.as_deref(), Some(external_id.as_str()));
}

#[tokio::test]
async fn owners_with_no_linked_accounts_still_run_dialogs() {
    let s = stack(&[]);
    let channel = Arc::new(SilentChannel::default());
    let runtime = CaptureRuntime::new(
        Arc::clone(&s.engine),
        Arc::clone(&channel) as Arc<dyn MessageChannel>,
    );
    let contact = PhoneKey::canonicalize("2348051378960").expect("canonical");
    let target = "2348051378960@host";

    let outcome = runtime
        .trigger(OWNER, &contact, target, None)
        .await
        .expect("trigger");
    assert_eq!(outcome, CaptureOutcome::PromptSent);
    runtime
        .on_inbound_text(OWNER, &contact, target, "Justice", None)
        .await
        .expect("name");
    let outcome = runtime
        .on_inbound_text(OWNER, &contact, target, "yes", None)
        .await
        .expect("confirm");
    assert!(matches!(outcome, CaptureOutcome::Saved { .. }));

    // No external account means a ledger-only save.
    let record = s
        .engine
        .ledger()
        .get(OWNER, &contact)
        .expect("read")
        .expect("record");
    assert_eq!(record.provenance, Provenance::DialogConfirmed);
    assert!(record.external_id.is_none());
}
