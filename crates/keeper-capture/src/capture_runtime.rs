//! The capture dialog state machine.
//!
//! One in-memory session per (owner, contact). The transitions:
//!
//! ```text
//! (no session) --NotSaved verdict--> awaiting_name --valid name--> awaiting_confirm
//! awaiting_confirm --"yes"--> saved (session destroyed)
//! awaiting_confirm --"no"---> awaiting_name
//! any state     --unrecognized input--> unchanged, nothing sent
//! ```
//!
//! A failed save keeps the session at `awaiting_confirm` so the contact can
//! retry with another "yes" instead of retyping their name.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use keeper_address_book::{AddressBookService, ServiceError, WriteReceipt};
use keeper_core::current_unix_timestamp_ms;
use keeper_ledger::{LedgerRecord, Provenance};
use keeper_phone::PhoneKey;
use keeper_resolve::{AggregatorInvalidation, DecisionEngine, NameEvidence, SaveState};

use crate::message_channel::{MessageChannel, SendOptions};
use crate::name_validation::{classify_reply, validate_name, NameRejection, ReplySignal};
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    AwaitingName,
    AwaitingConfirm,
}

#[derive(Debug, Clone)]
struct PendingName {
    normalized: String,
    raw: String,
}

#[derive(Debug, Clone)]
struct CaptureSession {
    state: CaptureState,
    pending: Option<PendingName>,
    reply_target: String,
    asked_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    AlreadySaved { provenance: Provenance, name: String },
    PromptSent,
    SessionAlreadyActive,
    ConfirmRequested { name: String },
    ValidationRejected(NameRejection),
    Saved { name: String },
    WriteFailed { error: String },
    /// The remote record changed underneath the save; the dialog ends and
    /// the duplicate is left for manual resolution.
    WriteConflict { detail: String },
    RePromptSent,
    Ignored,
}

pub struct CaptureRuntime {
    engine: Arc<DecisionEngine>,
    channel: Arc<dyn MessageChannel>,
    sessions: Mutex<BTreeMap<(String, String), CaptureSession>>,
}

impl CaptureRuntime {
    pub fn new(engine: Arc<DecisionEngine>, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            engine,
            channel,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn session_state(&self, owner_key: &str, contact: &PhoneKey) -> Option<CaptureState> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&session_key(owner_key, contact))
            .map(|session| session.state)
    }

    /// Entry point for "a conversation with this contact is active". Runs the
    /// decision engine and opens a dialog when the contact is unsaved. A
    /// second trigger while a session exists is a no-op: one prompt, not two.
    pub async fn trigger(
        &self,
        owner_key: &str,
        contact: &PhoneKey,
        reply_target: &str,
        evidence: Option<&NameEvidence>,
    ) -> Result<CaptureOutcome> {
        let key = session_key(owner_key, contact);
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(&key) {
                return Ok(CaptureOutcome::SessionAlreadyActive);
            }
        }

        match self
            .engine
            .resolve_save_state(owner_key, contact, evidence)
            .await?
        {
            SaveState::AlreadySaved { provenance, name } => {
                Ok(CaptureOutcome::AlreadySaved { provenance, name })
            }
            SaveState::NotSaved => {
                {
                    let mut sessions = self.sessions.lock().await;
                    // The engine call suspended; someone may have raced us here.
                    if sessions.contains_key(&key) {
                        return Ok(CaptureOutcome::SessionAlreadyActive);
                    }
                    sessions.insert(
                        key,
                        CaptureSession {
                            state: CaptureState::AwaitingName,
                            pending: None,
                            reply_target: reply_target.to_string(),
                            asked_unix_ms: current_unix_timestamp_ms(),
                        },
                    );
                }
                info!(owner_key, contact = %contact, "opening capture dialog");
                self.send_text(reply_target, prompts::WELCOME_PROMPT).await;
                Ok(CaptureOutcome::PromptSent)
            }
        }
    }

    /// Feeds an inbound message from the contact into the dialog. Without an
    /// active session this is just a trigger.
    pub async fn on_inbound_text(
        &self,
        owner_key: &str,
        contact: &PhoneKey,
        reply_target: &str,
        text: &str,
        evidence: Option<&NameEvidence>,
    ) -> Result<CaptureOutcome> {
        let key = session_key(owner_key, contact);
        let state = {
            let sessions = self.sessions.lock().await;
            sessions.get(&key).map(|session| session.state)
        };
        match state {
            None => self.trigger(owner_key, contact, reply_target, evidence).await,
            Some(CaptureState::AwaitingName) => self.handle_name_reply(&key, text).await,
            Some(CaptureState::AwaitingConfirm) => {
                self.handle_confirm_reply(owner_key, contact, &key, text).await
            }
        }
    }

    /// Drops sessions that have waited on a reply longer than `max_age_ms`.
    /// Returns how many were abandoned.
    pub async fn abandon_stale_sessions(&self, max_age_ms: u64) -> usize {
        let now = current_unix_timestamp_ms();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| now.saturating_sub(session.asked_unix_ms) < max_age_ms);
        before - sessions.len()
    }

    async fn handle_name_reply(
        &self,
        key: &(String, String),
        text: &str,
    ) -> Result<CaptureOutcome> {
        match validate_name(text) {
            Ok(normalized) => {
                let now = current_unix_timestamp_ms();
                let reply_target = {
                    let mut sessions = self.sessions.lock().await;
                    let Some(session) = sessions.get_mut(key) else {
                        return Ok(CaptureOutcome::Ignored);
                    };
                    session.state = CaptureState::AwaitingConfirm;
                    session.pending = Some(PendingName {
                        normalized: normalized.clone(),
                        raw: text.trim().to_string(),
                    });
                    session.asked_unix_ms = now;
                    session.reply_target.clone()
                };
                self.send_text(&reply_target, &prompts::confirmation_prompt(&normalized, now))
                    .await;
                Ok(CaptureOutcome::ConfirmRequested { name: normalized })
            }
            Err(rejection) => {
                let reply_target = {
                    let sessions = self.sessions.lock().await;
                    sessions.get(key).map(|session| session.reply_target.clone())
                };
                if let Some(reply_target) = reply_target {
                    self.send_text(&reply_target, &prompts::rejection_message(&rejection))
                        .await;
                }
                Ok(CaptureOutcome::ValidationRejected(rejection))
            }
        }
    }

    async fn handle_confirm_reply(
        &self,
        owner_key: &str,
        contact: &PhoneKey,
        key: &(String, String),
        text: &str,
    ) -> Result<CaptureOutcome> {
        match classify_reply(text) {
            ReplySignal::Affirmative => {
                let (pending, reply_target) = {
                    let sessions = self.sessions.lock().await;
                    let Some(session) = sessions.get(key) else {
                        return Ok(CaptureOutcome::Ignored);
                    };
                    (session.pending.clone(), session.reply_target.clone())
                };
                let Some(pending) = pending else {
                    // Confirm state without a candidate name; start over.
                    {
                        let mut sessions = self.sessions.lock().await;
                        if let Some(session) = sessions.get_mut(key) {
                            session.state = CaptureState::AwaitingName;
                        }
                    }
                    self.send_text(&reply_target, prompts::REPEAT_NAME_PROMPT).await;
                    return Ok(CaptureOutcome::RePromptSent);
                };

                match self.persist_confirmed(owner_key, contact, &pending).await {
                    Ok(()) => {
                        {
                            let mut sessions = self.sessions.lock().await;
                            sessions.remove(key);
                        }
                        self.send_text(&reply_target, &prompts::saved_message(&pending.normalized))
                            .await;
                        Ok(CaptureOutcome::Saved {
                            name: pending.normalized,
                        })
                    }
                    Err(error) => {
                        if let Some(ServiceError::WriteConflict { detail, .. }) =
                            error.downcast_ref::<ServiceError>()
                        {
                            // Never auto-retried: the session ends so a
                            // later "yes" cannot clobber the other writer.
                            let detail = detail.clone();
                            warn!(owner_key, contact = %contact, detail, "confirmed save conflicted");
                            {
                                let mut sessions = self.sessions.lock().await;
                                sessions.remove(key);
                            }
                            self.send_text(&reply_target, &prompts::write_conflict_message(&detail))
                                .await;
                            return Ok(CaptureOutcome::WriteConflict { detail });
                        }
                        // Session stays at awaiting_confirm; a bare "yes"
                        // retries without re-asking the name.
                        let error = format!("{error:#}");
                        warn!(owner_key, contact = %contact, error, "confirmed save failed");
                        self.send_text(&reply_target, &prompts::write_failure_message(&error))
                            .await;
                        Ok(CaptureOutcome::WriteFailed { error })
                    }
                }
            }
            ReplySignal::Negative => {
                let reply_target = {
                    let mut sessions = self.sessions.lock().await;
                    let Some(session) = sessions.get_mut(key) else {
                        return Ok(CaptureOutcome::Ignored);
                    };
                    session.state = CaptureState::AwaitingName;
                    session.pending = None;
                    session.asked_unix_ms = current_unix_timestamp_ms();
                    session.reply_target.clone()
                };
                self.send_text(&reply_target, prompts::REPEAT_NAME_PROMPT).await;
                Ok(CaptureOutcome::RePromptSent)
            }
            ReplySignal::Unrecognized => Ok(CaptureOutcome::Ignored),
        }
    }

    /// Create-or-update write plus the ledger funnel. Reuses an existing
    /// remote record for this number when one exists so a confirm never
    /// mints a duplicate.
    async fn persist_confirmed(
        &self,
        owner_key: &str,
        contact: &PhoneKey,
        pending: &PendingName,
    ) -> Result<()> {
        let accounts = self.engine.linked_accounts(owner_key).await;
        let mut receipt: Option<WriteReceipt> = None;
        if let Some(account) = accounts.first() {
            let client = self.engine.factory().client_for(account);
            receipt = Some(
                self.create_or_update(client.as_ref(), contact, &pending.normalized)
                    .await
                    .context("address-book write failed")?,
            );
        }

        let record = LedgerRecord {
            phone_key: contact.clone(),
            name: pending.normalized.clone(),
            raw_name: pending.raw.clone(),
            external_id: receipt.map(|r| r.external_id),
            saved_unix_ms: current_unix_timestamp_ms(),
            provenance: Provenance::DialogConfirmed,
        };
        let invalidation = AggregatorInvalidation(Arc::clone(self.engine.aggregator()));
        self.engine
            .ledger()
            .save_and_invalidate(owner_key, record, &invalidation)
            .await
    }

    async fn create_or_update(
        &self,
        client: &dyn AddressBookService,
        contact: &PhoneKey,
        name: &str,
    ) -> Result<WriteReceipt> {
        let prior = match client.find_by_phone(contact.as_str()).await {
            Ok(prior) => prior,
            Err(error) => {
                warn!(contact = %contact, error = %error, "pre-write lookup failed, creating fresh");
                None
            }
        };
        if let Some(record) = prior {
            // Any prior record for this number keeps its external id, etag
            // or not; only records the lookup never saw get created.
            return Ok(client
                .update(
                    &record.external_id,
                    name,
                    contact.as_str(),
                    record.etag.as_deref(),
                )
                .await?);
        }
        Ok(client.create(name, contact.as_str()).await?)
    }

    async fn send_text(&self, target: &str, text: &str) {
        let options = SendOptions {
            quote_original: true,
        };
        if let Err(error) = self.channel.send(target, text, &options).await {
            warn!(target, error = %error, "outbound send failed");
        }
    }
}

fn session_key(owner_key: &str, contact: &PhoneKey) -> (String, String) {
    (owner_key.to_string(), contact.as_str().to_string())
}
