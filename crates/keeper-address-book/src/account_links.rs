//! Linked-account credential records.
//!
//! An owner may authorize several independent address-book accounts. Link
//! order matters: it is the precedence order the directory merge uses, so
//! the registry preserves insertion order and refreshes update in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use keeper_core::current_unix_timestamp_ms;

/// Credentials for one authorized external account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkedAccount {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub linked_unix_ms: u64,
}

/// Per-owner ordered set of linked accounts.
#[derive(Debug, Default, Clone)]
pub struct AccountLinkRegistry {
    owners: BTreeMap<String, Vec<LinkedAccount>>,
}

impl AccountLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly authorized account. Re-linking an already-linked
    /// account updates its credentials without changing its position.
    pub fn link(
        &mut self,
        owner_key: &str,
        account_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) {
        let accounts = self.owners.entry(owner_key.to_string()).or_default();
        if let Some(existing) = accounts
            .iter_mut()
            .find(|account| account.account_id == account_id)
        {
            existing.access_token = access_token.to_string();
            existing.refresh_token = refresh_token.map(str::to_string);
            return;
        }
        accounts.push(LinkedAccount {
            account_id: account_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            linked_unix_ms: current_unix_timestamp_ms(),
        });
    }

    /// Replaces the access token after a refresh. Unknown accounts are a
    /// no-op rather than an implicit link.
    pub fn refresh(&mut self, owner_key: &str, account_id: &str, access_token: &str) {
        if let Some(accounts) = self.owners.get_mut(owner_key) {
            if let Some(account) = accounts
                .iter_mut()
                .find(|account| account.account_id == account_id)
            {
                account.access_token = access_token.to_string();
            }
        }
    }

    /// Removes an account on unlink; returns true when something was removed.
    pub fn unlink(&mut self, owner_key: &str, account_id: &str) -> bool {
        let Some(accounts) = self.owners.get_mut(owner_key) else {
            return false;
        };
        let before = accounts.len();
        accounts.retain(|account| account.account_id != account_id);
        before != accounts.len()
    }

    /// Accounts for an owner in link order. Empty when none are linked.
    pub fn accounts_for(&self, owner_key: &str) -> Vec<LinkedAccount> {
        self.owners.get(owner_key).cloned().unwrap_or_default()
    }
}
