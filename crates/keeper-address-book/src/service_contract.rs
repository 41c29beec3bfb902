//! Contract for one linked address-book account.
//!
//! The remote service implementation is deliberately out of scope; everything
//! in Keeper reaches contacts through [`AddressBookService`], and tests
//! substitute in-memory fakes. Failures are isolated per call: a caller
//! touching several accounts must never let one account's error abort the
//! others.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::account_links::LinkedAccount;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("address-book service error: {0}")]
    Remote(String),
    #[error("write conflict on '{external_id}': {detail}; resolve the duplicate manually before retrying")]
    WriteConflict { external_id: String, detail: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// One person record as the remote service returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonRecord {
    pub external_id: String,
    pub name: Option<String>,
    pub phones: Vec<String>,
    pub etag: Option<String>,
}

/// One page of a listing; `next_page_token` is absent on the last page.
#[derive(Debug, Clone, Default)]
pub struct PersonPage {
    pub records: Vec<PersonRecord>,
    pub next_page_token: Option<String>,
}

/// Receipt for a create or update write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub external_id: String,
    pub etag: String,
}

/// Per-account address-book operations. Every method is a suspension point
/// and carries the implementation's own bounded timeout; a timeout surfaces
/// here as a plain [`ServiceError::Remote`].
#[async_trait]
pub trait AddressBookService: Send + Sync {
    /// Lists the account's primary contact bucket, one page at a time.
    async fn list_primary(&self, page_token: Option<&str>) -> ServiceResult<PersonPage>;

    /// Lists the secondary (auto-collected) bucket, one page at a time.
    async fn list_secondary(&self, page_token: Option<&str>) -> ServiceResult<PersonPage>;

    async fn create(&self, name: &str, phone: &str) -> ServiceResult<WriteReceipt>;

    /// Rewrites an existing record. A `Some` etag makes the write
    /// conditional on the record being unchanged since that read; `None`
    /// replaces unconditionally, for priors whose read carried no etag.
    async fn update(
        &self,
        external_id: &str,
        name: &str,
        phone: &str,
        etag: Option<&str>,
    ) -> ServiceResult<WriteReceipt>;

    async fn delete(&self, external_id: &str) -> ServiceResult<()>;

    /// Single-record lookup by phone number, used for one-off checks.
    async fn find_by_phone(&self, phone: &str) -> ServiceResult<Option<PersonRecord>>;
}

/// Builds a service client for one linked account's credentials.
pub trait ServiceFactory: Send + Sync {
    fn client_for(&self, account: &LinkedAccount) -> Arc<dyn AddressBookService>;
}
