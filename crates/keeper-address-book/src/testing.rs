//! In-memory address-book implementation.
//!
//! Backs every test in the workspace that needs a linked account without a
//! live service: listings paginate, writes allocate external ids and bump
//! etags, and failures can be injected per operation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use keeper_phone::FuzzyKey;

use crate::account_links::LinkedAccount;
use crate::service_contract::{
    AddressBookService, PersonPage, PersonRecord, ServiceError, ServiceFactory, ServiceResult,
    WriteReceipt,
};

const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default)]
struct BookState {
    primary: Vec<PersonRecord>,
    secondary: Vec<PersonRecord>,
    next_id: u64,
    listing_calls: u64,
    create_calls: u64,
    update_calls: u64,
    listing_error: Option<String>,
    find_error: Option<String>,
    write_error: Option<String>,
    update_conflict: Option<String>,
}

/// One fake linked account. All state sits behind a mutex so the service can
/// be shared as `Arc<dyn AddressBookService>`.
#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    page_size: usize,
    state: Mutex<BookState>,
}

impl InMemoryAddressBook {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            state: Mutex::new(BookState::default()),
        }
    }

    fn effective_page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }

    pub fn seed_primary(&self, records: Vec<PersonRecord>) {
        self.state.lock().expect("book lock").primary = records;
    }

    pub fn seed_secondary(&self, records: Vec<PersonRecord>) {
        self.state.lock().expect("book lock").secondary = records;
    }

    /// Makes both listing buckets fail with the given message.
    pub fn fail_listings(&self, message: &str) {
        self.state.lock().expect("book lock").listing_error = Some(message.to_string());
    }

    /// Makes `find_by_phone` fail with the given message.
    pub fn fail_finds(&self, message: &str) {
        self.state.lock().expect("book lock").find_error = Some(message.to_string());
    }

    /// Makes `create` and `update` fail with the given message.
    pub fn fail_writes(&self, message: &str) {
        self.state.lock().expect("book lock").write_error = Some(message.to_string());
    }

    pub fn clear_write_failure(&self) {
        self.state.lock().expect("book lock").write_error = None;
    }

    /// Makes every `update` fail as if another writer changed the record
    /// between the caller's read and its write.
    pub fn fail_updates_with_conflict(&self, detail: &str) {
        self.state.lock().expect("book lock").update_conflict = Some(detail.to_string());
    }

    pub fn listing_calls(&self) -> u64 {
        self.state.lock().expect("book lock").listing_calls
    }

    pub fn create_calls(&self) -> u64 {
        self.state.lock().expect("book lock").create_calls
    }

    pub fn update_calls(&self) -> u64 {
        self.state.lock().expect("book lock").update_calls
    }

    /// Snapshot of every record across both buckets.
    pub fn all_records(&self) -> Vec<PersonRecord> {
        let state = self.state.lock().expect("book lock");
        state
            .primary
            .iter()
            .chain(state.secondary.iter())
            .cloned()
            .collect()
    }

    fn paginate(records: &[PersonRecord], page_token: Option<&str>, page_size: usize) -> PersonPage {
        let start = page_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + page_size).min(records.len());
        let next_page_token = if end < records.len() {
            Some(end.to_string())
        } else {
            None
        };
        PersonPage {
            records: records[start.min(records.len())..end].to_vec(),
            next_page_token,
        }
    }
}

#[async_trait]
impl AddressBookService for InMemoryAddressBook {
    async fn list_primary(&self, page_token: Option<&str>) -> ServiceResult<PersonPage> {
        let mut state = self.state.lock().expect("book lock");
        state.listing_calls += 1;
        if let Some(message) = &state.listing_error {
            return Err(ServiceError::Remote(message.clone()));
        }
        Ok(Self::paginate(
            &state.primary,
            page_token,
            self.effective_page_size(),
        ))
    }

    async fn list_secondary(&self, page_token: Option<&str>) -> ServiceResult<PersonPage> {
        let mut state = self.state.lock().expect("book lock");
        state.listing_calls += 1;
        if let Some(message) = &state.listing_error {
            return Err(ServiceError::Remote(message.clone()));
        }
        Ok(Self::paginate(
            &state.secondary,
            page_token,
            self.effective_page_size(),
        ))
    }

    async fn create(&self, name: &str, phone: &str) -> ServiceResult<WriteReceipt> {
        let mut state = self.state.lock().expect("book lock");
        if let Some(message) = &state.write_error {
            return Err(ServiceError::Remote(message.clone()));
        }
        state.create_calls += 1;
        state.next_id += 1;
        let external_id = format!("person-{}", state.next_id);
        state.primary.push(PersonRecord {
            external_id: external_id.clone(),
            name: Some(name.to_string()),
            phones: vec![phone.to_string()],
            etag: Some("etag-1".to_string()),
        });
        Ok(WriteReceipt {
            external_id,
            etag: "etag-1".to_string(),
        })
    }

    async fn update(
        &self,
        external_id: &str,
        name: &str,
        phone: &str,
        etag: Option<&str>,
    ) -> ServiceResult<WriteReceipt> {
        let mut state = self.state.lock().expect("book lock");
        if let Some(message) = &state.write_error {
            return Err(ServiceError::Remote(message.clone()));
        }
        if let Some(detail) = &state.update_conflict {
            return Err(ServiceError::WriteConflict {
                external_id: external_id.to_string(),
                detail: detail.clone(),
            });
        }
        state.update_calls += 1;
        let next_etag = format!("etag-{}", state.update_calls + 1);
        // Single reborrow so both buckets can be chained mutably.
        let state = &mut *state;
        let record = state
            .primary
            .iter_mut()
            .chain(state.secondary.iter_mut())
            .find(|record| record.external_id == external_id)
            .ok_or_else(|| ServiceError::Remote(format!("no record '{external_id}'")))?;
        if let Some(expected) = etag {
            if record.etag.as_deref() != Some(expected) {
                return Err(ServiceError::WriteConflict {
                    external_id: external_id.to_string(),
                    detail: format!(
                        "etag mismatch: have {:?}, caller sent '{expected}'",
                        record.etag
                    ),
                });
            }
        }
        record.name = Some(name.to_string());
        record.phones = vec![phone.to_string()];
        record.etag = Some(next_etag.clone());
        Ok(WriteReceipt {
            external_id: external_id.to_string(),
            etag: next_etag,
        })
    }

    async fn delete(&self, external_id: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().expect("book lock");
        state.primary.retain(|record| record.external_id != external_id);
        state.secondary.retain(|record| record.external_id != external_id);
        Ok(())
    }

    async fn find_by_phone(&self, phone: &str) -> ServiceResult<Option<PersonRecord>> {
        let state = self.state.lock().expect("book lock");
        if let Some(message) = &state.find_error {
            return Err(ServiceError::Remote(message.clone()));
        }
        let Ok(wanted) = FuzzyKey::from_raw(phone) else {
            return Ok(None);
        };
        let hit = state
            .primary
            .iter()
            .chain(state.secondary.iter())
            .find(|record| {
                record
                    .phones
                    .iter()
                    .any(|candidate| FuzzyKey::from_raw(candidate).ok() == Some(wanted.clone()))
            })
            .cloned();
        Ok(hit)
    }
}

/// Hands out one shared [`InMemoryAddressBook`] per account id.
#[derive(Debug, Default)]
pub struct InMemoryFactory {
    books: Mutex<BTreeMap<String, Arc<InMemoryAddressBook>>>,
}

impl InMemoryFactory {
    /// The fake book behind `account_id`, created on first use.
    pub fn book(&self, account_id: &str) -> Arc<InMemoryAddressBook> {
        let mut books = self.books.lock().expect("factory lock");
        Arc::clone(
            books
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(InMemoryAddressBook::default())),
        )
    }
}

impl ServiceFactory for InMemoryFactory {
    fn client_for(&self, account: &LinkedAccount) -> Arc<dyn AddressBookService> {
        self.book(&account.account_id)
    }
}
