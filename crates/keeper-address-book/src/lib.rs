//! External address-book access for Keeper.
//!
//! Owners link one or more address-book accounts; this crate holds the
//! service contract those accounts are reached through, the credential
//! records for linked accounts, and the directory aggregator that folds
//! every linked account's contacts into one fuzzy-keyed lookup table with an
//! owner-scoped TTL cache.

pub mod account_links;
pub mod directory_aggregator;
pub mod directory_cache;
pub mod service_contract;
pub mod testing;

pub use account_links::{AccountLinkRegistry, LinkedAccount};
pub use directory_aggregator::{
    AccountFetchStats, ContactBucket, DirectoryAggregator, DirectoryEntry, MergedDirectory,
};
pub use directory_cache::DirectoryCache;
pub use service_contract::{
    AddressBookService, PersonPage, PersonRecord, ServiceError, ServiceFactory, WriteReceipt,
};
