//! Account use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for callers outside a transaction.
//! - Recover from duplicate ids by regenerating the identifier once.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Only `DuplicateKey` triggers a retry; other errors propagate unchanged.

use crate::model::account::{Account, AccountId, MAX_ACCOUNT_ID_LEN};
use crate::repo::account_repo::{AccountRepository, RepoError, RepoResult};
use log::info;
use uuid::Uuid;

const RETRY_SUFFIX_LEN: usize = 8;

/// Use-case service wrapper for account CRUD operations.
pub struct AccountService<R: AccountRepository> {
    repo: R,
}

impl<R: AccountRepository> AccountService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn create(&self, id: impl Into<AccountId>, balance: i64) -> RepoResult<Account> {
        let account = Account::new(id, balance);
        self.repo.create(None, &account)?;
        Ok(account)
    }

    /// Creates an account, retrying once with a regenerated id when `id` is
    /// already taken.
    ///
    /// Returns the account as stored, which carries the regenerated id after
    /// a retry.
    pub fn create_with_retry(&self, id: &str, balance: i64) -> RepoResult<Account> {
        match self.create(id, balance) {
            Err(RepoError::DuplicateKey { id: taken, .. }) => {
                let retry_id = regenerate_id(&taken);
                info!("event=account_create module=service status=retry account_id={taken} retry_id={retry_id}");
                self.create(retry_id, balance)
            }
            other => other,
        }
    }

    pub fn get(&self, id: &str) -> RepoResult<Account> {
        self.repo.get_by_id(None, id)
    }

    pub fn update_balance(&self, id: &str, balance: i64) -> RepoResult<()> {
        self.repo.update_balance(None, id, balance)
    }

    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        self.repo.delete(None, id)
    }
}

/// Derives a fresh id from `id` with a random hex suffix, keeping the
/// result within the id length limit.
pub fn regenerate_id(id: &str) -> AccountId {
    let suffix = Uuid::new_v4().simple().to_string();
    let keep = MAX_ACCOUNT_ID_LEN - RETRY_SUFFIX_LEN - 1;
    let base: String = id.chars().take(keep).collect();
    format!("{base}-{}", &suffix[..RETRY_SUFFIX_LEN])
}
