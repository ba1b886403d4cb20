//! Balance transfer use-case.
//!
//! # Responsibility
//! - Move an amount between two accounts inside one transaction.
//! - Run a pluggable validation hook between the debit and the credit.
//! - Surface every failure as one `TransferError` after a full rollback.
//!
//! # Invariants
//! - The transaction starts before the first read and ends exactly once.
//! - A transaction handle lives inside a single `transfer` call.
//! - On failure both balances keep their pre-call values.
//! - States advance `Started -> Validated -> Applied -> Committed`, or
//!   `Started -> Failed -> RolledBack`.

use crate::db::{DbError, TransactionManager, Tx, TxId};
use crate::error::ErrorKind;
use crate::model::account::{Account, AccountId};
use crate::repo::account_repo::{AccountRepository, RepoError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Target id rejected by the default validation hook.
pub const DEFAULT_SENTINEL_ID: &str = "ex";

pub type TransferResult<T> = Result<T, TransferError>;

/// Business-rule rejection raised during a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ValidationError {}

/// Hook run after the debit and before the credit.
///
/// Returning an error aborts and rolls back the transfer.
pub trait TransferValidator {
    fn validate(&self, from: &Account, to: &Account, amount: i64) -> Result<(), ValidationError>;
}

impl<F> TransferValidator for F
where
    F: Fn(&Account, &Account, i64) -> Result<(), ValidationError>,
{
    fn validate(&self, from: &Account, to: &Account, amount: i64) -> Result<(), ValidationError> {
        self(from, to, amount)
    }
}

/// Rejects transfers whose target carries a reserved id.
///
/// Used to exercise the rollback path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectSentinel {
    sentinel: AccountId,
}

impl RejectSentinel {
    pub fn new(sentinel: impl Into<AccountId>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }
}

impl Default for RejectSentinel {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL_ID)
    }
}

impl TransferValidator for RejectSentinel {
    fn validate(&self, _from: &Account, to: &Account, _amount: i64) -> Result<(), ValidationError> {
        if to.id == self.sentinel {
            return Err(ValidationError::new(format!(
                "transfer to `{}` rejected during transfer",
                to.id
            )));
        }
        Ok(())
    }
}

/// Accepts every transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl TransferValidator for AcceptAll {
    fn validate(&self, _: &Account, _: &Account, _: i64) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Lifecycle state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Started,
    Validated,
    Applied,
    Committed,
    Failed,
    RolledBack,
}

impl TransferState {
    fn can_advance_to(self, next: TransferState) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::Validated)
                | (Self::Validated, Self::Applied)
                | (Self::Applied, Self::Committed)
                | (Self::Started | Self::Validated | Self::Applied, Self::Failed)
                | (Self::Failed, Self::RolledBack)
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Visited states of one transfer, in order.
#[derive(Debug)]
struct TransferProgress {
    path: Vec<TransferState>,
}

impl TransferProgress {
    fn start() -> Self {
        Self {
            path: vec![TransferState::Started],
        }
    }

    fn state(&self) -> TransferState {
        self.path
            .last()
            .copied()
            .unwrap_or(TransferState::Started)
    }

    fn advance(&mut self, next: TransferState) {
        let current = self.state();
        debug_assert!(
            current.can_advance_to(next),
            "illegal transfer transition {current:?} -> {next:?}"
        );
        if current.can_advance_to(next) {
            self.path.push(next);
        }
    }

    fn fail(&mut self) {
        if self.state() != TransferState::Failed {
            self.advance(TransferState::Failed);
        }
    }
}

/// Outcome of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_id: TxId,
    /// Source account after the debit.
    pub from: Account,
    /// Target account after the credit.
    pub to: Account,
    pub amount: i64,
    pub path: Vec<TransferState>,
}

/// Underlying reason a transfer was rolled back.
#[derive(Debug)]
pub enum TransferFailure {
    Repo(RepoError),
    Validation(ValidationError),
    /// Begin, commit or connection acquisition failed.
    Transaction(DbError),
}

impl TransferFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Repo(err) => err.kind(),
            Self::Validation(_) => ErrorKind::ValidationFailure,
            Self::Transaction(_) => ErrorKind::DataAccessFailure,
        }
    }
}

impl Display for TransferFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Transaction(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransferFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Transaction(err) => Some(err),
        }
    }
}

impl From<RepoError> for TransferFailure {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<ValidationError> for TransferFailure {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for TransferFailure {
    fn from(value: DbError) -> Self {
        Self::Transaction(value)
    }
}

/// Application-level failure of [`TransferService::transfer`].
///
/// The transfer has been rolled back by the time this error exists; the
/// original failure stays reachable through `cause()` and `source()`.
#[derive(Debug)]
pub struct TransferError {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: i64,
    pub path: Vec<TransferState>,
    cause: TransferFailure,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    pub fn cause(&self) -> &TransferFailure {
        &self.cause
    }

    pub fn into_cause(self) -> TransferFailure {
        self.cause
    }
}

impl Display for TransferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "transfer of {} from `{}` to `{}` rolled back: {}",
            self.amount, self.from, self.to, self.cause
        )
    }
}

impl Error for TransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}

/// Transfer use-case over an account repository.
pub struct TransferService<R: AccountRepository, V: TransferValidator = RejectSentinel> {
    repo: R,
    tx_manager: TransactionManager,
    validator: V,
}

impl<R: AccountRepository> TransferService<R> {
    /// Creates a service with the default sentinel validation hook.
    pub fn new(repo: R, tx_manager: TransactionManager) -> Self {
        Self::with_validator(repo, tx_manager, RejectSentinel::default())
    }
}

impl<R: AccountRepository, V: TransferValidator> TransferService<R, V> {
    pub fn with_validator(repo: R, tx_manager: TransactionManager, validator: V) -> Self {
        Self {
            repo,
            tx_manager,
            validator,
        }
    }

    /// Moves `amount` from `from_id` to `to_id` atomically.
    ///
    /// # Contract
    /// - Both writes commit together or neither is visible.
    /// - Not idempotent: each successful call applies the delta again.
    ///
    /// # Errors
    /// - `ValidationFailure` for non-positive amounts, self-transfers,
    ///   arithmetic overflow or a rejecting validation hook.
    /// - `NotFound` when either account is missing.
    /// - `DataAccessFailure` for store and transaction failures.
    pub fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: i64,
    ) -> TransferResult<TransferReceipt> {
        let mut progress = TransferProgress::start();
        info!("event=transfer module=service status=start from={from_id} to={to_id} amount={amount}");

        let outcome = self.tx_manager.with_transaction(|tx| {
            let applied = self.apply(tx, from_id, to_id, amount, &mut progress);
            if applied.is_err() {
                progress.fail();
            }
            applied.map(|(from, to)| (tx.id(), from, to))
        });

        match outcome {
            Ok((tx_id, from, to)) => {
                progress.advance(TransferState::Committed);
                info!(
                    "event=transfer module=service status={} tx_id={tx_id} from={from_id} to={to_id} amount={amount}",
                    progress.state().as_str()
                );
                Ok(TransferReceipt {
                    tx_id,
                    from,
                    to,
                    amount,
                    path: progress.path,
                })
            }
            Err(cause) => {
                progress.fail();
                progress.advance(TransferState::RolledBack);
                warn!(
                    "event=transfer module=service status={} from={from_id} to={to_id} amount={amount} error_kind={} error={cause}",
                    progress.state().as_str(),
                    cause.kind()
                );
                Err(TransferError {
                    from: from_id.to_string(),
                    to: to_id.to_string(),
                    amount,
                    path: progress.path,
                    cause,
                })
            }
        }
    }

    fn apply(
        &self,
        tx: &Tx,
        from_id: &str,
        to_id: &str,
        amount: i64,
        progress: &mut TransferProgress,
    ) -> Result<(Account, Account), TransferFailure> {
        check_request(from_id, to_id, amount)?;

        let from = self.repo.get_by_id(Some(tx), from_id)?;
        let to = self.repo.get_by_id(Some(tx), to_id)?;

        let debited = from.balance.checked_sub(amount).ok_or_else(|| {
            ValidationError::new(format!("debiting {amount} from `{from_id}` overflows"))
        })?;
        self.repo.update_balance(Some(tx), from_id, debited)?;

        self.validator.validate(&from, &to, amount)?;
        progress.advance(TransferState::Validated);

        let credited = to.balance.checked_add(amount).ok_or_else(|| {
            ValidationError::new(format!("crediting {amount} to `{to_id}` overflows"))
        })?;
        self.repo.update_balance(Some(tx), to_id, credited)?;
        progress.advance(TransferState::Applied);

        Ok((
            Account::new(from.id, debited),
            Account::new(to.id, credited),
        ))
    }
}

fn check_request(from_id: &str, to_id: &str, amount: i64) -> Result<(), ValidationError> {
    if amount <= 0 {
        return Err(ValidationError::new(format!(
            "transfer amount must be positive, got {amount}"
        )));
    }
    if from_id == to_id {
        return Err(ValidationError::new(format!(
            "cannot transfer from `{from_id}` to itself"
        )));
    }
    Ok(())
}
