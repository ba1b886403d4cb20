use std::error::Error;
use std::time::Duration;
use txbank_core::{
    Account, AcceptAll, AccountRepository, DbError, ErrorKind, PoolConfig, RepoError, RepoResult,
    SqliteAccountRepository, StoreConfig, TransactionManager, TransferFailure, TransferService,
    TransferState, Tx, ValidationError,
};

const MEMBER_A: &str = "memberA";
const MEMBER_B: &str = "memberB";
const MEMBER_EX: &str = "ex";

fn setup(config: StoreConfig) -> (SqliteAccountRepository, TransactionManager) {
    let (source, tx_manager) = config.build().unwrap();
    (SqliteAccountRepository::new(source), tx_manager)
}

fn memory_store() -> (SqliteAccountRepository, TransactionManager) {
    setup(StoreConfig::in_memory().pooled(PoolConfig::default().max_size(2)))
}

fn seed(repo: &SqliteAccountRepository, accounts: &[(&str, i64)]) {
    for (id, balance) in accounts {
        repo.create(None, &Account::new(*id, *balance)).unwrap();
    }
}

fn balance(repo: &SqliteAccountRepository, id: &str) -> i64 {
    repo.get_by_id(None, id).unwrap().balance
}

#[test]
fn transfer_moves_amount_between_accounts() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let receipt = service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap();

    assert_eq!(balance(&repo, MEMBER_A), 8_000);
    assert_eq!(balance(&repo, MEMBER_B), 12_000);
    assert_eq!(receipt.from, Account::new(MEMBER_A, 8_000));
    assert_eq!(receipt.to, Account::new(MEMBER_B, 12_000));
    assert_eq!(
        receipt.path,
        vec![
            TransferState::Started,
            TransferState::Validated,
            TransferState::Applied,
            TransferState::Committed
        ]
    );
}

#[test]
fn validation_failure_rolls_back_the_debit() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_EX, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let err = service.transfer(MEMBER_A, MEMBER_EX, 2_000).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert!(matches!(err.cause(), TransferFailure::Validation(_)));
    assert_eq!(
        err.path,
        vec![
            TransferState::Started,
            TransferState::Failed,
            TransferState::RolledBack
        ]
    );
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
    assert_eq!(balance(&repo, MEMBER_EX), 10_000);
}

#[test]
fn transfer_error_keeps_original_cause_inspectable() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_EX, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let err = service.transfer(MEMBER_A, MEMBER_EX, 2_000).unwrap_err();

    let cause = err.source().unwrap();
    let root = cause.source().unwrap();
    assert!(root.downcast_ref::<ValidationError>().is_some());
    assert!(err.to_string().contains(MEMBER_EX));
}

#[test]
fn missing_target_rolls_back_and_reports_not_found() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let err = service.transfer(MEMBER_A, "ghost", 2_000).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
}

#[test]
fn transfer_is_not_idempotent() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap();
    service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap();

    // A repeated call applies the delta again.
    assert_eq!(balance(&repo, MEMBER_A), 6_000);
    assert_eq!(balance(&repo, MEMBER_B), 14_000);
}

#[test]
fn each_transfer_runs_in_its_own_transaction() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let first = service.transfer(MEMBER_A, MEMBER_B, 1).unwrap();
    let second = service.transfer(MEMBER_A, MEMBER_B, 1).unwrap();

    assert_ne!(first.tx_id, second.tx_id);
}

#[test]
fn debit_may_drive_balance_negative() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 100), (MEMBER_B, 0)]);
    let service = TransferService::new(&repo, tx_manager);

    service.transfer(MEMBER_A, MEMBER_B, 300).unwrap();

    assert_eq!(balance(&repo, MEMBER_A), -200);
    assert_eq!(balance(&repo, MEMBER_B), 300);
}

#[test]
fn request_checks_fail_without_touching_balances() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let service = TransferService::new(&repo, tx_manager);

    let rejected = [
        (MEMBER_A, MEMBER_B, 0),
        (MEMBER_A, MEMBER_B, -1),
        (MEMBER_A, MEMBER_A, 10),
    ];
    for (from, to, amount) in rejected {
        let err = service.transfer(from, to, amount).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
    assert_eq!(balance(&repo, MEMBER_B), 10_000);
}

#[test]
fn credit_overflow_rolls_back_the_debit() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10), (MEMBER_B, i64::MAX)]);
    let service = TransferService::new(&repo, tx_manager);

    let err = service.transfer(MEMBER_A, MEMBER_B, 5).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(balance(&repo, MEMBER_A), 10);
    assert_eq!(balance(&repo, MEMBER_B), i64::MAX);
}

#[test]
fn custom_validation_hook_replaces_sentinel_rule() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_EX, 10_000)]);
    let limit = |_: &Account, _: &Account, amount: i64| {
        if amount > 1_000 {
            Err(ValidationError::new("amount over limit"))
        } else {
            Ok(())
        }
    };
    let service = TransferService::with_validator(&repo, tx_manager, limit);

    service.transfer(MEMBER_A, MEMBER_EX, 1_000).unwrap();
    let err = service.transfer(MEMBER_A, MEMBER_EX, 1_001).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(balance(&repo, MEMBER_A), 9_000);
    assert_eq!(balance(&repo, MEMBER_EX), 11_000);
}

#[test]
fn sum_is_preserved_for_committed_and_rejected_transfers() {
    let cases: &[(i64, i64, i64, &str)] = &[
        (10_000, 10_000, 2_000, MEMBER_B),
        (10_000, 10_000, 2_000, MEMBER_EX),
        (1, 0, 1, MEMBER_B),
        (0, 5, 7, MEMBER_B),
        (50_000, 3, 49_999, MEMBER_EX),
        (i64::MAX - 1, 1, 1, MEMBER_B),
    ];

    for &(from_balance, to_balance, amount, to_id) in cases {
        let (repo, tx_manager) = memory_store();
        seed(&repo, &[(MEMBER_A, from_balance), (to_id, to_balance)]);
        let service = TransferService::new(&repo, tx_manager);

        let result = service.transfer(MEMBER_A, to_id, amount);

        let after_from = balance(&repo, MEMBER_A);
        let after_to = balance(&repo, to_id);
        assert_eq!(
            i128::from(after_from) + i128::from(after_to),
            i128::from(from_balance) + i128::from(to_balance)
        );
        if to_id == MEMBER_EX {
            assert!(result.is_err());
            assert_eq!((after_from, after_to), (from_balance, to_balance));
        } else {
            result.unwrap();
            assert_eq!(after_from, from_balance - amount);
            assert_eq!(after_to, to_balance + amount);
        }
    }
}

/// Repository that fails the credit write with a data-access error.
struct FailingCredit<'a> {
    inner: &'a SqliteAccountRepository,
    fail_on: &'static str,
}

impl AccountRepository for FailingCredit<'_> {
    fn create(&self, tx: Option<&Tx>, account: &Account) -> RepoResult<()> {
        self.inner.create(tx, account)
    }

    fn get_by_id(&self, tx: Option<&Tx>, id: &str) -> RepoResult<Account> {
        self.inner.get_by_id(tx, id)
    }

    fn update_balance(&self, tx: Option<&Tx>, id: &str, balance: i64) -> RepoResult<()> {
        if id == self.fail_on {
            return Err(RepoError::Db(DbError::InvalidConfig(
                "simulated storage failure".to_string(),
            )));
        }
        self.inner.update_balance(tx, id, balance)
    }

    fn delete(&self, tx: Option<&Tx>, id: &str) -> RepoResult<bool> {
        self.inner.delete(tx, id)
    }
}

#[test]
fn data_access_failure_after_debit_rolls_back() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let failing = FailingCredit {
        inner: &repo,
        fail_on: MEMBER_B,
    };
    let service = TransferService::with_validator(failing, tx_manager, AcceptAll);

    let err = service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DataAccessFailure);
    assert!(matches!(err.into_cause(), TransferFailure::Repo(RepoError::Db(_))));
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
    assert_eq!(balance(&repo, MEMBER_B), 10_000);
}

/// Aborts the transaction right after crediting `abort_after`, so the
/// following COMMIT has nothing to commit.
struct AbortBeforeCommit<'a> {
    inner: &'a SqliteAccountRepository,
    abort_after: &'static str,
}

impl AccountRepository for AbortBeforeCommit<'_> {
    fn create(&self, tx: Option<&Tx>, account: &Account) -> RepoResult<()> {
        self.inner.create(tx, account)
    }

    fn get_by_id(&self, tx: Option<&Tx>, id: &str) -> RepoResult<Account> {
        self.inner.get_by_id(tx, id)
    }

    fn update_balance(&self, tx: Option<&Tx>, id: &str, balance: i64) -> RepoResult<()> {
        self.inner.update_balance(tx, id, balance)?;
        if let Some(tx) = tx.filter(|_| id == self.abort_after) {
            tx.connection()
                .execute_batch("ROLLBACK;")
                .map_err(DbError::from)?;
        }
        Ok(())
    }

    fn delete(&self, tx: Option<&Tx>, id: &str) -> RepoResult<bool> {
        self.inner.delete(tx, id)
    }
}

#[test]
fn commit_failure_reports_data_access_failure_after_applied() {
    let (repo, tx_manager) = memory_store();
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let aborting = AbortBeforeCommit {
        inner: &repo,
        abort_after: MEMBER_B,
    };
    let service = TransferService::new(aborting, tx_manager);

    let err = service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DataAccessFailure);
    assert!(matches!(
        err.cause(),
        TransferFailure::Transaction(DbError::Sqlite(_))
    ));
    assert_eq!(
        err.path,
        vec![
            TransferState::Started,
            TransferState::Validated,
            TransferState::Applied,
            TransferState::Failed,
            TransferState::RolledBack
        ]
    );
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
    assert_eq!(balance(&repo, MEMBER_B), 10_000);
}

#[test]
fn begin_failure_on_exhausted_pool_is_reported_as_transfer_error() {
    let (repo, tx_manager) = setup(
        StoreConfig::in_memory().pooled(
            PoolConfig::default()
                .max_size(1)
                .acquire_timeout(Duration::from_millis(50)),
        ),
    );
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let held = tx_manager.begin().unwrap();
    let service = TransferService::new(&repo, tx_manager.clone());

    let err = service.transfer(MEMBER_A, MEMBER_B, 2_000).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DataAccessFailure);
    assert!(matches!(
        err.cause(),
        TransferFailure::Transaction(DbError::PoolTimeout { max_size: 1, .. })
    ));
    assert_eq!(
        err.path,
        vec![
            TransferState::Started,
            TransferState::Failed,
            TransferState::RolledBack
        ]
    );

    tx_manager.rollback(held).unwrap();
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
    assert_eq!(balance(&repo, MEMBER_B), 10_000);
}

fn run_concurrent_transfers(config: StoreConfig) {
    let (repo, tx_manager) = setup(config);
    seed(&repo, &[(MEMBER_A, 10_000), (MEMBER_B, 10_000)]);
    let service = TransferService::new(repo.clone(), tx_manager);

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let service = &service;
            scope.spawn(move || {
                for _ in 0..10 {
                    let (from, to) = if worker % 2 == 0 {
                        (MEMBER_A, MEMBER_B)
                    } else {
                        (MEMBER_B, MEMBER_A)
                    };
                    service.transfer(from, to, 10).unwrap();
                }
            });
        }
    });

    assert_eq!(balance(&repo, MEMBER_A) + balance(&repo, MEMBER_B), 20_000);
    assert_eq!(balance(&repo, MEMBER_A), 10_000);
}

#[test]
fn concurrent_transfers_preserve_total_balance() {
    let dir = tempfile::tempdir().unwrap();
    run_concurrent_transfers(
        StoreConfig::file(dir.path().join("concurrent.db"))
            .pooled(PoolConfig::default().max_size(4)),
    );
}

#[test]
fn concurrent_transfers_preserve_total_balance_in_memory() {
    run_concurrent_transfers(StoreConfig::in_memory().pooled(PoolConfig::default().max_size(4)));
}
