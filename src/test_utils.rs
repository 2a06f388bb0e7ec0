//! Shared test utilities for the voucher desk.
//!
//! This module provides common helpers for setting up test databases, a small
//! fixed catalog, and issuance requests with sensible defaults.

use crate::{
    catalog::InMemoryCatalog,
    config::settings::Settings,
    core::{
        code::CodeGenerator,
        scope::ScopePayload,
        voucher::IssueVoucher,
    },
    desk::VoucherDesk,
    entities::{
        VoucherBook, VoucherBookColumn, VoucherSeries, VoucherSeriesColumn, VoucherStatus,
        VoucherTag, VoucherTagColumn, VoucherType, voucher,
    },
    errors::Result,
};
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, DatabaseConnection, PaginatorTrait, Set, prelude::*};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Creates an in-memory `SQLite` database with all tables initialized.
///
/// The pool holds a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise be its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A `SQLite` database in a temporary file, removed again on drop.
pub struct FileTestDb {
    pub db: DatabaseConnection,
    path: PathBuf,
}

impl Drop for FileTestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Creates a file-backed database whose pool really holds `connections`
/// connections, so concurrent callers reach `SQLite` at the same time.
pub async fn setup_file_test_db(connections: u32) -> Result<FileTestDb> {
    let path = std::env::temp_dir().join(format!("voucher-desk-{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options
        .max_connections(connections)
        .min_connections(connections)
        .sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(FileTestDb { db, path })
}

/// Catalog used across tests:
///
/// * `b1` - standalone
/// * `b2`, `b3` - series `earthsea`
/// * `b3`, `b4` - tag `fantasy`
pub fn test_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_book("b1", None, &[])
        .with_book("b2", Some("earthsea"), &[])
        .with_book("b3", Some("earthsea"), &["fantasy"])
        .with_book("b4", None, &["fantasy"])
}

/// A desk over a fresh database and [`test_catalog`], default settings.
pub async fn setup_test_desk() -> Result<VoucherDesk> {
    let db = setup_test_db().await?;
    Ok(VoucherDesk::new(
        db,
        Arc::new(test_catalog()),
        &Settings::default(),
    ))
}

/// Issuance request with sensible defaults.
///
/// # Defaults
/// * `client_id`: "client-1"
/// * `total_amount`: 29.99
/// * `commission_rate`: 10
/// * `number_of_downloads`: 1
/// * `created_by`: "operator-1"
pub fn issue_request(voucher_type: VoucherType, scope: ScopePayload) -> IssueVoucher {
    IssueVoucher {
        voucher_type,
        scope,
        client_id: "client-1".to_string(),
        total_amount: Decimal::new(2999, 2),
        commission_rate: Decimal::from(10),
        number_of_downloads: 1,
        created_by: "operator-1".to_string(),
    }
}

/// Inserts a bare voucher row with no scope associations.
pub async fn insert_voucher_row(
    db: &DatabaseConnection,
    voucher_type: VoucherType,
) -> Result<voucher::Model> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    let row = voucher::ActiveModel {
        id: Set(id),
        code: Set(id.simple().to_string()[..8].to_ascii_uppercase()),
        voucher_type: Set(voucher_type),
        client_id: Set("client-1".to_string()),
        created_by: Set("operator-1".to_string()),
        total_amount_cents: Set(1000),
        number_of_downloads: Set(1),
        commission_rate_bps: Set(0),
        commission_paid: Set(false),
        payment_received: Set(false),
        redeemed: Set(false),
        redeemed_at: Set(None),
        status: Set(VoucherStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(db).await.map_err(Into::into)
}

/// Total association rows of any kind held by a voucher.
pub async fn association_row_count(db: &DatabaseConnection, voucher_id: Uuid) -> Result<u64> {
    let books = VoucherBook::find()
        .filter(VoucherBookColumn::VoucherId.eq(voucher_id))
        .count(db)
        .await?;
    let series = VoucherSeries::find()
        .filter(VoucherSeriesColumn::VoucherId.eq(voucher_id))
        .count(db)
        .await?;
    let tags = VoucherTag::find()
        .filter(VoucherTagColumn::VoucherId.eq(voucher_id))
        .count(db)
        .await?;
    Ok(books + series + tags)
}

/// Hands out the given codes in order, then repeats the last one forever.
#[derive(Debug)]
pub struct ScriptedCodes {
    queue: Mutex<VecDeque<String>>,
    last: String,
}

impl ScriptedCodes {
    pub fn new<const N: usize>(codes: [&str; N]) -> Self {
        Self {
            queue: Mutex::new(codes.iter().map(|c| (*c).to_string()).collect()),
            last: codes.last().map_or_else(String::new, |c| (*c).to_string()),
        }
    }
}

impl CodeGenerator for ScriptedCodes {
    fn generate(&self) -> String {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.last.clone())
    }
}
