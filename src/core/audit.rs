//! Audit log - append-only history of lifecycle-affecting actions.
//!
//! Entries are only ever inserted. A failed audit write never changes the
//! outcome of the lifecycle action that triggered it: lifecycle code calls
//! [`record_best_effort`], which isolates the insert in its own (nested)
//! transaction and reports failures through [`AuditMonitor`].

use crate::{
    entities::{AuditLog, AuditLogColumn, audit_log},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use std::sync::atomic::{AtomicU64, Ordering};

/// Entries returned by [`list_entries`] when the caller gives no limit.
pub const DEFAULT_LIST_LIMIT: u64 = 50;

/// Hard ceiling on a single audit listing.
pub const MAX_LIST_LIMIT: u64 = 500;

/// Action tags written to `audit_log.action_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Create,
    Redeem,
    Deactivate,
    Delete,
    SettleCommission,
    PaymentReceived,
    BatchDelete,
    BatchExportDownload,
    BatchExportPrint,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Redeem => "redeem",
            Self::Deactivate => "deactivate",
            Self::Delete => "delete",
            Self::SettleCommission => "settle_commission",
            Self::PaymentReceived => "payment_received",
            Self::BatchDelete => "batch_delete",
            Self::BatchExportDownload => "batch_export_download",
            Self::BatchExportPrint => "batch_export_print",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts audit writes that failed after their lifecycle action succeeded.
#[derive(Debug, Default)]
pub struct AuditMonitor {
    failures: AtomicU64,
}

impl AuditMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit writes lost so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn report(&self, action: AuditAction, voucher_id: Option<Uuid>, err: &Error) {
        let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            action = action.as_str(),
            voucher_id = ?voucher_id,
            failures = total,
            error = %err,
            "Audit write failed; lifecycle action stands"
        );
    }
}

/// Appends one entry and surfaces any store error to the caller.
pub async fn record<C>(
    conn: &C,
    action: AuditAction,
    voucher_id: Option<Uuid>,
    performed_by: &str,
    detail: Option<String>,
) -> Result<audit_log::Model>
where
    C: ConnectionTrait,
{
    let entry = audit_log::ActiveModel {
        voucher_id: Set(voucher_id),
        action_type: Set(action.as_str().to_string()),
        performed_by: Set(performed_by.to_string()),
        detail: Set(detail),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };

    let entry = entry.insert(conn).await?;
    tracing::debug!(action = action.as_str(), voucher_id = ?voucher_id, "Audit entry recorded");
    Ok(entry)
}

/// Appends one entry without letting a failure escape.
///
/// When `conn` is itself a transaction, the insert runs in a savepoint, so a
/// failed audit write is rolled back on its own and the outer transaction
/// keeps going.
pub async fn record_best_effort<C>(
    conn: &C,
    monitor: &AuditMonitor,
    action: AuditAction,
    voucher_id: Option<Uuid>,
    performed_by: &str,
    detail: Option<String>,
) -> Option<audit_log::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    match record_isolated(conn, action, voucher_id, performed_by, detail).await {
        Ok(entry) => Some(entry),
        Err(err) => {
            monitor.report(action, voucher_id, &err);
            None
        }
    }
}

async fn record_isolated<C>(
    conn: &C,
    action: AuditAction,
    voucher_id: Option<Uuid>,
    performed_by: &str,
    detail: Option<String>,
) -> Result<audit_log::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = conn.begin().await?;
    match record(&txn, action, voucher_id, performed_by, detail).await {
        Ok(entry) => {
            txn.commit().await?;
            Ok(entry)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "Rolling back failed audit write also failed");
            }
            Err(err)
        }
    }
}

/// Lists entries newest first, optionally for one voucher.
pub async fn list_entries<C>(
    conn: &C,
    voucher_id: Option<Uuid>,
    limit: Option<u64>,
) -> Result<Vec<audit_log::Model>>
where
    C: ConnectionTrait,
{
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(Error::InvalidPagination { page_size: limit });
    }

    let mut query = AuditLog::find();
    if let Some(voucher_id) = voucher_id {
        query = query.filter(AuditLogColumn::VoucherId.eq(voucher_id));
    }

    query
        .order_by_desc(AuditLogColumn::CreatedAt)
        .order_by_desc(AuditLogColumn::Id)
        .limit(limit)
        .all(conn)
        .await
        .map_err(Into::into)
}
