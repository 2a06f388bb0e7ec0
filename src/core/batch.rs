//! Batch operations - one action over many vouchers, tolerant of per-item failure.
//!
//! Ids are processed in the order given (duplicates once). A failure on one id
//! is recorded against that id and processing continues. Export actions also
//! produce the rendered artifact.

use crate::{
    core::{
        audit::{self, AuditAction, AuditMonitor},
        code::format_grouped,
        voucher::{delete_voucher, effective_commission, get_voucher},
    },
    entities::voucher,
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, prelude::Uuid};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Header row of the download export.
pub const CSV_HEADER: &str = "code,type,client_id,total_amount,number_of_downloads,status,redeemed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Delete,
    ExportForDownload,
    ExportForPrint,
}

impl BatchAction {
    #[must_use]
    pub const fn audit_action(self) -> AuditAction {
        match self {
            Self::Delete => AuditAction::BatchDelete,
            Self::ExportForDownload => AuditAction::BatchExportDownload,
            Self::ExportForPrint => AuditAction::BatchExportPrint,
        }
    }
}

/// A voucher the action could not be applied to.
#[derive(Debug)]
pub struct BatchFailure {
    pub voucher_id: Uuid,
    pub error: Error,
}

/// Per-id outcome of a batch. Partial success is the caller's call.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BatchFailure>,
    /// CSV or printable cards for export actions
    pub export: Option<String>,
}

impl BatchResult {
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn unique_in_order(voucher_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    voucher_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Applies `action` to every voucher in `voucher_ids`.
///
/// An empty list is a no-op: no store access, no audit entry. Otherwise one
/// batch-level audit entry summarizes the run, in addition to the per-voucher
/// `delete` entries a delete batch writes.
pub async fn apply_batch(
    db: &DatabaseConnection,
    monitor: &AuditMonitor,
    action: BatchAction,
    voucher_ids: &[Uuid],
    requested_by: &str,
) -> Result<BatchResult> {
    if voucher_ids.is_empty() {
        return Ok(BatchResult::default());
    }

    let mut result = BatchResult::default();
    let mut exported = Vec::new();

    for voucher_id in unique_in_order(voucher_ids) {
        let outcome = match action {
            BatchAction::Delete => delete_voucher(db, monitor, voucher_id, requested_by)
                .await
                .map(|_| ()),
            BatchAction::ExportForDownload | BatchAction::ExportForPrint => {
                get_voucher(db, voucher_id)
                    .await
                    .map(|voucher| exported.push(voucher))
            }
        };

        match outcome {
            Ok(()) => result.succeeded.push(voucher_id),
            Err(error) => {
                tracing::warn!(voucher_id = %voucher_id, ?action, error = %error, "Batch item failed");
                result.failed.push(BatchFailure { voucher_id, error });
            }
        }
    }

    result.export = match action {
        BatchAction::Delete => None,
        BatchAction::ExportForDownload => Some(render_csv(&exported)),
        BatchAction::ExportForPrint => Some(render_print_cards(&exported)),
    };

    let summary = format!(
        "{} succeeded, {} failed",
        result.succeeded.len(),
        result.failed.len()
    );
    tracing::info!(?action, requested_by, summary = %summary, "Batch applied");
    audit::record_best_effort(
        db,
        monitor,
        action.audit_action(),
        None,
        requested_by,
        Some(summary),
    )
    .await;

    Ok(result)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders vouchers as CSV under [`CSV_HEADER`].
#[must_use]
pub fn render_csv(vouchers: &[voucher::Model]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for voucher in vouchers {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            csv_field(&voucher.code),
            voucher.voucher_type,
            csv_field(&voucher.client_id),
            voucher.total_amount(),
            voucher.number_of_downloads,
            voucher.status.as_str(),
            voucher.redeemed
        );
    }
    out
}

/// Renders one printable card per voucher, codes grouped as `XXXX-XXXX`.
#[must_use]
pub fn render_print_cards(vouchers: &[voucher::Model]) -> String {
    let mut out = String::new();
    for voucher in vouchers {
        let _ = writeln!(out, "+------------------------------+");
        let _ = writeln!(out, "| Voucher  {:<20}|", format_grouped(&voucher.code));
        let _ = writeln!(out, "| Scope    {:<20}|", voucher.voucher_type.as_str());
        let _ = writeln!(out, "| Value    {:<20}|", voucher.total_amount().to_string());
        let _ = writeln!(out, "| Uses     {:<20}|", voucher.number_of_downloads);
        let _ = writeln!(
            out,
            "| Referral {:<20}|",
            effective_commission(voucher).round_dp(2).to_string()
        );
        let _ = writeln!(out, "+------------------------------+");
    }
    out
}
