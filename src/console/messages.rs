//! User-facing text for results and errors.
//!
//! The core returns typed values; everything an operator reads is produced here.

use crate::core::{
    batch::BatchResult,
    code::format_grouped,
    scope::ScopeBinding,
    voucher::{VoucherPage, effective_commission},
};
use crate::entities::{AuditLogModel, VoucherModel};
use crate::errors::Error;
use std::fmt::Write as _;

/// One distinct, human-readable message per error kind.
#[must_use]
pub fn describe(error: &Error) -> String {
    match error {
        Error::InvalidScopeBinding {
            voucher_type,
            expected,
            found,
        } => format!("A {voucher_type} voucher needs {expected}; got {found}."),
        Error::UnknownCatalogEntry { kind, id } => {
            format!("There is no {kind} '{id}' in the catalog.")
        }
        Error::MissingField { field } => format!("Please provide a value for {field}."),
        Error::InvalidAmount { field, value } => {
            format!("'{value}' is not a valid {field}.")
        }
        Error::InvalidPagination { page_size } => {
            format!("A page size of {page_size} is out of range.")
        }
        Error::InvalidCode { code } => {
            format!("'{code}' is not a voucher code; codes are 8 letters or digits.")
        }
        Error::CodeGenerationExhausted { attempts } => format!(
            "Could not find a free voucher code after {attempts} tries. Nothing was issued."
        ),
        Error::NotFound { voucher_id } => format!("No voucher matches {voucher_id}."),
        Error::AlreadyRedeemed { code } => {
            format!("Voucher {} has already been used.", format_grouped(code))
        }
        Error::Deactivated { code } => {
            format!("Voucher {} has been deactivated.", format_grouped(code))
        }
        Error::RateLimitExceeded { retry_after, .. } => format!(
            "Too many requests. Please try again later (in about {}s).",
            retry_after.as_secs().max(1)
        ),
        Error::RateLimiterUnavailable { .. } => {
            "Request quotas cannot be checked right now, so the request was refused. Please try again shortly.".to_string()
        }
        Error::Transient { message } => format!("The voucher store hiccuped: {message}"),
        Error::Unavailable { attempts, .. } => format!(
            "The voucher store is unavailable (gave up after {attempts} attempts). Please try again later."
        ),
        Error::Cancelled { operation } => format!("The {operation} request was cancelled."),
        Error::Database { message } => format!("The voucher store rejected the request: {message}"),
        Error::Config { message } => format!("Configuration problem: {message}"),
        Error::Io(err) => format!("File error: {err}"),
        Error::EnvVar(err) => format!("Environment problem: {err}"),
    }
}

fn scope_line(scope: &ScopeBinding) -> String {
    match scope {
        ScopeBinding::SingleBook(book_id) => format!("book {book_id}"),
        ScopeBinding::MultipleBooks(book_ids) => format!("books {}", book_ids.join(", ")),
        ScopeBinding::Series(series_id) => format!("series {series_id}"),
        ScopeBinding::Tag(tag_id) => format!("books tagged {tag_id}"),
        ScopeBinding::AllBooks => "the whole catalog".to_string(),
    }
}

fn state_label(voucher: &VoucherModel) -> &'static str {
    if voucher.redeemed {
        "redeemed"
    } else {
        voucher.status.as_str()
    }
}

/// Multi-line detail view of one voucher.
#[must_use]
pub fn render_voucher(voucher: &VoucherModel, scope: Option<&ScopeBinding>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Voucher {} ({})", format_grouped(&voucher.code), voucher.id);
    let _ = writeln!(out, "  type:        {}", voucher.voucher_type);
    if let Some(scope) = scope {
        let _ = writeln!(out, "  scope:       {}", scope_line(scope));
    }
    let _ = writeln!(out, "  client:      {}", voucher.client_id);
    let _ = writeln!(out, "  state:       {}", state_label(voucher));
    if let Some(redeemed_at) = voucher.redeemed_at {
        let _ = writeln!(out, "  redeemed at: {}", redeemed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out, "  amount:      {}", voucher.total_amount());
    let _ = writeln!(out, "  downloads:   {}", voucher.number_of_downloads);
    let _ = writeln!(
        out,
        "  commission:  {}% = {} ({})",
        voucher.commission_rate(),
        effective_commission(voucher).round_dp(2),
        if voucher.commission_paid { "paid" } else { "unpaid" }
    );
    let _ = writeln!(
        out,
        "  payment:     {}",
        if voucher.payment_received { "received" } else { "pending" }
    );
    let _ = write!(out, "  issued by:   {}", voucher.created_by);
    out
}

#[must_use]
pub fn render_page(page: &VoucherPage, page_number: u64) -> String {
    if page.vouchers.is_empty() {
        return format!("No vouchers on page {page_number} ({} in total).", page.total_count);
    }
    let mut out = format!(
        "Page {page_number}: {} of {} voucher(s)\n",
        page.vouchers.len(),
        page.total_count
    );
    for voucher in &page.vouchers {
        let _ = writeln!(
            out,
            "{}  {:<15} {:<10} {:>10}  {}",
            format_grouped(&voucher.code),
            voucher.voucher_type.as_str(),
            state_label(voucher),
            voucher.total_amount().to_string(),
            voucher.client_id
        );
    }
    out.truncate(out.trim_end().len());
    out
}

#[must_use]
pub fn render_audit(entries: &[AuditLogModel]) -> String {
    if entries.is_empty() {
        return "No audit entries.".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let target = entry
                .voucher_id
                .map_or_else(|| "batch".to_string(), |id| id.to_string());
            let detail = entry
                .detail
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            format!(
                "{}  {:<22} {}  by {}{detail}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.action_type,
                target,
                entry.performed_by
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summary of a batch; export artifacts are handled by the caller.
#[must_use]
pub fn render_batch(result: &BatchResult) -> String {
    let mut out = format!(
        "{} succeeded, {} failed",
        result.succeeded.len(),
        result.failed.len()
    );
    for failure in &result.failed {
        let _ = write!(out, "\n  {}: {}", failure.voucher_id, describe(&failure.error));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::VoucherType;
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn test_user_facing_messages_for_key_errors() {
        let limited = describe(&Error::RateLimitExceeded {
            operation: "list_vouchers".into(),
            retry_after: Duration::from_secs(12),
        });
        assert!(limited.contains("try again later"));

        let used = describe(&Error::AlreadyRedeemed {
            code: "ABCD1234".into(),
        });
        assert_eq!(used, "Voucher ABCD-1234 has already been used.");
    }

    #[test]
    fn test_every_error_kind_reads_differently() {
        let errors = [
            Error::InvalidScopeBinding {
                voucher_type: VoucherType::Series,
                expected: "exactly one series id",
                found: "no identifiers".into(),
            },
            Error::UnknownCatalogEntry {
                kind: "book",
                id: "b9".into(),
            },
            Error::MissingField { field: "client_id" },
            Error::InvalidAmount {
                field: "total_amount",
                value: "-1".into(),
            },
            Error::InvalidPagination { page_size: 0 },
            Error::InvalidCode { code: "x".into() },
            Error::CodeGenerationExhausted { attempts: 5 },
            Error::NotFound {
                voucher_id: "v1".into(),
            },
            Error::AlreadyRedeemed { code: "ABCD1234".into() },
            Error::Deactivated { code: "ABCD1234".into() },
            Error::RateLimitExceeded {
                operation: "list_vouchers".into(),
                retry_after: Duration::from_secs(1),
            },
            Error::RateLimiterUnavailable {
                operation: "list_vouchers".into(),
                message: "down".into(),
            },
            Error::Transient {
                message: "reset".into(),
            },
            Error::Unavailable {
                attempts: 4,
                message: "reset".into(),
            },
            Error::Cancelled {
                operation: "list_vouchers".into(),
            },
            Error::Database {
                message: "constraint".into(),
            },
            Error::Config {
                message: "bad".into(),
            },
        ];

        let messages: HashSet<String> = errors.iter().map(describe).collect();
        assert_eq!(messages.len(), errors.len());
    }
}
