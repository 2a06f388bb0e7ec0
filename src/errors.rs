//! Unified error type for the voucher desk.
//!
//! Validation and state-conflict errors are returned to the caller untouched.
//! Only [`Error::Transient`] is retried, by [`crate::core::resilience`].

use crate::entities::voucher::VoucherType;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Transient store failure: {message}")]
    Transient { message: String },

    #[error("Store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("Invalid scope for {voucher_type} voucher: expected {expected}, found {found}")]
    InvalidScopeBinding {
        voucher_type: VoucherType,
        expected: &'static str,
        found: String,
    },

    #[error("Unknown {kind} '{id}' in catalog")]
    UnknownCatalogEntry { kind: &'static str, id: String },

    #[error("Missing required field {field}")]
    MissingField { field: &'static str },

    #[error("Invalid {field}: {value}")]
    InvalidAmount { field: &'static str, value: String },

    #[error("Invalid page size {page_size}")]
    InvalidPagination { page_size: u64 },

    #[error("Invalid voucher code '{code}'")]
    InvalidCode { code: String },

    #[error("Could not generate a unique voucher code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    #[error("Voucher {voucher_id} not found")]
    NotFound { voucher_id: String },

    #[error("Voucher {code} was already redeemed")]
    AlreadyRedeemed { code: String },

    #[error("Voucher {code} is deactivated")]
    Deactivated { code: String },

    #[error("Rate limit exceeded for {operation}")]
    RateLimitExceeded {
        operation: String,
        retry_after: Duration,
    },

    #[error("Rate limiter unavailable for {operation}: {message}")]
    RateLimiterUnavailable { operation: String, message: String },

    #[error("Operation {operation} was cancelled")]
    Cancelled { operation: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Whether a retry could succeed: only transport and availability failures qualify.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub(crate) fn not_found(voucher_id: Uuid) -> Self {
        Self::NotFound {
            voucher_id: voucher_id.to_string(),
        }
    }
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED`; extended codes share the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Another connection holds the lock; the same statement can succeed later.
fn is_lock_contention(err: &sea_orm::RuntimeErr) -> bool {
    if let sea_orm::RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)) = err {
        if let Some(code) = db_err.code().and_then(|c| c.parse::<i32>().ok()) {
            return matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED);
        }
    }
    let message = err.to_string().to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
}

impl From<sea_orm::DbErr> for Error {
    fn from(value: sea_orm::DbErr) -> Self {
        let transient = match &value {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => true,
            sea_orm::DbErr::Query(err) | sea_orm::DbErr::Exec(err) => is_lock_contention(err),
            _ => false,
        };
        if transient {
            Self::Transient {
                message: value.to_string(),
            }
        } else {
            Self::Database {
                message: value.to_string(),
            }
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
