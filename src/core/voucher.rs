//! Voucher business logic - issuance, the redemption state machine,
//! commission settlement and listing.
//!
//! Every lifecycle transition is a single conditional `UPDATE`: the
//! precondition sits in the `WHERE` clause and `rows_affected` tells whether
//! this caller won. Only when nothing was updated is the row read again to
//! explain why, so two redeemers can never both observe `redeemed = false`.

use crate::{
    catalog::Catalog,
    core::{
        audit::{self, AuditAction, AuditMonitor},
        code::{CodeGenerator, normalize_code},
        scope::{self, ScopeBinding, ScopePayload},
    },
    entities::{Voucher, VoucherColumn, VoucherStatus, VoucherType, voucher},
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    PaginatorTrait, QueryOrder, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr,
};

/// Largest page [`list_vouchers`] will serve.
pub const MAX_PAGE_SIZE: u64 = 200;

/// Everything needed to mint one voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueVoucher {
    pub voucher_type: VoucherType,
    pub scope: ScopePayload,
    pub client_id: String,
    pub total_amount: Decimal,
    /// Percentage, e.g. `10` for ten percent
    pub commission_rate: Decimal,
    pub number_of_downloads: i32,
    pub created_by: String,
}

/// Validated issuance fields, money already in minor units.
struct IssueFields {
    client_id: String,
    created_by: String,
    total_amount_cents: i64,
    commission_rate_bps: i64,
    number_of_downloads: i32,
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingField { field });
    }
    Ok(trimmed.to_string())
}

/// Converts a two-decimal amount into hundredths.
fn to_minor_units(field: &'static str, value: Decimal) -> Result<i64> {
    let invalid = || Error::InvalidAmount {
        field,
        value: value.to_string(),
    };
    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid());
    }
    if value.normalize().scale() > 2 {
        return Err(invalid());
    }
    let hundredths = value.checked_mul(Decimal::ONE_HUNDRED).ok_or_else(invalid)?;
    i64::try_from(hundredths).map_err(|_| invalid())
}

fn validate(request: &IssueVoucher) -> Result<IssueFields> {
    let client_id = required("client_id", &request.client_id)?;
    let created_by = required("created_by", &request.created_by)?;
    let total_amount_cents = to_minor_units("total_amount", request.total_amount)?;

    if request.commission_rate > Decimal::ONE_HUNDRED {
        return Err(Error::InvalidAmount {
            field: "commission_rate",
            value: request.commission_rate.to_string(),
        });
    }
    let commission_rate_bps = to_minor_units("commission_rate", request.commission_rate)?;

    if request.number_of_downloads < 1 {
        return Err(Error::InvalidAmount {
            field: "number_of_downloads",
            value: request.number_of_downloads.to_string(),
        });
    }

    Ok(IssueFields {
        client_id,
        created_by,
        total_amount_cents,
        commission_rate_bps,
        number_of_downloads: request.number_of_downloads,
    })
}

/// Issues a new active, unredeemed voucher with a freshly drawn code.
///
/// Nothing is written unless the request is valid and its scope exists in the
/// catalog. The voucher row and its scope rows are written in one transaction;
/// a code collision rolls it back and draws again, up to `code_attempts`
/// times, before failing with [`Error::CodeGenerationExhausted`].
pub async fn issue_voucher(
    db: &DatabaseConnection,
    catalog: &dyn Catalog,
    codes: &dyn CodeGenerator,
    monitor: &AuditMonitor,
    code_attempts: u32,
    request: IssueVoucher,
) -> Result<voucher::Model> {
    let fields = validate(&request)?;
    let binding = ScopeBinding::resolve(request.voucher_type, request.scope)?;
    scope::verify_in_catalog(catalog, &binding).await?;

    let attempts = code_attempts.max(1);
    for attempt in 1..=attempts {
        let code = codes.generate();
        let now = Utc::now();
        let row = voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            voucher_type: Set(binding.voucher_type()),
            client_id: Set(fields.client_id.clone()),
            created_by: Set(fields.created_by.clone()),
            total_amount_cents: Set(fields.total_amount_cents),
            number_of_downloads: Set(fields.number_of_downloads),
            commission_rate_bps: Set(fields.commission_rate_bps),
            commission_paid: Set(false),
            payment_received: Set(false),
            redeemed: Set(false),
            redeemed_at: Set(None),
            status: Set(VoucherStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = db.begin().await?;
        let issued = match row.insert(&txn).await {
            Ok(issued) => issued,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                tracing::warn!(attempt, attempts, code = %code, "Voucher code collision, drawing again");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        scope::persist(&txn, issued.id, &binding).await?;
        txn.commit().await?;

        tracing::info!(
            voucher_id = %issued.id,
            code = %issued.code,
            voucher_type = %issued.voucher_type,
            client_id = %issued.client_id,
            "Voucher issued"
        );
        audit::record_best_effort(
            db,
            monitor,
            AuditAction::Create,
            Some(issued.id),
            &fields.created_by,
            None,
        )
        .await;
        return Ok(issued);
    }

    tracing::error!(attempts, "Voucher code generation exhausted");
    Err(Error::CodeGenerationExhausted { attempts })
}

/// Fetches a voucher by id.
pub async fn get_voucher<C>(conn: &C, voucher_id: Uuid) -> Result<voucher::Model>
where
    C: ConnectionTrait,
{
    Voucher::find_by_id(voucher_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found(voucher_id))
}

/// Looks a voucher up by its code, as typed by an operator (`abcd-1234` works).
pub async fn find_by_code<C>(conn: &C, code: &str) -> Result<voucher::Model>
where
    C: ConnectionTrait,
{
    let normalized = normalize_code(code)?;
    Voucher::find()
        .filter(VoucherColumn::Code.eq(normalized.as_str()))
        .one(conn)
        .await?
        .ok_or(Error::NotFound {
            voucher_id: normalized,
        })
}

/// Why a conditional lifecycle update matched no row.
fn explain_rejection(voucher_id: Uuid, current: Option<voucher::Model>) -> Error {
    match current {
        None => Error::not_found(voucher_id),
        Some(voucher) if voucher.redeemed => Error::AlreadyRedeemed { code: voucher.code },
        Some(voucher) if !voucher.is_active() => Error::Deactivated { code: voucher.code },
        Some(voucher) => Error::Database {
            message: format!(
                "voucher {} changed while its transition was being applied",
                voucher.code
            ),
        },
    }
}

/// Redeems an active voucher exactly once.
///
/// Concurrent callers race on one conditional update; exactly one wins and
/// the rest get [`Error::AlreadyRedeemed`].
pub async fn redeem_voucher<C>(
    conn: &C,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let now = Utc::now();
    let result = Voucher::update_many()
        .col_expr(VoucherColumn::Redeemed, Expr::value(true))
        .col_expr(VoucherColumn::RedeemedAt, Expr::value(Some(now)))
        .col_expr(VoucherColumn::UpdatedAt, Expr::value(now))
        .filter(VoucherColumn::Id.eq(voucher_id))
        .filter(VoucherColumn::Redeemed.eq(false))
        .filter(VoucherColumn::Status.eq(VoucherStatus::Active))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let current = Voucher::find_by_id(voucher_id).one(conn).await?;
        return Err(explain_rejection(voucher_id, current));
    }

    let redeemed = get_voucher(conn, voucher_id).await?;
    tracing::info!(voucher_id = %voucher_id, code = %redeemed.code, requested_by, "Voucher redeemed");
    audit::record_best_effort(
        conn,
        monitor,
        AuditAction::Redeem,
        Some(voucher_id),
        requested_by,
        None,
    )
    .await;
    Ok(redeemed)
}

/// Redeems the voucher carrying `code`.
pub async fn redeem_by_code<C>(
    conn: &C,
    monitor: &AuditMonitor,
    code: &str,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let voucher = find_by_code(conn, code).await?;
    redeem_voucher(conn, monitor, voucher.id, requested_by).await
}

/// Moves an active, unredeemed voucher to `inactive`.
///
/// A redeemed voucher reports [`Error::AlreadyRedeemed`] even if it was also
/// marked inactive: redemption takes precedence.
pub async fn deactivate_voucher<C>(
    conn: &C,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let result = Voucher::update_many()
        .col_expr(VoucherColumn::Status, Expr::value(VoucherStatus::Inactive))
        .col_expr(VoucherColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(VoucherColumn::Id.eq(voucher_id))
        .filter(VoucherColumn::Redeemed.eq(false))
        .filter(VoucherColumn::Status.eq(VoucherStatus::Active))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let current = Voucher::find_by_id(voucher_id).one(conn).await?;
        return Err(explain_rejection(voucher_id, current));
    }

    let deactivated = get_voucher(conn, voucher_id).await?;
    tracing::info!(voucher_id = %voucher_id, code = %deactivated.code, requested_by, "Voucher deactivated");
    audit::record_best_effort(
        conn,
        monitor,
        AuditAction::Deactivate,
        Some(voucher_id),
        requested_by,
        None,
    )
    .await;
    Ok(deactivated)
}

/// Flips a settlement flag from false to true; a second call is a no-op.
async fn raise_flag<C>(
    conn: &C,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    flag: VoucherColumn,
    action: AuditAction,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let result = Voucher::update_many()
        .col_expr(flag, Expr::value(true))
        .col_expr(VoucherColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(VoucherColumn::Id.eq(voucher_id))
        .filter(flag.eq(false))
        .exec(conn)
        .await?;

    let voucher = get_voucher(conn, voucher_id).await?;
    if result.rows_affected == 0 {
        tracing::debug!(voucher_id = %voucher_id, action = action.as_str(), "Flag already set");
        return Ok(voucher);
    }

    tracing::info!(voucher_id = %voucher_id, action = action.as_str(), requested_by, "Voucher flag set");
    audit::record_best_effort(conn, monitor, action, Some(voucher_id), requested_by, None).await;
    Ok(voucher)
}

/// Marks the referral commission as paid. Independent of redemption; idempotent.
pub async fn settle_commission<C>(
    conn: &C,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    raise_flag(
        conn,
        monitor,
        voucher_id,
        VoucherColumn::CommissionPaid,
        AuditAction::SettleCommission,
        requested_by,
    )
    .await
}

/// Records that the client paid for the voucher. Idempotent.
pub async fn mark_payment_received<C>(
    conn: &C,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    requested_by: &str,
) -> Result<voucher::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    raise_flag(
        conn,
        monitor,
        voucher_id,
        VoucherColumn::PaymentReceived,
        AuditAction::PaymentReceived,
        requested_by,
    )
    .await
}

/// Commission owed on a voucher: `total_amount * commission_rate / 100`.
#[must_use]
pub fn effective_commission(voucher: &voucher::Model) -> Decimal {
    voucher.total_amount() * voucher.commission_rate() / Decimal::ONE_HUNDRED
}

/// Deletes a voucher and its scope rows, auditing first.
///
/// The audit entry is written inside the delete transaction, so a failed
/// delete leaves no `delete` entry behind, while a failed audit write does
/// not stop the delete.
pub async fn delete_voucher(
    db: &DatabaseConnection,
    monitor: &AuditMonitor,
    voucher_id: Uuid,
    requested_by: &str,
) -> Result<voucher::Model> {
    let txn = db.begin().await?;
    let voucher = get_voucher(&txn, voucher_id).await?;

    audit::record_best_effort(
        &txn,
        monitor,
        AuditAction::Delete,
        Some(voucher_id),
        requested_by,
        Some(voucher.code.clone()),
    )
    .await;
    scope::remove(&txn, voucher_id).await?;
    let result = Voucher::delete_by_id(voucher_id).exec(&txn).await?;
    if result.rows_affected == 0 {
        return Err(Error::not_found(voucher_id));
    }
    txn.commit().await?;

    tracing::info!(voucher_id = %voucher_id, code = %voucher.code, requested_by, "Voucher deleted");
    Ok(voucher)
}

/// One page of vouchers plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherPage {
    pub vouchers: Vec<voucher::Model>,
    pub total_count: u64,
}

/// Lists vouchers newest first, optionally for one client.
///
/// `page` is zero-based; `page_size` must be between 1 and [`MAX_PAGE_SIZE`].
pub async fn list_vouchers<C>(
    conn: &C,
    client_id: Option<&str>,
    page: u64,
    page_size: u64,
) -> Result<VoucherPage>
where
    C: ConnectionTrait,
{
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::InvalidPagination { page_size });
    }

    let mut query = Voucher::find();
    if let Some(client_id) = client_id {
        query = query.filter(VoucherColumn::ClientId.eq(client_id));
    }
    let paginator = query
        .order_by_desc(VoucherColumn::CreatedAt)
        .order_by_asc(VoucherColumn::Code)
        .paginate(conn, page_size);

    let total_count = paginator.num_items().await?;
    let vouchers = paginator.fetch_page(page).await?;
    Ok(VoucherPage {
        vouchers,
        total_count,
    })
}

/// Reads back the scope a voucher was issued with.
pub async fn scope_of<C>(conn: &C, voucher_id: Uuid) -> Result<ScopeBinding>
where
    C: ConnectionTrait,
{
    let voucher = get_voucher(conn, voucher_id).await?;
    scope::load(conn, &voucher).await
}

/// Whether the voucher's scope includes `book_id`.
pub async fn covers_book<C>(
    conn: &C,
    catalog: &dyn Catalog,
    voucher_id: Uuid,
    book_id: &str,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    scope_of(conn, voucher_id)
        .await?
        .covers(catalog, book_id)
        .await
}
