//! Voucher entity - a single-use entitlement code scoped to part of the catalog.
//!
//! Money is stored in minor units: `total_amount_cents` holds hundredths of the
//! currency unit and `commission_rate_bps` holds hundredths of a percent. The
//! decimal views live on [`Model`].

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which scope association a voucher carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum VoucherType {
    /// Exactly one book
    #[sea_orm(string_value = "single_book")]
    SingleBook,
    /// A set of one or more distinct books
    #[sea_orm(string_value = "multiple_books")]
    MultipleBooks,
    /// Every book of one series
    #[sea_orm(string_value = "series")]
    Series,
    /// Every book carrying one tag
    #[sea_orm(string_value = "book_tag")]
    BookTag,
    /// The whole catalog
    #[sea_orm(string_value = "all_books")]
    AllBooks,
}

impl VoucherType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleBook => "single_book",
            Self::MultipleBooks => "multiple_books",
            Self::Series => "series",
            Self::BookTag => "book_tag",
            Self::AllBooks => "all_books",
        }
    }
}

impl fmt::Display for VoucherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative status, independent of redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
}

impl VoucherStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// Voucher database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vouchers")]
pub struct Model {
    /// Opaque identifier, generated at issuance
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Eight uppercase alphanumeric characters, unique across all vouchers
    #[sea_orm(unique)]
    pub code: String,
    /// Scope kind; fixes which association table is populated
    pub voucher_type: VoucherType,
    /// Beneficiary the voucher was issued to
    pub client_id: String,
    /// Operator who issued the voucher
    pub created_by: String,
    /// Monetary value in hundredths of the currency unit
    pub total_amount_cents: i64,
    /// Entitlement count, at least one
    pub number_of_downloads: i32,
    /// Referral commission in hundredths of a percent
    pub commission_rate_bps: i64,
    pub commission_paid: bool,
    pub payment_received: bool,
    pub redeemed: bool,
    pub redeemed_at: Option<DateTimeUtc>,
    pub status: VoucherStatus,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Monetary value of the voucher.
    #[must_use]
    pub fn total_amount(&self) -> Decimal {
        Decimal::new(self.total_amount_cents, 2)
    }

    /// Commission rate as a percentage (`10` means ten percent).
    #[must_use]
    pub fn commission_rate(&self) -> Decimal {
        Decimal::new(self.commission_rate_bps, 2)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == VoucherStatus::Active
    }
}

/// Defines relationships between Voucher and its scope associations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One voucher has many book rows (single or multiple book scope)
    #[sea_orm(has_many = "super::voucher_book::Entity")]
    Books,
    /// One voucher has at most one series row
    #[sea_orm(has_one = "super::voucher_series::Entity")]
    Series,
    /// One voucher has at most one tag row
    #[sea_orm(has_one = "super::voucher_tag::Entity")]
    Tag,
}

impl Related<super::voucher_book::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Books.def()
    }
}

impl Related<super::voucher_series::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Series.def()
    }
}

impl Related<super::voucher_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
