//! Audit log entity - append-only record of lifecycle-affecting actions.
//!
//! `voucher_id` has no foreign key: entries outlive the
//! vouchers they describe, and batch-level entries have no voucher at all.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Voucher the action applied to, `None` for batch-level entries
    pub voucher_id: Option<Uuid>,
    /// Free-form action tag (`create`, `redeem`, `deactivate`, `batch_delete`, ...)
    pub action_type: String,
    /// Operator identity that performed the action
    pub performed_by: String,
    /// Optional short context, e.g. the batch size
    pub detail: Option<String>,
    pub created_at: DateTimeUtc,
}

/// Audit entries have no relationships: they must survive voucher deletion
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
