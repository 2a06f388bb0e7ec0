//! Entity module - Contains all SeaORM entity definitions for the database.
//! A voucher row plus exactly one kind of scope association (or none, for
//! catalog-wide vouchers), and the append-only audit log.

pub mod audit_log;
pub mod voucher;
pub mod voucher_book;
pub mod voucher_series;
pub mod voucher_tag;

// Re-export specific types to avoid conflicts
pub use audit_log::{Column as AuditLogColumn, Entity as AuditLog, Model as AuditLogModel};
pub use voucher::{
    Column as VoucherColumn, Entity as Voucher, Model as VoucherModel, VoucherStatus, VoucherType,
};
pub use voucher_book::{Column as VoucherBookColumn, Entity as VoucherBook};
pub use voucher_series::{Column as VoucherSeriesColumn, Entity as VoucherSeries};
pub use voucher_tag::{Column as VoucherTagColumn, Entity as VoucherTag};
