//! Core business logic, independent of the console adapter.
//!
//! Functions take a SeaORM connection (or transaction) and return typed
//! results; presentation lives in [`crate::console`].

pub mod audit;
pub mod batch;
pub mod code;
pub mod resilience;
pub mod scope;
pub mod voucher;
