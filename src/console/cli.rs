//! Clap derive structures for the `voucher-desk` console.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::{batch::BatchAction, scope::ScopePayload};
use crate::entities::VoucherType;

/// voucher-desk -- issue, redeem and audit bookstore vouchers
#[derive(Debug, Parser)]
#[command(
    name = "voucher-desk",
    version,
    about = "Administer scoped, single-use bookstore vouchers",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Operator identity stamped on every write (falls back to VOUCHER_OPERATOR)
    #[arg(long, global = true)]
    pub operator: Option<String>,

    /// Settings file
    #[arg(long, env = "VOUCHER_DESK_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VoucherTypeArg {
    SingleBook,
    MultipleBooks,
    Series,
    BookTag,
    AllBooks,
}

impl From<VoucherTypeArg> for VoucherType {
    fn from(value: VoucherTypeArg) -> Self {
        match value {
            VoucherTypeArg::SingleBook => Self::SingleBook,
            VoucherTypeArg::MultipleBooks => Self::MultipleBooks,
            VoucherTypeArg::Series => Self::Series,
            VoucherTypeArg::BookTag => Self::BookTag,
            VoucherTypeArg::AllBooks => Self::AllBooks,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BatchActionArg {
    /// Delete every listed voucher
    Delete,
    /// CSV export
    Download,
    /// Printable cards
    Print,
}

impl From<BatchActionArg> for BatchAction {
    fn from(value: BatchActionArg) -> Self {
        match value {
            BatchActionArg::Delete => Self::Delete,
            BatchActionArg::Download => Self::ExportForDownload,
            BatchActionArg::Print => Self::ExportForPrint,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Issue a new voucher
    Issue(IssueArgs),

    /// Redeem a voucher by id or code
    Redeem {
        /// Voucher id or code (e.g. ABCD-1234)
        voucher: String,
    },

    /// Deactivate an unredeemed voucher
    Deactivate { voucher_id: Uuid },

    /// Mark the referral commission as paid
    Settle { voucher_id: Uuid },

    /// Mark the client payment as received
    Payment { voucher_id: Uuid },

    /// Delete one voucher (audited)
    Delete { voucher_id: Uuid },

    /// Show one voucher with its scope and commission
    Show {
        /// Voucher id or code
        voucher: String,
    },

    /// List vouchers, newest first
    #[command(alias = "ls")]
    List {
        /// Only vouchers issued to this client
        #[arg(long)]
        client: Option<String>,

        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: u64,

        #[arg(long, default_value_t = 20)]
        page_size: u64,
    },

    /// Apply one action to many vouchers
    Batch {
        #[arg(value_enum)]
        action: BatchActionArg,

        #[arg(required = true)]
        voucher_ids: Vec<Uuid>,

        /// Write the export here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show audit log entries, newest first
    Audit {
        #[arg(long)]
        voucher: Option<Uuid>,

        #[arg(long)]
        limit: Option<u64>,
    },

    /// Check whether a voucher covers a book
    Covers { voucher_id: Uuid, book_id: String },
}

#[derive(Debug, Args)]
pub struct IssueArgs {
    #[arg(long = "type", value_enum)]
    pub voucher_type: VoucherTypeArg,

    /// Book id; repeat for multiple_books
    #[arg(long = "book")]
    pub books: Vec<String>,

    #[arg(long)]
    pub series: Option<String>,

    #[arg(long)]
    pub tag: Option<String>,

    /// Beneficiary client id
    #[arg(long)]
    pub client: String,

    /// Monetary value, at most two decimals
    #[arg(long)]
    pub amount: Decimal,

    /// Commission percentage
    #[arg(long, default_value = "0")]
    pub commission: Decimal,

    #[arg(long, default_value_t = 1)]
    pub downloads: i32,
}

impl IssueArgs {
    #[must_use]
    pub fn scope(&self) -> ScopePayload {
        ScopePayload {
            book_ids: self.books.clone(),
            series_id: self.series.clone(),
            tag_id: self.tag.clone(),
        }
    }
}
