//! Console adapter - turns one parsed command into desk calls and text.
//!
//! Errors come back typed; `main` renders them with [`messages::describe`].

pub mod cli;
pub mod messages;

use crate::{
    core::voucher::IssueVoucher,
    desk::VoucherDesk,
    entities::VoucherModel,
    errors::Result,
};
use cli::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn resolve_voucher(
    desk: &VoucherDesk,
    operator: &str,
    reference: &str,
    cancel: &CancellationToken,
) -> Result<VoucherModel> {
    match Uuid::parse_str(reference.trim()) {
        Ok(voucher_id) => desk.get_voucher(operator, voucher_id, cancel).await,
        Err(_) => desk.find_by_code(operator, reference, cancel).await,
    }
}

/// Runs `command` as `operator` and returns what should be printed.
pub async fn execute(
    desk: &VoucherDesk,
    operator: &str,
    command: Command,
    cancel: &CancellationToken,
) -> Result<String> {
    match command {
        Command::Issue(args) => {
            let request = IssueVoucher {
                voucher_type: args.voucher_type.into(),
                scope: args.scope(),
                client_id: args.client,
                total_amount: args.amount,
                commission_rate: args.commission,
                number_of_downloads: args.downloads,
                created_by: operator.to_string(),
            };
            let voucher = desk.issue_voucher(request).await?;
            let scope = desk.scope_of(operator, voucher.id, cancel).await?;
            Ok(format!(
                "Issued.\n{}",
                messages::render_voucher(&voucher, Some(&scope))
            ))
        }
        Command::Redeem { voucher } => {
            let redeemed = match Uuid::parse_str(voucher.trim()) {
                Ok(voucher_id) => desk.redeem_voucher(voucher_id, operator).await?,
                Err(_) => desk.redeem_by_code(&voucher, operator).await?,
            };
            Ok(format!(
                "Redeemed.\n{}",
                messages::render_voucher(&redeemed, None)
            ))
        }
        Command::Deactivate { voucher_id } => {
            let voucher = desk.deactivate_voucher(voucher_id, operator).await?;
            Ok(format!(
                "Deactivated.\n{}",
                messages::render_voucher(&voucher, None)
            ))
        }
        Command::Settle { voucher_id } => {
            let voucher = desk.settle_commission(voucher_id, operator).await?;
            Ok(messages::render_voucher(&voucher, None))
        }
        Command::Payment { voucher_id } => {
            let voucher = desk.mark_payment_received(voucher_id, operator).await?;
            Ok(messages::render_voucher(&voucher, None))
        }
        Command::Delete { voucher_id } => {
            let voucher = desk.delete_voucher(voucher_id, operator).await?;
            Ok(format!("Deleted voucher {}.", voucher.code))
        }
        Command::Show { voucher } => {
            let voucher = resolve_voucher(desk, operator, &voucher, cancel).await?;
            let scope = desk.scope_of(operator, voucher.id, cancel).await?;
            Ok(messages::render_voucher(&voucher, Some(&scope)))
        }
        Command::List {
            client,
            page,
            page_size,
        } => {
            let listing = desk
                .list_vouchers(operator, client.as_deref(), page, page_size, cancel)
                .await?;
            Ok(messages::render_page(&listing, page))
        }
        Command::Batch {
            action,
            voucher_ids,
            output,
        } => {
            let result = desk.apply_batch(action.into(), &voucher_ids, operator).await?;
            let mut text = messages::render_batch(&result);
            match (result.export, output) {
                (Some(export), Some(path)) => {
                    tokio::fs::write(&path, export).await?;
                    text.push_str(&format!("\nExport written to {}", path.display()));
                }
                (Some(export), None) => {
                    text.push('\n');
                    text.push_str(&export);
                }
                (None, _) => {}
            }
            Ok(text)
        }
        Command::Audit { voucher, limit } => {
            let entries = desk.list_audit_log(operator, voucher, limit, cancel).await?;
            Ok(messages::render_audit(&entries))
        }
        Command::Covers {
            voucher_id,
            book_id,
        } => {
            let covered = desk
                .covers_book(operator, voucher_id, &book_id, cancel)
                .await?;
            Ok(if covered {
                format!("Voucher {voucher_id} covers book {book_id}.")
            } else {
                format!("Voucher {voucher_id} does not cover book {book_id}.")
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::errors::Error;
    use crate::test_utils::*;
    use clap::Parser;
    use cli::Cli;
    use std::sync::Arc;

    async fn run(desk: &VoucherDesk, args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("voucher-desk").chain(args.iter().copied()))
            .unwrap();
        execute(desk, "operator-1", cli.command, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_issue_show_and_redeem_by_code() -> Result<()> {
        let desk = setup_test_desk()
            .await?
            .with_code_generator(Arc::new(ScriptedCodes::new(["WXYZ2345"])));

        let issued = run(
            &desk,
            &["issue", "--type", "series", "--series", "earthsea", "--client", "c9", "--amount", "15.50"],
        )
        .await?;
        assert!(issued.contains("WXYZ-2345"));
        assert!(issued.contains("series earthsea"));

        let shown = run(&desk, &["show", "wxyz-2345"]).await?;
        assert!(shown.contains("state:       active"));

        let redeemed = run(&desk, &["redeem", "WXYZ-2345"]).await?;
        assert!(redeemed.contains("state:       redeemed"));

        let again = run(&desk, &["redeem", "WXYZ2345"]).await;
        let err = again.unwrap_err();
        assert!(matches!(err, Error::AlreadyRedeemed { .. }));
        assert_eq!(
            messages::describe(&err),
            "Voucher WXYZ-2345 has already been used."
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_download_prints_csv_and_audit_shows_it() -> Result<()> {
        let desk = setup_test_desk().await?;
        let issued = run(
            &desk,
            &["issue", "--type", "all-books", "--client", "c1", "--amount", "5"],
        )
        .await?;
        assert!(issued.contains("the whole catalog"));

        let listing = desk
            .list_vouchers("operator-1", None, 0, 10, &CancellationToken::new())
            .await?;
        let id = listing.vouchers[0].id.to_string();

        let output = run(&desk, &["batch", "download", &id]).await?;
        assert!(output.starts_with("1 succeeded, 0 failed"));
        assert!(output.contains(crate::core::batch::CSV_HEADER));

        let audit = run(&desk, &["audit", "--limit", "5"]).await?;
        assert!(audit.contains("batch_export_download"));
        assert!(audit.contains("create"));
        Ok(())
    }

    #[tokio::test]
    async fn test_covers_reports_scope_membership() -> Result<()> {
        let desk = setup_test_desk().await?;
        let voucher = desk
            .issue_voucher(issue_request(
                crate::entities::VoucherType::SingleBook,
                crate::core::scope::ScopePayload::books(["b1"]),
            ))
            .await?;
        let id = voucher.id.to_string();

        let yes = run(&desk, &["covers", &id, "b1"]).await?;
        let no = run(&desk, &["covers", &id, "b2"]).await?;
        assert!(yes.ends_with("covers book b1."));
        assert!(no.contains("does not cover"));
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_print_writes_cards_to_output_file() -> Result<()> {
        let desk = setup_test_desk()
            .await?
            .with_code_generator(Arc::new(ScriptedCodes::new(["CARD0001"])));
        let voucher = desk
            .issue_voucher(issue_request(
                crate::entities::VoucherType::AllBooks,
                crate::core::scope::ScopePayload::empty(),
            ))
            .await?;
        let path = std::env::temp_dir().join(format!("voucher-cards-{}.txt", Uuid::new_v4()));
        let id = voucher.id.to_string();
        let target = path.display().to_string();

        let output = run(&desk, &["batch", "print", &id, "--output", &target]).await?;
        assert!(output.contains("Export written to"));

        let cards = tokio::fs::read_to_string(&path).await?;
        tokio::fs::remove_file(&path).await?;
        assert!(cards.contains("CARD-0001"));
        Ok(())
    }
}
