//! The voucher desk - the operation surface the admin console talks to.
//!
//! Writes go straight to the core lifecycle functions and invalidate the read
//! cache on success. Reads go through [`ResilientReader`]: cached, rate limited
//! per operator and operation, retried on transient failures, cancellable.

use crate::{
    catalog::Catalog,
    config::settings::Settings,
    core::{
        audit::{self, AuditMonitor},
        batch::{self, BatchAction, BatchResult},
        code::{CodeGenerator, RandomCodeGenerator},
        resilience::{
            CacheKey, RateLimiter, ReadRequest, ResilientReader, RetryPolicy, WindowRateLimiter,
        },
        scope::ScopeBinding,
        voucher::{self, IssueVoucher, VoucherPage},
    },
    entities::{AuditLogModel, VoucherModel},
    errors::Result,
};
use sea_orm::{DatabaseConnection, prelude::Uuid};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handle for every voucher operation; wrap in an `Arc` to share across tasks.
pub struct VoucherDesk {
    db: DatabaseConnection,
    catalog: Arc<dyn Catalog>,
    codes: Arc<dyn CodeGenerator>,
    reader: ResilientReader,
    audit: AuditMonitor,
    code_attempts: u32,
}

impl std::fmt::Debug for VoucherDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoucherDesk")
            .field("reader", &self.reader)
            .field("audit", &self.audit)
            .field("code_attempts", &self.code_attempts)
            .finish_non_exhaustive()
    }
}

impl VoucherDesk {
    /// Builds a desk with the random code generator and an in-process
    /// sliding-window limiter sized from `settings`.
    #[must_use]
    pub fn new(db: DatabaseConnection, catalog: Arc<dyn Catalog>, settings: &Settings) -> Self {
        let limiter = Arc::new(WindowRateLimiter::new(settings.quotas()));
        Self {
            db,
            catalog,
            codes: Arc::new(RandomCodeGenerator),
            reader: ResilientReader::new(limiter, settings.cache_ttl(), settings.retry_policy()),
            audit: AuditMonitor::new(),
            code_attempts: settings.issuance.code_attempts,
        }
    }

    #[must_use]
    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.reader = self.reader.with_limiter(limiter);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.reader = self.reader.with_policy(policy);
        self
    }

    #[must_use]
    pub const fn database(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Audit writes lost since the desk was built.
    #[must_use]
    pub fn audit_failures(&self) -> u64 {
        self.audit.failures()
    }

    fn after_write<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.reader.invalidate();
        }
        result
    }

    // Writes

    pub async fn issue_voucher(&self, request: IssueVoucher) -> Result<VoucherModel> {
        let result = voucher::issue_voucher(
            &self.db,
            self.catalog.as_ref(),
            self.codes.as_ref(),
            &self.audit,
            self.code_attempts,
            request,
        )
        .await;
        self.after_write(result)
    }

    pub async fn redeem_voucher(&self, voucher_id: Uuid, requested_by: &str) -> Result<VoucherModel> {
        let result = voucher::redeem_voucher(&self.db, &self.audit, voucher_id, requested_by).await;
        self.after_write(result)
    }

    pub async fn redeem_by_code(&self, code: &str, requested_by: &str) -> Result<VoucherModel> {
        let result = voucher::redeem_by_code(&self.db, &self.audit, code, requested_by).await;
        self.after_write(result)
    }

    pub async fn deactivate_voucher(
        &self,
        voucher_id: Uuid,
        requested_by: &str,
    ) -> Result<VoucherModel> {
        let result =
            voucher::deactivate_voucher(&self.db, &self.audit, voucher_id, requested_by).await;
        self.after_write(result)
    }

    pub async fn settle_commission(
        &self,
        voucher_id: Uuid,
        requested_by: &str,
    ) -> Result<VoucherModel> {
        let result =
            voucher::settle_commission(&self.db, &self.audit, voucher_id, requested_by).await;
        self.after_write(result)
    }

    pub async fn mark_payment_received(
        &self,
        voucher_id: Uuid,
        requested_by: &str,
    ) -> Result<VoucherModel> {
        let result =
            voucher::mark_payment_received(&self.db, &self.audit, voucher_id, requested_by).await;
        self.after_write(result)
    }

    pub async fn delete_voucher(&self, voucher_id: Uuid, requested_by: &str) -> Result<VoucherModel> {
        let result = voucher::delete_voucher(&self.db, &self.audit, voucher_id, requested_by).await;
        self.after_write(result)
    }

    /// Applies a batch action. A delete batch drops cached reads even when
    /// only some of its items succeeded.
    pub async fn apply_batch(
        &self,
        action: BatchAction,
        voucher_ids: &[Uuid],
        requested_by: &str,
    ) -> Result<BatchResult> {
        let result =
            batch::apply_batch(&self.db, &self.audit, action, voucher_ids, requested_by).await;
        if action == BatchAction::Delete && !voucher_ids.is_empty() {
            self.reader.invalidate();
        }
        result
    }

    // Reads

    pub async fn list_vouchers(
        &self,
        requested_by: &str,
        client_id: Option<&str>,
        page: u64,
        page_size: u64,
        cancel: &CancellationToken,
    ) -> Result<VoucherPage> {
        let key = CacheKey::new("list_vouchers")
            .param("client_id", client_id.unwrap_or("*"))
            .param("page", page)
            .param("page_size", page_size);
        let db = &self.db;
        self.reader
            .read(
                ReadRequest {
                    identity: requested_by,
                    operation: "list_vouchers",
                    key: &key,
                    cancel,
                },
                move || async move { voucher::list_vouchers(db, client_id, page, page_size).await },
            )
            .await
    }

    pub async fn get_voucher(
        &self,
        requested_by: &str,
        voucher_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<VoucherModel> {
        let key = CacheKey::new("get_voucher").param("id", voucher_id);
        let db = &self.db;
        self.reader
            .read(
                ReadRequest {
                    identity: requested_by,
                    operation: "get_voucher",
                    key: &key,
                    cancel,
                },
                move || async move { voucher::get_voucher(db, voucher_id).await },
            )
            .await
    }

    pub async fn find_by_code(
        &self,
        requested_by: &str,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<VoucherModel> {
        let key = CacheKey::new("find_by_code").param("code", code.trim().to_ascii_uppercase());
        let db = &self.db;
        self.reader
            .read(
                ReadRequest {
                    identity: requested_by,
                    operation: "find_by_code",
                    key: &key,
                    cancel,
                },
                move || async move { voucher::find_by_code(db, code).await },
            )
            .await
    }

    pub async fn list_audit_log(
        &self,
        requested_by: &str,
        voucher_id: Option<Uuid>,
        limit: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AuditLogModel>> {
        let key = CacheKey::new("list_audit_log")
            .param("voucher_id", voucher_id.map_or_else(|| "*".to_string(), |id| id.to_string()))
            .param("limit", limit.unwrap_or(audit::DEFAULT_LIST_LIMIT));
        let db = &self.db;
        self.reader
            .read(
                ReadRequest {
                    identity: requested_by,
                    operation: "list_audit_log",
                    key: &key,
                    cancel,
                },
                move || async move { audit::list_entries(db, voucher_id, limit).await },
            )
            .await
    }

    pub async fn scope_of(
        &self,
        requested_by: &str,
        voucher_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ScopeBinding> {
        let key = CacheKey::new("scope_of").param("id", voucher_id);
        let db = &self.db;
        self.reader
            .read(
                ReadRequest {
                    identity: requested_by,
                    operation: "scope_of",
                    key: &key,
                    cancel,
                },
                move || async move { voucher::scope_of(db, voucher_id).await },
            )
            .await
    }

    /// Whether the voucher's scope includes `book_id`, per the catalog.
    pub async fn covers_book(
        &self,
        requested_by: &str,
        voucher_id: Uuid,
        book_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.scope_of(requested_by, voucher_id, cancel)
            .await?
            .covers(self.catalog.as_ref(), book_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::resilience::{Quota, QuotaTable};
    use crate::core::scope::ScopePayload;
    use crate::entities::VoucherType;
    use crate::errors::Error;
    use crate::test_utils::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_succeed_exactly_once() -> Result<()> {
        // Eight pooled connections: the redeemers race inside SQLite itself.
        let mut store = setup_file_test_db(8).await?;
        let desk = Arc::new(VoucherDesk::new(
            std::mem::take(&mut store.db),
            Arc::new(test_catalog()),
            &Settings::default(),
        ));
        let issued = desk
            .issue_voucher(issue_request(VoucherType::SingleBook, ScopePayload::books(["b1"])))
            .await?;

        let voucher_id = issued.id;

        let mut tasks = JoinSet::new();
        for n in 0..16 {
            let desk = Arc::clone(&desk);
            tasks.spawn(async move {
                desk.redeem_voucher(voucher_id, &format!("operator-{n}")).await
            });
        }

        let (mut wins, mut already_redeemed) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(voucher) => {
                    assert!(voucher.redeemed);
                    wins += 1;
                }
                Err(Error::AlreadyRedeemed { .. }) => already_redeemed += 1,
                Err(other) => panic!("unexpected redemption error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(already_redeemed, 15);

        let cancel = CancellationToken::new();
        let redeems = desk
            .list_audit_log("operator-1", Some(issued.id), None, &cancel)
            .await?
            .into_iter()
            .filter(|e| e.action_type == "redeem")
            .count();
        assert_eq!(redeems, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issuance_yields_distinct_codes() -> Result<()> {
        let desk = Arc::new(setup_test_desk().await?);

        let mut tasks = JoinSet::new();
        for _ in 0..20 {
            let desk = Arc::clone(&desk);
            tasks.spawn(async move {
                desk.issue_voucher(issue_request(VoucherType::AllBooks, ScopePayload::empty()))
                    .await
            });
        }

        let mut codes = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            codes.insert(joined.unwrap()?.code);
        }
        assert_eq!(codes.len(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_invalidate_cached_reads() -> Result<()> {
        let desk = setup_test_desk().await?;
        let cancel = CancellationToken::new();
        let issued = desk
            .issue_voucher(issue_request(VoucherType::AllBooks, ScopePayload::empty()))
            .await?;

        let before = desk.get_voucher("operator-1", issued.id, &cancel).await?;
        assert!(!before.redeemed);

        desk.redeem_voucher(issued.id, "operator-1").await?;

        let after = desk.get_voucher("operator-1", issued.id, &cancel).await?;
        assert!(after.redeemed);

        let page = desk
            .list_vouchers("operator-1", Some("client-1"), 0, 20, &cancel)
            .await?;
        assert_eq!(page.total_count, 1);
        assert!(page.vouchers[0].redeemed);
        Ok(())
    }

    #[tokio::test]
    async fn test_reads_are_rate_limited_per_operator() -> Result<()> {
        let quotas = QuotaTable::new(Quota::new(2, Duration::from_secs(60)));
        let desk = setup_test_desk()
            .await?
            .with_rate_limiter(Arc::new(WindowRateLimiter::new(quotas)));
        let cancel = CancellationToken::new();

        desk.list_vouchers("alice", None, 0, 10, &cancel).await?;
        desk.list_vouchers("alice", None, 1, 10, &cancel).await?;
        // Same parameters as the first read: served from cache.
        desk.list_vouchers("alice", None, 0, 10, &cancel).await?;

        let limited = desk.list_vouchers("alice", None, 2, 10, &cancel).await;
        assert!(matches!(limited, Err(Error::RateLimitExceeded { .. })));

        desk.list_vouchers("bob", None, 2, 10, &cancel).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_read_is_refused() -> Result<()> {
        let desk = setup_test_desk().await?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = desk.list_vouchers("alice", None, 0, 10, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_covers_book_and_lookup_by_code() -> Result<()> {
        let desk = setup_test_desk()
            .await?
            .with_code_generator(Arc::new(ScriptedCodes::new(["TAGS0001"])));
        let cancel = CancellationToken::new();
        let issued = desk
            .issue_voucher(issue_request(VoucherType::BookTag, ScopePayload::tag("fantasy")))
            .await?;

        let found = desk.find_by_code("operator-1", "tags-0001", &cancel).await?;
        assert_eq!(found.id, issued.id);

        assert_eq!(
            desk.scope_of("operator-1", issued.id, &cancel).await?,
            ScopeBinding::Tag("fantasy".into())
        );
        assert!(desk.covers_book("operator-1", issued.id, "b3", &cancel).await?);
        assert!(!desk.covers_book("operator-1", issued.id, "b1", &cancel).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_delete_drops_cached_listing() -> Result<()> {
        let desk = setup_test_desk().await?;
        let cancel = CancellationToken::new();
        let issued = desk
            .issue_voucher(issue_request(VoucherType::AllBooks, ScopePayload::empty()))
            .await?;
        assert_eq!(desk.list_vouchers("alice", None, 0, 10, &cancel).await?.total_count, 1);

        let result = desk
            .apply_batch(BatchAction::Delete, &[issued.id], "operator-1")
            .await?;
        assert_eq!(result.succeeded, vec![issued.id]);

        assert_eq!(desk.list_vouchers("alice", None, 0, 10, &cancel).await?.total_count, 0);
        assert_eq!(desk.audit_failures(), 0);
        Ok(())
    }
}
