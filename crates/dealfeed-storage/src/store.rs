use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealfeed_core::{ClickEvent, Deal, DealFilters, PageRequest, ProcessedEmailRecord};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Outcome of a ledger write. `AlreadyPresent` means the uniqueness constraint
/// on the message id rejected a second record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    Inserted,
    AlreadyPresent,
}

/// Persistence collaborator for deals, the processed-email ledger and click events.
#[async_trait]
pub trait DealStore: Send + Sync {
    async fn is_processed(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Claims the message id. Only the run that gets `Inserted` may persist its deals.
    async fn record_processed(&self, record: &ProcessedEmailRecord) -> Result<LedgerWrite, StoreError>;

    /// Sets the final deal count on a claimed ledger row; `NotFound` if unclaimed.
    async fn set_deals_extracted(&self, message_id: &str, deals_extracted: u32) -> Result<(), StoreError>;

    /// Insert a brand-new deal; an existing id is a `Conflict`.
    async fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError>;

    /// Keyed upsert by id. Counters and `created_at` of an existing row survive.
    async fn upsert_deal(&self, deal: &Deal) -> Result<Deal, StoreError>;

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, StoreError>;

    /// Live deals (active, unexpired at `now`) matching `filters`, newest first.
    async fn query_deals(
        &self,
        filters: &DealFilters,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Deal>, StoreError>;

    async fn deals_for_message(&self, message_id: &str) -> Result<Vec<Deal>, StoreError>;

    /// Atomically bumps `view_count`; `None` when the deal does not exist.
    async fn increment_view(&self, id: Uuid) -> Result<Option<Deal>, StoreError>;

    /// Atomically bumps `click_count` and stores the event; `false` when the deal does not exist.
    async fn record_click(&self, event: &ClickEvent) -> Result<bool, StoreError>;

    /// Soft-deactivates every active deal that expired before `retention_cutoff`,
    /// or that has expired by `now` and was created before `retention_cutoff`.
    async fn deactivate_expired(
        &self,
        now: DateTime<Utc>,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
