use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealfeed_core::{
    ClickEvent, Deal, DealFilters, DealType, PageRequest, ProcessedEmailRecord, SenderCategory,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::store::{DealStore, LedgerWrite, StoreError};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const DEAL_COLUMNS: &str = r#"
    id, deal_type, source, source_category, title, origin_code, destination_code,
    price, currency, original_price, discount_percent, is_round_trip, travel_start,
    travel_end, deal_url, email_message_id, is_active, view_count, click_count,
    created_at, expires_at
"#;

#[derive(Debug, Clone)]
pub struct PgDealStore {
    pool: PgPool,
}

impl PgDealStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn row_to_deal(row: &PgRow) -> Result<Deal, StoreError> {
    let deal_type: String = row.try_get("deal_type")?;
    let category: String = row.try_get("source_category")?;
    Ok(Deal {
        id: row.try_get("id")?,
        deal_type: DealType::parse(&deal_type)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown deal_type {deal_type}")))?,
        source: row.try_get("source")?,
        source_category: SenderCategory::parse(&category)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown source_category {category}")))?,
        title: row.try_get("title")?,
        origin_code: row.try_get("origin_code")?,
        destination_code: row.try_get("destination_code")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        original_price: row.try_get("original_price")?,
        discount_percent: row.try_get("discount_percent")?,
        is_round_trip: row.try_get("is_round_trip")?,
        travel_start: row.try_get("travel_start")?,
        travel_end: row.try_get("travel_end")?,
        deal_url: row.try_get("deal_url")?,
        email_message_id: row.try_get("email_message_id")?,
        is_active: row.try_get("is_active")?,
        view_count: row.try_get("view_count")?,
        click_count: row.try_get("click_count")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl DealStore for PgDealStore {
    async fn is_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        let found = sqlx::query("SELECT 1 FROM processed_emails WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn record_processed(&self, record: &ProcessedEmailRecord) -> Result<LedgerWrite, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_emails (message_id, from_address, subject, deals_extracted, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.from_address)
        .bind(&record.subject)
        .bind(record.deals_extracted as i32)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(if result.rows_affected() == 0 {
            LedgerWrite::AlreadyPresent
        } else {
            LedgerWrite::Inserted
        })
    }

    async fn set_deals_extracted(&self, message_id: &str, deals_extracted: u32) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE processed_emails SET deals_extracted = $2 WHERE message_id = $1")
            .bind(message_id)
            .bind(deals_extracted as i32)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("processed email {message_id}")));
        }
        Ok(())
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deals (
                id, deal_type, source, source_category, title, origin_code, destination_code,
                price, currency, original_price, discount_percent, is_round_trip, travel_start,
                travel_end, deal_url, email_message_id, is_active, view_count, click_count,
                created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $20, $21)
            "#,
        )
        .bind(deal.id)
        .bind(deal.deal_type.as_str())
        .bind(&deal.source)
        .bind(deal.source_category.as_str())
        .bind(&deal.title)
        .bind(&deal.origin_code)
        .bind(&deal.destination_code)
        .bind(deal.price)
        .bind(&deal.currency)
        .bind(deal.original_price)
        .bind(deal.discount_percent)
        .bind(deal.is_round_trip)
        .bind(deal.travel_start)
        .bind(deal.travel_end)
        .bind(&deal.deal_url)
        .bind(&deal.email_message_id)
        .bind(deal.is_active)
        .bind(deal.view_count)
        .bind(deal.click_count)
        .bind(deal.created_at)
        .bind(deal.expires_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict(format!("deal {} already exists", deal.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<Deal, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO deals (
                id, deal_type, source, source_category, title, origin_code, destination_code,
                price, currency, original_price, discount_percent, is_round_trip, travel_start,
                travel_end, deal_url, email_message_id, is_active, view_count, click_count,
                created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 0, 0, $18, $18, $19)
            ON CONFLICT (id) DO UPDATE SET
                deal_type = EXCLUDED.deal_type,
                source = EXCLUDED.source,
                source_category = EXCLUDED.source_category,
                title = EXCLUDED.title,
                origin_code = EXCLUDED.origin_code,
                destination_code = EXCLUDED.destination_code,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                original_price = EXCLUDED.original_price,
                discount_percent = EXCLUDED.discount_percent,
                is_round_trip = EXCLUDED.is_round_trip,
                travel_start = EXCLUDED.travel_start,
                travel_end = EXCLUDED.travel_end,
                deal_url = EXCLUDED.deal_url,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            RETURNING {DEAL_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(deal.id)
            .bind(deal.deal_type.as_str())
            .bind(&deal.source)
            .bind(deal.source_category.as_str())
            .bind(&deal.title)
            .bind(&deal.origin_code)
            .bind(&deal.destination_code)
            .bind(deal.price)
            .bind(&deal.currency)
            .bind(deal.original_price)
            .bind(deal.discount_percent)
            .bind(deal.is_round_trip)
            .bind(deal.travel_start)
            .bind(deal.travel_end)
            .bind(&deal.deal_url)
            .bind(&deal.email_message_id)
            .bind(deal.is_active)
            .bind(deal.created_at)
            .bind(deal.expires_at)
            .fetch_one(&self.pool)
            .await?;
        row_to_deal(&row)
    }

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, StoreError> {
        let sql = format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_deal).transpose()
    }

    async fn query_deals(
        &self,
        filters: &DealFilters,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Deal>, StoreError> {
        let sql = format!(
            r#"
            SELECT {DEAL_COLUMNS}
              FROM deals
             WHERE is_active = TRUE
               AND (expires_at IS NULL OR expires_at > $1)
               AND ($2::text IS NULL OR deal_type = $2)
               AND ($3::text IS NULL OR upper(origin_code) = upper($3))
               AND ($4::text IS NULL OR upper(destination_code) = upper($4))
               AND ($5::float8 IS NULL OR price >= $5)
               AND ($6::float8 IS NULL OR price <= $6)
             ORDER BY created_at DESC
             LIMIT $7 OFFSET $8
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(filters.deal_type.map(DealType::as_str))
            .bind(filters.origin.as_deref().map(str::trim))
            .bind(filters.destination.as_deref().map(str::trim))
            .bind(filters.min_price)
            .bind(filters.max_price)
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_deal).collect()
    }

    async fn deals_for_message(&self, message_id: &str) -> Result<Vec<Deal>, StoreError> {
        let sql = format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE email_message_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql).bind(message_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_deal).collect()
    }

    async fn increment_view(&self, id: Uuid) -> Result<Option<Deal>, StoreError> {
        let sql = format!(
            "UPDATE deals SET view_count = view_count + 1 WHERE id = $1 RETURNING {DEAL_COLUMNS}"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_deal).transpose()
    }

    async fn record_click(&self, event: &ClickEvent) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE deals SET click_count = click_count + 1 WHERE id = $1")
            .bind(event.deal_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("INSERT INTO deal_clicks (deal_id, clicked_at, client_hash) VALUES ($1, $2, $3)")
            .bind(event.deal_id)
            .bind(event.clicked_at)
            .bind(&event.client_hash)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn deactivate_expired(
        &self,
        now: DateTime<Utc>,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE deals
               SET is_active = FALSE,
                   updated_at = $1
             WHERE is_active = TRUE
               AND (expires_at < $2 OR (expires_at < $1 AND created_at < $2))
            "#,
        )
        .bind(now)
        .bind(retention_cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
