use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealfeed_core::{ClickEvent, Deal, DealFilters, PageRequest, ProcessedEmailRecord};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{DealStore, LedgerWrite, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    deals: Vec<Deal>,
    ledger: HashMap<String, ProcessedEmailRecord>,
    clicks: Vec<ClickEvent>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryDealStore {
    state: RwLock<MemoryState>,
}

impl MemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_deals(&self) -> Vec<Deal> {
        self.state.read().await.deals.clone()
    }

    pub async fn ledger_records(&self) -> Vec<ProcessedEmailRecord> {
        let state = self.state.read().await;
        let mut records = state.ledger.values().cloned().collect::<Vec<_>>();
        records.sort_by_key(|r| r.processed_at);
        records
    }

    pub async fn clicks(&self) -> Vec<ClickEvent> {
        self.state.read().await.clicks.clone()
    }
}

#[async_trait]
impl DealStore for MemoryDealStore {
    async fn is_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().await.ledger.contains_key(message_id))
    }

    async fn record_processed(&self, record: &ProcessedEmailRecord) -> Result<LedgerWrite, StoreError> {
        let mut state = self.state.write().await;
        if state.ledger.contains_key(&record.message_id) {
            return Ok(LedgerWrite::AlreadyPresent);
        }
        state.ledger.insert(record.message_id.clone(), record.clone());
        Ok(LedgerWrite::Inserted)
    }

    async fn set_deals_extracted(&self, message_id: &str, deals_extracted: u32) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .ledger
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("processed email {message_id}")))?;
        record.deals_extracted = deals_extracted;
        Ok(())
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.deals.iter().any(|d| d.id == deal.id) {
            return Err(StoreError::Conflict(format!("deal {} already exists", deal.id)));
        }
        state.deals.push(deal.clone());
        Ok(())
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<Deal, StoreError> {
        let mut state = self.state.write().await;
        match state.deals.iter_mut().find(|d| d.id == deal.id) {
            Some(existing) => {
                let merged = Deal {
                    created_at: existing.created_at,
                    view_count: existing.view_count,
                    click_count: existing.click_count,
                    ..deal.clone()
                };
                *existing = merged.clone();
                Ok(merged)
            }
            None => {
                state.deals.push(deal.clone());
                Ok(deal.clone())
            }
        }
    }

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, StoreError> {
        Ok(self.state.read().await.deals.iter().find(|d| d.id == id).cloned())
    }

    async fn query_deals(
        &self,
        filters: &DealFilters,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Deal>, StoreError> {
        let state = self.state.read().await;
        let mut live = state
            .deals
            .iter()
            .filter(|d| d.is_live(now) && filters.matches(d))
            .cloned()
            .collect::<Vec<_>>();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(live.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn deals_for_message(&self, message_id: &str) -> Result<Vec<Deal>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .deals
            .iter()
            .filter(|d| d.email_message_id.as_deref() == Some(message_id))
            .cloned()
            .collect())
    }

    async fn increment_view(&self, id: Uuid) -> Result<Option<Deal>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.deals.iter_mut().find(|d| d.id == id).map(|d| {
            d.view_count += 1;
            d.clone()
        }))
    }

    async fn record_click(&self, event: &ClickEvent) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(deal) = state.deals.iter_mut().find(|d| d.id == event.deal_id) else {
            return Ok(false);
        };
        deal.click_count += 1;
        state.clicks.push(event.clone());
        Ok(true)
    }

    async fn deactivate_expired(
        &self,
        now: DateTime<Utc>,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut changed = 0u64;
        for deal in state.deals.iter_mut() {
            let past_retention = deal.expires_at.is_some_and(|exp| {
                exp < retention_cutoff || (exp < now && deal.created_at < retention_cutoff)
            });
            if deal.is_active && past_retention {
                deal.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use dealfeed_core::{DealType, SenderCategory};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 9, 0, 0).single().unwrap()
    }

    fn deal(created_days_ago: i64, expires_in_days: i64) -> Deal {
        Deal {
            id: Uuid::new_v4(),
            deal_type: DealType::Flight,
            source: "Viva Aerobus".into(),
            source_category: SenderCategory::Airline,
            title: None,
            origin_code: Some("MTY".into()),
            destination_code: Some("CUN".into()),
            price: 149.0,
            currency: "USD".into(),
            original_price: None,
            discount_percent: None,
            is_round_trip: false,
            travel_start: None,
            travel_end: None,
            deal_url: None,
            email_message_id: Some("<m1@viva>".into()),
            is_active: true,
            view_count: 0,
            click_count: 0,
            created_at: now() - TimeDelta::days(created_days_ago),
            expires_at: Some(now() + TimeDelta::days(expires_in_days)),
        }
    }

    fn record(id: &str) -> ProcessedEmailRecord {
        ProcessedEmailRecord {
            message_id: id.into(),
            from_address: "promo@vivaaerobus.com".into(),
            subject: "Ofertas".into(),
            deals_extracted: 1,
            processed_at: now(),
        }
    }

    #[tokio::test]
    async fn ledger_enforces_unique_message_ids() {
        let store = MemoryDealStore::new();
        assert!(!store.is_processed("<a>").await.unwrap());
        assert_eq!(store.record_processed(&record("<a>")).await.unwrap(), LedgerWrite::Inserted);
        assert_eq!(
            store.record_processed(&record("<a>")).await.unwrap(),
            LedgerWrite::AlreadyPresent
        );
        assert!(store.is_processed("<a>").await.unwrap());
        assert_eq!(store.ledger_records().await.len(), 1);
    }

    #[tokio::test]
    async fn deal_count_is_set_on_a_claimed_ledger_row() {
        let store = MemoryDealStore::new();
        assert!(matches!(
            store.set_deals_extracted("<a>", 2).await,
            Err(StoreError::NotFound(_))
        ));
        store.record_processed(&record("<a>")).await.unwrap();
        store.set_deals_extracted("<a>", 2).await.unwrap();
        assert_eq!(store.ledger_records().await[0].deals_extracted, 2);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = MemoryDealStore::new();
        let d = deal(0, 7);
        store.insert_deal(&d).await.unwrap();
        assert!(matches!(store.insert_deal(&d).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn upsert_keeps_counters_and_created_at() {
        let store = MemoryDealStore::new();
        let original = deal(3, 7);
        store.insert_deal(&original).await.unwrap();
        store.increment_view(original.id).await.unwrap();

        let refreshed = Deal {
            price: 99.0,
            created_at: now(),
            ..original.clone()
        };
        let merged = store.upsert_deal(&refreshed).await.unwrap();
        assert_eq!(merged.price, 99.0);
        assert_eq!(merged.view_count, 1);
        assert_eq!(merged.created_at, original.created_at);
        assert_eq!(store.all_deals().await.len(), 1);
    }

    #[tokio::test]
    async fn query_returns_live_deals_newest_first_with_paging() {
        let store = MemoryDealStore::new();
        let old = deal(5, 7);
        let new = deal(1, 7);
        let expired = deal(0, -1);
        for d in [&old, &new, &expired] {
            store.insert_deal(d).await.unwrap();
        }
        let rows = store
            .query_deals(&DealFilters::default(), PageRequest::default(), now())
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|d| d.id).collect::<Vec<_>>(), vec![new.id, old.id]);

        let second = store
            .query_deals(&DealFilters::default(), PageRequest::new(Some(1), Some(1)), now())
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, old.id);
    }

    #[tokio::test]
    async fn clicks_increment_and_unknown_deal_is_reported() {
        let store = MemoryDealStore::new();
        let d = deal(0, 7);
        store.insert_deal(&d).await.unwrap();
        let event = ClickEvent {
            deal_id: d.id,
            clicked_at: now(),
            client_hash: "abcd".into(),
        };
        assert!(store.record_click(&event).await.unwrap());
        assert_eq!(store.get_deal(d.id).await.unwrap().unwrap().click_count, 1);
        let unknown = ClickEvent {
            deal_id: Uuid::new_v4(),
            ..event
        };
        assert!(!store.record_click(&unknown).await.unwrap());
        assert_eq!(store.clicks().await.len(), 1);
    }

    #[tokio::test]
    async fn deactivate_expired_respects_retention_window() {
        let store = MemoryDealStore::new();
        let long_expired = deal(30, -15);
        let old_and_expired = deal(20, -13);
        let recently_created_expired = deal(10, -1);
        let old_but_live = deal(40, 3);
        let fresh = deal(0, 7);
        for d in [&long_expired, &old_and_expired, &recently_created_expired, &old_but_live, &fresh] {
            store.insert_deal(d).await.unwrap();
        }
        let changed = store
            .deactivate_expired(now(), now() - TimeDelta::days(14))
            .await
            .unwrap();
        assert_eq!(changed, 2);
        for (d, active) in [
            (&long_expired, false),
            (&old_and_expired, false),
            (&recently_created_expired, true),
            (&old_but_live, true),
            (&fresh, true),
        ] {
            assert_eq!(store.get_deal(d.id).await.unwrap().unwrap().is_active, active);
        }
    }
}
