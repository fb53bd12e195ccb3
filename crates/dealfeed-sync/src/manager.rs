use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dealfeed_adapters::patterns::derived_discount;
use dealfeed_adapters::HotelOffer;
use dealfeed_core::{Deal, DealCandidate, DealType, InboundEmail, SenderCategory, SenderEntry};
use dealfeed_storage::{DealStore, StoreError};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEAL_LIFETIME_DAYS: i64 = 7;
pub const SWEEP_RETENTION_DAYS: i64 = 14;

/// Deterministic id for cache-sourced deals so refreshes overwrite in place.
pub fn cache_deal_id(source: &str, destination: &str, provider_id: &str) -> Uuid {
    let key = format!(
        "{}:{}:{}",
        source.trim().to_ascii_lowercase(),
        destination.trim().to_ascii_uppercase(),
        provider_id.trim()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Owns the Deal lifecycle on top of a [`DealStore`].
#[derive(Clone)]
pub struct DealManager {
    store: Arc<dyn DealStore>,
}

impl DealManager {
    pub fn new(store: Arc<dyn DealStore>) -> Self {
        Self { store }
    }

    /// Newsletter deal: fresh id, seven-day expiry, linked to its message.
    pub async fn persist(
        &self,
        candidate: &DealCandidate,
        email: &InboundEmail,
        sender: &SenderEntry,
        now: DateTime<Utc>,
    ) -> Result<Deal, StoreError> {
        let deal = Deal {
            id: Uuid::new_v4(),
            deal_type: candidate.deal_type,
            source: sender.display_name.clone(),
            source_category: sender.category,
            title: non_empty(&email.subject),
            origin_code: candidate.origin_code.clone(),
            destination_code: candidate.destination_code.clone(),
            price: candidate.price,
            currency: candidate.currency.clone(),
            original_price: candidate.original_price,
            discount_percent: candidate.discount_percent,
            is_round_trip: candidate.is_round_trip,
            travel_start: candidate.travel_start,
            travel_end: candidate.travel_end,
            deal_url: candidate.deal_url.clone(),
            email_message_id: Some(email.message_id.clone()),
            is_active: true,
            view_count: 0,
            click_count: 0,
            created_at: now,
            expires_at: Some(now + TimeDelta::days(DEAL_LIFETIME_DAYS)),
        };
        self.store.insert_deal(&deal).await?;
        debug!(deal_id = %deal.id, message_id = %email.message_id, "deal stored");
        Ok(deal)
    }

    /// Cache-sourced hotel deal, upserted by [`cache_deal_id`]; every refresh
    /// pushes the expiry out again.
    pub async fn upsert_cached(
        &self,
        offer: &HotelOffer,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Deal, StoreError> {
        let original_price = offer.original_price.filter(|o| *o > offer.price);
        let deal = Deal {
            id: cache_deal_id(source, &offer.destination_code, &offer.provider_id),
            deal_type: DealType::Hotel,
            source: source.to_string(),
            source_category: SenderCategory::Hotel,
            title: non_empty(&offer.hotel_name),
            origin_code: None,
            destination_code: Some(offer.destination_code.clone()),
            price: offer.price,
            currency: offer.currency.clone(),
            original_price,
            discount_percent: original_price.map(|o| derived_discount(o, offer.price)),
            is_round_trip: false,
            travel_start: None,
            travel_end: None,
            deal_url: offer.deal_url.clone(),
            email_message_id: None,
            is_active: true,
            view_count: 0,
            click_count: 0,
            created_at: now,
            expires_at: Some(now + TimeDelta::days(DEAL_LIFETIME_DAYS)),
        };
        self.store.upsert_deal(&deal).await
    }

    /// Soft-deactivates deals past the retention window. Nothing is deleted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - TimeDelta::days(SWEEP_RETENTION_DAYS);
        let changed = self.store.deactivate_expired(now, cutoff).await?;
        info!(deactivated = changed, "expiry sweep finished");
        Ok(changed)
    }
}
