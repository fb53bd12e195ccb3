//! Core domain model for the travel newsletter deal pipeline.

use std::future::Future;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealfeed-core";

/// Sender directory category; drives deal-type hints during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderCategory {
    Airline,
    Agency,
    Hotel,
    Cruise,
    Car,
    Aggregator,
    Loyalty,
    Activity,
    Insurance,
    Train,
    Bus,
}

impl SenderCategory {
    pub const ALL: [SenderCategory; 11] = [
        SenderCategory::Airline,
        SenderCategory::Agency,
        SenderCategory::Hotel,
        SenderCategory::Cruise,
        SenderCategory::Car,
        SenderCategory::Aggregator,
        SenderCategory::Loyalty,
        SenderCategory::Activity,
        SenderCategory::Insurance,
        SenderCategory::Train,
        SenderCategory::Bus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SenderCategory::Airline => "airline",
            SenderCategory::Agency => "agency",
            SenderCategory::Hotel => "hotel",
            SenderCategory::Cruise => "cruise",
            SenderCategory::Car => "car",
            SenderCategory::Aggregator => "aggregator",
            SenderCategory::Loyalty => "loyalty",
            SenderCategory::Activity => "activity",
            SenderCategory::Insurance => "insurance",
            SenderCategory::Train => "train",
            SenderCategory::Bus => "bus",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// One row of the static sender directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderEntry {
    pub domain: String,
    pub display_name: String,
    pub category: SenderCategory,
}

impl SenderEntry {
    pub fn new(domain: &str, display_name: &str, category: SenderCategory) -> Self {
        Self {
            domain: domain.to_string(),
            display_name: display_name.to_string(),
            category,
        }
    }
}

/// Raw newsletter as handed over by the mail collaborator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    pub message_id: String,
    pub from_address: String,
    #[serde(default)]
    pub subject: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub plain_text: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealType {
    Flight,
    Hotel,
    Cruise,
}

impl DealType {
    pub fn as_str(self) -> &'static str {
        match self {
            DealType::Flight => "flight",
            DealType::Hotel => "hotel",
            DealType::Cruise => "cruise",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flight" => Some(DealType::Flight),
            "hotel" => Some(DealType::Hotel),
            "cruise" => Some(DealType::Cruise),
            _ => None,
        }
    }
}

/// Which extraction pass produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Structured,
    PlainText,
}

/// Unvalidated offer pulled out of one text window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealCandidate {
    pub deal_type: DealType,
    pub origin_code: Option<String>,
    pub destination_code: Option<String>,
    pub price: f64,
    pub currency: String,
    pub discount_percent: Option<f64>,
    pub original_price: Option<f64>,
    pub is_round_trip: bool,
    pub travel_start: Option<NaiveDate>,
    pub travel_end: Option<NaiveDate>,
    pub deal_url: Option<String>,
    pub raw_excerpt: String,
    pub strategy: ExtractionStrategy,
}

/// Persisted, normalized travel offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub deal_type: DealType,
    pub source: String,
    pub source_category: SenderCategory,
    pub title: Option<String>,
    pub origin_code: Option<String>,
    pub destination_code: Option<String>,
    pub price: f64,
    pub currency: String,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub is_round_trip: bool,
    pub travel_start: Option<NaiveDate>,
    pub travel_end: Option<NaiveDate>,
    pub deal_url: Option<String>,
    pub email_message_id: Option<String>,
    pub is_active: bool,
    pub view_count: i64,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Deal {
    /// Visible to the query side: active and not yet past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Idempotency ledger row; one per distinct message id, ever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEmailRecord {
    pub message_id: String,
    pub from_address: String,
    pub subject: String,
    pub deals_extracted: u32,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub deal_id: Uuid,
    pub clicked_at: DateTime<Utc>,
    pub client_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealFilters {
    pub deal_type: Option<DealType>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl DealFilters {
    pub fn matches(&self, deal: &Deal) -> bool {
        if self.deal_type.is_some_and(|t| t != deal.deal_type) {
            return false;
        }
        if !code_matches(self.origin.as_deref(), deal.origin_code.as_deref()) {
            return false;
        }
        if !code_matches(self.destination.as_deref(), deal.destination_code.as_deref()) {
            return false;
        }
        if self.min_price.is_some_and(|min| deal.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| deal.price > max) {
            return false;
        }
        true
    }
}

fn code_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(w) => actual.is_some_and(|a| a.eq_ignore_ascii_case(w.trim())),
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Aggregates over one returned page. Not a global aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealStats {
    pub total: usize,
    pub flights: usize,
    pub hotels: usize,
    pub cruises: usize,
    pub avg_discount: Option<f64>,
}

impl DealStats {
    pub fn from_page(deals: &[Deal]) -> Self {
        let mut stats = DealStats {
            total: deals.len(),
            ..Default::default()
        };
        for deal in deals {
            match deal.deal_type {
                DealType::Flight => stats.flights += 1,
                DealType::Hotel => stats.hotels += 1,
                DealType::Cruise => stats.cruises += 1,
            }
        }
        let discounts = deals
            .iter()
            .filter_map(|d| d.discount_percent)
            .collect::<Vec<_>>();
        if !discounts.is_empty() {
            let avg = discounts.iter().sum::<f64>() / discounts.len() as f64;
            stats.avg_discount = Some((avg * 10.0).round() / 10.0);
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealPage {
    pub deals: Vec<Deal>,
    pub stats: DealStats,
}

/// A value plus the moment it was fetched and how long it stays fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
    pub ttl: TimeDelta,
}

impl<T> Cached<T> {
    pub fn new(value: T, fetched_at: DateTime<Utc>, ttl: TimeDelta) -> Self {
        Self {
            value,
            fetched_at,
            ttl,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.fetched_at + self.ttl
    }
}

/// Owner of at most one `Cached<T>`; callers hold it explicitly and refresh
/// through `get_or_refresh`.
#[derive(Debug, Clone)]
pub struct CacheSlot<T> {
    ttl: TimeDelta,
    entry: Option<Cached<T>>,
}

impl<T> CacheSlot<T> {
    pub fn new(ttl: TimeDelta) -> Self {
        Self { ttl, entry: None }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.entry.as_ref().is_some_and(|c| c.is_fresh(now))
    }

    pub fn peek(&self) -> Option<&Cached<T>> {
        self.entry.as_ref()
    }

    /// Returns the cached value while fresh, otherwise awaits `refresh`.
    /// A failed refresh keeps the stale entry in place.
    pub async fn get_or_refresh<F, Fut, E>(&mut self, now: DateTime<Utc>, refresh: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = match self.entry.take() {
            Some(cached) if cached.is_fresh(now) => cached,
            stale => match refresh().await {
                Ok(value) => Cached::new(value, now, self.ttl),
                Err(err) => {
                    self.entry = stale;
                    return Err(err);
                }
            },
        };
        Ok(&self.entry.insert(entry).value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).single().unwrap()
    }

    fn deal(deal_type: DealType, price: f64, discount: Option<f64>) -> Deal {
        Deal {
            id: Uuid::new_v4(),
            deal_type,
            source: "Volaris".into(),
            source_category: SenderCategory::Airline,
            title: None,
            origin_code: Some("MEX".into()),
            destination_code: Some("CUN".into()),
            price,
            currency: "USD".into(),
            original_price: None,
            discount_percent: discount,
            is_round_trip: false,
            travel_start: None,
            travel_end: None,
            deal_url: None,
            email_message_id: None,
            is_active: true,
            view_count: 0,
            click_count: 0,
            created_at: ts(1),
            expires_at: Some(ts(8)),
        }
    }

    #[test]
    fn deal_serializes_type_and_camel_case_fields() {
        let value = serde_json::to_value(deal(DealType::Hotel, 120.0, None)).unwrap();
        assert_eq!(value["type"], "hotel");
        assert_eq!(value["sourceCategory"], "airline");
        assert!(value.get("destinationCode").is_some());
    }

    #[test]
    fn liveness_respects_flag_and_expiry() {
        let mut d = deal(DealType::Flight, 100.0, None);
        assert!(d.is_live(ts(2)));
        assert!(!d.is_live(ts(9)));
        d.expires_at = None;
        assert!(d.is_live(ts(28)));
        d.is_active = false;
        assert!(!d.is_live(ts(2)));
    }

    #[test]
    fn filters_match_codes_case_insensitively_and_price_inclusively() {
        let d = deal(DealType::Flight, 300.0, None);
        let filters = DealFilters {
            deal_type: Some(DealType::Flight),
            origin: Some("mex".into()),
            destination: None,
            min_price: Some(300.0),
            max_price: Some(300.0),
        };
        assert!(filters.matches(&d));
        let wrong_type = DealFilters {
            deal_type: Some(DealType::Hotel),
            ..Default::default()
        };
        assert!(!wrong_type.matches(&d));
    }

    #[test]
    fn stats_cover_only_given_page() {
        let page = vec![
            deal(DealType::Hotel, 100.0, Some(20.0)),
            deal(DealType::Hotel, 150.0, Some(30.0)),
            deal(DealType::Flight, 90.0, None),
        ];
        let stats = DealStats::from_page(&page);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.hotels, 2);
        assert_eq!(stats.flights, 1);
        assert_eq!(stats.cruises, 0);
        assert_eq!(stats.avg_discount, Some(25.0));
    }

    #[test]
    fn page_request_clamps_limit() {
        assert_eq!(PageRequest::new(Some(0), None).limit, 1);
        assert_eq!(PageRequest::new(Some(10_000), Some(5)), PageRequest { limit: MAX_PAGE_LIMIT, offset: 5 });
        assert_eq!(PageRequest::new(None, None).limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn category_parse_roundtrips_names() {
        for category in SenderCategory::ALL {
            assert_eq!(SenderCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(SenderCategory::parse("spaceline"), None);
    }

    #[tokio::test]
    async fn cache_slot_refreshes_only_when_stale() {
        let mut slot = CacheSlot::new(TimeDelta::hours(1));
        let first: Result<&u32, ()> = slot.get_or_refresh(ts(1), || async { Ok(1) }).await;
        assert_eq!(first, Ok(&1));
        let cached: Result<&u32, ()> = slot.get_or_refresh(ts(1), || async { Ok(2) }).await;
        assert_eq!(cached, Ok(&1));
        let later = ts(2);
        let refreshed: Result<&u32, ()> = slot.get_or_refresh(later, || async { Ok(3) }).await;
        assert_eq!(refreshed, Ok(&3));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_entry() {
        let mut slot = CacheSlot::new(TimeDelta::minutes(5));
        let _: Result<&u32, ()> = slot.get_or_refresh(ts(1), || async { Ok(7) }).await;
        let failed: Result<&u32, &str> = slot.get_or_refresh(ts(3), || async { Err("down") }).await;
        assert_eq!(failed, Err("down"));
        assert_eq!(slot.peek().map(|c| c.value), Some(7));
        assert!(!slot.is_fresh(ts(3)));
    }
}
