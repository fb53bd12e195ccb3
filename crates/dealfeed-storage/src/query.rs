use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealfeed_core::{Deal, DealFilters, DealPage, DealStats, PageRequest};

use crate::store::{DealStore, StoreError};

/// Read-only view over live deals for the presentation layer.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn DealStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn DealStore>) -> Self {
        Self { store }
    }

    /// `stats` describe the returned page only, after any thinning.
    pub async fn query(
        &self,
        filters: &DealFilters,
        page: PageRequest,
        distinct: bool,
        now: DateTime<Utc>,
    ) -> Result<DealPage, StoreError> {
        let mut deals = self.store.query_deals(filters, page, now).await?;
        if distinct {
            deals = thin_by_route_bucket(deals);
        }
        let stats = DealStats::from_page(&deals);
        Ok(DealPage { deals, stats })
    }
}

/// Display-time thinning: keeps the first deal per
/// `(origin, destination, price rounded to nearest 10)` bucket.
pub fn thin_by_route_bucket(deals: Vec<Deal>) -> Vec<Deal> {
    let mut seen = HashSet::new();
    deals
        .into_iter()
        .filter(|d| {
            let bucket = ((d.price / 10.0).round() as i64) * 10;
            seen.insert((d.origin_code.clone(), d.destination_code.clone(), bucket))
        })
        .collect()
}
