use std::sync::Arc;

use async_trait::async_trait;
use dealfeed_storage::HttpFetcher;
use reqwest::Url;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::AdapterError;

/// One bookable hotel rate from an external cache provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelOffer {
    pub provider_id: String,
    pub hotel_name: String,
    pub destination_code: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub deal_url: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[async_trait]
pub trait HotelProvider: Send + Sync {
    /// Display name stored as the Deal `source`.
    fn name(&self) -> &str;

    async fn fetch_offers(&self, destination: &str) -> Result<Vec<HotelOffer>, AdapterError>;
}

#[derive(Debug, Deserialize)]
struct HotelsResponse {
    hotels: Vec<HotelOffer>,
}

/// `GET {base}/hotels?destination=XXX`, paced through the shared fetcher.
pub struct HttpHotelProvider {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    api_key: SecretString,
    source_name: String,
}

impl HttpHotelProvider {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        base_url: impl Into<String>,
        api_key: SecretString,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            source_name: source_name.into(),
        }
    }

    fn offers_url(&self, destination: &str) -> Result<Url, AdapterError> {
        Url::parse_with_params(
            &format!("{}/hotels", self.base_url),
            [("destination", destination)],
        )
        .map_err(|e| AdapterError::Message(format!("invalid hotel API url {}: {e}", self.base_url)))
    }
}

/// Drops non-positive prices and offers for other destinations, normalising codes.
pub fn usable_offers(destination: &str, offers: Vec<HotelOffer>) -> Vec<HotelOffer> {
    offers
        .into_iter()
        .filter(|o| o.price > 0.0 && !o.provider_id.trim().is_empty())
        .map(|o| HotelOffer {
            destination_code: o.destination_code.trim().to_ascii_uppercase(),
            ..o
        })
        .filter(|o| o.destination_code.eq_ignore_ascii_case(destination))
        .collect()
}

#[async_trait]
impl HotelProvider for HttpHotelProvider {
    fn name(&self) -> &str {
        &self.source_name
    }

    async fn fetch_offers(&self, destination: &str) -> Result<Vec<HotelOffer>, AdapterError> {
        let destination = destination.trim().to_ascii_uppercase();
        let url = self.offers_url(&destination)?;
        let response: HotelsResponse = self
            .fetcher
            .get_json("hotel-api", url.as_str(), Some(&self.api_key))
            .await?;
        Ok(usable_offers(&destination, response.hotels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealfeed_storage::HttpClientConfig;

    #[test]
    fn provider_payload_decodes_with_defaults() {
        let body = r#"{"hotels":[{"providerId":"h-1","hotelName":"Playa Azul","destinationCode":"cun","price":180.5}]}"#;
        let parsed: HotelsResponse = serde_json::from_str(body).unwrap();
        let offers = usable_offers("CUN", parsed.hotels);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].currency, "USD");
        assert_eq!(offers[0].destination_code, "CUN");
        assert_eq!(offers[0].original_price, None);
    }

    #[test]
    fn unusable_offers_are_dropped() {
        let offer = |id: &str, dest: &str, price: f64| HotelOffer {
            provider_id: id.into(),
            hotel_name: "H".into(),
            destination_code: dest.into(),
            price,
            currency: "USD".into(),
            original_price: None,
            deal_url: None,
        };
        let kept = usable_offers(
            "PVR",
            vec![
                offer("a", "PVR", 120.0),
                offer("b", "PVR", 0.0),
                offer("", "PVR", 90.0),
                offer("c", "CUN", 99.0),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].provider_id, "a");
    }

    #[test]
    fn destination_is_query_encoded() {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let provider = HttpHotelProvider::new(
            fetcher,
            "https://hotels.example.com/v1/",
            SecretString::from("k".to_string()),
            "Hotel Cache",
        );
        assert_eq!(
            provider.offers_url("SAN JOSE+1").unwrap().as_str(),
            "https://hotels.example.com/v1/hotels?destination=SAN+JOSE%2B1"
        );
    }
}
