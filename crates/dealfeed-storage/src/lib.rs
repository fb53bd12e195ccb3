//! Deal persistence, query service and outbound HTTP utilities.

use sha2::{Digest, Sha256};

mod http;
mod memory;
mod postgres;
mod query;
mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, CallPacer, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryDealStore;
pub use postgres::{PgDealStore, MIGRATOR};
pub use query::{thin_by_route_bucket, QueryService};
pub use store::{DealStore, LedgerWrite, StoreError};

pub const CRATE_NAME: &str = "dealfeed-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Privacy-preserving identifier for click tracking; raw addresses are never stored.
pub fn client_fingerprint(client_addr: &str, user_agent: &str) -> String {
    let digest = sha256_hex(format!("{client_addr}|{user_agent}").as_bytes());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn fingerprint_is_short_and_does_not_leak_address() {
        let fp = client_fingerprint("203.0.113.9", "Mozilla/5.0");
        assert_eq!(fp.len(), 16);
        assert!(!fp.contains("203"));
        assert_eq!(fp, client_fingerprint("203.0.113.9", "Mozilla/5.0"));
        assert_ne!(fp, client_fingerprint("203.0.113.10", "Mozilla/5.0"));
    }
}
