//! Sender directory, content extraction, validation and the external
//! collaborators (mailboxes, hotel cache provider) the pipeline talks to.

use dealfeed_storage::FetchError;
use thiserror::Error;

pub mod cities;
pub mod extractor;
pub mod hotels;
pub mod mailbox;
pub mod patterns;
pub mod senders;
pub mod validate;

pub use cities::resolve_airport_code;
pub use extractor::{dedup_exact, extract, extract_plain_text, extract_structured};
pub use hotels::{HotelOffer, HotelProvider, HttpHotelProvider};
pub use mailbox::{DirectoryMailbox, HttpMailbox, Mailbox};
pub use patterns::{extract_from_window, extract_route};
pub use senders::{MatchPolicy, SenderDirectory};
pub use validate::{validate, ValidationReport};

pub const CRATE_NAME: &str = "dealfeed-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
