//! Mail ingestion collaborators.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealfeed_core::InboundEmail;
use dealfeed_storage::HttpFetcher;
use reqwest::Url;
use secrecy::SecretString;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::AdapterError;

pub const PROCESSED_LOG: &str = "processed.log";
pub const REJECTED_LOG: &str = "rejected.log";

#[async_trait]
pub trait Mailbox: Send + Sync {
    fn name(&self) -> &str;

    /// Messages received at or after `since`, oldest first, at most `max_count`.
    async fn fetch_recent_emails(
        &self,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<InboundEmail>, AdapterError>;

    async fn mark_processed(&self, _message_ids: &[String]) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Messages the sender gate turned away; they never reach the ledger.
    async fn mark_rejected(&self, _message_ids: &[String]) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Reads JSON-serialized `InboundEmail` files from a local drop directory.
#[derive(Debug, Clone)]
pub struct DirectoryMailbox {
    root: PathBuf,
}

impl DirectoryMailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids listed in the processed and rejected logs. A missing log is empty.
    async fn settled_ids(&self) -> Result<HashSet<String>, AdapterError> {
        let mut ids = HashSet::new();
        for log in [PROCESSED_LOG, REJECTED_LOG] {
            let contents = match tokio::fs::read_to_string(self.root.join(log)).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            ids.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(ids)
    }

    async fn append_log(&self, log: &str, message_ids: &[String]) -> Result<(), AdapterError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(log))
            .await?;
        let mut lines = message_ids.join("\n");
        lines.push('\n');
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Mailbox for DirectoryMailbox {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch_recent_emails(
        &self,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<InboundEmail>, AdapterError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            AdapterError::Message(format!("reading inbox {}: {e}", self.root.display()))
        })?;
        let settled = self.settled_ids().await?;
        let mut emails = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<InboundEmail>(&bytes) {
                Ok(email) if settled.contains(&email.message_id) => {
                    debug!(message_id = %email.message_id, "already settled; not refetched")
                }
                Ok(email) if email.received_at >= since => emails.push(email),
                Ok(_) => debug!(path = %path.display(), "message older than lookback window"),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable message file"),
            }
        }
        emails.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        emails.truncate(max_count);
        Ok(emails)
    }

    /// Appends the ids to `processed.log` inside the inbox directory.
    async fn mark_processed(&self, message_ids: &[String]) -> Result<(), AdapterError> {
        self.append_log(PROCESSED_LOG, message_ids).await
    }

    async fn mark_rejected(&self, message_ids: &[String]) -> Result<(), AdapterError> {
        self.append_log(REJECTED_LOG, message_ids).await
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<InboundEmail>,
}

/// JSON bridge in front of the real inbox: `GET {base}/messages?since=..&max=..`.
pub struct HttpMailbox {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    token: SecretString,
}

impl HttpMailbox {
    pub fn new(fetcher: Arc<HttpFetcher>, base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn messages_url(&self, since: DateTime<Utc>, max_count: usize) -> Result<Url, AdapterError> {
        let since = since.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let max = max_count.to_string();
        Url::parse_with_params(
            &format!("{}/messages", self.base_url),
            [("since", since.as_str()), ("max", max.as_str())],
        )
        .map_err(|e| AdapterError::Message(format!("invalid mail API url {}: {e}", self.base_url)))
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    fn name(&self) -> &str {
        "mail-api"
    }

    async fn fetch_recent_emails(
        &self,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<InboundEmail>, AdapterError> {
        let url = self.messages_url(since, max_count)?;
        let response: MessagesResponse = self
            .fetcher
            .get_json("mail-api", url.as_str(), Some(&self.token))
            .await?;
        let mut emails: Vec<InboundEmail> = response
            .messages
            .into_iter()
            .filter(|e| e.received_at >= since)
            .collect();
        emails.truncate(max_count);
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dealfeed_storage::HttpClientConfig;
    use tempfile::tempdir;

    fn email(id: &str, day: u32) -> InboundEmail {
        InboundEmail {
            message_id: id.into(),
            from_address: "promo@volaris.com".into(),
            subject: format!("Ofertas {id}"),
            received_at: Utc.with_ymd_and_hms(2026, 5, day, 8, 0, 0).single().unwrap(),
            plain_text: Some("De Monterrey a Cancun $199".into()),
            html_body: None,
        }
    }

    fn write(dir: &Path, name: &str, email: &InboundEmail) {
        std::fs::write(dir.join(name), serde_json::to_vec(email).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn directory_mailbox_filters_sorts_and_bounds() {
        let dir = tempdir().unwrap();
        write(dir.path(), "c.json", &email("c", 9));
        write(dir.path(), "a.json", &email("a", 7));
        write(dir.path(), "old.json", &email("old", 1));
        write(dir.path(), "b.json", &email("b", 8));
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let mailbox = DirectoryMailbox::new(dir.path());
        let since = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).single().unwrap();
        let emails = mailbox.fetch_recent_emails(since, 2).await.unwrap();
        let ids: Vec<_> = emails.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_inbox_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let mailbox = DirectoryMailbox::new(dir.path().join("nope"));
        let since = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).single().unwrap();
        assert!(mailbox.fetch_recent_emails(since, 10).await.is_err());
    }

    #[tokio::test]
    async fn mark_processed_appends_ids() {
        let dir = tempdir().unwrap();
        let mailbox = DirectoryMailbox::new(dir.path());
        mailbox.mark_processed(&["a".into(), "b".into()]).await.unwrap();
        mailbox.mark_processed(&["c".into()]).await.unwrap();
        mailbox.mark_processed(&[]).await.unwrap();
        let log = std::fs::read_to_string(dir.path().join(PROCESSED_LOG)).unwrap();
        assert_eq!(log, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn settled_messages_free_the_batch_for_newer_ones() {
        let dir = tempdir().unwrap();
        for (id, day) in [("a", 6), ("b", 7), ("c", 8), ("d", 9)] {
            write(dir.path(), &format!("{id}.json"), &email(id, day));
        }
        let mailbox = DirectoryMailbox::new(dir.path());
        let since = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).single().unwrap();

        let first = mailbox.fetch_recent_emails(since, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|e| e.message_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        mailbox.mark_processed(&["a".into()]).await.unwrap();
        mailbox.mark_rejected(&["b".into()]).await.unwrap();

        let second = mailbox.fetch_recent_emails(since, 2).await.unwrap();
        let ids: Vec<_> = second.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn http_mailbox_builds_bounded_query() {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let mailbox = HttpMailbox::new(fetcher, "https://mail.example.com/", SecretString::from("t".to_string()));
        let since = Utc.with_ymd_and_hms(2026, 5, 5, 0, 0, 0).single().unwrap();
        assert_eq!(
            mailbox.messages_url(since, 50).unwrap().as_str(),
            "https://mail.example.com/messages?since=2026-05-05T00%3A00%3A00Z&max=50"
        );
    }
}
