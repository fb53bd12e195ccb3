use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use dealfeed_adapters::{
    extract, validate, DirectoryMailbox, HotelOffer, HotelProvider, HttpHotelProvider, HttpMailbox,
    Mailbox, SenderDirectory,
};
use dealfeed_core::{CacheSlot, InboundEmail, ProcessedEmailRecord};
use dealfeed_storage::{DealStore, HttpFetcher, LedgerWrite};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dedup::dedup_across_strategies;
use crate::manager::DealManager;
use crate::reports::write_run_report;
use crate::{PipelineError, RunResult, SyncConfig};

const DEFAULT_LOOKBACK_DAYS: i64 = 7;
const DEFAULT_MAX_EMAILS: usize = 50;
const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(240);
const DEFAULT_HOTEL_TTL_MINUTES: i64 = 360;
const HOTEL_SOURCE_NAME: &str = "Hotel Cache";

struct HotelRefresh {
    provider: Arc<dyn HotelProvider>,
    destinations: Vec<String>,
}

enum EmailOutcome {
    Ledgered,
    AlreadyLedgered,
    Rejected,
}

/// Drives one ingestion run at a time over the configured collaborators.
pub struct IngestionPipeline {
    store: Arc<dyn DealStore>,
    manager: DealManager,
    senders: SenderDirectory,
    mailbox: Option<Arc<dyn Mailbox>>,
    hotels: Option<HotelRefresh>,
    hotel_cache: Mutex<HashMap<String, CacheSlot<Vec<HotelOffer>>>>,
    hotel_cache_ttl: TimeDelta,
    lookback: TimeDelta,
    max_emails: usize,
    run_budget: Duration,
    reports_dir: Option<PathBuf>,
    run_guard: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn DealStore>, senders: SenderDirectory) -> Self {
        Self {
            manager: DealManager::new(Arc::clone(&store)),
            store,
            senders,
            mailbox: None,
            hotels: None,
            hotel_cache: Mutex::new(HashMap::new()),
            hotel_cache_ttl: TimeDelta::minutes(DEFAULT_HOTEL_TTL_MINUTES),
            lookback: TimeDelta::days(DEFAULT_LOOKBACK_DAYS),
            max_emails: DEFAULT_MAX_EMAILS,
            run_budget: DEFAULT_RUN_BUDGET,
            reports_dir: None,
            run_guard: Mutex::new(()),
        }
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn with_hotel_provider(
        mut self,
        provider: Arc<dyn HotelProvider>,
        destinations: Vec<String>,
        ttl: TimeDelta,
    ) -> Self {
        self.hotels = Some(HotelRefresh {
            provider,
            destinations,
        });
        self.hotel_cache_ttl = ttl;
        self
    }

    pub fn with_limits(mut self, lookback_days: i64, max_emails: usize) -> Self {
        self.lookback = TimeDelta::days(lookback_days.max(0));
        self.max_emails = max_emails;
        self
    }

    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    /// Wires the mailbox and hotel provider named by the environment.
    /// A local inbox directory wins over the mail API.
    pub fn from_config(config: &SyncConfig, store: Arc<dyn DealStore>) -> Result<Self> {
        let senders = config.sender_directory().context("loading sender directory")?;
        let fetcher = Arc::new(HttpFetcher::new(config.http_client_config())?);

        let mut pipeline = Self::new(store, senders)
            .with_limits(config.email_lookback_days, config.email_max_per_run)
            .with_run_budget(config.run_budget);
        if let Some(dir) = &config.reports_dir {
            pipeline = pipeline.with_reports_dir(dir.clone());
        }

        match (&config.inbox_dir, &config.mail_api_url, &config.mail_api_token) {
            (Some(dir), _, _) => {
                pipeline = pipeline.with_mailbox(Arc::new(DirectoryMailbox::new(dir.clone())));
            }
            (None, Some(url), Some(token)) => {
                pipeline = pipeline.with_mailbox(Arc::new(HttpMailbox::new(
                    Arc::clone(&fetcher),
                    url.clone(),
                    SecretString::from(token.expose_secret().to_string()),
                )));
            }
            (None, Some(_), None) => {
                warn!("MAIL_API_URL is set without MAIL_API_TOKEN; mailbox disabled")
            }
            (None, None, _) => {}
        }

        match (&config.hotel_api_url, &config.hotel_api_key) {
            (Some(url), Some(key)) if !config.hotel_destinations.is_empty() => {
                let provider = HttpHotelProvider::new(
                    fetcher,
                    url.clone(),
                    SecretString::from(key.expose_secret().to_string()),
                    HOTEL_SOURCE_NAME,
                );
                pipeline = pipeline.with_hotel_provider(
                    Arc::new(provider),
                    config.hotel_destinations.clone(),
                    config.hotel_cache_ttl,
                );
            }
            (Some(_), _) => {
                warn!("HOTEL_API_URL needs HOTEL_API_KEY and HOTEL_CACHE_DESTINATIONS; hotel refresh disabled")
            }
            _ => {}
        }
        Ok(pipeline)
    }

    pub async fn run_once(&self) -> RunResult {
        self.run_once_at(Utc::now()).await
    }

    /// One full run using `now` as the clock for expiry, lookback and date parsing.
    /// Per-item failures land in `RunResult::errors`; the sweep always runs.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RunResult {
        let mut result = RunResult::new(now);
        let Ok(_guard) = self.run_guard.try_lock() else {
            result.record(PipelineError::RunInProgress);
            return result;
        };

        let span = info_span!("ingestion_run", run_id = %result.run_id);
        async move {
            let started = Instant::now();
            let deadline = started + self.run_budget;

            if self.refresh_hotel_cache(now, deadline, &mut result).await {
                self.process_emails(now, deadline, &mut result).await;
            }

            match self.manager.sweep(now).await {
                Ok(changed) => result.deals_deactivated = changed,
                Err(err) => result.record(PipelineError::Persistence(err)),
            }

            let elapsed = TimeDelta::from_std(started.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
            result.finished_at = now + elapsed;
            if let Some(dir) = &self.reports_dir {
                match write_run_report(dir, &result).await {
                    Ok(path) => debug!(path = %path.display(), "run report written"),
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "writing run report failed");
                        result.errors.push(format!("writing run report: {err:#}"));
                    }
                }
            }

            info!(
                emails_processed = result.emails_processed,
                emails_skipped = result.emails_skipped,
                deals_found = result.deals_found,
                deals_stored = result.deals_stored,
                hotels_cached = result.hotels_cached,
                deals_deactivated = result.deals_deactivated,
                errors = result.errors.len(),
                "ingestion run finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    fn budget_left(&self, deadline: Instant, result: &mut RunResult) -> bool {
        if Instant::now() < deadline {
            return true;
        }
        result.record(PipelineError::BudgetExhausted(self.run_budget));
        false
    }

    /// Returns `false` once the run budget is spent.
    async fn refresh_hotel_cache(
        &self,
        now: DateTime<Utc>,
        deadline: Instant,
        result: &mut RunResult,
    ) -> bool {
        let Some(hotels) = &self.hotels else {
            debug!("hotel cache refresh not configured");
            return true;
        };
        let source = hotels.provider.name().to_string();
        let mut cache = self.hotel_cache.lock().await;

        for destination in &hotels.destinations {
            if !self.budget_left(deadline, result) {
                return false;
            }
            let slot = cache
                .entry(destination.clone())
                .or_insert_with(|| CacheSlot::new(self.hotel_cache_ttl));
            if slot.is_fresh(now) {
                debug!(destination = %destination, "hotel cache still fresh");
                continue;
            }

            let provider = Arc::clone(&hotels.provider);
            let fetched = slot
                .get_or_refresh(now, || async move { provider.fetch_offers(destination).await })
                .await;
            match fetched {
                Ok(offers) => {
                    for offer in offers {
                        match self.manager.upsert_cached(offer, &source, now).await {
                            Ok(_) => result.hotels_cached += 1,
                            Err(err) => result.record(PipelineError::Persistence(err)),
                        }
                    }
                    debug!(destination = %destination, offers = offers.len(), "hotel cache refreshed");
                }
                Err(err) => result.record(PipelineError::Upstream {
                    source_name: source.clone(),
                    message: format!("{destination}: {err}"),
                }),
            }
        }
        true
    }

    async fn process_emails(&self, now: DateTime<Utc>, deadline: Instant, result: &mut RunResult) {
        let Some(mailbox) = &self.mailbox else {
            result.record(PipelineError::Configuration(
                "no mailbox configured; set NEWSLETTER_INBOX_DIR or MAIL_API_URL with MAIL_API_TOKEN"
                    .to_string(),
            ));
            return;
        };

        let since = now - self.lookback;
        let emails = match mailbox.fetch_recent_emails(since, self.max_emails).await {
            Ok(emails) => emails,
            Err(err) => {
                result.record(PipelineError::Upstream {
                    source_name: mailbox.name().to_string(),
                    message: err.to_string(),
                });
                return;
            }
        };
        info!(mailbox = mailbox.name(), fetched = emails.len(), "mailbox fetched");

        let today = now.date_naive();
        let mut ledgered = Vec::new();
        let mut rejected = Vec::new();
        for email in &emails {
            if !self.budget_left(deadline, result) {
                break;
            }
            match self.process_email(email, now, today, result).await {
                Ok(EmailOutcome::Ledgered | EmailOutcome::AlreadyLedgered) => {
                    ledgered.push(email.message_id.clone())
                }
                Ok(EmailOutcome::Rejected) => rejected.push(email.message_id.clone()),
                Err(err) => result.record(err),
            }
        }

        if !ledgered.is_empty() {
            if let Err(err) = mailbox.mark_processed(&ledgered).await {
                result.record(PipelineError::Upstream {
                    source_name: mailbox.name().to_string(),
                    message: format!("marking processed: {err}"),
                });
            }
        }
        if !rejected.is_empty() {
            if let Err(err) = mailbox.mark_rejected(&rejected).await {
                result.record(PipelineError::Upstream {
                    source_name: mailbox.name().to_string(),
                    message: format!("marking rejected: {err}"),
                });
            }
        }
    }

    /// The ledger row is claimed before any deal is stored, so of two runs
    /// racing on one message only the one whose insert lands persists deals.
    async fn process_email(
        &self,
        email: &InboundEmail,
        now: DateTime<Utc>,
        today: NaiveDate,
        result: &mut RunResult,
    ) -> Result<EmailOutcome, PipelineError> {
        let Some(sender) = self.senders.identify(&email.from_address) else {
            debug!(message_id = %email.message_id, from = %email.from_address, "unknown sender; skipped");
            result.emails_skipped += 1;
            return Ok(EmailOutcome::Rejected);
        };
        if self.store.is_processed(&email.message_id).await? {
            debug!(message_id = %email.message_id, "already processed; skipped");
            result.emails_skipped += 1;
            return Ok(EmailOutcome::AlreadyLedgered);
        }

        let claim = ProcessedEmailRecord {
            message_id: email.message_id.clone(),
            from_address: email.from_address.clone(),
            subject: email.subject.clone(),
            deals_extracted: 0,
            processed_at: now,
        };
        if self.store.record_processed(&claim).await? == LedgerWrite::AlreadyPresent {
            warn!(message_id = %email.message_id, "ledger claimed by a concurrent run; skipped");
            result.emails_skipped += 1;
            return Ok(EmailOutcome::AlreadyLedgered);
        }

        let candidates = match extract(email, sender, today) {
            Ok(candidates) => candidates,
            Err(err) => {
                result.record(PipelineError::Extraction {
                    message_id: email.message_id.clone(),
                    message: err.to_string(),
                });
                Vec::new()
            }
        };
        result.deals_found += candidates.len();

        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let report = validate(&candidate);
            if report.valid {
                accepted.push(candidate);
            } else {
                result.record(PipelineError::Validation {
                    message_id: email.message_id.clone(),
                    reasons: report.errors,
                });
            }
        }

        let mut stored = 0u32;
        for candidate in dedup_across_strategies(accepted) {
            match self.manager.persist(&candidate, email, sender, now).await {
                Ok(_) => stored += 1,
                Err(err) => result.record(PipelineError::Persistence(err)),
            }
        }
        result.deals_stored += stored as usize;
        result.emails_processed += 1;

        if stored > 0 {
            self.store.set_deals_extracted(&email.message_id, stored).await?;
        }
        info!(
            message_id = %email.message_id,
            sender = %sender.display_name,
            deals = stored,
            "email processed"
        );
        Ok(EmailOutcome::Ledgered)
    }
}
