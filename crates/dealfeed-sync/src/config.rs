use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::TimeDelta;
use dealfeed_adapters::{MatchPolicy, SenderDirectory};
use dealfeed_storage::HttpClientConfig;
use secrecy::SecretString;

#[derive(Debug)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub inbox_dir: Option<PathBuf>,
    pub mail_api_url: Option<String>,
    pub mail_api_token: Option<SecretString>,
    pub trigger_secret: Option<SecretString>,
    pub hotel_api_url: Option<String>,
    pub hotel_api_key: Option<SecretString>,
    pub hotel_destinations: Vec<String>,
    pub hotel_cache_ttl: TimeDelta,
    pub hotel_call_delay: Duration,
    pub email_lookback_days: i64,
    pub email_max_per_run: usize,
    pub run_budget: Duration,
    pub senders_file: Option<PathBuf>,
    pub sender_match_policy: MatchPolicy,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub reports_dir: Option<PathBuf>,
    pub web_port: u16,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub log_json: bool,
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let secret = |key: &str| get(key).map(|v| SecretString::from(v.trim().to_string()));

        Self {
            database_url: get("DATABASE_URL"),
            inbox_dir: get("NEWSLETTER_INBOX_DIR").map(PathBuf::from),
            mail_api_url: get("MAIL_API_URL"),
            mail_api_token: secret("MAIL_API_TOKEN"),
            trigger_secret: secret("DEALS_TRIGGER_SECRET"),
            hotel_api_url: get("HOTEL_API_URL"),
            hotel_api_key: secret("HOTEL_API_KEY"),
            hotel_destinations: get("HOTEL_CACHE_DESTINATIONS")
                .map(|v| {
                    v.split(',')
                        .map(|d| d.trim().to_ascii_uppercase())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            hotel_cache_ttl: TimeDelta::minutes(parsed("HOTEL_CACHE_TTL_MINUTES", 360) as i64),
            hotel_call_delay: Duration::from_millis(parsed("HOTEL_CALL_DELAY_MS", 1000)),
            email_lookback_days: parsed("EMAIL_LOOKBACK_DAYS", 7) as i64,
            email_max_per_run: parsed("EMAIL_MAX_PER_RUN", 50) as usize,
            run_budget: Duration::from_secs(parsed("RUN_BUDGET_SECS", 240)),
            senders_file: get("SENDERS_FILE").map(PathBuf::from),
            sender_match_policy: get("SENDER_MATCH_POLICY")
                .and_then(|v| MatchPolicy::parse(&v))
                .unwrap_or_default(),
            scheduler_enabled: get("DEALFEED_SCHEDULER_ENABLED")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            sync_cron: get("SYNC_CRON").unwrap_or_else(|| "0 */6 * * *".to_string()),
            reports_dir: get("DEALFEED_REPORTS_DIR").map(PathBuf::from),
            web_port: get("DEALFEED_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8000),
            user_agent: get("DEALFEED_USER_AGENT")
                .unwrap_or_else(|| "dealfeed-bot/0.1".to_string()),
            http_timeout_secs: parsed("DEALFEED_HTTP_TIMEOUT_SECS", 20),
            log_json: get("DEALFEED_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        }
    }

    /// Built-in directory unless `SENDERS_FILE` points at a YAML replacement.
    pub fn sender_directory(&self) -> Result<SenderDirectory> {
        let directory = match &self.senders_file {
            Some(path) => SenderDirectory::load_yaml_file(path)?,
            None => SenderDirectory::builtin(),
        };
        Ok(directory.with_policy(self.sender_match_policy))
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            min_call_interval: self.hotel_call_delay,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = config(&[]);
        assert!(cfg.database_url.is_none());
        assert!(cfg.trigger_secret.is_none());
        assert_eq!(cfg.email_lookback_days, 7);
        assert_eq!(cfg.email_max_per_run, 50);
        assert_eq!(cfg.hotel_cache_ttl, TimeDelta::minutes(360));
        assert_eq!(cfg.hotel_call_delay, Duration::from_millis(1000));
        assert_eq!(cfg.run_budget, Duration::from_secs(240));
        assert_eq!(cfg.sender_match_policy, MatchPolicy::FirstInOrder);
        assert_eq!(cfg.web_port, 8000);
        assert!(!cfg.scheduler_enabled);
        assert!(!cfg.log_json);
    }

    #[test]
    fn values_are_parsed_and_blank_values_ignored() {
        let cfg = config(&[
            ("DEALS_TRIGGER_SECRET", " s3cret "),
            ("HOTEL_CACHE_DESTINATIONS", "cun, pvr,,SJD "),
            ("EMAIL_MAX_PER_RUN", "10"),
            ("RUN_BUDGET_SECS", "not-a-number"),
            ("SENDER_MATCH_POLICY", "longest"),
            ("DEALFEED_SCHEDULER_ENABLED", "true"),
            ("DEALFEED_LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "   "),
        ]);
        assert_eq!(cfg.trigger_secret.as_ref().unwrap().expose_secret(), "s3cret");
        assert_eq!(cfg.hotel_destinations, vec!["CUN", "PVR", "SJD"]);
        assert_eq!(cfg.email_max_per_run, 10);
        assert_eq!(cfg.run_budget, Duration::from_secs(240));
        assert_eq!(cfg.sender_match_policy, MatchPolicy::LongestDomain);
        assert!(cfg.scheduler_enabled);
        assert!(cfg.log_json);
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let cfg = config(&[("MAIL_API_TOKEN", "tok-123")]);
        assert!(!format!("{cfg:?}").contains("tok-123"));
    }
}
