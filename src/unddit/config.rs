use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::unddit::live::MAX_CONTEXT_DEPTH;
use crate::unddit::removal::DEFAULT_ARCHIVE_CUTOVER_UTC;
use crate::unddit::retry::Backoff;
use crate::unddit::tree::{CommentFilter, SortOrder};

pub const MAX_COMMENTS_DEFAULT: usize = 800;
pub const MAX_COMMENTS_FLOOR: usize = 100;
pub const MAX_COMMENTS_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub page_size: usize,
    pub limiter_capacity: u32,
    pub limiter_interval_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_total_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pullpush.io".to_string(),
            page_size: 100,
            limiter_capacity: 15,
            limiter_interval_ms: 4_000,
            backoff_initial_ms: 125,
            backoff_total_ms: 8_000,
            timeout_secs: 30,
        }
    }
}

impl ArchiveConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_total_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub base_url: String,
    pub oauth_url: String,
    pub token_url: String,
    pub use_oauth: bool,
    pub client_id: String,
    pub device_id: String,
    pub batch_size: usize,
    pub limiter_capacity: u32,
    pub limiter_interval_ms: u64,
    pub quota_limit: f64,
    pub quota_reset_buffer_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_total_ms: u64,
    pub timeout_secs: u64,
    pub help_url: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.reddit.com".to_string(),
            oauth_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            use_oauth: true,
            client_id: "NAhiRYXXEFeIXyFazmhGHQ".to_string(),
            device_id: "DO_NOT_TRACK_THIS_DEVICE".to_string(),
            batch_size: 100,
            limiter_capacity: 10,
            limiter_interval_ms: 1_000,
            quota_limit: 100.0,
            quota_reset_buffer_ms: 2_000,
            backoff_initial_ms: 125,
            backoff_total_ms: 4_000,
            timeout_secs: 30,
            help_url: Some("https://www.unddit.com/about".to_string()),
        }
    }
}

impl LiveConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_total_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    pub max_comments: usize,
    pub sort: SortOrder,
    pub filter: CommentFilter,
    pub context_depth: u8,
    pub flush_threshold: usize,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            max_comments: MAX_COMMENTS_DEFAULT,
            sort: SortOrder::Top,
            filter: CommentFilter::RemovedDeleted,
            context_depth: MAX_CONTEXT_DEPTH,
            flush_threshold: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    pub archive_cutover_utc: i64,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            archive_cutover_utc: DEFAULT_ARCHIVE_CUTOVER_UTC,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UndditConfig {
    pub archive: ArchiveConfig,
    pub live: LiveConfig,
    pub comments: CommentsConfig,
    pub removal: RemovalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialUndditConfig {
    archive: Option<ArchiveConfig>,
    live: Option<LiveConfig>,
    comments: Option<CommentsConfig>,
    removal: Option<RemovalConfig>,
}

/// Round, clamp to the limit, and fall back to the floor for anything
/// smaller or not a number.
pub fn normalize_max_comments(raw: f64) -> usize {
    if raw.is_nan() {
        return MAX_COMMENTS_FLOOR;
    }
    let rounded = raw.round().min(MAX_COMMENTS_LIMIT as f64);
    if rounded >= MAX_COMMENTS_FLOOR as f64 {
        rounded as usize
    } else {
        MAX_COMMENTS_FLOOR
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_i64(var: &str, fallback: i64) -> i64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &UndditConfig) -> Result<()> {
    for (name, url) in [
        ("archive.base_url", &cfg.archive.base_url),
        ("live.base_url", &cfg.live.base_url),
        ("live.oauth_url", &cfg.live.oauth_url),
        ("live.token_url", &cfg.live.token_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("invalid {name}: expected an http(s) URL, got `{url}`"));
        }
    }
    if cfg.archive.page_size == 0 || cfg.archive.page_size > 1_000 {
        return Err(anyhow!("invalid archive page size: require 1..=1000"));
    }
    if cfg.live.batch_size == 0 || cfg.live.batch_size > 100 {
        return Err(anyhow!("invalid live batch size: require 1..=100"));
    }
    if cfg.archive.limiter_capacity == 0 || cfg.live.limiter_capacity == 0 {
        return Err(anyhow!("invalid limiter capacity: must be >= 1"));
    }
    if cfg.archive.limiter_interval_ms == 0 || cfg.live.limiter_interval_ms == 0 {
        return Err(anyhow!("invalid limiter interval: must be >= 1 ms"));
    }
    if cfg.archive.backoff_initial_ms == 0 || cfg.live.backoff_initial_ms == 0 {
        return Err(anyhow!("invalid backoff: initial delay must be >= 1 ms"));
    }
    if !(cfg.live.quota_limit >= 1.0) {
        return Err(anyhow!("invalid live quota limit: must be >= 1"));
    }
    if cfg.live.use_oauth && cfg.live.client_id.trim().is_empty() {
        return Err(anyhow!("invalid live client id: required when use_oauth is on"));
    }
    if cfg.comments.context_depth > MAX_CONTEXT_DEPTH {
        return Err(anyhow!(
            "invalid context depth: must be <= {MAX_CONTEXT_DEPTH}"
        ));
    }
    if cfg.comments.flush_threshold == 0 {
        return Err(anyhow!("invalid flush threshold: must be >= 1"));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("UNDDIT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let config_dir = dirs::config_dir()?;
    Some(config_dir.join("unddit").join("unddit.toml"))
}

fn merge_toml(base: &mut UndditConfig, raw: &str) -> Result<()> {
    let parsed: PartialUndditConfig = toml::from_str(raw)?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(live) = parsed.live {
        base.live = live;
    }
    if let Some(comments) = parsed.comments {
        base.comments = comments;
    }
    if let Some(removal) = parsed.removal {
        base.removal = removal;
    }
    Ok(())
}

fn merge_file_config(base: &mut UndditConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse unddit config {}: {err}", path.display()))
}

fn apply_env(cfg: &mut UndditConfig) {
    cfg.archive.base_url = env_or_string("UNDDIT_ARCHIVE_BASE_URL", &cfg.archive.base_url);
    cfg.archive.page_size =
        env_or_u64("UNDDIT_ARCHIVE_PAGE_SIZE", cfg.archive.page_size as u64) as usize;
    cfg.archive.backoff_total_ms =
        env_or_u64("UNDDIT_ARCHIVE_BACKOFF_TOTAL_MS", cfg.archive.backoff_total_ms);

    cfg.live.base_url = env_or_string("UNDDIT_LIVE_BASE_URL", &cfg.live.base_url);
    cfg.live.oauth_url = env_or_string("UNDDIT_LIVE_OAUTH_URL", &cfg.live.oauth_url);
    cfg.live.token_url = env_or_string("UNDDIT_LIVE_TOKEN_URL", &cfg.live.token_url);
    cfg.live.use_oauth = env_or_bool("UNDDIT_LIVE_USE_OAUTH", cfg.live.use_oauth);
    cfg.live.client_id = env_or_string("UNDDIT_LIVE_CLIENT_ID", &cfg.live.client_id);
    cfg.live.quota_limit = env_or_f64("UNDDIT_LIVE_QUOTA_LIMIT", cfg.live.quota_limit);
    cfg.live.backoff_total_ms =
        env_or_u64("UNDDIT_LIVE_BACKOFF_TOTAL_MS", cfg.live.backoff_total_ms);
    if let Ok(url) = env::var("UNDDIT_LIVE_HELP_URL") {
        let url = url.trim();
        cfg.live.help_url = (!url.is_empty()).then(|| url.to_string());
    }

    if let Ok(raw) = env::var("UNDDIT_MAX_COMMENTS") {
        let raw = raw.trim().parse().unwrap_or(f64::NAN);
        cfg.comments.max_comments = normalize_max_comments(raw);
    }
    cfg.comments.context_depth = env_or_u64(
        "UNDDIT_CONTEXT_DEPTH",
        u64::from(cfg.comments.context_depth),
    )
    .min(u64::from(MAX_CONTEXT_DEPTH)) as u8;
    cfg.removal.archive_cutover_utc =
        env_or_i64("UNDDIT_ARCHIVE_CUTOVER_UTC", cfg.removal.archive_cutover_utc);
}

pub fn load_config() -> Result<UndditConfig> {
    let mut cfg = UndditConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env(&mut cfg);
    cfg.comments.max_comments = normalize_max_comments(cfg.comments.max_comments as f64);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = UndditConfig::default();
        validate(&cfg).expect("defaults validate");
        assert_eq!(cfg.archive.backoff().max_total, Duration::from_millis(8_000));
        assert_eq!(cfg.live.backoff().max_total, Duration::from_millis(4_000));
        assert_eq!(cfg.comments.max_comments, 800);
    }

    #[test]
    fn max_comments_is_rounded_and_clamped() {
        assert_eq!(normalize_max_comments(250.4), 250);
        assert_eq!(normalize_max_comments(99.6), 100);
        assert_eq!(normalize_max_comments(12.0), 100);
        assert_eq!(normalize_max_comments(f64::NAN), 100);
        assert_eq!(normalize_max_comments(1e9), 20_000);
        assert_eq!(normalize_max_comments(f64::INFINITY), 20_000);
        assert_eq!(normalize_max_comments(f64::NEG_INFINITY), 100);
    }

    #[test]
    fn file_sections_replace_defaults() {
        let mut cfg = UndditConfig::default();
        merge_toml(
            &mut cfg,
            r#"
[comments]
max_comments = 1500
sort = "new"
filter = "all"

[removal]
archive_cutover_utc = 42
"#,
        )
        .expect("parse");
        assert_eq!(cfg.comments.max_comments, 1500);
        assert_eq!(cfg.comments.sort, SortOrder::New);
        assert_eq!(cfg.comments.filter, CommentFilter::All);
        assert_eq!(cfg.comments.context_depth, MAX_CONTEXT_DEPTH);
        assert_eq!(cfg.removal.archive_cutover_utc, 42);
        assert_eq!(cfg.archive.page_size, 100);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = UndditConfig::default();
        cfg.live.batch_size = 101;
        assert!(validate(&cfg).is_err());

        let mut cfg = UndditConfig::default();
        cfg.archive.base_url = "ftp://archive".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = UndditConfig::default();
        cfg.comments.context_depth = 9;
        assert!(validate(&cfg).is_err());
    }
}
