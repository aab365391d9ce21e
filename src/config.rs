use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::EndpointConfig;
use crate::error::{AmpooseError, Result};
use crate::export::{ExportMode, ExportSettings};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub client: Option<ClientConfig>,
    #[serde(default)]
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub calibrate: Option<CalibrateConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientConfig {
    pub page_url: Option<String>,
    pub origin: Option<String>,
    pub host_snapshot: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub mirror_host: Option<String>,
    pub mirror_fallbacks: Option<Vec<String>>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExportConfig {
    pub mode: Option<ExportMode>,
    pub count: Option<usize>,
    pub days: Option<u32>,
    pub date_filter: Option<bool>,
    pub chunk_size: Option<usize>,
    pub page_size: Option<u32>,
    pub out_dir: Option<PathBuf>,
    pub request_delay_ms: Option<u64>,
    pub backoff_after_pages: Option<u32>,
    pub jitter_min_ms: Option<u64>,
    pub jitter_max_ms: Option<u64>,
    pub duplicate_threshold: Option<u32>,
    pub log_cap: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrateConfig {
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub cdp_host: Option<String>,
    pub cdp_port: Option<u16>,
    pub target: Option<String>,
    pub profile_url: Option<String>,
    pub scroll_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ResolvedConfig {
    pub store: ResolvedStoreConfig,
    pub client: ResolvedClientConfig,
    pub export: ResolvedExportConfig,
    pub calibrate: ResolvedCalibrateConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedStoreConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedClientConfig {
    pub page_url: String,
    pub origin: Option<String>,
    pub host_snapshot: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub mirror_host: String,
    pub mirror_fallbacks: Vec<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedExportConfig {
    pub mode: ExportMode,
    pub count: usize,
    pub days: u32,
    pub date_filter: bool,
    pub chunk_size: usize,
    pub page_size: u32,
    pub out_dir: PathBuf,
    pub request_delay_ms: u64,
    pub backoff_after_pages: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub duplicate_threshold: u32,
    pub log_cap: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedCalibrateConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub cdp_host: String,
    pub cdp_port: u16,
    pub target: Option<String>,
    pub profile_url: Option<String>,
    pub scroll_interval_ms: u64,
}

impl Default for ResolvedStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ampoose.db"),
        }
    }
}

impl Default for ResolvedClientConfig {
    fn default() -> Self {
        let endpoints = EndpointConfig::default();
        Self {
            page_url: endpoints.page_url,
            origin: None,
            host_snapshot: None,
            endpoint: None,
            timeout_secs: 30,
            mirror_host: endpoints.mirror_host,
            mirror_fallbacks: endpoints.mirror_fallbacks,
            user_agent: None,
        }
    }
}

impl Default for ResolvedExportConfig {
    fn default() -> Self {
        let settings = ExportSettings::default();
        Self {
            mode: settings.mode,
            count: settings.count,
            days: settings.days,
            date_filter: settings.date_filter,
            chunk_size: settings.chunk_size,
            page_size: settings.page_size,
            out_dir: PathBuf::from("."),
            request_delay_ms: millis(settings.request_delay),
            backoff_after_pages: settings.backoff_after_pages,
            jitter_min_ms: millis(settings.jitter_min),
            jitter_max_ms: millis(settings.jitter_max),
            duplicate_threshold: settings.duplicate_threshold,
            log_cap: settings.log_cap,
        }
    }
}

impl Default for ResolvedCalibrateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poll_interval_ms: 500,
            cdp_host: "127.0.0.1".to_string(),
            cdp_port: 9222,
            target: None,
            profile_url: None,
            scroll_interval_ms: 1500,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ResolvedConfig {
    pub fn from_config(config: &Config) -> Self {
        let mut resolved = Self::default();
        if let Some(cfg) = &config.store {
            resolved.store.apply(cfg);
        }
        if let Some(cfg) = &config.client {
            resolved.client.apply(cfg);
        }
        if let Some(cfg) = &config.export {
            resolved.export.apply(cfg);
        }
        if let Some(cfg) = &config.calibrate {
            resolved.calibrate.apply(cfg);
        }
        resolved
    }
}

impl ResolvedStoreConfig {
    fn apply(&mut self, cfg: &StoreConfig) {
        if let Some(value) = cfg.path.clone() {
            self.path = value;
        }
    }
}

impl ResolvedClientConfig {
    fn apply(&mut self, cfg: &ClientConfig) {
        if let Some(value) = cfg.page_url.clone() {
            self.page_url = value;
        }
        if let Some(value) = cfg.origin.clone() {
            self.origin = Some(value);
        }
        if let Some(value) = cfg.host_snapshot.clone() {
            self.host_snapshot = Some(value);
        }
        if let Some(value) = cfg.endpoint.clone() {
            self.endpoint = Some(value);
        }
        if let Some(value) = cfg.timeout_secs {
            self.timeout_secs = value;
        }
        if let Some(value) = cfg.mirror_host.clone() {
            self.mirror_host = value;
        }
        if let Some(value) = cfg.mirror_fallbacks.clone() {
            self.mirror_fallbacks = value;
        }
        if let Some(value) = cfg.user_agent.clone() {
            self.user_agent = Some(value);
        }
    }

    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            page_url: self.page_url.clone(),
            origin: self.origin.clone(),
            mirror_host: self.mirror_host.clone(),
            mirror_fallbacks: self.mirror_fallbacks.clone(),
        }
    }

    /// `None` when timeouts are disabled with `timeout_secs = 0`.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl ResolvedExportConfig {
    fn apply(&mut self, cfg: &ExportConfig) {
        if let Some(value) = cfg.mode {
            self.mode = value;
        }
        if let Some(value) = cfg.count {
            self.count = value;
        }
        if let Some(value) = cfg.days {
            self.days = value;
        }
        if let Some(value) = cfg.date_filter {
            self.date_filter = value;
        }
        if let Some(value) = cfg.chunk_size {
            self.chunk_size = value;
        }
        if let Some(value) = cfg.page_size {
            self.page_size = value;
        }
        if let Some(value) = cfg.out_dir.clone() {
            self.out_dir = value;
        }
        if let Some(value) = cfg.request_delay_ms {
            self.request_delay_ms = value;
        }
        if let Some(value) = cfg.backoff_after_pages {
            self.backoff_after_pages = value;
        }
        if let Some(value) = cfg.jitter_min_ms {
            self.jitter_min_ms = value;
        }
        if let Some(value) = cfg.jitter_max_ms {
            self.jitter_max_ms = value;
        }
        if let Some(value) = cfg.duplicate_threshold {
            self.duplicate_threshold = value;
        }
        if let Some(value) = cfg.log_cap {
            self.log_cap = value;
        }
    }

    /// Controller settings. The pinned endpoint lives in the client section.
    pub fn settings(&self, endpoint: Option<String>) -> ExportSettings {
        ExportSettings {
            mode: self.mode,
            count: self.count,
            days: self.days,
            date_filter: self.date_filter,
            chunk_size: self.chunk_size,
            page_size: self.page_size,
            request_delay: Duration::from_millis(self.request_delay_ms),
            backoff_after_pages: self.backoff_after_pages,
            jitter_min: Duration::from_millis(self.jitter_min_ms),
            jitter_max: Duration::from_millis(self.jitter_max_ms.max(self.jitter_min_ms)),
            duplicate_threshold: self.duplicate_threshold,
            log_cap: self.log_cap,
            endpoint,
        }
    }
}

impl ResolvedCalibrateConfig {
    fn apply(&mut self, cfg: &CalibrateConfig) {
        if let Some(value) = cfg.timeout_secs {
            self.timeout_secs = value;
        }
        if let Some(value) = cfg.poll_interval_ms {
            self.poll_interval_ms = value;
        }
        if let Some(value) = cfg.cdp_host.clone() {
            self.cdp_host = value;
        }
        if let Some(value) = cfg.cdp_port {
            self.cdp_port = value;
        }
        if let Some(value) = cfg.target.clone() {
            self.target = Some(value);
        }
        if let Some(value) = cfg.profile_url.clone() {
            self.profile_url = Some(value);
        }
        if let Some(value) = cfg.scroll_interval_ms {
            self.scroll_interval_ms = value;
        }
    }
}

pub fn load_config() -> Result<Config> {
    let mut config = Config::default();
    let paths = config_search_paths()?;
    for path in paths {
        if !path.exists() {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        let parsed = parse_config(&contents).map_err(|err| {
            AmpooseError::InvalidArgs(format!(
                "Failed to parse config {}: {}",
                path.display(),
                err
            ))
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        merge_config(&mut config, parsed);
    }
    Ok(config)
}

fn parse_config(contents: &str) -> std::result::Result<Config, toml::de::Error> {
    toml::from_str(contents)
}

fn merge_config(base: &mut Config, other: Config) {
    merge_section(&mut base.store, other.store, StoreConfig::merge);
    merge_section(&mut base.client, other.client, ClientConfig::merge);
    merge_section(&mut base.export, other.export, ExportConfig::merge);
    merge_section(&mut base.calibrate, other.calibrate, CalibrateConfig::merge);
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
    if let Some(other_section) = other {
        match base {
            Some(existing) => merge(existing, other_section),
            None => *base = Some(other_section),
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, other: StoreConfig) {
        merge_opt(&mut self.path, other.path);
    }
}

impl ClientConfig {
    fn merge(&mut self, other: ClientConfig) {
        merge_opt(&mut self.page_url, other.page_url);
        merge_opt(&mut self.origin, other.origin);
        merge_opt(&mut self.host_snapshot, other.host_snapshot);
        merge_opt(&mut self.endpoint, other.endpoint);
        merge_opt(&mut self.timeout_secs, other.timeout_secs);
        merge_opt(&mut self.mirror_host, other.mirror_host);
        merge_opt(&mut self.mirror_fallbacks, other.mirror_fallbacks);
        merge_opt(&mut self.user_agent, other.user_agent);
    }
}

impl ExportConfig {
    fn merge(&mut self, other: ExportConfig) {
        merge_opt(&mut self.mode, other.mode);
        merge_opt(&mut self.count, other.count);
        merge_opt(&mut self.days, other.days);
        merge_opt(&mut self.date_filter, other.date_filter);
        merge_opt(&mut self.chunk_size, other.chunk_size);
        merge_opt(&mut self.page_size, other.page_size);
        merge_opt(&mut self.out_dir, other.out_dir);
        merge_opt(&mut self.request_delay_ms, other.request_delay_ms);
        merge_opt(&mut self.backoff_after_pages, other.backoff_after_pages);
        merge_opt(&mut self.jitter_min_ms, other.jitter_min_ms);
        merge_opt(&mut self.jitter_max_ms, other.jitter_max_ms);
        merge_opt(&mut self.duplicate_threshold, other.duplicate_threshold);
        merge_opt(&mut self.log_cap, other.log_cap);
    }
}

impl CalibrateConfig {
    fn merge(&mut self, other: CalibrateConfig) {
        merge_opt(&mut self.timeout_secs, other.timeout_secs);
        merge_opt(&mut self.poll_interval_ms, other.poll_interval_ms);
        merge_opt(&mut self.cdp_host, other.cdp_host);
        merge_opt(&mut self.cdp_port, other.cdp_port);
        merge_opt(&mut self.target, other.target);
        merge_opt(&mut self.profile_url, other.profile_url);
        merge_opt(&mut self.scroll_interval_ms, other.scroll_interval_ms);
    }
}

fn merge_opt<T>(base: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *base = other;
    }
}

fn config_search_paths() -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    if let Some(home) = home_dir() {
        if let Some(config_home) = config_home_dir(&home) {
            paths.push(config_home.join("ampoose").join("ampoose.toml"));
        }
        if let Some(appdata) = env::var_os("APPDATA") {
            paths.push(PathBuf::from(appdata).join("ampoose").join("ampoose.toml"));
        }
        paths.push(home.join(".ampooserc"));
    }

    if let Ok(cwd) = env::current_dir() {
        let mut dirs = Vec::new();
        let mut current: Option<&Path> = Some(cwd.as_path());
        while let Some(dir) = current {
            dirs.push(dir.to_path_buf());
            current = dir.parent();
        }
        dirs.reverse();
        for dir in dirs {
            paths.push(dir.join(".ampooserc"));
            paths.push(dir.join("ampoose.toml"));
        }
    }

    Ok(paths)
}

fn config_home_dir(home: &Path) -> Option<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    Some(home.join(".config"))
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}

pub fn render_config(config: &ResolvedConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|err| AmpooseError::InvalidArgs(format!("Failed to render config: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_file() {
        let resolved = ResolvedConfig::from_config(&Config::default());
        assert_eq!(resolved.store.path, PathBuf::from("ampoose.db"));
        assert_eq!(resolved.client.timeout_secs, 30);
        assert_eq!(resolved.export.chunk_size, 500);
        assert_eq!(resolved.export.request_delay_ms, 1200);
        assert_eq!(resolved.calibrate.cdp_port, 9222);
        assert_eq!(resolved.export.settings(None), ExportSettings::default());
    }

    #[test]
    fn later_files_win_per_key() {
        let mut config = parse_config(
            r#"
            [export]
            mode = "count"
            count = 10
            [client]
            timeout_secs = 5
            "#,
        )
        .expect("first config parses");
        let second = parse_config(
            r#"
            [export]
            count = 25
            [calibrate]
            profile_url = "https://www.facebook.com/someone"
            "#,
        )
        .expect("second config parses");
        merge_config(&mut config, second);

        let resolved = ResolvedConfig::from_config(&config);
        assert_eq!(resolved.export.mode, ExportMode::Count);
        assert_eq!(resolved.export.count, 25);
        assert_eq!(resolved.client.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            resolved.calibrate.profile_url.as_deref(),
            Some("https://www.facebook.com/someone")
        );
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        assert!(parse_config("[export]\nmode = \"forever\"\n").is_err());
    }

    #[test]
    fn jitter_bounds_never_invert() {
        let mut resolved = ResolvedExportConfig::default();
        resolved.jitter_min_ms = 3000;
        resolved.jitter_max_ms = 1000;
        let settings = resolved.settings(Some("https://x/api/graphql/".to_string()));
        assert_eq!(settings.jitter_max, Duration::from_millis(3000));
        assert_eq!(settings.endpoint.as_deref(), Some("https://x/api/graphql/"));
    }

    #[test]
    fn renders_as_toml() {
        let rendered = render_config(&ResolvedConfig::default()).expect("render");
        assert!(rendered.contains("[export]"));
        assert!(rendered.contains("mode = \"all\""));
        assert!(rendered.contains("cdp_host = \"127.0.0.1\""));
    }
}
