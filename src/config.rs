use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once at startup
/// and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_dir: String,

    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
    /// Fallback max age for one-time objects nobody fetched, in seconds.
    pub max_age: i64,
    /// Longest lifetime a caller may request for a multi-download object.
    pub max_age_for_multi_download: i64,
    pub allow_lifetime_over_max_age: bool,
    pub enable_short_url: bool,
    pub password: Option<Secret>,
    pub short_url_service: String,

    pub sweep_interval: Duration,
    pub sweep_initial_delay: Duration,
    pub sweep_concurrency: usize,
    /// Keys fetched per listing page while sweeping.
    pub list_page_size: usize,
    pub reclaim_grace: Duration,
    pub reclaim_concurrency: usize,
    pub store_timeout: Duration,
    pub upload_timeout: Duration,
}

/// Shared password; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// The subset of configuration the ingestion and consumption paths read.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub max_upload_size: u64,
    pub max_age: i64,
    pub max_age_for_multi_download: i64,
    pub allow_lifetime_over_max_age: bool,
    pub enable_short_url: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "One-time and time-bounded blob drop service")]
pub struct Args {
    /// Host to bind to (overrides EPHEMERAL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides EPHEMERAL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides EPHEMERAL_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides EPHEMERAL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory holding index.html, style.css and upload.js (overrides EPHEMERAL_PUBLIC_DIR)
    #[arg(long)]
    pub public_dir: Option<String>,

    /// Maximum upload size in bytes (overrides EPHEMERAL_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Fallback max age of unread one-time objects, seconds (overrides EPHEMERAL_MAX_AGE)
    #[arg(long)]
    pub max_age: Option<i64>,

    /// Seconds between sweeper runs (overrides EPHEMERAL_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Apply the metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over values read through `lookup` over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| var("EPHEMERAL_HOST").unwrap_or_else(|| "0.0.0.0".into())),
            port: match args.port {
                Some(port) => port,
                None => parse_var(var("EPHEMERAL_PORT"), "EPHEMERAL_PORT", 3000)?,
            },
            storage_dir: args.storage_dir.unwrap_or_else(|| {
                var("EPHEMERAL_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into())
            }),
            database_url: args.database_url.unwrap_or_else(|| {
                var("EPHEMERAL_DATABASE_URL")
                    .unwrap_or_else(|| "sqlite://./data/meta/ephemeral.db".into())
            }),
            public_dir: args.public_dir.unwrap_or_else(|| {
                var("EPHEMERAL_PUBLIC_DIR").unwrap_or_else(|| "./public".into())
            }),
            max_upload_size: match args.max_upload_size {
                Some(size) => size,
                None => parse_var(
                    var("EPHEMERAL_MAX_UPLOAD_SIZE"),
                    "EPHEMERAL_MAX_UPLOAD_SIZE",
                    5 * 1024 * 1024 * 1024,
                )?,
            },
            max_age: match args.max_age {
                Some(age) => age,
                None => parse_var(var("EPHEMERAL_MAX_AGE"), "EPHEMERAL_MAX_AGE", 3600)?,
            },
            max_age_for_multi_download: parse_var(
                var("EPHEMERAL_MAX_AGE_FOR_MULTIDOWNLOAD"),
                "EPHEMERAL_MAX_AGE_FOR_MULTIDOWNLOAD",
                86400,
            )?,
            allow_lifetime_over_max_age: parse_flag(var("EPHEMERAL_ALLOW_LIFETIME_OVER_MAX_AGE")),
            enable_short_url: parse_flag(var("EPHEMERAL_ENABLE_SHORT_URL")),
            password: var("EPHEMERAL_PASSWORD").map(Secret),
            short_url_service: var("EPHEMERAL_SHORT_URL_SERVICE")
                .unwrap_or_else(|| "https://suosuo.de/short".into()),
            sweep_interval: Duration::from_secs(match args.sweep_interval_secs {
                Some(secs) => secs,
                None => parse_var(
                    var("EPHEMERAL_SWEEP_INTERVAL_SECS"),
                    "EPHEMERAL_SWEEP_INTERVAL_SECS",
                    300,
                )?,
            }),
            sweep_initial_delay: Duration::from_secs(parse_var(
                var("EPHEMERAL_SWEEP_INITIAL_DELAY_SECS"),
                "EPHEMERAL_SWEEP_INITIAL_DELAY_SECS",
                10,
            )?),
            sweep_concurrency: parse_var(
                var("EPHEMERAL_SWEEP_CONCURRENCY"),
                "EPHEMERAL_SWEEP_CONCURRENCY",
                32,
            )?,
            list_page_size: parse_var(
                var("EPHEMERAL_LIST_PAGE_SIZE"),
                "EPHEMERAL_LIST_PAGE_SIZE",
                1000,
            )?,
            reclaim_grace: Duration::from_millis(parse_var(
                var("EPHEMERAL_RECLAIM_GRACE_MS"),
                "EPHEMERAL_RECLAIM_GRACE_MS",
                100,
            )?),
            reclaim_concurrency: parse_var(
                var("EPHEMERAL_RECLAIM_CONCURRENCY"),
                "EPHEMERAL_RECLAIM_CONCURRENCY",
                16,
            )?,
            store_timeout: Duration::from_secs(parse_var(
                var("EPHEMERAL_STORE_TIMEOUT_SECS"),
                "EPHEMERAL_STORE_TIMEOUT_SECS",
                30,
            )?),
            upload_timeout: Duration::from_secs(parse_var(
                var("EPHEMERAL_UPLOAD_TIMEOUT_SECS"),
                "EPHEMERAL_UPLOAD_TIMEOUT_SECS",
                3600,
            )?),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            max_upload_size: self.max_upload_size,
            max_age: self.max_age,
            max_age_for_multi_download: self.max_age_for_multi_download,
            allow_lifetime_over_max_age: self.allow_lifetime_over_max_age,
            enable_short_url: self.enable_short_url,
        }
    }
}

fn parse_var<T>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(value.as_deref().map(str::trim), Some("true" | "1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.max_upload_size, 5_368_709_120);
        assert_eq!(cfg.max_age, 3600);
        assert_eq!(cfg.max_age_for_multi_download, 86400);
        assert!(!cfg.enable_short_url);
        assert!(cfg.password.is_none());
        assert_eq!(cfg.short_url_service, "https://suosuo.de/short");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert_eq!(cfg.reclaim_grace, Duration::from_millis(100));
    }

    #[test]
    fn args_override_env() {
        let args = Args::try_parse_from(["ephemeral-store", "--port", "8080", "--max-age", "60"])
            .unwrap();
        let cfg = AppConfig::resolve(
            args,
            env_of(&[
                ("EPHEMERAL_PORT", "9000"),
                ("EPHEMERAL_MAX_AGE", "120"),
                ("EPHEMERAL_PASSWORD", "hunter2"),
                ("EPHEMERAL_ENABLE_SHORT_URL", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_age, 60);
        assert_eq!(cfg.password, Some(Secret("hunter2".into())));
        assert!(cfg.enable_short_url);
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }

    #[test]
    fn malformed_numbers_are_startup_errors() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_MAX_UPLOAD_SIZE", "lots")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("EPHEMERAL_MAX_UPLOAD_SIZE"));
    }

    #[test]
    fn empty_password_means_no_password() {
        let cfg =
            AppConfig::resolve(Args::default(), env_of(&[("EPHEMERAL_PASSWORD", "")])).unwrap();
        assert!(cfg.password.is_none());
    }
}
