//!
//! src/config.rs  Andrew Belles  Oct 2025
//!
//! Loads every setting the sorter needs from the environment
//! (optionally seeded from a .env file) and validates it at startup
//!

use std::{net::SocketAddr, str::FromStr, time};
use url::Url;
use crate::errors::SorterError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 4;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Constants for the sync + classification pipeline
pub const TRACK_PAGE_SIZE: u32 = 100;
pub const ARTIST_PAGE_SIZE: u32 = 50;
pub const FEATURES_PAGE_SIZE: u32 = 100;
pub const CORPUS_MAX_CHARS: usize = 50_000;
pub const CORPUS_SHUFFLE_SEED: u64 = 0;
pub const DESCRIPTION_MAX_CHARS: usize = 512;
pub const MODEL_MAX_ATTEMPTS: u32 = 3;
pub const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, SorterError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SorterError::Config(format!("{s} was not set"))),
    }
}

fn env_or(s: &str, default: &str) -> String {
    std::env::var(s).unwrap_or_else(|_| default.to_string())
}

/// Parses an env var, falling back to default when unset or malformed
fn env_parse<T: FromStr>(s: &str, default: T) -> T {
    match std::env::var(s) {
        Ok(v) => v.trim().parse::<T>().unwrap_or(default),
        Err(_) => default
    }
}

/// Ensures that url is https
pub(crate) fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

pub(crate) fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

/// Url::join drops the last segment unless the base ends in '/'
pub(crate) fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url, SorterError> {
    Url::parse(raw).map_err(|e| SorterError::Config(format!("{name} invalid {e}")))
}

///
/// Configuration that Spotify expects when hitting endpoints
///
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_url: Url,
    pub api_base: Url,
}

fn build_spotify() -> Result<SpotifyConfig, SorterError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;
    let redirect_uri  = env_or("SPOTIFY_REDIRECT_URI", "http://localhost:3000");

    let token_url = parse_url(
        "SPOTIFY_TOKEN_URL",
        &env_or("SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token")
    )?;
    let mut api_base = parse_url(
        "SPOTIFY_API_BASE",
        &env_or("SPOTIFY_API_BASE", "https://api.spotify.com/v1/")
    )?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(SorterError::Config)?;
    ensure_https(&api_base).map_err(SorterError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(SorterError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(SorterError::Config)?;
    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig { client_id, client_secret, redirect_uri, token_url, api_base } )
}

///
/// Configuration for the OpenAI-compatible text generation endpoint
///
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: Url,
    pub model: String,
    pub temperature: f32,
    pub timeout: time::Duration,
}

fn build_llm() -> Result<LlmConfig, SorterError> {
    let api_key = env_check("LLM_API_KEY")?;
    let mut api_base = parse_url(
        "LLM_API_BASE",
        &env_or("LLM_API_BASE", "https://api.openai.com/v1/")
    )?;
    if !matches!(api_base.scheme(), "http" | "https") {
        return Err(SorterError::Config(format!("LLM_API_BASE must be http(s): {api_base}")));
    }
    ensure_trailing_slash(&mut api_base);

    Ok( LlmConfig {
        api_key,
        api_base,
        model: env_or("LLM_MODEL", "gpt-3.5-turbo"),
        temperature: env_parse("LLM_TEMPERATURE", 0.0),
        timeout: time::Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 120)),
    })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for the cache tables, either in sqlite or in compressed .json
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Snapshot
}

impl FromStr for StoreBackend {
    type Err = SorterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite"   => Ok(StoreBackend::Sqlite),
            "snapshot" => Ok(StoreBackend::Snapshot),
            other => Err(SorterError::Config(format!("unknown CACHE_BACKEND {other}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub backend: StoreBackend,
    pub db_url: String,
    pub snapshot_root: String,
    pub snapshot_level: i32
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_url: "sqlite:./data/cache.db".to_string(),
            snapshot_root: "./data/cache".to_string(),
            snapshot_level: 3
        }
    }
}

fn build_persistence() -> Result<PersistenceConfig, SorterError> {
    let defaults = PersistenceConfig::default();
    let backend = match std::env::var("CACHE_BACKEND") {
        Ok(v) => v.parse::<StoreBackend>()?,
        Err(_) => defaults.backend
    };

    Ok( PersistenceConfig {
        backend,
        db_url: env_or("CACHE_DB_URL", &defaults.db_url),
        snapshot_root: env_or("CACHE_SNAPSHOT_ROOT", &defaults.snapshot_root),
        snapshot_level: env_parse("CACHE_SNAPSHOT_LEVEL", defaults.snapshot_level),
    })
}

///
/// Page sizes, corpus budget and model retry bounds
///
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub track_page_size: u32,
    pub artist_page_size: u32,
    pub features_page_size: u32,
    pub corpus_max_chars: usize,
    pub shuffle_seed: u64,
    pub description_max_chars: usize,
    pub model_max_attempts: u32,
    pub stream_capacity: usize
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            track_page_size: TRACK_PAGE_SIZE,
            artist_page_size: ARTIST_PAGE_SIZE,
            features_page_size: FEATURES_PAGE_SIZE,
            corpus_max_chars: CORPUS_MAX_CHARS,
            shuffle_seed: CORPUS_SHUFFLE_SEED,
            description_max_chars: DESCRIPTION_MAX_CHARS,
            model_max_attempts: MODEL_MAX_ATTEMPTS,
            stream_capacity: STREAM_CHANNEL_CAPACITY
        }
    }
}

fn build_pipeline() -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        corpus_max_chars: env_parse("CORPUS_MAX_CHARS", defaults.corpus_max_chars),
        shuffle_seed: env_parse("CORPUS_SHUFFLE_SEED", defaults.shuffle_seed),
        model_max_attempts: env_parse("MODEL_MAX_ATTEMPTS", defaults.model_max_attempts)
            .max(1),
        ..defaults
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr
}

fn build_server() -> Result<ServerConfig, SorterError> {
    let raw = env_or("BIND_ADDR", "127.0.0.1:5000");
    let bind_addr = raw.parse::<SocketAddr>()
        .map_err(|e| SorterError::Config(format!("BIND_ADDR invalid {e}")))?;
    Ok( ServerConfig { bind_addr } )
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,playlist_sorter=debug,reqwest=warn,sqlx=warn"
                .to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true
        }
    }
}

fn build_logging() -> LoggingConfig {
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json
    };
    LoggingConfig { format, ..LoggingConfig::default() }
}

///
/// AppConfig which holds everything the server, clients and pipeline need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub llm: LlmConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, SorterError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let llm         = build_llm()?;
    let http        = HttpConfig::default();
    let persistence = build_persistence()?;
    let pipeline    = build_pipeline();
    let server      = build_server()?;
    let logging     = build_logging();

    Ok( AppConfig { spotify, llm, http, persistence, pipeline, server, logging } )
}
