use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub firestore: FirestoreConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Firestore,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub app_id: String,
    /// Full collection path. Defaults to `artifacts/{app_id}/public/data/chats`.
    pub collection: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub emulator_host: Option<String>,
    pub page_size: u32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: "(default)".to_string(),
            app_id: "academic-matchmaker".to_string(),
            collection: None,
            api_key: None,
            access_token: None,
            emulator_host: None,
            page_size: 300,
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_seconds: 30,
        }
    }
}

impl FirestoreConfig {
    pub fn collection_path(&self) -> String {
        match &self.collection {
            Some(c) => c.trim_matches('/').to_string(),
            None => format!("artifacts/{}/public/data/chats", self.app_id),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub table: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 2,
            table: "chats".to_string(),
        }
    }
}

/// Which record wins when two duplicates have the same effective timestamp.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Smallest record id wins.
    #[default]
    RecordId,
    /// First record returned by the store wins.
    FetchOrder,
}

/// Where a record without `createdAt` sorts relative to timestamped ones.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimestampPolicy {
    /// Treated as epoch 0, so it is kept over any timestamped duplicate.
    #[default]
    Earliest,
    /// Sorts after every timestamped duplicate.
    Latest,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ResolverConfig {
    pub tie_break: TieBreak,
    pub missing_timestamp: MissingTimestampPolicy,
    pub dry_run: bool,
}

impl SweepConfig {
    /// Load from a TOML file, then apply `CHATSWEEP__SECTION__KEY` env overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}

/// `CHATSWEEP__<SECTION>__<KEY>` overrides, e.g. `CHATSWEEP__RESOLVER__DRY_RUN=true`.
fn environment() -> Environment {
    Environment::with_prefix("CHATSWEEP")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
