use engine::LedgerSettings;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/ledger.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// `memory` for a throwaway in-process store, otherwise a sea-orm URL.
    pub database_url: String,
    /// Log level for the `ledger_admin` and `engine` targets.
    pub level: String,
    pub ledger: LedgerSettings,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./ledger.db?mode=rwc".to_string(),
            level: "info".to_string(),
            ledger: LedgerSettings::default(),
        }
    }
}

/// Layer the config file, then `LEDGER_*` environment variables
/// (`LEDGER_LEDGER__BATCH_LIMIT=200`), then CLI overrides.
pub fn load(
    path: Option<&str>,
    database_url: Option<String>,
) -> Result<AdminConfig, config::ConfigError> {
    let config_path = path.unwrap_or(DEFAULT_CONFIG_PATH);
    let mut builder = config::Config::builder();
    builder = builder.add_source(config::File::with_name(config_path).required(false));
    builder = builder.add_source(config::Environment::with_prefix("LEDGER").separator("__"));
    let mut settings: AdminConfig = builder.build()?.try_deserialize()?;

    if let Some(database_url) = database_url {
        settings.database_url = database_url;
    }

    Ok(settings)
}
