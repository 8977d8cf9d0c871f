use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::cost::CostSchedule;
use crate::params::Params;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_LOG_FILTER: &str = "crontask=info";

/// Top-level config (crontask.toml + CRONTASK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrontaskConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Used to seed the store when it holds no params and no genesis is given.
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub costs: CostSchedule,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// The only address allowed to update params. Unset means nobody can.
    pub authority: Option<String>,
    /// Capacity of the task event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            authority: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.crontask/crontask.db", home)
}

impl CrontaskConfig {
    /// Load config from a TOML file, then apply env var overrides.
    /// Nested keys use a double underscore: `CRONTASK_NODE__TICK_INTERVAL_MS`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CrontaskConfig = Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.params.validate()?;
        Ok(config)
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONTASK_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.crontask/crontask.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: CrontaskConfig = CrontaskConfig::figment("/nonexistent/crontask.toml")
            .extract()
            .unwrap();
        assert_eq!(cfg.node.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(cfg.params, Params::default());
        assert_eq!(cfg.log.filter, "crontask=info");
    }

    #[test]
    fn toml_sections_are_read() {
        let toml = r#"
            [node]
            tick_interval_ms = 250
            authority = "dys1qypqxpq9qcrsszg2"

            [params]
            cost_budget_per_cycle = 5000
            fee_denom = "stake"

            [costs]
            op_base = 7
        "#;
        let cfg: CrontaskConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(cfg.node.tick_interval_ms, 250);
        assert_eq!(cfg.node.authority.as_deref(), Some("dys1qypqxpq9qcrsszg2"));
        assert_eq!(cfg.params.cost_budget_per_cycle, 5000);
        assert_eq!(cfg.params.fee_denom, "stake");
        assert_eq!(cfg.params.default_expiry_window, 86_400);
        assert_eq!(cfg.costs.op_base, 7);
        assert_eq!(cfg.costs.write_flat, CostSchedule::default().write_flat);
    }
}
