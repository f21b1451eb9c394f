//! 客户端配置
//!
//! `ClientConfig::load()` 合并 `es-mapper.toml` 与 `ES_MAPPER_*` 环境变量，环境变量优先

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    descriptor::DEFAULT_TIMEOUT_MS,
    error::{Error, Result},
};

pub const CONFIG_FILE: &str = "es-mapper.toml";
pub const ENV_PREFIX: &str = "ES_MAPPER_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// 只约束 `Client::translate` 和 `Client::execute`；描述符未声明超时时用 `DEFAULT_TIMEOUT_MS`
    pub default_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9200".to_string(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: 2_000,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 90,
            username: None,
            password: None,
        }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(ClientConfig::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: ClientConfig = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base_url must be an http(s) url: {}",
                self.base_url
            )));
        }
        if self.default_timeout_ms == 0 {
            return Err(Error::Config("default_timeout_ms must be positive".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Config("password set without username".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}
