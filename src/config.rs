use crate::prelude::*;

use crate::esy::registry_client::DEFAULT_BASE_URL;

use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub device: Device,
    pub mqtt: Mqtt,

    #[serde(default)]
    pub registry: Registry,

    #[serde(default)]
    pub scheduler: Scheduler,

    #[serde(default)]
    pub mode_change: ModeChange,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    pub serial: String,

    pub pv_power: Option<u32>,
    pub tp_type: Option<u32>,
    pub mcu_version: Option<u32>,
}

impl Device {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn pv_power(&self) -> u32 {
        self.pv_power.unwrap_or(6)
    }

    pub fn tp_type(&self) -> u32 {
        self.tp_type.unwrap_or(1)
    }

    pub fn mcu_version(&self) -> u32 {
        self.mcu_version.unwrap_or(1049)
    }

    pub fn up_topic(&self) -> String {
        format!("/ESY/PVVC/{}/UP", self.serial)
    }

    pub fn down_topic(&self) -> String {
        format!("/ESY/PVVC/{}/DOWN", self.serial)
    }

    pub fn event_topic(&self) -> String {
        format!("/ESY/PVVC/{}/EVENT", self.serial)
    }

    pub fn alarm_topic(&self) -> String {
        format!("/ESY/PVVC/{}/ALARM", self.serial)
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Registry {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "Config::default_registry_url")]
    pub url: String,

    pub token: Option<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            enabled: false,
            url: Config::default_registry_url(),
            token: None,
        }
    }
}

impl Registry {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> &str {
        self.token.as_deref().unwrap_or("")
    }
} // }}}

// Scheduler {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Scheduler {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Config::default_poll_interval(),
        }
    }
}

impl Scheduler {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn poll_interval(&self) -> u64 {
        self.poll_interval
    }
} // }}}

// ModeChange {{{
#[derive(Clone, Debug, Deserialize)]
pub struct ModeChange {
    #[serde(default = "Config::default_mode_timeout")]
    pub timeout: u64,

    #[serde(default = "Config::default_mode_retries")]
    pub max_retries: u8,
}

impl Default for ModeChange {
    fn default() -> Self {
        Self {
            timeout: Config::default_mode_timeout(),
            max_retries: Config::default_mode_retries(),
        }
    }
}

impl ModeChange {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "sunhome".to_string()
    }

    fn default_registry_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }

    fn default_poll_interval() -> u64 {
        15
    }

    fn default_mode_timeout() -> u64 {
        30
    }

    fn default_mode_retries() -> u8 {
        2
    }
}

/// Cheaply cloneable handle passed to every component.
#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn device(&self) -> &Device {
        &self.config.device
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.config.mqtt
    }

    pub fn registry(&self) -> &Registry {
        &self.config.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.config.scheduler
    }

    pub fn mode_change(&self) -> &ModeChange {
        &self.config.mode_change
    }

    pub fn loglevel(&self) -> String {
        self.config.loglevel.clone()
    }
}
