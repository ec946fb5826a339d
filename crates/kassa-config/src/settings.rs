//! Typed view over the merged config document.
//!
//! Every section is optional; missing keys take the defaults below. Sources
//! are disabled unless their section says `enabled: true`.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KassaConfig {
    pub daemon: DaemonSettings,
    pub workday: WorkDay,
    pub sources: SourcesConfig,
    pub audit: AuditSettings,
    pub directory: DirectoryConfig,
}

impl KassaConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: KassaConfig =
            serde_json::from_value(config_json.clone()).context("config does not match schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.workday.work_start_hour > 23 {
            bail!(
                "CONFIG_INVALID /workday/work_start_hour={} (expected 0..=23)",
                self.workday.work_start_hour
            );
        }
        if self.workday.work_end_hour > 23 {
            bail!(
                "CONFIG_INVALID /workday/work_end_hour={} (expected 0..=23)",
                self.workday.work_end_hour
            );
        }

        let urls = [
            ("pos", self.sources.pos.enabled, &self.sources.pos.base_url),
            (
                "card_gateway",
                self.sources.card_gateway.enabled,
                &self.sources.card_gateway.base_url,
            ),
            (
                "click_gateway",
                self.sources.click_gateway.enabled,
                &self.sources.click_gateway.ws_url,
            ),
            (
                "marketplace",
                self.sources.marketplace.enabled,
                &self.sources.marketplace.base_url,
            ),
            ("courier", self.sources.courier.enabled, &self.sources.courier.base_url),
        ];
        for (name, enabled, url) in urls {
            if enabled && url.trim().is_empty() {
                bail!("CONFIG_INVALID /sources/{name}: enabled but no endpoint url configured");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub addr: String,
    /// How long a resolved terminal is reused before the directory is
    /// queried again. 0 disables the cache.
    pub directory_cache_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8899".to_string(),
            directory_cache_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// workday
// ---------------------------------------------------------------------------

/// Business-day boundaries (`workStartTime` / `workEndTime`) as local-time
/// hour offsets. When `work_end_hour <= work_start_hour` the business day
/// runs into the next calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkDay {
    pub timezone: String,
    pub work_start_hour: u32,
    pub work_end_hour: u32,
}

impl Default for WorkDay {
    fn default() -> Self {
        Self {
            timezone: "Asia/Tashkent".to_string(),
            work_start_hour: 6,
            work_end_hour: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub pos: PosSettings,
    pub card_gateway: GatewaySettings,
    pub click_gateway: ClickSettings,
    pub marketplace: MarketplaceSettings,
    pub courier: GatewaySettings,
}

/// Env var NAMES for a login/password pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginEnv {
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PosSettings {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub keys_env: LoginEnv,
}

impl Default for PosSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: 30,
            keys_env: LoginEnv::default(),
        }
    }
}

/// Bearer-token REST gateways (card gateway, courier/withdraw service).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickSettings {
    pub enabled: bool,
    pub ws_url: String,
    pub timeout_secs: u64,
    pub keys_env: LoginEnv,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ws_url: String::new(),
            timeout_secs: 30,
            keys_env: LoginEnv::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceSettings {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub keys_env: LoginEnv,
    /// Persisted cookies / local state between invocations.
    pub session_path: String,
    /// Side channel an operator writes the one-time code into.
    pub otp_path: String,
    pub otp_poll_millis: u64,
    pub otp_wait_secs: u64,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: 90,
            keys_env: LoginEnv::default(),
            session_path: "var/marketplace/session.json".to_string(),
            otp_path: "var/marketplace/otp.txt".to_string(),
            otp_poll_millis: 2_000,
            otp_wait_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Optional JSONL mirror of every committed audit entry.
    pub jsonl_path: Option<String>,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            hash_chain: true,
        }
    }
}

// ---------------------------------------------------------------------------
// directory
// ---------------------------------------------------------------------------

/// Static terminal/credential directory used when no database is configured.
/// Credential values are env var NAMES keyed by credential type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub organizations: Vec<DirectoryOrganization>,
    pub terminals: Vec<DirectoryTerminal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryOrganization {
    pub id: String,
    pub name: String,
    pub credentials_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryTerminal {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub pos_group_id: Option<String>,
    pub timezone: Option<String>,
    pub credentials_env: BTreeMap<String, String>,
}
