//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"KASSA_POS_LOGIN"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into adapter constructors; never scatter `std::env::var` calls.
//! - `Debug` impls on all secret-containing structs **redact** values.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! # Enforcement
//! A source that is `enabled` fails closed when its login or password env
//! var is unset or blank. Disabled sources resolve to `None`.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::settings::{KassaConfig, LoginEnv};

/// Login/password pair for an upstream account.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginSecret {
    pub login: String,
    pub password: String,
}

impl LoginSecret {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSecret")
            .field("login", &self.login)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// All env-sourced secrets for one daemon / CLI process.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    pub pos: Option<LoginSecret>,
    pub click: Option<LoginSecret>,
    pub marketplace: Option<LoginSecret>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("pos", &self.pos.as_ref().map(|_| "<REDACTED>"))
            .field("click", &self.click.as_ref().map(|_| "<REDACTED>"))
            .field("marketplace", &self.marketplace.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn resolve_login(
    source: &str,
    enabled: bool,
    keys_env: &LoginEnv,
    default_prefix: &str,
) -> Result<Option<LoginSecret>> {
    if !enabled {
        return Ok(None);
    }

    let login_var = keys_env
        .login
        .clone()
        .unwrap_or_else(|| format!("{default_prefix}_LOGIN"));
    let password_var = keys_env
        .password
        .clone()
        .unwrap_or_else(|| format!("{default_prefix}_PASSWORD"));

    let Some(login) = resolve_env(&login_var) else {
        bail!("SECRETS_MISSING source={source}: required env var '{login_var}' (login) is not set or empty");
    };
    let Some(password) = resolve_env(&password_var) else {
        bail!(
            "SECRETS_MISSING source={source}: required env var '{password_var}' (password) is not set or empty"
        );
    };

    Ok(Some(LoginSecret { login, password }))
}

/// Resolve all login secrets required by the enabled sources.
///
/// # Errors
/// Returns `Err` naming the **env var** of the first missing required secret.
pub fn resolve_secrets(cfg: &KassaConfig) -> Result<ResolvedSecrets> {
    let pos = resolve_login(
        "pos",
        cfg.sources.pos.enabled,
        &cfg.sources.pos.keys_env,
        "KASSA_POS",
    )?;
    let click = resolve_login(
        "click_gateway",
        cfg.sources.click_gateway.enabled,
        &cfg.sources.click_gateway.keys_env,
        "KASSA_CLICK",
    )?;
    let marketplace = resolve_login(
        "marketplace",
        cfg.sources.marketplace.enabled,
        &cfg.sources.marketplace.keys_env,
        "KASSA_MARKETPLACE",
    )?;

    Ok(ResolvedSecrets {
        pos,
        click,
        marketplace,
    })
}

/// Resolve a `credential type -> env var NAME` map from the static directory.
///
/// Returns the resolved values and the names of variables that were unset;
/// a missing credential only disables the sources that need it.
pub fn resolve_credentials_env(
    names: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();
    for (cred_type, var) in names {
        match resolve_env(var) {
            Some(v) => {
                values.insert(cred_type.clone(), v);
            }
            None => missing.push(var.clone()),
        }
    }
    (values, missing)
}
