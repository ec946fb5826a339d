//! Credential resolution: terminal id -> terminal + organization key sets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kassa_config::secrets::resolve_credentials_env;
use kassa_config::DirectoryConfig;
use kassa_schemas::Terminal;

use crate::error::SourceError;

/// API keys keyed by credential type (e.g. `payme_token`).
pub type KeyedByType = BTreeMap<String, String>;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub terminal: KeyedByType,
    pub organization: KeyedByType,
}

impl Credentials {
    pub fn terminal_key(&self, cred_type: &str) -> Option<&str> {
        non_blank(self.terminal.get(cred_type))
    }

    pub fn organization_key(&self, cred_type: &str) -> Option<&str> {
        non_blank(self.organization.get(cred_type))
    }
}

fn non_blank(v: Option<&String>) -> Option<&str> {
    v.map(String::as_str).filter(|s| !s.trim().is_empty())
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("terminal", &self.terminal.keys().collect::<Vec<_>>())
            .field("organization", &self.organization.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTerminal {
    pub terminal: Terminal,
    pub credentials: Credentials,
}

/// Read-only lookup against the terminal/credential directory.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Fails with [`SourceError::NotFound`] when the terminal or its
    /// organization is unknown.
    async fn resolve(&self, terminal_id: &str) -> Result<ResolvedTerminal, SourceError>;
}

// ---------------------------------------------------------------------------
// Static directory
// ---------------------------------------------------------------------------

/// In-process directory, built from config (`directory:` section) or by hand.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    organizations: HashMap<String, KeyedByType>,
    terminals: HashMap<String, (Terminal, KeyedByType)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(mut self, id: impl Into<String>, keys: KeyedByType) -> Self {
        self.organizations.insert(id.into(), keys);
        self
    }

    pub fn with_terminal(mut self, terminal: Terminal, keys: KeyedByType) -> Self {
        self.terminals.insert(terminal.id.clone(), (terminal, keys));
        self
    }

    /// Build from config. Credential values are read from the named env vars;
    /// unset ones are logged and left out, disabling only the sources that
    /// need them.
    pub fn from_config(cfg: &DirectoryConfig) -> Self {
        let mut dir = Self::new();
        for org in &cfg.organizations {
            let (values, missing) = resolve_credentials_env(&org.credentials_env);
            if !missing.is_empty() {
                tracing::warn!(organization_id = %org.id, missing = ?missing, "organization credential env vars not set");
            }
            dir = dir.with_organization(org.id.clone(), values);
        }
        for t in &cfg.terminals {
            let (values, missing) = resolve_credentials_env(&t.credentials_env);
            if !missing.is_empty() {
                tracing::warn!(terminal_id = %t.id, missing = ?missing, "terminal credential env vars not set");
            }
            let terminal = Terminal {
                id: t.id.clone(),
                organization_id: t.organization_id.clone(),
                name: t.name.clone(),
                pos_group_id: t.pos_group_id.clone(),
                timezone: t.timezone.clone(),
            };
            dir = dir.with_terminal(terminal, values);
        }
        dir
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }
}

#[async_trait]
impl CredentialResolver for StaticDirectory {
    async fn resolve(&self, terminal_id: &str) -> Result<ResolvedTerminal, SourceError> {
        let (terminal, terminal_keys) = self
            .terminals
            .get(terminal_id)
            .ok_or_else(|| SourceError::NotFound(format!("terminal '{terminal_id}'")))?;
        let org_keys = self.organizations.get(&terminal.organization_id).ok_or_else(|| {
            SourceError::NotFound(format!(
                "organization '{}' of terminal '{terminal_id}'",
                terminal.organization_id
            ))
        })?;
        Ok(ResolvedTerminal {
            terminal: terminal.clone(),
            credentials: Credentials {
                terminal: terminal_keys.clone(),
                organization: org_keys.clone(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Keeps successful lookups of an inner resolver for `ttl`. Failures are not
/// cached, so a newly seeded terminal resolves on the next request.
pub struct CachedResolver<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ResolvedTerminal)>>,
}

impl<R: CredentialResolver> CachedResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, terminal_id: &str) -> Option<ResolvedTerminal> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(terminal_id)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl<R: CredentialResolver> CredentialResolver for CachedResolver<R> {
    async fn resolve(&self, terminal_id: &str) -> Result<ResolvedTerminal, SourceError> {
        if let Some(hit) = self.cached(terminal_id) {
            return Ok(hit);
        }
        let resolved = self.inner.resolve(terminal_id).await?;
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(terminal_id.to_string(), (Instant::now(), resolved.clone()));
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_config::{DirectoryOrganization, DirectoryTerminal};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn terminal(id: &str, org: &str) -> Terminal {
        Terminal {
            id: id.to_string(),
            organization_id: org.to_string(),
            name: format!("Terminal {id}"),
            pos_group_id: None,
            timezone: None,
        }
    }

    #[tokio::test]
    async fn resolves_terminal_and_organization_keys() {
        let dir = StaticDirectory::new()
            .with_organization("O1", BTreeMap::from([("payme_token".into(), "tok".into())]))
            .with_terminal(
                terminal("T1", "O1"),
                BTreeMap::from([("payme_terminal_id".into(), "m-1".into())]),
            );
        let r = dir.resolve("T1").await.unwrap();
        assert_eq!(r.credentials.organization_key("payme_token"), Some("tok"));
        assert_eq!(r.credentials.terminal_key("payme_terminal_id"), Some("m-1"));
        assert_eq!(r.credentials.terminal_key("missing"), None);
    }

    #[tokio::test]
    async fn unknown_terminal_or_organization_is_not_found() {
        let dir = StaticDirectory::new().with_terminal(terminal("T1", "ghost"), BTreeMap::new());
        assert!(matches!(dir.resolve("T9").await, Err(SourceError::NotFound(_))));
        assert!(matches!(dir.resolve("T1").await, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn config_directory_skips_unset_env_values() {
        let cfg = DirectoryConfig {
            organizations: vec![DirectoryOrganization {
                id: "O1".into(),
                name: "Org".into(),
                credentials_env: BTreeMap::from([(
                    "payme_token".into(),
                    "KASSA_TEST_SENTINEL_UNSET_PAYME_TOKEN".into(),
                )]),
            }],
            terminals: vec![DirectoryTerminal {
                id: "T1".into(),
                organization_id: "O1".into(),
                name: "Main".into(),
                ..Default::default()
            }],
        };
        let dir = StaticDirectory::from_config(&cfg);
        assert_eq!(dir.len(), 1);
        let r = dir.resolve("T1").await.unwrap();
        assert!(r.credentials.organization_key("payme_token").is_none());
    }

    #[test]
    fn debug_never_prints_values() {
        let c = Credentials {
            terminal: BTreeMap::from([("k".into(), "super-secret".into())]),
            organization: BTreeMap::new(),
        };
        assert!(!format!("{c:?}").contains("super-secret"));
    }

    struct Counting {
        dir: StaticDirectory,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialResolver for Counting {
        async fn resolve(&self, terminal_id: &str) -> Result<ResolvedTerminal, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.dir.resolve(terminal_id).await
        }
    }

    fn counting() -> Counting {
        Counting {
            dir: StaticDirectory::new()
                .with_organization("O1", BTreeMap::new())
                .with_terminal(terminal("T1", "O1"), BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn cache_reuses_hits_and_skips_failures() {
        let cached = CachedResolver::new(counting(), Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(cached.resolve("T1").await.unwrap().terminal.id, "T1");
        }
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            assert!(matches!(cached.resolve("T9").await, Err(SourceError::NotFound(_))));
        }
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cached = CachedResolver::new(counting(), Duration::from_millis(30));
        cached.resolve("T1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cached.resolve("T1").await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);

        let off = CachedResolver::new(counting(), Duration::ZERO);
        off.resolve("T1").await.unwrap();
        off.resolve("T1").await.unwrap();
        assert_eq!(off.inner.calls.load(Ordering::SeqCst), 2);
    }
}
