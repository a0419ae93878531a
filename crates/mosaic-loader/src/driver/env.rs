//! I/O environment and session scoping for reader threads.
//!
//! An [`IoEnv`] is a plain, serializable snapshot of I/O options plus an
//! optional session description. It is captured once on the thread that
//! plans a load and re-applied on every worker with [`EnvScope::enter`].
//! Sessions are expensive to build, so each thread caches the first one it
//! creates and reuses it for later scopes with the same configuration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Option keys whose values are credentials.
pub const SECRET_KEYS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AZURE_STORAGE_CONNECTION_STRING",
    "AZURE_STORAGE_ACCESS_KEY",
    "AZURE_STORAGE_SAS_TOKEN",
    "GS_ACCESS_KEY_ID",
    "GS_SECRET_ACCESS_KEY",
];

/// Options suited to cloud-hosted, sidecar-free rasters.
pub const CLOUD_DEFAULTS: &[(&str, &str)] = &[
    ("DISABLE_READDIR_ON_OPEN", "EMPTY_DIR"),
    ("HTTP_MAX_RETRY", "10"),
    ("HTTP_RETRY_DELAY", "0.5"),
];

const REDACTED: &str = "xx..xx";

/// Connection settings for object storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub unsigned: bool,
    #[serde(default)]
    pub requester_pays: bool,
}

impl SessionConfig {
    /// Settings from `AWS_REGION`, `AWS_S3_ENDPOINT`, `AWS_NO_SIGN_REQUEST`
    /// and `AWS_REQUEST_PAYER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("AWS_REGION") {
            config.region = Some(val);
        } else if let Ok(val) = std::env::var("AWS_DEFAULT_REGION") {
            config.region = Some(val);
        }

        if let Ok(val) = std::env::var("AWS_S3_ENDPOINT") {
            config.endpoint = Some(val);
        }

        if let Ok(val) = std::env::var("AWS_NO_SIGN_REQUEST") {
            config.unsigned = matches!(val.to_uppercase().as_str(), "YES" | "TRUE" | "1");
        }

        if let Ok(val) = std::env::var("AWS_REQUEST_PAYER") {
            config.requester_pays = val == "requester";
        }

        config
    }
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A built session. Identity is `id`: two sessions with equal configs are
/// still different sessions.
#[derive(Debug)]
pub struct IoSession {
    pub id: u64,
    pub config: SessionConfig,
}

impl IoSession {
    fn build(config: SessionConfig) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, region = ?config.region, "built I/O session");
        Self { id, config }
    }
}

thread_local! {
    static SESSION: RefCell<Option<Arc<IoSession>>> = const { RefCell::new(None) };
    static ACTIVE: RefCell<Vec<IoEnv>> = const { RefCell::new(Vec::new()) };
}

/// Session for the current thread.
///
/// The first call on a thread builds and caches the default session, from
/// `requested` or the process environment. Later calls get the cached one,
/// unless `requested` differs from it: then a private session is built and
/// the cache is left alone.
pub fn thread_session(requested: Option<&SessionConfig>) -> Arc<IoSession> {
    SESSION.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_ref() {
            None => {
                let config = requested.cloned().unwrap_or_else(SessionConfig::from_env);
                let session = Arc::new(IoSession::build(config));
                *slot = Some(session.clone());
                session
            }
            Some(cached) => match requested {
                Some(cfg) if *cfg != cached.config => Arc::new(IoSession::build(cfg.clone())),
                _ => cached.clone(),
            },
        }
    })
}

/// Drop the current thread's cached session.
pub fn reset_thread_session() {
    SESSION.with(|cell| cell.borrow_mut().take());
}

static CONFIGURED: RwLock<Option<IoEnv>> = parking_lot::const_rwlock(None);

/// Set the process-wide environment captured when no scope is active.
pub fn configure_io(env: IoEnv) {
    tracing::info!(options = ?env.sanitized().options, "configured I/O environment");
    *CONFIGURED.write() = Some(env);
}

/// Snapshot of I/O options and session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoEnv {
    pub options: BTreeMap<String, String>,
    pub session: Option<SessionConfig>,
}

impl IoEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with [`CLOUD_DEFAULTS`] set.
    pub fn cloud_defaults() -> Self {
        Self {
            options: CLOUD_DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            session: None,
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    /// Active scope on this thread, else the configured environment, else
    /// cloud defaults.
    pub fn capture() -> Self {
        current_env()
            .or_else(|| CONFIGURED.read().clone())
            .unwrap_or_else(Self::cloud_defaults)
    }

    /// Copy with credential values replaced, safe to log.
    pub fn sanitized(&self) -> Self {
        let options = self
            .options
            .iter()
            .map(|(k, v)| {
                let v = if SECRET_KEYS.contains(&k.as_str()) {
                    REDACTED.to_string()
                } else {
                    v.clone()
                };
                (k.clone(), v)
            })
            .collect();
        Self {
            options,
            session: self.session.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Environment of the innermost active scope on this thread.
pub fn current_env() -> Option<IoEnv> {
    ACTIVE.with(|stack| stack.borrow().last().cloned())
}

/// Applies an [`IoEnv`] on the current thread until dropped.
///
/// Scopes nest; dropping one restores whatever was active before it, also
/// when unwinding.
#[must_use = "the environment is only active while the scope is alive"]
pub struct EnvScope {
    depth: usize,
    session: Arc<IoSession>,
    // Tied to the thread that entered it.
    _thread: PhantomData<Rc<()>>,
}

impl EnvScope {
    pub fn enter(env: IoEnv) -> Self {
        let session = thread_session(env.session.as_ref());
        let depth = ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.push(env);
            depth
        });
        Self {
            depth,
            session,
            _thread: PhantomData,
        }
    }

    pub fn session(&self) -> &Arc<IoSession> {
        &self.session
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_fresh_thread<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::spawn(f).join().unwrap()
    }

    #[test]
    fn test_session_reused_on_thread() {
        on_fresh_thread(|| {
            let cfg = SessionConfig {
                region: Some("us-west-2".to_string()),
                ..Default::default()
            };
            let first = thread_session(Some(&cfg));
            let again = thread_session(None);
            let same = thread_session(Some(&cfg));
            assert_eq!(first.id, again.id);
            assert_eq!(first.id, same.id);

            let other_cfg = SessionConfig {
                region: Some("eu-central-1".to_string()),
                ..Default::default()
            };
            let private = thread_session(Some(&other_cfg));
            assert_ne!(private.id, first.id);
            assert_eq!(thread_session(None).id, first.id);
        });
    }

    #[test]
    fn test_sessions_not_shared_across_threads() {
        let a = on_fresh_thread(|| thread_session(None).id);
        let b = on_fresh_thread(|| thread_session(None).id);
        assert_ne!(a, b);
    }

    #[test]
    fn test_scope_restores_on_drop() {
        on_fresh_thread(|| {
            assert!(current_env().is_none());
            let outer = IoEnv::new().with_option("A", "1");
            let inner = IoEnv::new().with_option("A", "2");
            {
                let _outer = EnvScope::enter(outer.clone());
                {
                    let _inner = EnvScope::enter(inner.clone());
                    assert_eq!(current_env(), Some(inner));
                }
                assert_eq!(current_env(), Some(outer));
            }
            assert!(current_env().is_none());
        });
    }

    #[test]
    fn test_scope_restores_on_panic() {
        on_fresh_thread(|| {
            let result = std::panic::catch_unwind(|| {
                let _scope = EnvScope::enter(IoEnv::new().with_option("A", "1"));
                panic!("read failed");
            });
            assert!(result.is_err());
            assert!(current_env().is_none());
        });
    }

    #[test]
    fn test_capture_prefers_active_scope() {
        on_fresh_thread(|| {
            let env = IoEnv::new().with_option("HTTP_MAX_RETRY", "3");
            let _scope = EnvScope::enter(env.clone());
            assert_eq!(IoEnv::capture(), env);
        });
    }

    #[test]
    fn test_sanitized_redacts_secrets() {
        let env = IoEnv::cloud_defaults()
            .with_option("AWS_SECRET_ACCESS_KEY", "hunter2")
            .with_option("AWS_REGION", "us-west-2");
        let clean = env.sanitized();
        assert_eq!(clean.get("AWS_SECRET_ACCESS_KEY"), Some("xx..xx"));
        assert_eq!(clean.get("AWS_REGION"), Some("us-west-2"));
        assert_eq!(clean.get("DISABLE_READDIR_ON_OPEN"), Some("EMPTY_DIR"));
        assert_eq!(env.get("AWS_SECRET_ACCESS_KEY"), Some("hunter2"));
    }
}
