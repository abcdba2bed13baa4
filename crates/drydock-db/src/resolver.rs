//! Backend resolution policy and the at-most-once connection handle.

use crate::backend::{Backend, BackendKind, SqlBackend};
use crate::error::{ConfigurationError, DbError};
use crate::local::{LocalDatabase, LocalSettings};
use crate::remote::RemoteDatabase;
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::PathBuf;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The configuration snapshot a resolver selects from.
///
/// Immutable once handed to [`BackendResolver::new`].
#[derive(Clone, Default)]
pub struct ResolverSettings {
    /// Remote managed SQL service URL (e.g. `libsql://app.turso.io`).
    pub remote_url: Option<String>,
    /// Auth token for the remote service.
    pub remote_token: Option<String>,
    /// Edge binding supplied by the hosting platform.
    pub edge: Option<Arc<dyn SqlBackend>>,
    /// Local SQLite database file.
    pub local_path: PathBuf,
    /// Local pool tunables.
    pub local: LocalSettings,
    /// Whether the process runs in development mode.
    pub development: bool,
}

impl fmt::Debug for ResolverSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSettings")
            .field("remote_url", &self.remote_url)
            .field("remote_token", &self.remote_token.as_ref().map(|_| "[REDACTED]"))
            .field("edge", &self.edge.as_ref().map(|_| "<binding>"))
            .field("local_path", &self.local_path)
            .field("local", &self.local)
            .field("development", &self.development)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl ResolverSettings {
    /// Applies the selection policy without constructing anything.
    ///
    /// Priority: remote credentials (both URL and token non-empty), then the
    /// edge binding, then the local file in development mode.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NoProductionBackend` when none applies.
    pub fn select(&self) -> Result<BackendKind, ConfigurationError> {
        if non_empty(&self.remote_url).is_some() && non_empty(&self.remote_token).is_some() {
            Ok(BackendKind::Remote)
        } else if self.edge.is_some() {
            Ok(BackendKind::Edge)
        } else if self.development {
            Ok(BackendKind::Local)
        } else {
            Err(ConfigurationError::NoProductionBackend)
        }
    }
}

/// Owns the single database handle for a process.
///
/// Build one during bootstrap, share it behind an `Arc`, and obtain the handle
/// through [`get_connection`](Self::get_connection). Concurrent first callers
/// observe exactly one construction; later calls read the cell without
/// locking.
pub struct BackendResolver {
    settings: ResolverSettings,
    handle: OnceCell<Backend>,
    #[cfg(test)]
    constructions: AtomicUsize,
}

impl BackendResolver {
    /// Creates a resolver. Nothing is opened until the first
    /// [`get_connection`](Self::get_connection).
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            settings,
            handle: OnceCell::new(),
            #[cfg(test)]
            constructions: AtomicUsize::new(0),
        }
    }

    /// The snapshot this resolver selects from.
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Which backend [`get_connection`](Self::get_connection) will construct.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if no backend is configured for
    /// production.
    pub fn plan(&self) -> Result<BackendKind, ConfigurationError> {
        self.settings.select()
    }

    /// Returns the handle, constructing it on first use.
    ///
    /// A failed construction leaves the resolver empty, so the next call
    /// tries again.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Configuration` when the policy selects nothing, or
    /// the backend's own error when it cannot be opened.
    pub fn get_connection(&self) -> Result<&Backend, DbError> {
        self.handle.get_or_try_init(|| self.construct())
    }

    /// Returns `true` once a handle has been constructed.
    pub fn is_initialized(&self) -> bool {
        self.handle.get().is_some()
    }

    fn construct(&self) -> Result<Backend, DbError> {
        let kind = self.settings.select()?;
        #[cfg(test)]
        self.constructions.fetch_add(1, Ordering::SeqCst);

        let backend = match kind {
            BackendKind::Remote => {
                let url = non_empty(&self.settings.remote_url).unwrap_or_default();
                let token = non_empty(&self.settings.remote_token).unwrap_or_default();
                Backend::Remote(RemoteDatabase::new(url, token)?)
            }
            BackendKind::Edge => match &self.settings.edge {
                Some(binding) => Backend::Edge(Arc::clone(binding)),
                None => return Err(ConfigurationError::NoProductionBackend.into()),
            },
            BackendKind::Local => Backend::Local(LocalDatabase::open(
                &self.settings.local_path,
                self.settings.local,
            )?),
        };

        tracing::info!(backend = %kind, "database backend initialized");
        Ok(backend)
    }

    #[cfg(test)]
    fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for BackendResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResolver")
            .field("settings", &self.settings)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{QueryResult, SqlValue};
    use crate::Statement;
    use async_trait::async_trait;

    struct NullEdge;

    #[async_trait]
    impl SqlBackend for NullEdge {
        async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> Result<u64, DbError> {
            Ok(0)
        }

        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<QueryResult, DbError> {
            Ok(QueryResult::default())
        }

        async fn transaction(&self, _statements: &[Statement]) -> Result<(), DbError> {
            Ok(())
        }
    }

    fn dev_local(path: PathBuf) -> ResolverSettings {
        ResolverSettings {
            local_path: path,
            development: true,
            ..ResolverSettings::default()
        }
    }

    #[test]
    fn remote_credentials_win_regardless_of_mode() {
        for development in [true, false] {
            let settings = ResolverSettings {
                remote_url: Some("libsql://app.turso.io".into()),
                remote_token: Some("secret".into()),
                edge: Some(Arc::new(NullEdge)),
                local_path: PathBuf::from("data/db.sqlite"),
                development,
                ..ResolverSettings::default()
            };
            assert_eq!(settings.select(), Ok(BackendKind::Remote));
        }
    }

    #[test]
    fn half_configured_remote_falls_through() {
        let settings = ResolverSettings {
            remote_url: Some("libsql://app.turso.io".into()),
            remote_token: Some("   ".into()),
            edge: Some(Arc::new(NullEdge)),
            ..ResolverSettings::default()
        };
        assert_eq!(settings.select(), Ok(BackendKind::Edge));

        let settings = ResolverSettings {
            remote_url: None,
            remote_token: Some("secret".into()),
            development: true,
            ..ResolverSettings::default()
        };
        assert_eq!(settings.select(), Ok(BackendKind::Local));
    }

    #[test]
    fn edge_binding_beats_local_development() {
        let settings = ResolverSettings {
            edge: Some(Arc::new(NullEdge)),
            development: true,
            ..ResolverSettings::default()
        };
        assert_eq!(settings.select(), Ok(BackendKind::Edge));
    }

    #[test]
    fn production_without_backend_is_a_configuration_error() {
        let resolver = BackendResolver::new(ResolverSettings {
            remote_url: Some(String::new()),
            remote_token: Some(String::new()),
            local_path: PathBuf::from("/tmp/x/db.sqlite"),
            development: false,
            ..ResolverSettings::default()
        });

        assert_eq!(resolver.plan(), Err(ConfigurationError::NoProductionBackend));
        let err = resolver.get_connection().expect_err("must not return a handle");
        assert!(matches!(
            err,
            DbError::Configuration(ConfigurationError::NoProductionBackend)
        ));
        assert!(!resolver.is_initialized());
        assert_eq!(resolver.construction_count(), 0);
    }

    #[test]
    fn development_resolves_local_and_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x").join("db.sqlite");
        let resolver = BackendResolver::new(ResolverSettings {
            remote_url: Some(String::new()),
            remote_token: Some(String::new()),
            ..dev_local(path.clone())
        });

        let backend = resolver.get_connection().expect("local backend");
        assert_eq!(backend.kind(), BackendKind::Local);
        assert!(dir.path().join("x").is_dir());
        assert_eq!(backend.as_local().map(|db| db.path()), Some(path.as_path()));
    }

    #[test]
    fn remote_handle_is_built_without_network() {
        let resolver = BackendResolver::new(ResolverSettings {
            remote_url: Some("libsql://app-org.turso.io".into()),
            remote_token: Some("token".into()),
            ..ResolverSettings::default()
        });

        match resolver.get_connection().expect("remote backend") {
            Backend::Remote(db) => assert_eq!(db.base_url(), "https://app-org.turso.io"),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn concurrent_first_access_constructs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = Arc::new(BackendResolver::new(dev_local(
            dir.path().join("db.sqlite"),
        )));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || {
                    let backend = resolver.get_connection().expect("connection");
                    backend as *const Backend as usize
                })
            })
            .collect();

        let addresses: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(resolver.construction_count(), 1);

        let again = resolver.get_connection().expect("connection") as *const Backend as usize;
        assert_eq!(again, addresses[0]);
        assert_eq!(resolver.construction_count(), 1);
    }
}
