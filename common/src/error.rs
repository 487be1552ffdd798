use crate::storage::BackendKind;

/// Error type shared by the storage abstraction, the policy engine and the reconciler.
///
/// Only [`Error::Validation`] and [`Error::FatalPath`] abort a run, everything else is
/// contained to the item being processed and reported through
/// [`SyncOptions::report_error`](crate::SyncOptions::report_error).
///
/// # Logging Convention
/// The `Remote` variant displays the full `anyhow` chain of its source, so logging with
/// `{}` or `{:#}` shows the root cause:
/// ```ignore
/// tracing::error!("sync failed: {}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid options: {0}")]
    Validation(String),
    #[error("{0}")]
    FatalPath(String),
    #[error("{backend} backend does not support {capability}")]
    NotSupported {
        backend: BackendKind,
        capability: &'static str,
    },
    #[error("{path:?} is still present after {attempts} attempts: {source}")]
    TransientIo {
        path: String,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source:#}")]
    Remote {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    pub fn not_supported(backend: BackendKind, capability: &'static str) -> Self {
        Error::NotSupported {
            backend,
            capability,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn remote(context: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Remote {
            context: context.into(),
            source,
        }
    }

    /// Errors that abort the whole run rather than a single item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::FatalPath(_))
    }

    /// One-word name of the failure kind, used in per-item error lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::FatalPath(_) => "path",
            Error::NotSupported { .. } => "not-supported",
            Error::TransientIo { .. } => "transient-io",
            Error::Io { .. } => "io",
            Error::Remote { .. } => "remote",
        }
    }
}

/// Adds path context to `std::io` results, mirroring `anyhow::Context` for [`Error::Io`].
pub trait IoContext<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|source| Error::io(context(), source))
    }
}
