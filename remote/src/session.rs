//! Persisted drive credentials and the factory that opens the remote backend from them

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::error::{Error, Result};
use common::storage::Backend;

use crate::store::ObjectStore;
use crate::{RemoteBackend, SCHEME};

/// API client credentials plus a refreshable token, stored as JSON (`config.json` by default).
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Session {
    pub async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read session file {path:?}"))?;
        serde_json::from_str(&text).with_context(|| format!("malformed session file {path:?}"))
    }

    pub async fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed serializing session")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("cannot write session file {path:?}"))
    }
}

/// Turns a session into a live object store.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, session: &Session) -> anyhow::Result<Arc<dyn ObjectStore>>;
}

/// Hands out an already connected store regardless of the session.
pub struct Preconnected(pub Arc<dyn ObjectStore>);

#[async_trait]
impl Connect for Preconnected {
    async fn connect(&self, _session: &Session) -> anyhow::Result<Arc<dyn ObjectStore>> {
        Ok(self.0.clone())
    }
}

/// Opens the `googledrive://` backend: load the session file, connect, wrap.
pub struct RemoteFactory {
    session_path: std::path::PathBuf,
    connector: Box<dyn Connect>,
}

impl RemoteFactory {
    pub fn new(session_path: impl Into<std::path::PathBuf>, connector: Box<dyn Connect>) -> Self {
        Self {
            session_path: session_path.into(),
            connector,
        }
    }
}

#[async_trait]
impl common::BackendFactory for RemoteFactory {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn open(&self) -> Result<Arc<dyn Backend>> {
        tracing::debug!("loading drive session from {:?}", &self.session_path);
        let session = Session::load(&self.session_path)
            .await
            .map_err(|error| Error::FatalPath(format!("{error:#}")))?;
        let store = self.connector.connect(&session).await.map_err(|error| {
            Error::FatalPath(format!("cannot connect to the drive: {error:#}"))
        })?;
        Ok(Arc::new(RemoteBackend::new(store)))
    }
}

#[cfg(test)]
mod tests {
    use common::BackendFactory;

    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn session_round_trip_and_reference_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"client_id": "id", "client_secret": "secret",
                "scope": ["https://www.googleapis.com/auth/drive"], "refresh_token": "tok"}"#,
        )
        .await?;
        let session = Session::load(&path).await?;
        assert_eq!(session.client_id, "id");
        assert_eq!(session.refresh_token.as_deref(), Some("tok"));
        let copy = dir.path().join("copy.json");
        session.save(&copy).await?;
        assert_eq!(Session::load(&copy).await?, session);
        Ok(())
    }

    #[tokio::test]
    async fn missing_session_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = RemoteFactory::new(
            dir.path().join("config.json"),
            Box::new(Preconnected(Arc::new(MemoryStore::new()))),
        );
        match factory.open().await {
            Err(Error::FatalPath(message)) => assert!(message.contains("config.json")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opened a backend without a session"),
        }
        Ok(())
    }

    struct Refusing;

    #[async_trait]
    impl Connect for Refusing {
        async fn connect(&self, _session: &Session) -> anyhow::Result<Arc<dyn ObjectStore>> {
            Err(anyhow::anyhow!("invalid_grant"))
        }
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        Session::default().save(&path).await?;
        let factory = RemoteFactory::new(&path, Box::new(Refusing));
        assert!(matches!(factory.open().await, Err(Error::FatalPath(_))));
        Ok(())
    }
}
