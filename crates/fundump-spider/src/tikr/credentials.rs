use crate::config::SpiderConfig;
use crate::error::{Result, SpiderError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Somewhere an access token survives between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, token: &str) -> Result<()>;
}

/// Something that can produce a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self) -> Result<String>;
}

/// Token cached in a plain text file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(token) => Ok(Some(token.trim().to_string()).filter(|t| !t.is_empty())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, token: &str) -> Result<()> {
        trace!("writing access token to {}", self.path.display());
        tokio::fs::write(&self.path, token).await?;
        Ok(())
    }
}

/// Token held only for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        let slot = self.token.lock().map_err(poisoned)?;
        Ok(slot.clone())
    }

    async fn save(&self, token: &str) -> Result<()> {
        let mut slot = self.token.lock().map_err(poisoned)?;
        *slot = Some(token.to_string());
        Ok(())
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> SpiderError {
    SpiderError::TokenSource(format!("in-memory token store unusable, error({err})"))
}

/// Runs a shell command (usually a browser login script) and reads the token from its stdout.
#[derive(Debug, Clone)]
pub struct CommandTokenSource {
    command: String,
}

impl CommandTokenSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn acquire(&self) -> Result<String> {
        debug!("running token command: {}", self.command);
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SpiderError::TokenSource(format!(
                "token command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(SpiderError::TokenSource(
                "token command printed nothing".to_string(),
            ));
        }
        Ok(token)
    }
}

/// Hands out the same token every time.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// The access token of a run.
///
/// Loads the stored token on start, acquires a new one on demand and persists every refresh.
pub struct CredentialProvider {
    store: Box<dyn TokenStore>,
    source: Option<Box<dyn TokenSource>>,
    token: Option<String>,
}

impl CredentialProvider {
    pub async fn load(
        store: Box<dyn TokenStore>,
        source: Option<Box<dyn TokenSource>>,
    ) -> Result<Self> {
        let token = store.load().await?;
        match token {
            Some(_) => debug!("stored access token loaded"),
            None => debug!("no stored access token"),
        }
        Ok(Self {
            store,
            source,
            token,
        })
    }

    /// File store at `TIKR_TOKEN_PATH`; token from `TIKR_TOKEN_COMMAND`, else `TIKR_ACCESS_TOKEN`.
    pub async fn from_config(config: &SpiderConfig) -> Result<Self> {
        let store = Box::new(FileTokenStore::new(&config.token_path));
        let source: Option<Box<dyn TokenSource>> = match (&config.token_command, &config.static_token) {
            (Some(command), _) => Some(Box::new(CommandTokenSource::new(command.clone()))),
            (None, Some(token)) => Some(Box::new(StaticTokenSource::new(token.clone()))),
            (None, None) => {
                warn!("neither TIKR_TOKEN_COMMAND nor TIKR_ACCESS_TOKEN set; the stored token cannot be refreshed");
                None
            }
        };
        Self::load(store, source).await
    }

    /// The current token, acquiring one first if there is none yet.
    pub async fn token(&mut self) -> Result<String> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => self.refresh().await,
        }
    }

    /// Acquire and persist a new token.
    pub async fn refresh(&mut self) -> Result<String> {
        let source = self.source.as_ref().ok_or_else(|| {
            SpiderError::TokenSource("no token source configured".to_string())
        })?;

        info!("generating access token ...");
        let token = source.acquire().await?;
        self.store.save(&token).await?;
        self.token = Some(token.clone());
        info!("access token refreshed");

        Ok(token)
    }
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("refreshable", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns `token-1`, `token-2`, ... counting its calls.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct CountingSource {
        pub(crate) calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn acquire(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    #[tokio::test]
    async fn stored_token_is_used_without_acquiring() {
        let source = CountingSource::default();
        let mut provider = CredentialProvider::load(
            Box::new(MemoryTokenStore::new(Some("cached".to_string()))),
            Some(Box::new(source.clone())),
        )
        .await
        .unwrap();

        assert_eq!(provider.token().await.unwrap(), "cached");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_acquires_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.tmp");
        let source = CountingSource::default();

        let mut provider = CredentialProvider::load(
            Box::new(FileTokenStore::new(&path)),
            Some(Box::new(source.clone())),
        )
        .await
        .unwrap();
        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(provider.refresh().await.unwrap(), "token-2");
        assert_eq!(provider.token().await.unwrap(), "token-2");

        // a new provider starts from the persisted token
        let reloaded = FileTokenStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded.as_deref(), Some("token-2"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_without_source_fails() {
        let mut provider = CredentialProvider::load(Box::new(MemoryTokenStore::default()), None)
            .await
            .unwrap();
        assert!(matches!(
            provider.token().await,
            Err(SpiderError::TokenSource(_))
        ));
    }

    #[tokio::test]
    async fn poisoned_memory_store_reports_errors() {
        let store = Arc::new(MemoryTokenStore::new(Some("cached".to_string())));
        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.token.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(store.load().await, Err(SpiderError::TokenSource(_))));
        assert!(matches!(store.save("fresh").await, Err(SpiderError::TokenSource(_))));
    }

    #[tokio::test]
    async fn missing_token_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("absent"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn command_source_reads_stdout() {
        let token = CommandTokenSource::new("echo '  abc123  '").acquire().await.unwrap();
        assert_eq!(token, "abc123");

        let err = CommandTokenSource::new("exit 3").acquire().await.unwrap_err();
        assert!(matches!(err, SpiderError::TokenSource(_)));
    }
}
