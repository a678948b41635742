//! Where the bearer token for API requests comes from.

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;

/// Supplies the bearer token, asked once per request.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> io::Result<Option<String>>;
}

/// Requests go out without an `Authorization` header.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn token(&self) -> io::Result<Option<String>> {
        Ok(None)
    }
}

pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> io::Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// A token persisted on disk. Re-read on every request so a refreshed token
/// is picked up without restarting; a missing or blank file means no token.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CredentialProvider for TokenFile {
    async fn token(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// An explicit token wins over a token file.
pub fn from_settings(
    token: Option<String>,
    token_file: Option<PathBuf>,
) -> Arc<dyn CredentialProvider> {
    match (token.filter(|t| !t.trim().is_empty()), token_file) {
        (Some(token), _) => Arc::new(StaticToken::new(token.trim())),
        (None, Some(path)) => Arc::new(TokenFile::new(path)),
        (None, None) => Arc::new(NoCredentials),
    }
}
