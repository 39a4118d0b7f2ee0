//! Bundled server connection parameters.
//!
//! The server's public endpoint is imported once from a DER connection
//! parameters blob shipped with the app. Where that blob comes from is
//! injected through [`ConnectionParamsSource`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::error::EndpointError;

/// Provider of the bundled connection parameters bytes.
#[async_trait]
pub trait ConnectionParamsSource: Send + Sync {
    async fn connection_params(&self) -> Result<Vec<u8>, EndpointError>;
}

/// Connection parameters held in memory.
#[derive(Debug, Clone)]
pub struct StaticConnectionParams(Vec<u8>);

impl StaticConnectionParams {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[async_trait]
impl ConnectionParamsSource for StaticConnectionParams {
    async fn connection_params(&self) -> Result<Vec<u8>, EndpointError> {
        Ok(self.0.clone())
    }
}

/// Connection parameters read from a file on each request.
#[derive(Debug, Clone)]
pub struct FileConnectionParams {
    path: PathBuf,
}

impl FileConnectionParams {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConnectionParamsSource for FileConnectionParams {
    async fn connection_params(&self) -> Result<Vec<u8>, EndpointError> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            EndpointError::ConnectionParams(format!("{}: {}", self.path.display(), e))
        })
    }
}

/// Connection parameters given inline as standard base64.
#[derive(Debug, Clone)]
pub struct Base64ConnectionParams(String);

impl Base64ConnectionParams {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }
}

#[async_trait]
impl ConnectionParamsSource for Base64ConnectionParams {
    async fn connection_params(&self) -> Result<Vec<u8>, EndpointError> {
        STANDARD
            .decode(self.0.trim())
            .map_err(|e| EndpointError::ConnectionParams(format!("invalid base64: {}", e)))
    }
}

/// Builds the source configured in `config`, if any.
pub fn source_from_config(config: &GatewayConfig) -> Option<Arc<dyn ConnectionParamsSource>> {
    if let Some(path) = &config.connection_params_path {
        return Some(Arc::new(FileConnectionParams::new(path)));
    }
    config.connection_params_base64.as_ref().map(|encoded| {
        Arc::new(Base64ConnectionParams::new(encoded.clone())) as Arc<dyn ConnectionParamsSource>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_base64_source() {
        let source = Base64ConnectionParams::new(STANDARD.encode([0x30, 0x00]));
        assert_eq!(source.connection_params().await.unwrap(), vec![0x30, 0x00]);

        let broken = Base64ConnectionParams::new("not base64!");
        assert!(matches!(
            broken.connection_params().await,
            Err(EndpointError::ConnectionParams(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_source() {
        let source = FileConnectionParams::new("/nonexistent/letro/params.der");
        assert!(matches!(
            source.connection_params().await,
            Err(EndpointError::ConnectionParams(_))
        ));
    }
}
