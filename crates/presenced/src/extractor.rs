//! Face-embedding extractor contract.
//!
//! The neural-network extractor is a separate service; the daemon only
//! knows `image bytes in, encoding out`. The production implementation is
//! a thin D-Bus proxy to the system embedding service; tests substitute a
//! scripted implementation.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("no face detected in the captured image")]
    NoFaceDetected,
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
}

/// Opaque embedding extractor: image bytes in, fixed-length encoding out.
///
/// Implementations must be cancel-safe: the orchestrator drops the future
/// when the extraction timeout fires.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractorError>;
}

// `#[zbus::proxy]` generates `FaceEmbedProxy`, the async client used below.
#[zbus::proxy(
    interface = "org.freedesktop.FaceEmbed1",
    default_service = "org.freedesktop.FaceEmbed1",
    default_path = "/org/freedesktop/FaceEmbed1"
)]
trait FaceEmbed {
    /// Returns the embedding, or an empty array when no face was found.
    async fn extract(&self, image: Vec<u8>) -> zbus::Result<Vec<f64>>;
}

/// D-Bus client for the system embedding service.
pub struct DbusExtractor {
    proxy: FaceEmbedProxy<'static>,
}

impl DbusExtractor {
    /// Connect to the embedding service on the system bus.
    pub async fn connect() -> zbus::Result<Self> {
        let conn = zbus::Connection::system().await?;
        let proxy = FaceEmbedProxy::new(&conn).await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl Extractor for DbusExtractor {
    async fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractorError> {
        let raw = self
            .proxy
            .extract(image.to_vec())
            .await
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;

        if raw.is_empty() {
            return Err(ExtractorError::NoFaceDetected);
        }
        Ok(raw.into_iter().map(|v| v as f32).collect())
    }
}
