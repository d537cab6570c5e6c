//! Remote store contract and an in-memory implementation.

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures. Local state is never touched when one occurs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected the credentials")]
    Unauthorized,

    #[error("Server returned {code}: {message}")]
    Status { code: u16, message: String },
}

/// Where the encrypted vault document lives.
///
/// Implementations only move opaque bytes; they never see plaintext.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Check reachability and credentials
    async fn test_connection(&self) -> Result<()>;

    /// Cheap check of the stored checksum.
    ///
    /// `None` when nothing was uploaded or an upload did not finish; callers
    /// must then download to learn what the remote holds.
    async fn fetch_checksum(&self) -> Result<Option<String>>;

    /// Fetch the vault document. `None` when nothing was uploaded.
    async fn download(&self) -> Result<Option<Vec<u8>>>;

    /// Store the vault document and its checksum.
    ///
    /// A stored checksum always describes the stored document: the old
    /// checksum is dropped before the document changes.
    async fn upload(&self, payload: Vec<u8>, checksum: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryRemoteState {
    payload: Option<Vec<u8>>,
    checksum: Option<String>,
    failure: Option<NetworkError>,
    checksum_failure: Option<NetworkError>,
    delay: Option<Duration>,
    uploads: usize,
}

/// Remote held in process memory.
///
/// Failures and latency can be injected to exercise error paths.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryRemoteState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `error` until cleared
    pub fn set_failure(&self, error: Option<NetworkError>) {
        self.state.lock().failure = error;
    }

    /// Make uploads fail after the document is stored but before its
    /// checksum is
    pub fn set_checksum_failure(&self, error: Option<NetworkError>) {
        self.state.lock().checksum_failure = error;
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Overwrite the stored document as another device would
    pub fn put(&self, payload: Vec<u8>, checksum: &str) {
        let mut state = self.state.lock();
        state.payload = Some(payload);
        state.checksum = Some(checksum.to_string());
    }

    pub fn stored_checksum(&self) -> Option<String> {
        self.state.lock().checksum.clone()
    }

    pub fn stored_payload(&self) -> Option<Vec<u8>> {
        self.state.lock().payload.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads
    }

    async fn enter(&self) -> Result<()> {
        let (failure, delay) = {
            let state = self.state.lock();
            (state.failure.clone(), state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn test_connection(&self) -> Result<()> {
        self.enter().await
    }

    async fn fetch_checksum(&self) -> Result<Option<String>> {
        self.enter().await?;
        Ok(self.state.lock().checksum.clone())
    }

    async fn download(&self) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        Ok(self.state.lock().payload.clone())
    }

    async fn upload(&self, payload: Vec<u8>, checksum: &str) -> Result<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        state.checksum = None;
        state.payload = Some(payload);
        if let Some(error) = state.checksum_failure.clone() {
            return Err(error.into());
        }
        state.checksum = Some(checksum.to_string());
        state.uploads += 1;
        Ok(())
    }
}
