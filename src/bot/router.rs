//! Router boundary.
//!
//! Handler lookup and execution live outside this crate. The worker only
//! needs something that accepts a [`Request`]; [`JsonLinesRouter`] is the
//! one the `hg` binary uses, emitting each request as a JSON line for a
//! downstream handler process.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::request::Request;

/// Dispatches a request to a handler.
///
/// Implementations choose the handler from `route_override` when present,
/// otherwise from `intent` / `action`, and own their "no handler" fallback.
#[async_trait]
pub trait Router: Send + Sync {
    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Returns an error if dispatch fails; the drain invocation fails with it.
    async fn handle(&self, request: Request) -> anyhow::Result<()>;
}

/// Writes every request as one line of JSON.
pub struct JsonLinesRouter<W> {
    out: Mutex<W>,
}

impl<W> std::fmt::Debug for JsonLinesRouter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesRouter").finish_non_exhaustive()
    }
}

impl<W> JsonLinesRouter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W> Router for JsonLinesRouter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}
