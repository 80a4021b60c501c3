// src/notify/sink.rs

//! Delivery sink abstraction.
//!
//! The aggregator fans out through this interface; the bot front-end
//! plugs its transport in here. Sinks must tolerate the occasional
//! duplicate send: the ledger minimises but does not eliminate them.

use async_trait::async_trait;

use crate::error::Result;

/// Outbound message transport.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one message to one recipient.
    async fn send_text(&self, recipient: &str, body: &str) -> Result<()>;

    /// Deliver several messages to one recipient. Default: sequential
    /// `send_text` calls; transports with a batch API override this.
    async fn send_batch(&self, recipient: &str, bodies: &[String]) -> Result<()> {
        for body in bodies {
            self.send_text(recipient, body).await?;
        }
        Ok(())
    }
}

/// Sink that writes deliveries to the log. Used by the CLI diagnostics
/// path and as a stand-in until a bot transport is wired up.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn send_text(&self, recipient: &str, body: &str) -> Result<()> {
        tracing::info!(recipient, body, "notification delivered (log sink)");
        Ok(())
    }
}
