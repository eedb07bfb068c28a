//! Transport seam. The WebSocket/Noise handshake itself is an external
//! collaborator (out of scope here); this module names only the interface
//! the messaging core consumes from it.

use crate::{binary::node::Node, error::Result};
use async_trait::async_trait;

/// What the message handler needs from the connection layer: send a
/// stanza, send one that expects a matching response, and know when the
/// connection is ready to carry traffic. Inbound dispatch is not part of
/// this trait — it reaches the handler as a plain async callback the
/// handler is constructed with.
#[async_trait]
pub trait Socket: Send + Sync {
    async fn send(&self, stanza: Node) -> Result<()>;
    async fn send_query(&self, kind: &str, xmlns: &str, body: Node) -> Result<Node>;
    async fn await_ready_state(&self) -> Result<()>;
}
