use std::sync::Arc;
use tracing::{info, Level};
use wa_e2e_core::{
    binary::node::Node,
    error::Result,
    signal::{group::MemoryGroupSessionStore, prekey::MemoryPreKeyStore, session::MemorySessionStore},
    socket::Socket,
    store::{MemoryDeviceStore, MemoryStore},
    types::{Event, JID},
    util::keys::SigningKeyPair,
    Client,
};

/// Placeholder transport: the Noise handshake and WebSocket framing that
/// would back a real connection live outside this crate's scope. Wiring a
/// concrete `Socket` here is left to the embedding application.
struct UnconnectedSocket;

#[async_trait::async_trait]
impl Socket for UnconnectedSocket {
    async fn send(&self, _stanza: Node) -> Result<()> {
        Err(wa_e2e_core::Error::Disconnected("no transport wired".into()))
    }
    async fn send_query(&self, _kind: &str, _xmlns: &str, _body: Node) -> Result<Node> {
        Err(wa_e2e_core::Error::Disconnected("no transport wired".into()))
    }
    async fn await_ready_state(&self) -> Result<()> {
        Err(wa_e2e_core::Error::Disconnected("no transport wired".into()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("wiring up the end-to-end messaging core...");

    let own_jid = JID::new_device("0", 0, "s.whatsapp.net");
    let client = Client::new(
        own_jid,
        SigningKeyPair::generate(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryGroupSessionStore::new()),
        MemoryPreKeyStore::new(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryDeviceStore::new()),
        Arc::new(UnconnectedSocket),
    );

    client
        .add_event_handler(Box::new(|event| {
            match event {
                Event::NewMessage(info) => info!(chat = %info.key.chat_jid, "new message"),
                Event::Chats(chats) => info!(count = chats.len(), "bootstrap history sync"),
                Event::Status(statuses) => info!(count = statuses.len(), "status sync"),
                other => info!(?other, "event"),
            }
            true
        }))
        .await;

    info!("no transport is wired in this binary; this crate is consumed as a library by an application that owns the socket");
    let _ = client.own_jid();
}
