//! Thin facade over the Message Handler: wires together the stores, the
//! socket, and the upward event callbacks a caller registers, and exposes
//! the convenience send methods an application actually calls. Connection
//! setup (Noise handshake, WebSocket transport, QR-code pairing) lives
//! outside this crate — `Client` is handed an already-connected `Socket`.

use crate::{
    error::Result,
    handler::{MessageHandler, MessageHandlerConfig},
    signal::{group::GroupSessionStore, prekey::MemoryPreKeyStore, session::SessionStore},
    socket::Socket,
    store::{DeviceStore, Store},
    types::{Event, EventHandler, MessageContainer, MessageInfo, MessageKey, TextMessage, JID},
    util::keys::SigningKeyPair,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Wraps the inner `MessageHandlerConfig` with room for client-level
/// tunables, following this workspace's `*Config` convention.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub handler: MessageHandlerConfig,
}

/// The end-to-end messaging core, fronted with an `add_event_handler` /
/// `send_*` surface an application drives directly.
pub struct Client {
    own_jid: JID,
    handler: Arc<MessageHandler>,
    event_handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl Client {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_jid: JID,
        own_identity: SigningKeyPair,
        session_store: Arc<dyn SessionStore>,
        group_store: Arc<dyn GroupSessionStore>,
        prekey_store: MemoryPreKeyStore,
        store: Arc<dyn Store>,
        device_store: Arc<dyn DeviceStore>,
        socket: Arc<dyn Socket>,
    ) -> Self {
        Self::with_config(
            ClientConfig::default(),
            own_jid,
            own_identity,
            session_store,
            group_store,
            prekey_store,
            store,
            device_store,
            socket,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        config: ClientConfig,
        own_jid: JID,
        own_identity: SigningKeyPair,
        session_store: Arc<dyn SessionStore>,
        group_store: Arc<dyn GroupSessionStore>,
        prekey_store: MemoryPreKeyStore,
        store: Arc<dyn Store>,
        device_store: Arc<dyn DeviceStore>,
        socket: Arc<dyn Socket>,
    ) -> Self {
        let event_handlers: Arc<RwLock<Vec<EventHandler>>> = Arc::new(RwLock::new(Vec::new()));
        let dispatch_handlers = event_handlers.clone();
        let on_event: Arc<dyn Fn(Event) + Send + Sync> = Arc::new(move |event: Event| {
            let handlers = dispatch_handlers.clone();
            tokio::spawn(async move {
                let handlers = handlers.read().await;
                for handler in handlers.iter() {
                    if !handler(event.clone()) {
                        break;
                    }
                }
            });
        });

        let handler = MessageHandler::new(
            config.handler,
            own_jid.clone(),
            own_identity,
            session_store,
            group_store,
            prekey_store,
            store,
            device_store,
            socket,
            on_event,
        );

        Self {
            own_jid,
            handler: Arc::new(handler),
            event_handlers,
        }
    }

    /// Register a callback against the upward event stream
    /// (`onNewMessage`, `onChats`, `onStatus`, ...). Handlers run in
    /// registration order; returning `false` stops dispatch to the rest.
    pub async fn add_event_handler(&self, handler: EventHandler) {
        self.event_handlers.write().await.push(handler);
    }

    /// Feed one inbound `<message>` stanza through the decode path.
    pub async fn handle_stanza(&self, stanza: crate::binary::node::Node) -> Result<()> {
        self.handler.decode(stanza).await
    }

    /// Encode and send an arbitrary message payload.
    pub async fn send(&self, to: &JID, message: MessageContainer) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let info = MessageInfo {
            key: MessageKey {
                id: id.clone(),
                chat_jid: to.clone(),
                sender_jid: self.own_jid.clone(),
                from_me: true,
            },
            message,
            push_name: None,
            timestamp: MessageInfo::now_timestamp(),
        };
        self.handler.encode(info, HashMap::new()).await?;
        Ok(id)
    }

    /// Send a plain text message.
    pub async fn send_text(&self, to: &JID, text: String) -> Result<String> {
        self.send(to, MessageContainer::Text(TextMessage { text })).await
    }

    /// Access the underlying handler, e.g. to tune its config at runtime
    /// via a rebuild, or to call `encode`/`decode` directly.
    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    pub fn own_jid(&self) -> &JID {
        &self.own_jid
    }
}
