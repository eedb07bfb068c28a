//! Message Handler: orchestrates the encode/decode paths, serializes every
//! session/sender-key mutation through a one-permit semaphore, and
//! dispatches the protocol-message side effects embedded in decoded
//! payloads.

use crate::{
    binary::node::Node,
    error::{Error, Result},
    registry::{DeviceRegistry, GroupRegistry},
    signal::{
        group::{GroupSessionStore, SenderKeyDistribution, SenderKeyMessage, SenderKeyName, SenderKeyState},
        identity::{IdentityKey, IdentityKeyStore, MemoryIdentityKeyStore},
        prekey::{MemoryPreKeyStore, PreKey, PreKeyBundle, PreKeyStore, SignedPreKey},
        session::{Session, SessionStore},
        EncryptedMessage, SessionBuilder, SessionCipher, SignalMessageType,
    },
    socket::Socket,
    store::{Chat, DeviceStore, Store},
    types::{
        AppStateSyncKeyShare, ContactAction, DeviceSentMessage, EphemeralSettingEvent, Event,
        HistorySyncNotification, HistorySyncType, MessageContainer, MessageInfo, MessageKey,
        MessageRevokeEvent, ProtocolMessage, ProtocolMessageType, Server, JID,
    },
    util::keys::SigningKeyPair,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex as AsyncMutex, RwLock, Semaphore};
use tracing::{debug, warn};

/// Tunables named by the data model: cache lifetimes, replay-protection
/// bounds, and this device's own registration id. Mirrors this workspace's
/// existing `*Config` structs: a plain `Clone + Debug + Default` bag.
#[derive(Debug, Clone)]
pub struct MessageHandlerConfig {
    pub device_cache_ttl: Duration,
    pub group_cache_ttl: Duration,
    pub history_cache_ttl: Duration,
    pub max_jump: u32,
    pub max_message_keys: usize,
    pub archived_session_cap: usize,
    pub own_registration_id: u32,
}

impl Default for MessageHandlerConfig {
    fn default() -> Self {
        Self {
            device_cache_ttl: Duration::from_secs(5 * 60),
            group_cache_ttl: Duration::from_secs(5 * 60),
            history_cache_ttl: Duration::from_secs(60),
            max_jump: crate::signal::session::MAX_JUMP,
            max_message_keys: crate::signal::group::MAX_MESSAGE_KEYS,
            archived_session_cap: crate::signal::session::MAX_ARCHIVED_SESSIONS,
            own_registration_id: 0,
        }
    }
}

/// A key-eviction buffer: each insertion restarts the TTL for that chat.
/// When the TTL elapses without a further insertion, `on_expire` fires —
/// this is how the decode path signals "this chat's recent-message batch
/// is complete" upward.
pub struct HistoryCache {
    generations: RwLock<HashMap<JID, u64>>,
    ttl: Duration,
}

impl HistoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            generations: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert or refresh `chat_jid`'s entry. If nothing re-inserts it
    /// within the TTL, `on_expire` runs exactly once.
    pub async fn insert<F, Fut>(self: &Arc<Self>, chat_jid: JID, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut generations = self.generations.write().await;
            let slot = generations.entry(chat_jid.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let this = self.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let still_current = {
                let mut generations = this.generations.write().await;
                if generations.get(&chat_jid) == Some(&generation) {
                    generations.remove(&chat_jid);
                    true
                } else {
                    false
                }
            };
            if still_current {
                on_expire().await;
            }
        });
    }
}

/// Minimal stand-in for the inflated/protobuf-decoded `HistorySync` blob:
/// the binary codec and blob download are external collaborators, so this
/// crate treats the blob as a JSON payload carrying the same fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySyncConversation {
    pub jid: JID,
    pub participants: Vec<JID>,
    pub messages: Vec<MessageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistorySyncPayload {
    pub sync_type: Option<HistorySyncType>,
    pub conversations: Vec<HistorySyncConversation>,
    pub statuses: Vec<MessageInfo>,
    pub contacts: Vec<ContactAction>,
}

/// Orchestrates encode/decode over the Signal protocol core, the device
/// and group caches, and the chat store, under the single-writer lock.
pub struct MessageHandler {
    config: MessageHandlerConfig,
    own_jid: JID,
    own_identity: SigningKeyPair,

    lock: Semaphore,

    session_store: Arc<dyn SessionStore>,
    group_store: Arc<dyn GroupSessionStore>,
    prekey_store: AsyncMutex<MemoryPreKeyStore>,
    identity_store: AsyncMutex<MemoryIdentityKeyStore>,

    store: Arc<dyn Store>,
    device_store: Arc<dyn DeviceStore>,
    socket: Arc<dyn Socket>,

    devices: DeviceRegistry,
    groups: GroupRegistry,
    history: Arc<HistoryCache>,

    on_event: Arc<dyn Fn(Event) + Send + Sync>,
}

impl MessageHandler {
    pub fn new(
        config: MessageHandlerConfig,
        own_jid: JID,
        own_identity: SigningKeyPair,
        session_store: Arc<dyn SessionStore>,
        group_store: Arc<dyn GroupSessionStore>,
        prekey_store: MemoryPreKeyStore,
        store: Arc<dyn Store>,
        device_store: Arc<dyn DeviceStore>,
        socket: Arc<dyn Socket>,
        on_event: Arc<dyn Fn(Event) + Send + Sync>,
    ) -> Self {
        let identity_store = MemoryIdentityKeyStore::with_keypair(own_identity.clone(), config.own_registration_id);
        Self {
            devices: DeviceRegistry::new(config.device_cache_ttl),
            groups: GroupRegistry::new(config.group_cache_ttl),
            history: Arc::new(HistoryCache::new(config.history_cache_ttl)),
            lock: Semaphore::new(1),
            config,
            own_jid,
            own_identity,
            session_store,
            group_store,
            prekey_store: AsyncMutex::new(prekey_store),
            identity_store: AsyncMutex::new(identity_store),
            store,
            device_store,
            socket,
            on_event,
        }
    }

    fn emit(&self, event: Event) {
        (self.on_event)(event);
    }

    // ---------------------------------------------------------------
    // Encode path (4.5)
    // ---------------------------------------------------------------

    pub async fn encode(&self, info: MessageInfo, extra_attrs: HashMap<String, String>) -> Result<()> {
        self.socket.await_ready_state().await?;

        let _permit = self
            .lock
            .acquire()
            .await
            .map_err(|_| Error::Protocol("message handler lock closed".into()))?;
        debug!(chat = %info.key.chat_jid, "encode: lock acquired");

        let result = self.encode_locked(&info, &extra_attrs).await;

        debug!(chat = %info.key.chat_jid, ok = result.is_ok(), "encode: lock released");
        result
    }

    async fn encode_locked(&self, info: &MessageInfo, extra_attrs: &HashMap<String, String>) -> Result<()> {
        let chat_jid = &info.key.chat_jid;
        let mut to_children: Vec<Node> = Vec::new();
        let mut any_pkmsg = false;
        let mut group_enc_child: Option<Node> = None;

        match chat_jid.server_kind() {
            Server::Group => {
                let (enc_child, distribution_children, saw_pkmsg) = self.encode_group(info).await?;
                group_enc_child = Some(enc_child);
                to_children.extend(distribution_children);
                any_pkmsg |= saw_pkmsg;
            }
            _ => {
                let (device_children, saw_pkmsg) = self.encode_conversation(info).await?;
                to_children.extend(device_children);
                any_pkmsg |= saw_pkmsg;
            }
        }

        let mut attrs = extra_attrs.clone();
        attrs.insert("id".into(), info.key.id.clone());
        attrs.entry("type".into()).or_insert_with(|| "text".into());
        attrs.insert("to".into(), chat_jid.to_string());

        let mut children = Vec::new();
        if !to_children.is_empty() {
            children.push(Node::new("participants".into()).with_children(to_children));
        }
        if let Some(skmsg) = group_enc_child {
            children.push(skmsg);
        }
        if any_pkmsg {
            children.push(
                Node::new("device-identity".into())
                    .with_binary(self.own_identity.public_bytes().to_vec()),
            );
        }

        let message_node = Node::with_attrs("message".into(), attrs).with_children(children);
        self.socket.send(message_node).await?;

        self.store.append_message(chat_jid, info.clone()).await;
        Ok(())
    }

    async fn encode_conversation(&self, info: &MessageInfo) -> Result<(Vec<Node>, bool)> {
        let chat_jid = &info.key.chat_jid;
        let plaintext = serde_json::to_vec(&info.message)?;
        let device_sent = MessageContainer::DeviceSent(DeviceSentMessage {
            destination_jid: chat_jid.clone(),
            message: Box::new(info.message.clone()),
        });
        let device_sent_bytes = serde_json::to_vec(&device_sent)?;

        let own_bare = self.own_jid.to_non_ad();
        let chat_bare = chat_jid.to_non_ad();
        let mut devices = self
            .devices
            .resolve(
                self.socket.as_ref(),
                &[own_bare, chat_bare],
                &self.own_jid.user,
                self.own_jid.device,
                true,
            )
            .await?;
        dedup_jids(&mut devices);

        self.ensure_sessions(&devices).await?;

        let mut to_children = Vec::new();
        let mut any_pkmsg = false;
        for device in &devices {
            let payload: &[u8] = if device.user == self.own_jid.user {
                &device_sent_bytes
            } else {
                &plaintext
            };
            let (enc, is_pkmsg) = self.encrypt_for_device(device, payload).await?;
            any_pkmsg |= is_pkmsg;
            to_children.push(
                Node::new("to".into())
                    .attr("jid".into(), device.to_string())
                    .with_children(vec![enc]),
            );
        }

        Ok((to_children, any_pkmsg))
    }

    async fn encode_group(&self, info: &MessageInfo) -> Result<(Node, Vec<Node>, bool)> {
        let chat_jid = &info.key.chat_jid;
        let plaintext = serde_json::to_vec(&info.message)?;

        let sender_key_name = SenderKeyName::new(chat_jid.to_string(), self.own_jid.to_signal_address());
        let mut state = self
            .group_store
            .load_sender_key(&sender_key_name)
            .await
            .unwrap_or_else(|| SenderKeyState::new_local(fastrand::u32(0..(1u32 << 31)), &self.own_identity));

        let sender_key_message: SenderKeyMessage = state.encrypt(&plaintext)?;
        self.group_store.store_sender_key(&sender_key_name, state.clone()).await;

        let skmsg = Node::new("enc".into())
            .attr("v".into(), "2".into())
            .attr("type".into(), "skmsg".into())
            .with_binary(sender_key_message.serialize());

        let metadata = self.groups.get(self.socket.as_ref(), chat_jid).await?;
        let mut devices = self
            .devices
            .resolve(
                self.socket.as_ref(),
                &metadata.participants,
                &self.own_jid.user,
                self.own_jid.device,
                false,
            )
            .await?;
        dedup_jids(&mut devices);

        let mut chat = self.store.get_or_create_chat(chat_jid).await;
        let missing: Vec<JID> = chat.missing_participants(&devices).into_iter().cloned().collect();

        let mut distribution_children = Vec::new();
        let mut any_pkmsg = false;
        if !missing.is_empty() {
            self.ensure_sessions(&missing).await?;

            let distribution = state.distribution();
            let payload = distribution_payload(chat_jid, &distribution);

            for device in &missing {
                let (enc, is_pkmsg) = self.encrypt_for_device(device, &payload).await?;
                any_pkmsg |= is_pkmsg;
                distribution_children.push(
                    Node::new("to".into())
                        .attr("jid".into(), device.to_string())
                        .with_children(vec![enc]),
                );
            }

            chat.record_distributed(missing);
            self.store.save_chat(chat).await;
        }

        Ok((skmsg, distribution_children, any_pkmsg))
    }

    /// Fetch and install a session for every device in `devices` that
    /// doesn't already have one, via a pre-key bundle query.
    async fn ensure_sessions(&self, devices: &[JID]) -> Result<()> {
        let mut needs_bundle = Vec::new();
        for device in devices {
            if !self.session_store.contains_session(&device.to_signal_address()).await {
                needs_bundle.push(device.clone());
            }
        }
        if needs_bundle.is_empty() {
            return Ok(());
        }

        let query = build_key_query(&needs_bundle);
        let response = self.socket.send_query("get", "encrypt", query).await?;
        let bundles = parse_key_query_response(&response)?;

        for device in &needs_bundle {
            let bundle = bundles
                .get(&device.to_string())
                .ok_or_else(|| Error::NoSuchPreKey(format!("no bundle returned for {}", device)))?;

            let identity_key = IdentityKey::new(
                bundle
                    .identity_key
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidKey("identity key must be 32 bytes".into()))?,
            );
            {
                let mut identities = self.identity_store.lock().await;
                if !identities.is_trusted_identity(&device.to_string(), &identity_key) {
                    return Err(Error::UntrustedIdentity(device.to_string()));
                }
                identities.save_identity(&device.to_string(), &identity_key)?;
            }

            let state = SessionBuilder::initiate(&self.own_identity, bundle)?;
            let mut session = Session::new();
            session.prepend(state);
            self.session_store.store_session(&device.to_signal_address(), session).await;
        }
        Ok(())
    }

    async fn encrypt_for_device(&self, device: &JID, plaintext: &[u8]) -> Result<(Node, bool)> {
        let address = device.to_signal_address();
        let mut session = self
            .session_store
            .load_session(&address)
            .await
            .ok_or_else(|| Error::SessionMissing(device.to_string()))?;

        let encrypted = SessionCipher::encrypt(&mut session, self.config.own_registration_id, plaintext)?;
        self.session_store.store_session(&address, session).await;

        let is_pkmsg = matches!(encrypted.message_type(), SignalMessageType::PreKeyWhisperMessage);
        let wire_type = if is_pkmsg { "pkmsg" } else { "msg" };
        let node = Node::new("enc".into())
            .attr("v".into(), "2".into())
            .attr("type".into(), wire_type.into())
            .with_binary(encrypted.into_bytes());
        Ok((node, is_pkmsg))
    }

    // ---------------------------------------------------------------
    // Decode path (4.6)
    // ---------------------------------------------------------------

    pub async fn decode(&self, stanza: Node) -> Result<()> {
        let id = stanza
            .get_attr("id")
            .ok_or_else(|| Error::ElementMissing("id".into()))?
            .clone();
        let from_str = stanza
            .get_attr("from")
            .ok_or_else(|| Error::ElementMissing("from".into()))?;
        let from: JID = from_str.parse()?;
        let recipient: Option<JID> = stanza.get_attr("recipient").and_then(|s| s.parse().ok());
        let participant: Option<JID> = stanza.get_attr("participant").and_then(|s| s.parse().ok());
        let notify = stanza.get_attr("notify").cloned();
        let timestamp = stanza
            .get_attr("t")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or_else(MessageInfo::now_timestamp);
        let category = stanza.get_attr("category").cloned();

        let (chat_jid, sender_jid, from_me) = derive_message_key(&from, recipient.as_ref(), participant.as_ref(), &self.own_jid)?;

        self.send_stanza_ack(&id, &from).await?;

        let enc_children: Vec<&Node> = stanza
            .get_children()
            .map(|children| children.iter().filter(|c| c.tag == "enc").collect())
            .unwrap_or_default();

        for enc in enc_children {
            if let Err(e) = self
                .decode_one(enc, &id, &chat_jid, &sender_jid, &from, from_me, notify.clone(), timestamp, category.as_deref())
                .await
            {
                warn!(enc_type = ?enc.get_attr("type"), error = %e, "failed to decode <enc> child, skipping");
            }
        }

        if category.as_deref() == Some("peer") {
            self.send_receipt(&chat_jid, &sender_jid, &[id.clone()], Some("peer_msg")).await?;
        }

        Ok(())
    }

    async fn decode_one(
        &self,
        enc: &Node,
        id: &str,
        chat_jid: &JID,
        sender_jid: &JID,
        from: &JID,
        from_me: bool,
        push_name: Option<String>,
        timestamp: i64,
        category: Option<&str>,
    ) -> Result<()> {
        let enc_type = enc.get_attr("type").map(String::as_str).unwrap_or("");
        let ciphertext = enc
            .get_binary()
            .ok_or_else(|| Error::ProtocolDecode("<enc> missing binary content".into()))?;

        let _permit = self
            .lock
            .acquire()
            .await
            .map_err(|_| Error::Protocol("message handler lock closed".into()))?;
        debug!(enc_type, %id, "decode: lock acquired");

        let plaintext = match enc_type {
            "skmsg" => self.decrypt_group(chat_jid, sender_jid, ciphertext).await?,
            "pkmsg" => self.decrypt_prekey(sender_jid, ciphertext).await?,
            "msg" => {
                let user = if from.server_kind() == Server::Whatsapp {
                    from.clone()
                } else {
                    sender_jid.clone()
                };
                self.decrypt_whisper(&user, ciphertext).await?
            }
            other => return Err(Error::UnsupportedType(other.to_string())),
        };

        debug!(enc_type, %id, "decode: lock released");
        drop(_permit);

        let mut container: MessageContainer = serde_json::from_slice(&plaintext)?;
        if let MessageContainer::DeviceSent(wrapper) = container {
            container = *wrapper.message;
        }

        let info = MessageInfo {
            key: MessageKey {
                id: id.to_string(),
                chat_jid: chat_jid.clone(),
                sender_jid: sender_jid.clone(),
                from_me,
            },
            message: container,
            push_name,
            timestamp,
        };

        if let MessageContainer::Protocol(protocol) = info.message.content() {
            if let Err(e) = self.handle_protocol_message(chat_jid, &info, protocol).await {
                warn!(error = %e, "protocol message side effect failed");
            }
            self.store.save_chat(self.store.get_or_create_chat(chat_jid).await).await;
        }

        self.persist_and_emit(chat_jid, category, info.clone()).await;
        self.send_receipt(chat_jid, sender_jid, &[id.to_string()], None).await?;
        Ok(())
    }

    async fn decrypt_group(&self, chat_jid: &JID, sender_jid: &JID, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let name = SenderKeyName::new(chat_jid.to_string(), sender_jid.to_signal_address());
        let mut state = self
            .group_store
            .load_sender_key(&name)
            .await
            .ok_or_else(|| Error::SessionMissing(format!("no sender key for {}", sender_jid)))?;
        let message = SenderKeyMessage::parse(ciphertext)?;
        let plaintext = state.decrypt(&message)?;
        self.group_store.store_sender_key(&name, state).await;
        Ok(plaintext)
    }

    async fn decrypt_prekey(&self, sender_jid: &JID, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let address = sender_jid.to_signal_address();
        let session = self.session_store.load_session(&address).await.unwrap_or_default();
        let prekey_store = self.prekey_store.lock().await;
        let (plaintext, session) =
            SessionCipher::decrypt_prekey(&self.own_identity, &*prekey_store, session, ciphertext)?;
        drop(prekey_store);
        self.session_store.store_session(&address, session).await;
        Ok(plaintext)
    }

    async fn decrypt_whisper(&self, user_jid: &JID, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let address = user_jid.to_signal_address();
        let mut session = self
            .session_store
            .load_session(&address)
            .await
            .ok_or_else(|| Error::SessionMissing(user_jid.to_string()))?;
        let plaintext = SessionCipher::decrypt_whisper(&mut session, ciphertext)?;
        self.session_store.store_session(&address, session).await;
        Ok(plaintext)
    }

    async fn persist_and_emit(&self, chat_jid: &JID, category: Option<&str>, info: MessageInfo) {
        if chat_jid.is_status() {
            self.store.add_status(info.clone()).await;
        } else {
            self.store.append_message(chat_jid, info.clone()).await;
            if category != Some("server") {
                let mut chat = self.store.get_or_create_chat(chat_jid).await;
                chat.unread_count += 1;
                self.store.save_chat(chat).await;
            }
        }
        self.emit(Event::NewMessage(info));
    }

    async fn send_stanza_ack(&self, id: &str, from: &JID) -> Result<()> {
        let receipt = Node::new("receipt".into())
            .attr("class".into(), "receipt".into())
            .attr("id".into(), id.to_string())
            .attr("to".into(), from.to_string());
        self.socket.send(receipt).await
    }

    async fn send_receipt(&self, chat_jid: &JID, sender_jid: &JID, ids: &[String], receipt_type: Option<&str>) -> Result<()> {
        let mut node = Node::new("receipt".into())
            .attr("to".into(), chat_jid.to_string())
            .attr("from".into(), sender_jid.to_string());
        if let Some(t) = receipt_type {
            node = node.attr("type".into(), t.to_string());
        }
        if ids.len() > 1 {
            let children: Vec<Node> = ids[1..]
                .iter()
                .map(|id| Node::new("item".into()).attr("id".into(), id.clone()))
                .collect();
            node = node.with_children(children);
        }
        if let Some(first) = ids.first() {
            node = node.attr("id".into(), first.clone());
        }
        self.socket.send(node).await
    }

    // ---------------------------------------------------------------
    // Protocol message side effects (4.7)
    // ---------------------------------------------------------------

    async fn handle_protocol_message(&self, chat_jid: &JID, info: &MessageInfo, msg: &ProtocolMessage) -> Result<()> {
        match msg.message_type {
            ProtocolMessageType::HistorySyncNotification => self.handle_history_sync(msg).await,
            ProtocolMessageType::AppStateSyncKeyShare => self.handle_app_state_key_share(msg).await,
            ProtocolMessageType::Revoke => self.handle_revoke(chat_jid, msg).await,
            ProtocolMessageType::EphemeralSetting => self.handle_ephemeral_setting(chat_jid, msg).await,
            _ => {
                let _ = info;
                Ok(())
            }
        }
    }

    async fn handle_history_sync(&self, msg: &ProtocolMessage) -> Result<()> {
        let notification = msg
            .history_sync_notification
            .as_ref()
            .ok_or_else(|| Error::ProtocolDecode("history sync notification missing blob ref".into()))?;
        let payload = inflate_history_sync(notification)?;

        match payload.sync_type {
            Some(HistorySyncType::InitialBootstrap) | Some(HistorySyncType::Full) => {
                let mut chats = Vec::new();
                for conversation in payload.conversations {
                    let mut chat = Chat::new(conversation.jid.clone());
                    chat.participants = conversation.participants.into_iter().collect();
                    chat.messages = conversation.messages;
                    self.store.save_chat(chat.clone()).await;
                    self.history.insert(chat.jid.clone(), || async {}).await;
                    chats.push(chat);
                }
                self.emit(Event::Chats(chats));
            }
            Some(HistorySyncType::InitialStatusV3) => {
                for status in &payload.statuses {
                    self.store.add_status(status.clone()).await;
                }
                self.emit(Event::Status(payload.statuses));
            }
            Some(HistorySyncType::Recent) => {
                for conversation in payload.conversations {
                    let known = self.store.get_chat(&conversation.jid).await;
                    let from_cache = known.is_some();
                    let chat = known.unwrap_or_else(|| {
                        let mut c = Chat::new(conversation.jid.clone());
                        c.participants = conversation.participants.iter().cloned().collect();
                        c.messages = conversation.messages.clone();
                        c
                    });
                    self.store.save_chat(chat.clone()).await;
                    self.emit(Event::ChatRecentMessages { chat: chat.clone(), from_history_cache: false });

                    let history = self.history.clone();
                    let store = self.store.clone();
                    let on_event = self.on_event.clone();
                    let jid = chat.jid.clone();
                    history
                        .insert(jid.clone(), move || async move {
                            if let Some(chat) = store.get_chat(&jid).await {
                                (on_event)(Event::ChatRecentMessages { chat, from_history_cache: true });
                            }
                        })
                        .await;
                    let _ = from_cache;
                }
            }
            Some(HistorySyncType::PushName) => {
                for contact in &payload.contacts {
                    if let Some(name) = &contact.chosen_name {
                        self.store.update_contact_name(&contact.jid, name).await;
                    }
                }
                self.emit(Event::Contacts(payload.contacts));
            }
            None => {}
        }

        let hist_receipt = Node::new("receipt".into()).attr("type".into(), "hist_sync".into());
        self.socket.send(hist_receipt).await
    }

    async fn handle_app_state_key_share(&self, msg: &ProtocolMessage) -> Result<()> {
        let _share: &AppStateSyncKeyShare = msg
            .app_state_sync_key_share
            .as_ref()
            .ok_or_else(|| Error::ProtocolDecode("app state key share missing keys".into()))?;
        // Installing the keys into the persistent app-state key store and
        // triggering the initial patch pull belongs to the (out-of-scope)
        // app-state sync subsystem; this crate only observes the event.
        Ok(())
    }

    async fn handle_revoke(&self, chat_jid: &JID, msg: &ProtocolMessage) -> Result<()> {
        let key = msg
            .key
            .as_ref()
            .ok_or_else(|| Error::ProtocolDecode("revoke missing target key".into()))?;
        if let Some(removed) = self.store.remove_message(chat_jid, &key.id).await {
            self.emit(Event::MessageDeleted { info: removed, from_remote: true });
        }
        Ok(())
    }

    async fn handle_ephemeral_setting(&self, chat_jid: &JID, msg: &ProtocolMessage) -> Result<()> {
        let duration = msg.ephemeral_expiration.unwrap_or(0);
        let toggled_at = msg.ephemeral_setting_timestamp.unwrap_or_else(MessageInfo::now_timestamp);

        let mut chat = self.store.get_or_create_chat(chat_jid).await;
        chat.ephemeral_duration = if duration == 0 { None } else { Some(duration) };
        self.store.save_chat(chat).await;

        self.emit(Event::Setting(EphemeralSettingEvent {
            chat: chat_jid.clone(),
            duration_secs: duration,
            toggled_at,
        }));
        Ok(())
    }
}

fn dedup_jids(jids: &mut Vec<JID>) {
    let mut seen = std::collections::HashSet::new();
    jids.retain(|j| seen.insert(j.clone()));
}

fn derive_message_key(from: &JID, recipient: Option<&JID>, participant: Option<&JID>, own_jid: &JID) -> Result<(JID, JID, bool)> {
    match from.server_kind() {
        Server::Whatsapp | Server::User => {
            let chat = recipient.cloned().unwrap_or_else(|| from.clone());
            let sender = from.clone();
            let from_me = from.to_non_ad() == own_jid.to_non_ad();
            Ok((chat, sender, from_me))
        }
        _ => {
            let sender = participant
                .cloned()
                .ok_or_else(|| Error::ElementMissing("participant".into()))?;
            let from_me = sender.to_non_ad() == own_jid.to_non_ad();
            Ok((from.clone(), sender, from_me))
        }
    }
}

fn distribution_payload(chat_jid: &JID, distribution: &SenderKeyDistribution) -> Vec<u8> {
    let group_id = chat_jid.to_string().into_bytes();
    let mut out = Vec::with_capacity(4 + group_id.len() + 72);
    out.extend_from_slice(&(group_id.len() as u32).to_be_bytes());
    out.extend_from_slice(&group_id);
    out.extend_from_slice(&distribution.serialize());
    out
}

fn build_key_query(devices: &[JID]) -> Node {
    let users: Vec<Node> = devices
        .iter()
        .map(|jid| {
            Node::new("user".into())
                .attr("jid".into(), jid.to_string())
                .attr("reason".into(), "identity".into())
        })
        .collect();
    Node::new("key".into()).with_children(users)
}

fn parse_key_query_response(response: &Node) -> Result<HashMap<String, PreKeyBundle>> {
    let key_node = response
        .find_child("key")
        .ok_or_else(|| Error::ProtocolDecode("key query response missing <key>".into()))?;

    let mut bundles = HashMap::new();
    for user_node in key_node.get_children().into_iter().flatten() {
        if user_node.tag != "user" {
            continue;
        }
        let jid = match user_node.get_attr("jid") {
            Some(j) => j.clone(),
            None => continue,
        };

        let registration_id = user_node
            .find_child("registration")
            .and_then(|n| n.get_binary())
            .and_then(|b| b.as_slice().try_into().ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0);

        let identity_bytes = user_node
            .find_child("identity")
            .and_then(|n| n.get_binary())
            .ok_or_else(|| Error::ProtocolDecode(format!("no identity key for {}", jid)))?;
        let identity_key = strip_key_header(identity_bytes);

        let skey_node = user_node
            .find_child("skey")
            .ok_or_else(|| Error::ProtocolDecode(format!("no signed prekey for {}", jid)))?;
        let signed_prekey = parse_signed_prekey(skey_node)?;

        let prekey = user_node.find_child("key").map(parse_prekey).transpose()?;

        bundles.insert(
            jid,
            PreKeyBundle {
                identity_key,
                signed_prekey,
                prekey,
                registration_id,
                device_id: 0,
            },
        );
    }
    Ok(bundles)
}

fn strip_key_header(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 33 && bytes[0] == crate::signal::DJB_TYPE {
        bytes[1..].to_vec()
    } else {
        bytes.to_vec()
    }
}

fn parse_signed_prekey(node: &Node) -> Result<SignedPreKey> {
    let id = node
        .find_child("id")
        .and_then(|n| n.get_binary())
        .and_then(|b| b.as_slice().try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::ProtocolDecode("signed prekey missing id".into()))?;
    let public: [u8; 32] = node
        .find_child("value")
        .and_then(|n| n.get_binary())
        .and_then(|b| b.as_slice().try_into().ok())
        .ok_or_else(|| Error::ProtocolDecode("signed prekey missing value".into()))?;
    let signature = node
        .find_child("signature")
        .and_then(|n| n.get_binary())
        .cloned()
        .ok_or_else(|| Error::ProtocolDecode("signed prekey missing signature".into()))?;

    Ok(SignedPreKey {
        id,
        // Only the public half is known for a bundle fetched over the wire;
        // the private key field is never used by the receiving side (ECDH is
        // always computed as `our_keypair.ecdh(&this.public_key())`).
        keypair: crate::util::keys::ECKeyPair { private_key: [0u8; 32], public_key: public },
        signature,
        timestamp: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
    })
}

fn parse_prekey(node: &Node) -> Result<PreKey> {
    let id = node
        .find_child("id")
        .and_then(|n| n.get_binary())
        .and_then(|b| b.as_slice().try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::ProtocolDecode("prekey missing id".into()))?;
    let public: [u8; 32] = node
        .find_child("value")
        .and_then(|n| n.get_binary())
        .and_then(|b| b.as_slice().try_into().ok())
        .ok_or_else(|| Error::ProtocolDecode("prekey missing value".into()))?;

    Ok(PreKey {
        id,
        keypair: crate::util::keys::ECKeyPair { private_key: [0u8; 32], public_key: public },
    })
}

fn inflate_history_sync(notification: &HistorySyncNotification) -> Result<HistorySyncPayload> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(notification.blob_ref.as_slice());
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| Error::ProtocolDecode(format!("history sync blob inflate failed: {}", e)))?;
    Ok(serde_json::from_slice(&inflated)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::group::MemoryGroupSessionStore;
    use crate::signal::session::MemorySessionStore;
    use crate::store::{MemoryDeviceStore, MemoryStore};
    use crate::types::TextMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSocket {
        sent: AsyncMutex<Vec<Node>>,
    }

    impl RecordingSocket {
        fn new() -> Self {
            Self { sent: AsyncMutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl Socket for RecordingSocket {
        async fn send(&self, stanza: Node) -> Result<()> {
            self.sent.lock().await.push(stanza);
            Ok(())
        }
        async fn send_query(&self, _kind: &str, _xmlns: &str, _body: Node) -> Result<Node> {
            Err(Error::Transport("no server in this test".into()))
        }
        async fn await_ready_state(&self) -> Result<()> {
            Ok(())
        }
    }

    fn handler_with(socket: Arc<RecordingSocket>) -> MessageHandler {
        let own_jid = JID::new_device("alice", 0, "s.whatsapp.net");
        let identity = SigningKeyPair::generate();
        let count = Arc::new(AtomicUsize::new(0));
        let on_event = {
            let count = count.clone();
            Arc::new(move |_event: Event| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        MessageHandler::new(
            MessageHandlerConfig::default(),
            own_jid,
            identity,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryGroupSessionStore::new()),
            MemoryPreKeyStore::new(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDeviceStore::new()),
            socket,
            on_event,
        )
    }

    #[test]
    fn derive_message_key_for_1to1() {
        let own = JID::new_device("alice", 0, "s.whatsapp.net");
        let from = JID::new("bob", "s.whatsapp.net");
        let (chat, sender, from_me) = derive_message_key(&from, None, None, &own).unwrap();
        assert_eq!(chat, from);
        assert_eq!(sender, from);
        assert!(!from_me);
    }

    #[test]
    fn derive_message_key_for_group_requires_participant() {
        let own = JID::new_device("alice", 0, "s.whatsapp.net");
        let from = JID::new_group("g1");
        assert!(derive_message_key(&from, None, None, &own).is_err());

        let participant = JID::new("bob", "s.whatsapp.net");
        let (chat, sender, from_me) = derive_message_key(&from, None, Some(&participant), &own).unwrap();
        assert_eq!(chat, from);
        assert_eq!(sender, participant);
        assert!(!from_me);
    }

    #[tokio::test]
    async fn decode_sends_stanza_ack_before_anything_else() {
        let socket = Arc::new(RecordingSocket::new());
        let handler = handler_with(socket.clone());

        let stanza = Node::new("message".into())
            .attr("id".into(), "abc".into())
            .attr("from".into(), "bob@s.whatsapp.net".into())
            .with_children(vec![]);

        // No <enc> children and an unresolvable session both fail softly;
        // what matters here is that the ack still goes out.
        let _ = handler.decode(stanza).await;
        let sent = socket.sent.lock().await;
        assert!(sent.iter().any(|n| n.tag == "receipt" && n.get_attr("class").map(String::as_str) == Some("receipt")));
    }

    #[tokio::test]
    async fn unsupported_enc_type_is_isolated_per_child() {
        let socket = Arc::new(RecordingSocket::new());
        let handler = handler_with(socket.clone());

        let bogus_enc = Node::new("enc".into())
            .attr("type".into(), "bogus".into())
            .with_binary(vec![1, 2, 3]);
        let stanza = Node::new("message".into())
            .attr("id".into(), "m1".into())
            .attr("from".into(), "bob@s.whatsapp.net".into())
            .with_children(vec![bogus_enc]);

        // Should not propagate the per-enc UnsupportedType error out of decode().
        assert!(handler.decode(stanza).await.is_ok());
    }

    #[tokio::test]
    async fn history_cache_fires_on_expiry_without_reinsertion() {
        let cache = Arc::new(HistoryCache::new(Duration::from_millis(20)));
        let fired = Arc::new(AtomicUsize::new(0));
        let jid = JID::new("g1", "g.us");

        let fired_clone = fired.clone();
        cache.insert(jid.clone(), move || async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_cache_reinsertion_restarts_ttl_and_suppresses_first_fire() {
        let cache = Arc::new(HistoryCache::new(Duration::from_millis(30)));
        let fired = Arc::new(AtomicUsize::new(0));
        let jid = JID::new("g1", "g.us");

        let f1 = fired.clone();
        cache.insert(jid.clone(), move || async move { f1.fetch_add(1, Ordering::SeqCst); }).await;

        tokio::time::sleep(Duration::from_millis(15)).await;
        let f2 = fired.clone();
        cache.insert(jid.clone(), move || async move { f2.fetch_add(1, Ordering::SeqCst); }).await;

        tokio::time::sleep(Duration::from_millis(15)).await;
        // first timer fired by now but found a newer generation, so it was a no-op
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn revoke_message_shape_compiles() {
        let _ = MessageRevokeEvent {
            chat: JID::new("bob", "s.whatsapp.net"),
            sender: JID::new("bob", "s.whatsapp.net"),
            id: "x".into(),
            timestamp: SystemTime::now(),
        };
        let _ = TextMessage { text: "hi".into() };
    }
}
