use crate::{
    error::Result,
    types::{JID, MessageInfo, MessageKey},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Device registration data — the non-Signal portion of the `Keys` store
/// named in the data model (identity/session/sender-key state lives in the
/// dedicated stores under `signal::*`).
#[derive(Debug, Clone)]
pub struct DeviceData {
    pub jid: JID,
    pub registration_id: u32,
    pub noise_key: Vec<u8>,
    pub identity_key: Vec<u8>,
    pub signed_pre_key: Vec<u8>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_signature: Vec<u8>,
    pub companion_identity_proof: Option<Vec<u8>>,
}

/// Device store trait for persisting this device's own registration data.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn save_device(&self, data: &DeviceData) -> Result<()>;
    async fn load_device(&self) -> Result<Option<DeviceData>>;
    async fn delete_device(&self) -> Result<()>;
    async fn is_registered(&self) -> Result<bool>;
}

pub struct MemoryDeviceStore {
    device_data: RwLock<Option<DeviceData>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            device_data: RwLock::new(None),
        }
    }
}

impl Default for MemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn save_device(&self, data: &DeviceData) -> Result<()> {
        let mut device_data = self.device_data.write().await;
        *device_data = Some(data.clone());
        Ok(())
    }

    async fn load_device(&self) -> Result<Option<DeviceData>> {
        Ok(self.device_data.read().await.clone())
    }

    async fn delete_device(&self) -> Result<()> {
        *self.device_data.write().await = None;
        Ok(())
    }

    async fn is_registered(&self) -> Result<bool> {
        Ok(self.device_data.read().await.is_some())
    }
}

/// One chat: a 1:1 conversation, status feed, or group. Holds the
/// per-participant "pre-keys distributed" set so sender-key distribution is
/// only re-sent to new devices, per the data model.
#[derive(Debug, Clone)]
pub struct Chat {
    pub jid: JID,
    pub participants: HashSet<JID>,
    pub participants_pre_keys: HashSet<JID>,
    pub messages: Vec<MessageInfo>,
    pub archived: bool,
    pub unread_count: u32,
    pub ephemeral_duration: Option<u32>,
}

impl Chat {
    pub fn new(jid: JID) -> Self {
        Self {
            jid,
            participants: HashSet::new(),
            participants_pre_keys: HashSet::new(),
            messages: Vec::new(),
            archived: false,
            unread_count: 0,
            ephemeral_duration: None,
        }
    }

    /// `missingParticipants = devices \ participantsPreKeys`, per §4.5.
    pub fn missing_participants<'a>(&self, devices: &'a [JID]) -> Vec<&'a JID> {
        devices
            .iter()
            .filter(|d| !self.participants_pre_keys.contains(d))
            .collect()
    }

    pub fn record_distributed(&mut self, devices: impl IntoIterator<Item = JID>) {
        self.participants_pre_keys.extend(devices);
    }

    pub fn remove_message(&mut self, id: &str) -> Option<MessageInfo> {
        let pos = self.messages.iter().position(|m| m.key.id == id)?;
        Some(self.messages.remove(pos))
    }
}

/// Store trait for chat/contact persistence — the non-Signal half of the
/// `Keys`/`Store` interface treated as an external collaborator.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_or_create_chat(&self, jid: &JID) -> Chat;
    async fn get_chat(&self, jid: &JID) -> Option<Chat>;
    async fn save_chat(&self, chat: Chat);
    async fn append_message(&self, chat_jid: &JID, info: MessageInfo);
    async fn remove_message(&self, chat_jid: &JID, id: &str) -> Option<MessageInfo>;
    async fn find_message(&self, id: &str) -> Option<(JID, MessageKey)>;
    async fn add_status(&self, info: MessageInfo);
    async fn update_contact_name(&self, jid: &JID, name: &str);
    async fn get_contact_name(&self, jid: &JID) -> Option<String>;
}

#[derive(Default)]
pub struct MemoryStore {
    chats: RwLock<HashMap<JID, Chat>>,
    statuses: RwLock<Vec<MessageInfo>>,
    contact_names: RwLock<HashMap<JID, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_chat(&self, jid: &JID) -> Chat {
        let mut chats = self.chats.write().await;
        chats.entry(jid.clone()).or_insert_with(|| Chat::new(jid.clone())).clone()
    }

    async fn get_chat(&self, jid: &JID) -> Option<Chat> {
        self.chats.read().await.get(jid).cloned()
    }

    async fn save_chat(&self, chat: Chat) {
        self.chats.write().await.insert(chat.jid.clone(), chat);
    }

    async fn append_message(&self, chat_jid: &JID, info: MessageInfo) {
        let mut chats = self.chats.write().await;
        let chat = chats.entry(chat_jid.clone()).or_insert_with(|| Chat::new(chat_jid.clone()));
        chat.messages.push(info);
    }

    async fn remove_message(&self, chat_jid: &JID, id: &str) -> Option<MessageInfo> {
        let mut chats = self.chats.write().await;
        chats.get_mut(chat_jid)?.remove_message(id)
    }

    async fn find_message(&self, id: &str) -> Option<(JID, MessageKey)> {
        let chats = self.chats.read().await;
        for chat in chats.values() {
            if let Some(msg) = chat.messages.iter().find(|m| m.key.id == id) {
                return Some((chat.jid.clone(), msg.key.clone()));
            }
        }
        None
    }

    async fn add_status(&self, info: MessageInfo) {
        self.statuses.write().await.push(info);
    }

    async fn update_contact_name(&self, jid: &JID, name: &str) {
        self.contact_names.write().await.insert(jid.clone(), name.to_string());
    }

    async fn get_contact_name(&self, jid: &JID) -> Option<String> {
        self.contact_names.read().await.get(jid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_participants_excludes_distributed() {
        let mut chat = Chat::new(JID::new_group("g1"));
        let a = JID::new_device("a", 0, "s.whatsapp.net");
        let b = JID::new_device("b", 0, "s.whatsapp.net");
        let c = JID::new_device("c", 0, "s.whatsapp.net");
        chat.record_distributed([a.clone(), b.clone()]);

        let devices = vec![a, b, c.clone()];
        let missing = chat.missing_participants(&devices);
        assert_eq!(missing, vec![&c]);
    }

    #[tokio::test]
    async fn store_append_and_remove_message() {
        let store = MemoryStore::new();
        let chat_jid = JID::new("bob", "s.whatsapp.net");
        let info = MessageInfo {
            key: MessageKey {
                id: "abc".into(),
                chat_jid: chat_jid.clone(),
                sender_jid: chat_jid.clone(),
                from_me: false,
            },
            message: crate::types::MessageContainer::Empty,
            push_name: None,
            timestamp: 0,
        };
        store.append_message(&chat_jid, info).await;
        let removed = store.remove_message(&chat_jid, "abc").await;
        assert!(removed.is_some());
        assert!(store.remove_message(&chat_jid, "abc").await.is_none());
    }
}
