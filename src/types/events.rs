use crate::store::Chat;
use crate::types::{JID, MessageInfo, MessageReceipt};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Event handler function type
pub type EventHandler = Box<dyn Fn(Event) -> bool + Send + Sync>;

/// All possible events that can be emitted by the WhatsApp client. The
/// `on*` callback surface named in the external interfaces section
/// (`onNewMessage`, `onNewStatus`, `onChatRecentMessages`,
/// `onMessageDeleted`, `onSetting`, `onAction`, `onChats`, `onStatus`,
/// `onContacts`) is represented as dedicated variants below rather than as
/// separate callback traits, matching this crate's existing
/// single-`Event`-enum dispatch pattern.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection state changed
    Connected,
    Disconnected { reason: String },

    /// Authentication events
    LoggedIn,
    LoggedOut,
    QRCode { code: String },

    /// `onNewMessage(info)`
    NewMessage(MessageInfo),
    /// `onNewStatus(info)`
    NewStatus(MessageInfo),
    /// `onChatRecentMessages(chat, fromHistoryCache)`
    ChatRecentMessages { chat: Chat, from_history_cache: bool },
    /// `onMessageDeleted(info, fromRemote)`
    MessageDeleted { info: MessageInfo, from_remote: bool },
    /// `onSetting(setting)`
    Setting(EphemeralSettingEvent),
    /// `onAction(action)`
    Action(ContactAction),
    /// `onChats` — initial/bootstrap history sync delivered a chat set
    Chats(Vec<Chat>),
    /// `onStatus` — initial status-sync delivered a status set
    Status(Vec<MessageInfo>),
    /// `onContacts` — push-name/contact updates from history sync
    Contacts(Vec<ContactAction>),

    MessageReceipt { receipt: MessageReceipt },
    MessageRevoke(MessageRevokeEvent),
    MessageAck(MessageAckEvent),

    /// Presence events
    Presence(PresenceEvent),

    /// Group events
    GroupInfo(GroupInfoEvent),
    GroupParticipants(GroupParticipantsEvent),

    /// Other events
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralSettingEvent {
    pub chat: JID,
    pub duration_secs: u32,
    pub toggled_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactAction {
    pub jid: JID,
    pub chosen_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: Vec<u8>, // Raw message data for now
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRevokeEvent {
    pub chat: JID,
    pub sender: JID,
    pub id: String,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAckEvent {
    pub chat: JID,
    pub sender: JID,
    pub ids: Vec<String>,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub from: JID,
    pub unavailable: bool,
    pub last_seen: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfoEvent {
    pub jid: JID,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub participants: Vec<JID>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipantsEvent {
    pub jid: JID,
    pub participants: Vec<JID>,
    pub action: GroupParticipantAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}