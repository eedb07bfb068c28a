use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::JID;

/// Identifies one logical message within a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: String,
    pub chat_jid: JID,
    pub sender_jid: JID,
    pub from_me: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessageType {
    MessageEdit,
    Revoke,
    EphemeralSetting,
    HistorySyncNotification,
    AppStateSyncKeyShare,
    AppStateSyncKeyRequest,
    InitialSecurityNotificationSettingSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistorySyncType {
    InitialBootstrap,
    InitialStatusV3,
    Full,
    Recent,
    PushName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySyncNotification {
    pub blob_ref: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateSyncKeyShare {
    pub keys: Vec<AppStateSyncKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateSyncKey {
    pub key_id: Vec<u8>,
    pub key_data: Vec<u8>,
}

/// Embedded protocol event (edit, delete, history sync notification, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub key: Option<MessageKey>,
    pub message_type: ProtocolMessageType,
    pub ephemeral_expiration: Option<u32>,
    pub ephemeral_setting_timestamp: Option<i64>,
    pub history_sync_notification: Option<HistorySyncNotification>,
    pub app_state_sync_key_share: Option<AppStateSyncKeyShare>,
    pub initial_security_notification_setting_sync: Option<bool>,
    pub app_state_sync_key_request: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextInfo {
    pub quoted_message: Option<QuotedMessage>,
    pub mentioned_jid: Vec<JID>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedMessage {
    pub id: String,
    pub remote_jid: JID,
    pub participant: Option<JID>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    pub text: String,
    pub matched_text: Option<String>,
    pub canonical_url: Option<String>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub text_arg_b: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
    pub context_info: Option<ContextInfo>,
    pub font: Option<String>,
    pub preview_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMessage {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub file_sha256: Option<Vec<u8>>,
    pub file_length: Option<u64>,
    pub media_key: Option<Vec<u8>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seconds: Option<u32>,
    pub ptt: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationMessage {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveLocationMessage {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: u32,
    pub sequence_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub display_name: String,
    pub vcard: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsArrayMessage {
    pub display_name: Option<String>,
    pub contacts: Vec<ContactMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionMessage {
    pub key: MessageKey,
    pub text: String,
    pub sender_timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollMessage {
    pub name: String,
    pub options: Vec<PollOption>,
    pub selectable_options_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollUpdateMessage {
    pub poll_creation_key: MessageKey,
    pub vote_hashes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInviteMessage {
    pub group_jid: JID,
    pub invite_code: String,
    pub invite_expiration: i64,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessage {
    pub title: String,
    pub description: String,
    pub button_text: String,
    pub sections: Vec<ListSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRow {
    pub title: String,
    pub description: String,
    pub row_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonsMessage {
    pub content_text: String,
    pub footer_text: Option<String>,
    pub buttons: Vec<ButtonOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonOption {
    pub id: String,
    pub display_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMessage {
    pub content_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMessage {
    pub amount_1000: i64,
    pub currency_code: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogMessage {
    pub is_video: bool,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StickerMessage(pub MediaMessage);

/// Wrapper the sender's own other devices receive so they can mirror an
/// outgoing message, per the Message Handler encode path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSentMessage {
    pub destination_jid: JID,
    pub message: Box<MessageContainer>,
}

/// Tagged union over a message's possible content. At most one variant is
/// populated; `content()` unboxes `view_once`/`ephemeral`/`device_sent`
/// wrappers down to the real payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContainer {
    Empty,
    Text(TextMessage),
    ExtendedText(ExtendedTextMessage),
    Image(MediaMessage),
    Video(MediaMessage),
    Audio(MediaMessage),
    Voice(MediaMessage),
    Document(MediaMessage),
    Sticker(StickerMessage),
    Location(LocationMessage),
    LiveLocation(LiveLocationMessage),
    Contact(ContactMessage),
    ContactsArray(ContactsArrayMessage),
    Reaction(ReactionMessage),
    Poll(PollMessage),
    PollUpdate(PollUpdateMessage),
    GroupInvite(GroupInviteMessage),
    List(ListMessage),
    Buttons(ButtonsMessage),
    Template(TemplateMessage),
    Payment(PaymentMessage),
    CallLog(CallLogMessage),
    Protocol(Box<ProtocolMessage>),
    DeviceSent(DeviceSentMessage),
    ViewOnce(Box<MessageContainer>),
    Ephemeral(Box<MessageContainer>),
}

impl Default for MessageContainer {
    fn default() -> Self {
        MessageContainer::Empty
    }
}

impl MessageContainer {
    /// Returns the populated variant, unboxing wrapper variants. Never
    /// returns a view-once/ephemeral/device-sent wrapper itself.
    pub fn content(&self) -> &MessageContainer {
        match self {
            MessageContainer::ViewOnce(inner) => inner.content(),
            MessageContainer::Ephemeral(inner) => inner.content(),
            MessageContainer::DeviceSent(wrapper) => wrapper.message.content(),
            other => other,
        }
    }

    pub fn is_view_once(&self) -> bool {
        matches!(self, MessageContainer::ViewOnce(_))
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, MessageContainer::Ephemeral(_))
    }

    pub fn as_device_sent(&self) -> Option<&DeviceSentMessage> {
        match self {
            MessageContainer::DeviceSent(d) => Some(d),
            _ => None,
        }
    }
}

/// Message-category subset used for the outer stanza's `type` attribute and
/// to classify inbound payloads before full decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Voice,
    Document,
    Sticker,
    Location,
    LiveLocation,
    Contact,
    ContactsArray,
    Reaction,
    Poll,
    PollUpdate,
    GroupInvite,
    List,
    Buttons,
    Template,
    Payment,
    CallLog,
    ProtocolMessage,
    Call,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
    pub status: MessageStatus,
    pub timestamp: i64,
}

/// A fully reconstructed logical message, per the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
    pub key: MessageKey,
    pub message: MessageContainer,
    pub push_name: Option<String>,
    pub timestamp: i64,
}

impl MessageInfo {
    pub fn now_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
