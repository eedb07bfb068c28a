/// Signal (TextSecure) protocol: double-ratchet sessions, sender keys,
/// pre-keys and identity trust, composed into a session builder/cipher
/// pair that higher layers drive per incoming or outgoing message.

use crate::{
    error::{Error, Result},
    util::keys::SigningKeyPair,
};

pub mod group;
pub mod identity;
pub mod prekey;
pub mod session;

pub use group::*;
pub use identity::*;
pub use prekey::*;
pub use session::*;

/// Signal protocol version used by WhatsApp.
pub const SIGNAL_PROTOCOL_VERSION: u8 = 3;

pub const DJB_TYPE: u8 = 0x05;
pub const EC_TYPE: u8 = 0x05;

/// Stanza-visible wire type of an encrypted 1:1 payload: `pkmsg` carries an
/// embedded pre-key bundle reference, `msg` is an ordinary ratchet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMessageType {
    PreKeyWhisperMessage = 3,
    WhisperMessage = 1,
    SenderKeyMessage = 7,
    SenderKeyDistributionMessage = 8,
}

/// Result of encrypting one outgoing 1:1 payload: which wire shape to send
/// it as, and the serialized bytes.
#[derive(Debug, Clone)]
pub enum EncryptedMessage {
    PreKey(Vec<u8>),
    Whisper(Vec<u8>),
}

impl EncryptedMessage {
    pub fn message_type(&self) -> SignalMessageType {
        match self {
            EncryptedMessage::PreKey(_) => SignalMessageType::PreKeyWhisperMessage,
            EncryptedMessage::Whisper(_) => SignalMessageType::WhisperMessage,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            EncryptedMessage::PreKey(b) | EncryptedMessage::Whisper(b) => b,
        }
    }
}

/// Establishes new session state from a pre-key bundle (Alice) or an
/// incoming pre-key message (Bob).
pub struct SessionBuilder;

impl SessionBuilder {
    /// Alice side: start a new outgoing session against a freshly fetched
    /// pre-key bundle, marking it pending until the first reply arrives.
    pub fn initiate(local_identity: &SigningKeyPair, bundle: &PreKeyBundle) -> Result<SessionState> {
        let base_key = crate::util::keys::ECKeyPair::generate();
        SessionState::initialize_alice_session(local_identity, bundle, &base_key)
    }

    /// Bob side: derive session state from an incoming `PreKeySignalMessage`,
    /// looking up the referenced signed/one-time pre-keys from the store.
    pub fn process_prekey(
        local_identity: &SigningKeyPair,
        prekey_store: &dyn PreKeyStore,
        message: &PreKeySignalMessage,
    ) -> Result<SessionState> {
        let signed_prekey = prekey_store
            .load_signed_prekey(message.signed_prekey_id)
            .ok_or_else(|| Error::NoSuchPreKey(format!("signed prekey {}", message.signed_prekey_id)))?;
        let prekey = message.prekey_id.and_then(|id| prekey_store.load_prekey(id));

        SessionState::initialize_bob_session(
            local_identity,
            &signed_prekey,
            prekey.as_ref(),
            &message.base_key,
            &message.identity_key,
        )
    }
}

/// Drives encrypt/decrypt over a `Session`, handling the pre-key wrapping
/// that appears on a session's first outgoing message and the builder
/// dispatch that appears on a session's first incoming one.
pub struct SessionCipher;

impl SessionCipher {
    /// Encrypt on the session's current state. Wraps the ciphertext as a
    /// `PreKeySignalMessage` while a pending pre-key reference is still
    /// outstanding (the first ciphertext(s) of a freshly initiated session).
    pub fn encrypt(
        session: &mut Session,
        local_registration_id: u32,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage> {
        let state = session
            .current_mut()
            .ok_or_else(|| Error::SessionMissing("no current session state".into()))?;

        let pending = state.pending_prekey.clone();
        let message = state.encrypt(plaintext)?;

        match pending {
            Some(pending) => {
                let wrapped = PreKeySignalMessage {
                    registration_id: local_registration_id,
                    prekey_id: pending.prekey_id,
                    signed_prekey_id: pending.signed_prekey_id,
                    base_key: pending.base_key,
                    identity_key: state.local_identity_key,
                    message,
                };
                Ok(EncryptedMessage::PreKey(wrapped.serialize()))
            }
            None => Ok(EncryptedMessage::Whisper(message.serialize())),
        }
    }

    /// Decrypt an ordinary (`msg`) ciphertext against existing session
    /// state. Tries every archived state, most-recent first.
    pub fn decrypt_whisper(session: &mut Session, serialized: &[u8]) -> Result<Vec<u8>> {
        let message = SignalMessage::parse(serialized)?;
        session.decrypt(&message)
    }

    /// Decrypt a `pkmsg`. If no session exists yet, or the existing one
    /// can't decrypt it, builds a fresh Bob-side session from the embedded
    /// pre-key reference and prepends it. Returns the plaintext and the
    /// (possibly unchanged) session to persist.
    pub fn decrypt_prekey(
        local_identity: &SigningKeyPair,
        prekey_store: &dyn PreKeyStore,
        mut session: Session,
        serialized: &[u8],
    ) -> Result<(Vec<u8>, Session)> {
        let wrapped = PreKeySignalMessage::parse(serialized)?;

        if !session.is_empty() {
            if let Ok(plaintext) = session.decrypt(&wrapped.message) {
                return Ok((plaintext, session));
            }
        }

        let mut new_state = SessionBuilder::process_prekey(local_identity, prekey_store, &wrapped)?;
        let plaintext = new_state.decrypt(&wrapped.message)?;
        session.prepend(new_state);
        Ok((plaintext, session))
    }
}
