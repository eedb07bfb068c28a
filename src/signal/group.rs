/// Sender-key (group) ratchet: one chain per `(groupId, senderAddress)`,
/// Ed25519-signed distribution and per-message signatures.

use crate::{
    error::{Error, Result},
    types::jid::SessionAddress,
    util::{
        crypto::{aes_cbc_decrypt, aes_cbc_encrypt, hkdf_expand, hmac_sha256},
        keys::{verify_signature, SigningKeyPair},
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cap on retained past message keys per sender-key state, bounding memory
/// use for out-of-order group decryption.
pub const MAX_MESSAGE_KEYS: usize = 2000;

fn chain_message_key(chain_key: &[u8; 32]) -> [u8; 32] {
    let mac = hmac_sha256(chain_key, &[0x01]).expect("hmac key length is fixed");
    mac.try_into().expect("hmac-sha256 output is 32 bytes")
}

fn chain_advance(chain_key: &[u8; 32]) -> [u8; 32] {
    let mac = hmac_sha256(chain_key, &[0x02]).expect("hmac key length is fixed");
    mac.try_into().expect("hmac-sha256 output is 32 bytes")
}

struct MessageKeys {
    cipher_key: [u8; 32],
    iv: [u8; 16],
}

fn expand_message_key(message_key: &[u8; 32]) -> Result<MessageKeys> {
    let expanded = hkdf_expand(message_key, b"SenderKeyMessageKeys", 48)?;
    Ok(MessageKeys {
        cipher_key: expanded[0..32].try_into().unwrap(),
        iv: expanded[32..48].try_into().unwrap(),
    })
}

/// Identifies one sender-key chain: a group plus the participant who owns
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderKeyName {
    pub group_id: String,
    pub sender: SessionAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: SessionAddress) -> Self {
        Self { group_id: group_id.into(), sender }
    }
}

/// The distribution message a sender broadcasts (over 1:1 sessions) when
/// establishing or rotating a sender key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyDistribution {
    pub id: u32,
    pub iteration: u32,
    pub chain_key: [u8; 32],
    pub signing_public_key: [u8; 32],
}

impl SenderKeyDistribution {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + 32 + 32);
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.iteration.to_be_bytes());
        out.extend_from_slice(&self.chain_key);
        out.extend_from_slice(&self.signing_public_key);
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != 4 + 4 + 32 + 32 {
            return Err(Error::ProtocolDecode("sender key distribution has wrong length".into()));
        }
        Ok(Self {
            id: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            iteration: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            chain_key: data[8..40].try_into().unwrap(),
            signing_public_key: data[40..72].try_into().unwrap(),
        })
    }
}

/// A signed sender-key ciphertext: `id`, `iteration`, AES-CBC ciphertext,
/// and an Ed25519 signature over the serialized body.
#[derive(Debug, Clone)]
pub struct SenderKeyMessage {
    pub id: u32,
    pub iteration: u32,
    pub ciphertext: Vec<u8>,
    pub signature: [u8; 64],
}

impl SenderKeyMessage {
    fn serialize_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + 4 + self.ciphertext.len());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.iteration.to_be_bytes());
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.serialize_body();
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 + 4 + 4 + 64 {
            return Err(Error::ProtocolDecode("sender key message too short".into()));
        }
        let id = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let iteration = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let ciphertext_len = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;
        if 12 + ciphertext_len + 64 != data.len() {
            return Err(Error::ProtocolDecode("sender key message length mismatch".into()));
        }
        let ciphertext = data[12..12 + ciphertext_len].to_vec();
        let signature: [u8; 64] = data[12 + ciphertext_len..].try_into().unwrap();
        Ok(Self { id, iteration, ciphertext, signature })
    }
}

/// Local state for a single sender-key chain: the current chain key plus a
/// bounded ring of past message keys for out-of-order decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    pub id: u32,
    pub chain_key: [u8; 32],
    pub iteration: u32,
    pub signing_public_key: [u8; 32],
    /// Only populated on the sending side.
    pub signing_private_key: Option<[u8; 32]>,
    /// iteration -> message key, oldest entries evicted first once the
    /// ring exceeds `MAX_MESSAGE_KEYS`.
    past_message_keys: HashMap<u32, [u8; 32]>,
    key_order: std::collections::VecDeque<u32>,
}

impl SenderKeyState {
    /// Create a brand-new chain, owned locally (sending side).
    pub fn new_local(id: u32, signing_keypair: &SigningKeyPair) -> Self {
        let chain_key: Vec<u8> = crate::util::crypto::generate_key();
        Self {
            id,
            chain_key: chain_key.try_into().unwrap(),
            iteration: 0,
            signing_public_key: signing_keypair.public_bytes(),
            signing_private_key: Some(signing_keypair.private_bytes()),
            past_message_keys: HashMap::new(),
            key_order: std::collections::VecDeque::new(),
        }
    }

    /// Install a chain received from a distribution message (receiving side).
    pub fn from_distribution(distribution: &SenderKeyDistribution) -> Self {
        Self {
            id: distribution.id,
            chain_key: distribution.chain_key,
            iteration: distribution.iteration,
            signing_public_key: distribution.signing_public_key,
            signing_private_key: None,
            past_message_keys: HashMap::new(),
            key_order: std::collections::VecDeque::new(),
        }
    }

    pub fn distribution(&self) -> SenderKeyDistribution {
        SenderKeyDistribution {
            id: self.id,
            iteration: self.iteration,
            chain_key: self.chain_key,
            signing_public_key: self.signing_public_key,
        }
    }

    fn remember_key(&mut self, iteration: u32, key: [u8; 32]) {
        self.past_message_keys.insert(iteration, key);
        self.key_order.push_back(iteration);
        while self.key_order.len() > MAX_MESSAGE_KEYS {
            if let Some(oldest) = self.key_order.pop_front() {
                self.past_message_keys.remove(&oldest);
            }
        }
    }

    /// Encrypt on the local chain, signing the serialized body with the
    /// sender's Ed25519 key. Only valid for locally-owned chains.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<SenderKeyMessage> {
        let signing_private = self
            .signing_private_key
            .ok_or_else(|| Error::Protocol("cannot encrypt on a remote sender key".into()))?;
        let signing_keypair = SigningKeyPair::from_private_bytes(&signing_private)?;

        let message_key = chain_message_key(&self.chain_key);
        let keys = expand_message_key(&message_key)?;
        let ciphertext = aes_cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)?;

        let mut message = SenderKeyMessage {
            id: self.id,
            iteration: self.iteration,
            ciphertext,
            signature: [0u8; 64],
        };
        let body = message.serialize_body();
        message.signature = signing_keypair.sign(&body);

        self.chain_key = chain_advance(&self.chain_key);
        self.iteration += 1;

        Ok(message)
    }

    /// Verify signature, then decrypt, fast-forwarding or consulting the
    /// cached-key ring as needed. Distinguishes a too-old replay
    /// (`DuplicateMessage`, evicted from the cache) from a too-old-but-
    /// never-cached iteration (`NoSuchKey`).
    pub fn decrypt(&mut self, message: &SenderKeyMessage) -> Result<Vec<u8>> {
        if message.id != self.id {
            return Err(Error::Protocol(format!(
                "sender key id mismatch: expected {}, got {}",
                self.id, message.id
            )));
        }

        let body = message.serialize_body();
        verify_signature(&self.signing_public_key, &body, &message.signature)
            .map_err(|_| Error::InvalidSignature)?;

        if message.iteration < self.iteration {
            return match self.past_message_keys.get(&message.iteration).copied() {
                Some(key) => {
                    let keys = expand_message_key(&key)?;
                    let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;
                    self.past_message_keys.remove(&message.iteration);
                    Ok(plaintext)
                }
                None => {
                    if self.iteration.saturating_sub(message.iteration) as usize > MAX_MESSAGE_KEYS {
                        Err(Error::DuplicateMessage(message.iteration))
                    } else {
                        Err(Error::NoSuchKey(message.iteration))
                    }
                }
            };
        }

        let mut key = self.chain_key;
        let mut idx = self.iteration;
        let mut target_key = None;
        while idx <= message.iteration {
            let mk = chain_message_key(&key);
            if idx == message.iteration {
                target_key = Some(mk);
            } else {
                self.remember_key(idx, mk);
            }
            key = chain_advance(&key);
            idx += 1;
        }
        let target_key = target_key.expect("loop always reaches message.iteration");

        let keys = expand_message_key(&target_key)?;
        let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;

        self.chain_key = key;
        self.iteration = idx;
        Ok(plaintext)
    }
}

/// Persists sender-key state keyed by `(groupId, senderAddress)`.
#[async_trait]
pub trait GroupSessionStore: Send + Sync {
    async fn load_sender_key(&self, name: &SenderKeyName) -> Option<SenderKeyState>;
    async fn store_sender_key(&self, name: &SenderKeyName, state: SenderKeyState);
    async fn contains_sender_key(&self, name: &SenderKeyName) -> bool;
    async fn delete_sender_key(&self, name: &SenderKeyName);
}

#[derive(Default)]
pub struct MemoryGroupSessionStore {
    states: RwLock<HashMap<SenderKeyName, SenderKeyState>>,
}

impl MemoryGroupSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupSessionStore for MemoryGroupSessionStore {
    async fn load_sender_key(&self, name: &SenderKeyName) -> Option<SenderKeyState> {
        self.states.read().await.get(name).cloned()
    }

    async fn store_sender_key(&self, name: &SenderKeyName, state: SenderKeyState) {
        self.states.write().await.insert(name.clone(), state);
    }

    async fn contains_sender_key(&self, name: &SenderKeyName) -> bool {
        self.states.read().await.contains_key(name)
    }

    async fn delete_sender_key(&self, name: &SenderKeyName) {
        self.states.write().await.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_states() -> (SenderKeyState, SenderKeyState) {
        let signing_keypair = SigningKeyPair::generate();
        let sender = SenderKeyState::new_local(1, &signing_keypair);
        let receiver = SenderKeyState::from_distribution(&sender.distribution());
        (sender, receiver)
    }

    #[test]
    fn round_trip_single_message() {
        let (mut sender, mut receiver) = paired_states();
        let message = sender.encrypt(b"hello group").unwrap();
        let plaintext = receiver.decrypt(&message).unwrap();
        assert_eq!(plaintext, b"hello group");
    }

    #[test]
    fn out_of_order_delivery_uses_cached_keys() {
        let (mut sender, mut receiver) = paired_states();
        let m0 = sender.encrypt(b"zero").unwrap();
        let m1 = sender.encrypt(b"one").unwrap();
        let m2 = sender.encrypt(b"two").unwrap();

        assert_eq!(receiver.decrypt(&m2).unwrap(), b"two");
        assert_eq!(receiver.decrypt(&m0).unwrap(), b"zero");
        assert_eq!(receiver.decrypt(&m1).unwrap(), b"one");
        assert_eq!(receiver.iteration, 3);
    }

    #[test]
    fn replay_of_consumed_key_is_no_such_key() {
        let (mut sender, mut receiver) = paired_states();
        let m0 = sender.encrypt(b"zero").unwrap();
        let m1 = sender.encrypt(b"one").unwrap();
        receiver.decrypt(&m1).unwrap();
        receiver.decrypt(&m0).unwrap();
        // iteration 0's cached key was consumed on first decrypt; replaying
        // it again finds neither a live chain position nor a cache entry.
        assert!(matches!(receiver.decrypt(&m0), Err(Error::NoSuchKey(0))));
    }

    #[test]
    fn tampered_ciphertext_fails_signature_check() {
        let (mut sender, mut receiver) = paired_states();
        let mut message = sender.encrypt(b"hello").unwrap();
        message.ciphertext[0] ^= 0xFF;
        assert!(matches!(receiver.decrypt(&message), Err(Error::InvalidSignature)));
    }

    #[test]
    fn wrong_sender_key_id_is_rejected() {
        let (mut sender, mut receiver) = paired_states();
        let mut message = sender.encrypt(b"hello").unwrap();
        message.id = 99;
        assert!(matches!(receiver.decrypt(&message), Err(Error::Protocol(_))));
    }

    #[test]
    fn distribution_message_round_trips_through_bytes() {
        let signing_keypair = SigningKeyPair::generate();
        let sender = SenderKeyState::new_local(1, &signing_keypair);
        let distribution = sender.distribution();
        let bytes = distribution.serialize();
        let parsed = SenderKeyDistribution::deserialize(&bytes).unwrap();
        assert_eq!(parsed, distribution);
    }

    #[tokio::test]
    async fn memory_group_session_store_roundtrip() {
        let store = MemoryGroupSessionStore::new();
        let name = SenderKeyName::new("123@g.us", SessionAddress::new("alice", 0));
        assert!(!store.contains_sender_key(&name).await);

        let signing_keypair = SigningKeyPair::generate();
        let state = SenderKeyState::new_local(1, &signing_keypair);
        store.store_sender_key(&name, state).await;

        assert!(store.contains_sender_key(&name).await);
        store.delete_sender_key(&name).await;
        assert!(!store.contains_sender_key(&name).await);
    }
}
