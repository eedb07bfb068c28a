/// Per-peer Signal session state: the double-ratchet state machine.

use crate::{
    error::{Error, Result},
    signal::{
        prekey::{PreKeyBundle, PreKey, SignedPreKey},
        SIGNAL_PROTOCOL_VERSION,
    },
    types::jid::SessionAddress,
    util::{
        keys::{ECKeyPair, SigningKeyPair, ed25519_public_to_x25519},
        crypto::{hkdf_expand, hmac_sha256, hmac_sha256_truncated, constant_time_eq, aes_cbc_encrypt, aes_cbc_decrypt, sha256},
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Reject receiving-chain fast-forwards further than this many steps ahead
/// of the chain's current index.
pub const MAX_JUMP: u32 = 2000;

/// Archived session states kept per address; oldest evicted first.
pub const MAX_ARCHIVED_SESSIONS: usize = 40;

fn chain_message_key(chain_key: &[u8; 32]) -> [u8; 32] {
    let mac = hmac_sha256(chain_key, &[0x01]).expect("hmac key length is fixed");
    mac.try_into().expect("hmac-sha256 output is 32 bytes")
}

fn chain_advance(chain_key: &[u8; 32]) -> [u8; 32] {
    let mac = hmac_sha256(chain_key, &[0x02]).expect("hmac key length is fixed");
    mac.try_into().expect("hmac-sha256 output is 32 bytes")
}

/// `(cipherKey, macKey, iv)` expanded from a message key.
struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
}

fn expand_message_key(message_key: &[u8; 32]) -> Result<MessageKeys> {
    let expanded = hkdf_expand(message_key, b"WhisperMessageKeys", 80)?;
    Ok(MessageKeys {
        cipher_key: expanded[0..32].try_into().unwrap(),
        mac_key: expanded[32..64].try_into().unwrap(),
        iv: expanded[64..80].try_into().unwrap(),
    })
}

/// One sending ratchet: our current ephemeral keypair, chain key, and index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingChain {
    pub chain_key: [u8; 32],
    pub index: u32,
    pub ratchet_keypair: ECKeyPair,
}

/// One receiving ratchet, keyed by the sender's ratchet public key. Skipped
/// message keys are bounded per chain by `MAX_JUMP`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingChain {
    pub chain_key: [u8; 32],
    pub index: u32,
    pub skipped: HashMap<u32, [u8; 32]>,
}

/// Pending pre-key information for a newly established outgoing session;
/// marks the first outgoing ciphertext as `pkmsg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub signed_prekey_id: u32,
    pub prekey_id: Option<u32>,
    pub base_key: [u8; 32],
}

/// One ratchet state for a peer address. A `Session` holds an ordered list
/// of these, most-recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u8,
    pub local_identity_key: [u8; 32],
    pub remote_identity_key: [u8; 32],
    pub root_key: [u8; 32],
    pub sending_chain: Option<SendingChain>,
    /// Length of the sending chain that was in effect before the last DH
    /// ratchet step; carried into `SignalMessage::previous_counter`.
    pub previous_sending_chain_length: u32,
    /// Keyed by sender ratchet public key.
    pub receiving_chains: HashMap<[u8; 32], ReceivingChain>,
    pub pending_prekey: Option<PendingPreKey>,
    pub closed: bool,
}

/// One Signal-protocol wire message: the ciphertext plus the ratchet
/// metadata needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub sender_ratchet: [u8; 32],
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    pub mac: [u8; 8],
}

impl SignalMessage {
    fn serialize_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + 32 + 4 + 4 + 4 + self.ciphertext.len());
        body.push(SIGNAL_PROTOCOL_VERSION << 4 | SIGNAL_PROTOCOL_VERSION);
        body.extend_from_slice(&self.sender_ratchet);
        body.extend_from_slice(&self.counter.to_be_bytes());
        body.extend_from_slice(&self.previous_counter.to_be_bytes());
        body.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        body.extend_from_slice(&self.ciphertext);
        body
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.serialize_body();
        out.extend_from_slice(&self.mac);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 1 + 32 + 4 + 4 + 4 + 8 {
            return Err(Error::ProtocolDecode("signal message too short".into()));
        }
        if data.len() - 8 < 1 + 32 + 4 + 4 + 4 {
            return Err(Error::ProtocolDecode("signal message truncated".into()));
        }
        let mut pos = 1;
        let sender_ratchet: [u8; 32] = data[pos..pos + 32].try_into().unwrap();
        pos += 32;
        let counter = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let previous_counter = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let ciphertext_len = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + ciphertext_len + 8 != data.len() {
            return Err(Error::ProtocolDecode("signal message length mismatch".into()));
        }
        let ciphertext = data[pos..pos + ciphertext_len].to_vec();
        pos += ciphertext_len;
        let mac: [u8; 8] = data[pos..pos + 8].try_into().unwrap();
        Ok(Self { sender_ratchet, counter, previous_counter, ciphertext, mac })
    }
}

/// `PreKeySignalMessage{registrationId, preKeyId?, signedPreKeyId, baseKey, identityKey, SignalMessage}`.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    pub registration_id: u32,
    pub prekey_id: Option<u32>,
    pub signed_prekey_id: u32,
    pub base_key: [u8; 32],
    pub identity_key: [u8; 32],
    pub message: SignalMessage,
}

impl PreKeySignalMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(SIGNAL_PROTOCOL_VERSION << 4 | SIGNAL_PROTOCOL_VERSION);
        out.extend_from_slice(&self.registration_id.to_be_bytes());
        out.extend_from_slice(&self.prekey_id.unwrap_or(0).to_be_bytes());
        out.push(if self.prekey_id.is_some() { 1 } else { 0 });
        out.extend_from_slice(&self.signed_prekey_id.to_be_bytes());
        out.extend_from_slice(&self.base_key);
        out.extend_from_slice(&self.identity_key);
        let inner = self.message.serialize();
        out.extend_from_slice(&(inner.len() as u32).to_be_bytes());
        out.extend_from_slice(&inner);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 1 + 4 + 4 + 1 + 4 + 32 + 32 + 4 {
            return Err(Error::ProtocolDecode("prekey signal message too short".into()));
        }
        let mut pos = 1;
        let registration_id = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let prekey_id_raw = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let has_prekey = data[pos] == 1;
        pos += 1;
        let signed_prekey_id = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let base_key: [u8; 32] = data[pos..pos + 32].try_into().unwrap();
        pos += 32;
        let identity_key: [u8; 32] = data[pos..pos + 32].try_into().unwrap();
        pos += 32;
        let inner_len = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + inner_len != data.len() {
            return Err(Error::ProtocolDecode("prekey signal message length mismatch".into()));
        }
        let message = SignalMessage::parse(&data[pos..pos + inner_len])?;
        Ok(Self {
            registration_id,
            prekey_id: has_prekey.then_some(prekey_id_raw),
            signed_prekey_id,
            base_key,
            identity_key,
            message,
        })
    }
}

impl SessionState {
    fn new(local_identity: [u8; 32], remote_identity: [u8; 32], root_key: [u8; 32]) -> Self {
        Self {
            version: SIGNAL_PROTOCOL_VERSION,
            local_identity_key: local_identity,
            remote_identity_key: remote_identity,
            root_key,
            sending_chain: None,
            previous_sending_chain_length: 0,
            receiving_chains: HashMap::new(),
            pending_prekey: None,
            closed: false,
        }
    }

    /// Alice side: establish an outgoing session from a pre-key bundle.
    /// Triple/quadruple DH, HKDF(salt=32 zero bytes, info="WhisperText").
    pub fn initialize_alice_session(
        local_identity: &SigningKeyPair,
        bundle: &PreKeyBundle,
        base_key: &ECKeyPair,
    ) -> Result<Self> {
        bundle.validate()?;
        let remote_identity: [u8; 32] = bundle
            .identity_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey("identity key must be 32 bytes".into()))?;

        let identity_ec = local_identity.to_x25519_keypair()?;
        let remote_identity_x25519 = ed25519_public_to_x25519(&remote_identity)?;
        let signed_prekey_pub = bundle.signed_prekey.public_key();

        let dh1 = identity_ec.ecdh(&signed_prekey_pub);
        let dh2 = base_key.ecdh(&remote_identity_x25519);
        let dh3 = base_key.ecdh(&signed_prekey_pub);

        let mut shared_secret = Vec::new();
        shared_secret.extend_from_slice(&dh1);
        shared_secret.extend_from_slice(&dh2);
        shared_secret.extend_from_slice(&dh3);
        if let Some(prekey) = &bundle.prekey {
            shared_secret.extend_from_slice(&base_key.ecdh(&prekey.public_key()));
        }

        let derived = hkdf_expand(&shared_secret, b"WhisperText", 64)?;
        let root_key: [u8; 32] = derived[0..32].try_into().unwrap();
        let chain_key: [u8; 32] = derived[32..64].try_into().unwrap();

        let mut session = Self::new(local_identity.public_bytes(), remote_identity, root_key);
        session.sending_chain = Some(SendingChain {
            chain_key,
            index: 0,
            ratchet_keypair: base_key.clone(),
        });
        session.pending_prekey = Some(PendingPreKey {
            signed_prekey_id: bundle.signed_prekey.id,
            prekey_id: bundle.prekey.as_ref().map(|pk| pk.id),
            base_key: base_key.public_bytes(),
        });
        Ok(session)
    }

    /// Bob side: mirror derivation with identity roles reversed, installing
    /// a receiving chain keyed by the sender's base key.
    pub fn initialize_bob_session(
        local_identity: &SigningKeyPair,
        signed_prekey: &SignedPreKey,
        prekey: Option<&PreKey>,
        sender_base_key: &[u8; 32],
        sender_identity: &[u8; 32],
    ) -> Result<Self> {
        let identity_ec = local_identity.to_x25519_keypair()?;
        let sender_identity_x25519 = ed25519_public_to_x25519(sender_identity)?;

        let dh1 = signed_prekey.keypair.ecdh(&sender_identity_x25519);
        let dh2 = identity_ec.ecdh(sender_base_key);
        let dh3 = signed_prekey.keypair.ecdh(sender_base_key);

        let mut shared_secret = Vec::new();
        shared_secret.extend_from_slice(&dh1);
        shared_secret.extend_from_slice(&dh2);
        shared_secret.extend_from_slice(&dh3);
        if let Some(prekey) = prekey {
            shared_secret.extend_from_slice(&prekey.keypair.ecdh(sender_base_key));
        }

        let derived = hkdf_expand(&shared_secret, b"WhisperText", 64)?;
        let root_key: [u8; 32] = derived[0..32].try_into().unwrap();
        let chain_key: [u8; 32] = derived[32..64].try_into().unwrap();

        let mut session = Self::new(local_identity.public_bytes(), *sender_identity, root_key);
        session.receiving_chains.insert(
            *sender_base_key,
            ReceivingChain { chain_key, index: 0, skipped: HashMap::new() },
        );
        Ok(session)
    }

    pub fn has_pending_prekey(&self) -> bool {
        self.pending_prekey.is_some()
    }

    pub fn clear_pending_prekey(&mut self) {
        self.pending_prekey = None;
    }

    fn mac(&self, mac_key: &[u8; 32], serialized_body: &[u8], we_are_sender: bool) -> Result<[u8; 8]> {
        let (sender, receiver) = if we_are_sender {
            (self.local_identity_key, self.remote_identity_key)
        } else {
            (self.remote_identity_key, self.local_identity_key)
        };
        let mut data = Vec::with_capacity(64 + serialized_body.len());
        data.extend_from_slice(&sender);
        data.extend_from_slice(&receiver);
        data.extend_from_slice(serialized_body);
        let full = hmac_sha256_truncated(mac_key, &data, 8)?;
        Ok(full.try_into().unwrap())
    }

    /// Encrypt one message on the current sending chain, advancing it.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<SignalMessage> {
        let chain = self
            .sending_chain
            .as_mut()
            .ok_or_else(|| Error::Protocol("no sending chain established".into()))?;

        let message_key = chain_message_key(&chain.chain_key);
        let keys = expand_message_key(&message_key)?;
        let ciphertext = aes_cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)?;

        let mut message = SignalMessage {
            sender_ratchet: chain.ratchet_keypair.public_bytes(),
            counter: chain.index,
            previous_counter: self.previous_sending_chain_length,
            ciphertext,
            mac: [0u8; 8],
        };
        let body = message.serialize_body();
        message.mac = self.mac(&keys.mac_key, &body, true)?;

        let chain = self.sending_chain.as_mut().unwrap();
        chain.chain_key = chain_advance(&chain.chain_key);
        chain.index += 1;

        Ok(message)
    }

    /// Decrypt one `SignalMessage`, performing a DH ratchet step if the
    /// sender's ratchet key is new. MAC is verified before any ratchet
    /// state is committed.
    pub fn decrypt(&mut self, message: &SignalMessage) -> Result<Vec<u8>> {
        if !self.receiving_chains.contains_key(&message.sender_ratchet) {
            self.perform_dh_ratchet(&message.sender_ratchet)?;
        }

        let chain = self.receiving_chains.get(&message.sender_ratchet).unwrap();

        let message_key = if message.counter < chain.index {
            *chain
                .skipped
                .get(&message.counter)
                .ok_or(Error::DuplicateMessage(message.counter))?
        } else {
            if message.counter - chain.index > MAX_JUMP {
                return Err(Error::OutOfBounds {
                    counter: message.counter,
                    expected: chain.index,
                    max_jump: MAX_JUMP,
                });
            }
            let mut key = chain.chain_key;
            let mut idx = chain.index;
            let mut target_key = None;
            let mut new_skipped = chain.skipped.clone();
            while idx <= message.counter {
                let mk = chain_message_key(&key);
                if idx == message.counter {
                    target_key = Some(mk);
                } else {
                    new_skipped.insert(idx, mk);
                }
                key = chain_advance(&key);
                idx += 1;
            }
            let target_key = target_key.expect("loop always visits message.counter");

            let keys = expand_message_key(&target_key)?;
            let body = message.serialize_body();
            let expected_mac = self.mac(&keys.mac_key, &body, false)?;
            if !constant_time_eq(&expected_mac, &message.mac) {
                return Err(Error::BadMac);
            }
            let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;

            let chain = self.receiving_chains.get_mut(&message.sender_ratchet).unwrap();
            chain.chain_key = key;
            chain.index = idx;
            chain.skipped = new_skipped;
            if self.pending_prekey.is_some() {
                self.pending_prekey = None;
            }
            return Ok(plaintext);
        };

        // Skipped-key path: MAC verified before the key is evicted.
        let keys = expand_message_key(&message_key)?;
        let body = message.serialize_body();
        let expected_mac = self.mac(&keys.mac_key, &body, false)?;
        if !constant_time_eq(&expected_mac, &message.mac) {
            return Err(Error::BadMac);
        }
        let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;
        self.receiving_chains
            .get_mut(&message.sender_ratchet)
            .unwrap()
            .skipped
            .remove(&message.counter);
        Ok(plaintext)
    }

    /// DH ratchet: derive a new receiving chain from the peer's new ratchet
    /// key, then roll our own sending chain forward to match.
    fn perform_dh_ratchet(&mut self, their_ratchet_pub: &[u8; 32]) -> Result<()> {
        let our_current = self
            .sending_chain
            .as_ref()
            .map(|c| c.ratchet_keypair.clone())
            .unwrap_or_else(ECKeyPair::generate);
        let our_current_index = self.sending_chain.as_ref().map(|c| c.index).unwrap_or(0);

        let dh_recv = our_current.ecdh(their_ratchet_pub);
        let expanded = hkdf_expand(&sha256(&[self.root_key.as_slice(), &dh_recv].concat()), b"WhisperRatchet", 64)?;
        let root_after_recv: [u8; 32] = expanded[0..32].try_into().unwrap();
        let receiving_chain_key: [u8; 32] = expanded[32..64].try_into().unwrap();

        self.receiving_chains.insert(
            *their_ratchet_pub,
            ReceivingChain { chain_key: receiving_chain_key, index: 0, skipped: HashMap::new() },
        );

        let new_ratchet = ECKeyPair::generate();
        let dh_send = new_ratchet.ecdh(their_ratchet_pub);
        let expanded = hkdf_expand(&sha256(&[root_after_recv.as_slice(), &dh_send].concat()), b"WhisperRatchet", 64)?;
        let root_after_send: [u8; 32] = expanded[0..32].try_into().unwrap();
        let sending_chain_key: [u8; 32] = expanded[32..64].try_into().unwrap();

        self.root_key = root_after_send;
        self.previous_sending_chain_length = our_current_index;
        self.sending_chain = Some(SendingChain {
            chain_key: sending_chain_key,
            index: 0,
            ratchet_keypair: new_ratchet,
        });

        Ok(())
    }
}

/// Ordered list of `SessionState` for one peer address, most-recent first.
/// Only the first non-closed state is current; older states remain to
/// decrypt late-arriving ciphertexts under earlier ratchets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    states: VecDeque<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new state as current, evicting the oldest archived state
    /// once the cap is exceeded.
    pub fn prepend(&mut self, state: SessionState) {
        self.states.push_front(state);
        while self.states.len() > MAX_ARCHIVED_SESSIONS {
            self.states.pop_back();
        }
    }

    pub fn current(&self) -> Option<&SessionState> {
        self.states.iter().find(|s| !s.closed)
    }

    pub fn current_mut(&mut self) -> Option<&mut SessionState> {
        self.states.iter_mut().find(|s| !s.closed)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Try decrypting against every state, most-recent first, returning the
    /// first success. Mirrors the archived-state search order.
    pub fn decrypt(&mut self, message: &SignalMessage) -> Result<Vec<u8>> {
        for state in self.states.iter_mut() {
            if let Ok(plaintext) = state.decrypt(message) {
                return Ok(plaintext);
            }
        }
        Err(Error::SessionMissing("no state could decrypt message".into()))
    }
}

/// Persists sessions keyed by `SessionAddress`. Mutated only under the
/// single-writer lock, so interior state uses a plain async `RwLock`
/// rather than per-entry locking.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, address: &SessionAddress) -> Option<Session>;
    async fn store_session(&self, address: &SessionAddress, session: Session);
    async fn contains_session(&self, address: &SessionAddress) -> bool;
    async fn delete_session(&self, address: &SessionAddress);
    async fn get_sub_device_sessions(&self, base_user: &str) -> Vec<SessionAddress>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionAddress, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, address: &SessionAddress) -> Option<Session> {
        self.sessions.read().await.get(address).cloned()
    }

    async fn store_session(&self, address: &SessionAddress, session: Session) {
        self.sessions.write().await.insert(address.clone(), session);
    }

    async fn contains_session(&self, address: &SessionAddress) -> bool {
        self.sessions.read().await.contains_key(address)
    }

    async fn delete_session(&self, address: &SessionAddress) {
        self.sessions.write().await.remove(address);
    }

    async fn get_sub_device_sessions(&self, base_user: &str) -> Vec<SessionAddress> {
        self.sessions
            .read()
            .await
            .keys()
            .filter(|addr| addr.name == base_user)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::prekey::PreKeyBundle;

    fn bob_bundle_and_keys() -> (SigningKeyPair, PreKeyBundle) {
        let bob_identity = SigningKeyPair::generate();
        let bundle = PreKeyBundle::new(&bob_identity, 1, Some(2), 12345, 1).unwrap();
        (bob_identity, bundle)
    }

    #[test]
    fn alice_session_has_pending_prekey() {
        let alice_identity = SigningKeyPair::generate();
        let (_bob_identity, bundle) = bob_bundle_and_keys();
        let base_key = ECKeyPair::generate();

        let session = SessionState::initialize_alice_session(&alice_identity, &bundle, &base_key).unwrap();
        assert!(session.has_pending_prekey());
        assert_eq!(session.local_identity_key, alice_identity.public_bytes());
    }

    fn paired_sessions() -> (SessionState, SessionState) {
        let alice_identity = SigningKeyPair::generate();
        let bob_identity = SigningKeyPair::generate();
        let signed_prekey_id = 1;
        let signed_prekey = SignedPreKey::generate(signed_prekey_id, &bob_identity).unwrap();
        let prekey = PreKey::generate(2);

        let bundle = PreKeyBundle {
            identity_key: bob_identity.public_bytes().to_vec(),
            signed_prekey: signed_prekey.clone(),
            prekey: Some(prekey.clone()),
            registration_id: 12345,
            device_id: 1,
        };

        let base_key = ECKeyPair::generate();
        let alice = SessionState::initialize_alice_session(&alice_identity, &bundle, &base_key).unwrap();

        let bob = SessionState::initialize_bob_session(
            &bob_identity,
            &signed_prekey,
            Some(&prekey),
            &base_key.public_bytes(),
            &alice_identity.public_bytes(),
        )
        .unwrap();

        (alice, bob)
    }

    #[test]
    fn round_trip_single_message() {
        let (mut alice, mut bob) = paired_sessions();
        let plaintext = b"hello bob";
        let message = alice.encrypt(plaintext).unwrap();
        let decrypted = bob.decrypt(&message).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn out_of_order_delivery_uses_skipped_keys() {
        let (mut alice, mut bob) = paired_sessions();
        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();
        let m2 = alice.encrypt(b"two").unwrap();

        assert_eq!(bob.decrypt(&m2).unwrap(), b"two");
        let chain = bob.receiving_chains.get(&m2.sender_ratchet).unwrap();
        assert_eq!(chain.skipped.len(), 2);

        assert_eq!(bob.decrypt(&m0).unwrap(), b"zero");
        assert_eq!(bob.decrypt(&m1).unwrap(), b"one");

        let chain = bob.receiving_chains.get(&m2.sender_ratchet).unwrap();
        assert_eq!(chain.index, 3);
        assert!(chain.skipped.is_empty());
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let (mut alice, mut bob) = paired_sessions();
        let mut message = alice.encrypt(b"hello").unwrap();
        message.ciphertext[0] ^= 0xFF;
        assert!(matches!(bob.decrypt(&message), Err(Error::BadMac)));
    }

    #[test]
    fn jump_beyond_max_jump_is_rejected() {
        let (mut alice, mut bob) = paired_sessions();
        for _ in 0..3 {
            alice.encrypt(b"x").unwrap();
        }
        let mut far = alice.encrypt(b"far").unwrap();
        far.counter = MAX_JUMP + 5;
        assert!(matches!(bob.decrypt(&far), Err(Error::OutOfBounds { .. })));
    }

    #[tokio::test]
    async fn memory_session_store_roundtrip() {
        let store = MemorySessionStore::new();
        let addr = SessionAddress::new("bob", 0);
        assert!(!store.contains_session(&addr).await);

        let (alice, _bob) = paired_sessions();
        let mut session = Session::new();
        session.prepend(alice);
        store.store_session(&addr, session).await;

        assert!(store.contains_session(&addr).await);
        let loaded = store.load_session(&addr).await.unwrap();
        assert!(loaded.current().is_some());

        store.delete_session(&addr).await;
        assert!(!store.contains_session(&addr).await);
    }

    #[test]
    fn session_caps_archived_states() {
        let mut session = Session::new();
        for i in 0..(MAX_ARCHIVED_SESSIONS + 5) {
            let mut state = SessionState::new([0u8; 32], [0u8; 32], [0u8; 32]);
            state.closed = i != 0;
            session.prepend(state);
        }
        assert_eq!(session.states.len(), MAX_ARCHIVED_SESSIONS);
    }

    #[test]
    fn signal_message_roundtrips_through_bytes() {
        let message = SignalMessage {
            sender_ratchet: [7u8; 32],
            counter: 3,
            previous_counter: 1,
            ciphertext: vec![1, 2, 3, 4],
            mac: [9u8; 8],
        };
        let bytes = message.serialize();
        let parsed = SignalMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn previous_counter_carries_prior_sending_chain_length_across_ratchet() {
        let mut state = SessionState::new([0u8; 32], [0u8; 32], [0u8; 32]);
        state.sending_chain = Some(SendingChain {
            chain_key: [1u8; 32],
            index: 5,
            ratchet_keypair: ECKeyPair::generate(),
        });

        let their_ratchet = ECKeyPair::generate();
        state.perform_dh_ratchet(&their_ratchet.public_bytes()).unwrap();
        assert_eq!(state.previous_sending_chain_length, 5);

        let message = state.encrypt(b"hi").unwrap();
        assert_eq!(message.previous_counter, 5);
    }
}
