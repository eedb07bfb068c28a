use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JID: {0}")]
    InvalidJID(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("MAC verification failed")]
    BadMac,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("identity for {0} is untrusted")]
    UntrustedIdentity(String),

    #[error("no such pre-key: {0}")]
    NoSuchPreKey(String),

    #[error("duplicate message (replay at iteration {0})")]
    DuplicateMessage(u32),

    #[error("no cached key for iteration {0}")]
    NoSuchKey(u32),

    #[error("counter {counter} is out of bounds for expected index {expected} (max jump {max_jump})")]
    OutOfBounds {
        counter: u32,
        expected: u32,
        max_jump: u32,
    },

    #[error("unsupported enc type: {0}")]
    UnsupportedType(String),

    #[error("no session for address {0}")]
    SessionMissing(String),

    #[error("malformed stanza: {0}")]
    ProtocolDecode(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("element missing: {0}")]
    ElementMissing(String),

    #[error("IQ error - code: {code}, text: {text}")]
    IQ { code: u16, text: String },
}
