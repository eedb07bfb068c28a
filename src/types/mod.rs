pub mod jid;
pub mod message;
pub mod events;

pub use jid::*;
pub use message::*;
pub use events::*;