// Copyright (c) 2025 Whatsmeow-rs Contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # wa-e2e-core
//!
//! The end-to-end encrypted messaging core of a WhatsApp Web/multi-device
//! client: Signal protocol sessions and sender keys, message
//! encode/decode, device and group membership caching, and the stanza
//! codec those layers speak over.

pub mod binary;
pub mod client;
pub mod error;
pub mod handler;
pub mod registry;
pub mod signal;
pub mod socket;
pub mod store;
pub mod types;
pub mod util;

pub use client::Client;
pub use error::{Error, Result};
pub use handler::{MessageHandler, MessageHandlerConfig};
pub use types::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
