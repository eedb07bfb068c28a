use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Classification of a JID's server component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Server {
    /// `s.whatsapp.net` — ordinary 1:1 user.
    Whatsapp,
    /// `lid` — hidden/interop user identity.
    User,
    /// `g.us` — group.
    Group,
    /// `broadcast`, user `status` — status broadcast.
    Status,
    /// `broadcast` — broadcast list, non-status.
    Broadcast,
    /// Anything else (e.g. server JIDs).
    Other,
}

impl Server {
    fn classify(user: &str, server: &str) -> Server {
        match server {
            "s.whatsapp.net" => Server::Whatsapp,
            "lid" => Server::User,
            "g.us" => Server::Group,
            "broadcast" if user == "status" => Server::Status,
            "broadcast" => Server::Broadcast,
            _ => Server::Other,
        }
    }
}

/// `(name, deviceId)` pair used to key Signal protocol session state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionAddress {
    pub name: String,
    pub device_id: u32,
}

impl SessionAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }
}

impl fmt::Display for SessionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.device_id)
    }
}

/// JID (Jabber ID) represents a WhatsApp user, device, or group identifier:
/// `user[.agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JID {
    pub user: String,
    pub agent: u8,
    pub device: u8,
    pub server: String,
    pub ad: bool,
}

impl JID {
    /// Create a bare user@server JID (no device/agent suffix).
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: 0,
            device: 0,
            server: server.into(),
            ad: false,
        }
    }

    /// Create a device-addressed JID: `user:device@server`.
    pub fn new_device(user: impl Into<String>, device: u8, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: 0,
            device,
            server: server.into(),
            ad: device != 0,
        }
    }

    pub fn new_group(group_id: &str) -> Self {
        Self::new(group_id, "g.us")
    }

    pub fn status_broadcast() -> Self {
        Self::new("status", "broadcast")
    }

    /// Parse `user[.agent]:device@server`, falling back to plain `user@server`.
    pub fn parse(jid_str: &str) -> Result<Self> {
        jid_str.parse()
    }

    pub fn server_kind(&self) -> Server {
        Server::classify(&self.user, &self.server)
    }

    pub fn is_user(&self) -> bool {
        matches!(self.server_kind(), Server::Whatsapp | Server::User)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.server_kind(), Server::Group)
    }

    pub fn is_status(&self) -> bool {
        matches!(self.server_kind(), Server::Status)
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.server_kind(), Server::Broadcast | Server::Status)
    }

    /// Strip the device/agent component, returning the bare `user@server` JID.
    pub fn to_non_ad(&self) -> JID {
        JID::new(self.user.clone(), self.server.clone())
    }

    pub fn to_non_ad_string(&self) -> String {
        format!("{}@{}", self.user, self.server)
    }

    /// Map this JID to the `(name, deviceId)` pair used to key Signal session state.
    pub fn to_signal_address(&self) -> SessionAddress {
        SessionAddress::new(self.user.clone(), self.device as u32)
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent != 0 {
            write!(f, "{}.{}:{}@{}", self.user, self.agent, self.device, self.server)
        } else if self.ad || self.device != 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for JID {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() != 2 || parts[1].is_empty() {
            return Err(Error::InvalidJID(format!("missing server in JID: {}", s)));
        }
        let user_part = parts[0];
        let server = parts[1].to_string();

        let (user, agent) = match user_part.split_once('.') {
            Some((user, agent_str)) => {
                let agent = agent_str
                    .split(':')
                    .next()
                    .unwrap_or(agent_str)
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidJID(format!("invalid agent in JID: {}", s)))?;
                (user.to_string(), agent)
            }
            None => (user_part.to_string(), 0),
        };

        let (user, device, ad) = if let Some((base, device_str)) = user_part.rsplit_once(':') {
            let base = if let Some((u, _)) = base.split_once('.') {
                u.to_string()
            } else {
                base.to_string()
            };
            let device = device_str
                .parse::<u8>()
                .map_err(|_| Error::InvalidJID(format!("invalid device in JID: {}", s)))?;
            (base, device, true)
        } else {
            (user, 0, false)
        };

        Ok(JID {
            user,
            agent,
            device,
            server,
            ad,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_parsing() {
        let jid_str = "1234567890@s.whatsapp.net";
        let jid = JID::parse(jid_str).unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, "s.whatsapp.net");
        assert_eq!(jid.to_string(), jid_str);
    }

    #[test]
    fn test_device_jid_parsing() {
        let jid: JID = "alice:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "alice");
        assert_eq!(jid.device, 2);
        assert!(jid.ad);
        assert_eq!(jid.to_string(), "alice:2@s.whatsapp.net");
    }

    #[test]
    fn test_group_jid() {
        let group_jid = JID::new_group("groupid123");
        assert_eq!(group_jid.server, "g.us");
        assert!(group_jid.is_group());
    }

    #[test]
    fn test_status_jid() {
        let jid = JID::status_broadcast();
        assert!(jid.is_status());
        assert!(jid.is_broadcast());
    }

    #[test]
    fn test_to_signal_address() {
        let jid: JID = "bob:0@s.whatsapp.net".parse().unwrap();
        let addr = jid.to_signal_address();
        assert_eq!(addr.name, "bob");
        assert_eq!(addr.device_id, 0);
    }

    #[test]
    fn test_invalid_jid_missing_server() {
        assert!(JID::parse("no-at-sign").is_err());
    }

    #[test]
    fn test_to_non_ad() {
        let jid: JID = "alice:3@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.to_non_ad_string(), "alice@s.whatsapp.net");
    }
}
