//! Device and group membership caches, refreshed via USync / group-metadata
//! queries against the socket when a lookup misses.

use crate::{
    binary::node::{Node, NodeContent},
    error::{Error, Result},
    socket::Socket,
    types::JID,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

fn text_id() -> String {
    format!("{:x}", fastrand::u64(..))
}

/// `userJid → device list`, 5-minute TTL per entry.
pub struct DeviceRegistry {
    cache: RwLock<HashMap<String, (Vec<JID>, Instant)>>,
    ttl: Duration,
}

impl DeviceRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn cached(&self, user_key: &str) -> Option<Vec<JID>> {
        let cache = self.cache.read().await;
        let (devices, inserted) = cache.get(user_key)?;
        if inserted.elapsed() < self.ttl {
            Some(devices.clone())
        } else {
            None
        }
    }

    async fn insert(&self, user_key: String, devices: Vec<JID>) {
        self.cache.write().await.insert(user_key, (devices, Instant::now()));
    }

    /// Resolve every device belonging to `contacts`. When `exclude_self` is
    /// set, the input contacts are appended verbatim to the result so the
    /// caller can still address the primary handles alongside their devices.
    pub async fn resolve(
        &self,
        socket: &dyn Socket,
        contacts: &[JID],
        own_user: &str,
        own_device: u8,
        exclude_self: bool,
    ) -> Result<Vec<JID>> {
        let mut resolved = Vec::new();
        let mut misses = Vec::new();

        for contact in contacts {
            let key = contact.to_non_ad_string();
            match self.cached(&key).await {
                Some(devices) => resolved.extend(devices),
                None => misses.push(contact.clone()),
            }
        }

        if !misses.is_empty() {
            let query = build_usync_query(&misses);
            let response = socket.send_query("get", "usync", query).await?;
            let by_user = parse_usync_response(&response, own_user, own_device, exclude_self)?;

            for contact in &misses {
                let key = contact.to_non_ad_string();
                let devices = by_user.get(&key).cloned().unwrap_or_default();
                self.insert(key, devices.clone()).await;
                resolved.extend(devices);
            }
        }

        if exclude_self {
            resolved.extend(contacts.iter().cloned());
        }

        Ok(resolved)
    }
}

fn build_usync_query(contacts: &[JID]) -> Node {
    let users: Vec<Node> = contacts
        .iter()
        .map(|jid| {
            Node::new("user".into()).attr("jid".into(), jid.to_non_ad_string())
        })
        .collect();

    let devices = Node::new("devices".into()).attr("version".into(), "2".into());
    let query = Node::new("query".into()).with_children(vec![devices]);
    let list = Node::new("list".into()).with_children(users);

    Node::new("usync".into())
        .attr("sid".into(), text_id())
        .attr("mode".into(), "query".into())
        .attr("last".into(), "true".into())
        .attr("index".into(), "0".into())
        .attr("context".into(), "message".into())
        .with_children(vec![query, list])
}

/// A child of `<device-list>` qualifies as a device per the rules in the
/// device discovery algorithm: `description == "device"`, not excluded as
/// self unless asked for, and (for device 0) carries a `key-index`.
fn device_qualifies(device: &Node, device_id: u32, jid_user: &str, own_user: &str, own_device: u8, exclude_self: bool) -> bool {
    let is_device_entry = device.tag == "device"
        || device.get_attr("description").map(String::as_str) == Some("device");
    if !is_device_entry {
        return false;
    }
    if !(exclude_self || device_id != 0) {
        return false;
    }
    if jid_user == own_user && device_id == own_device as u32 {
        return false;
    }
    if device_id != 0 && device.get_attr("key-index").is_none() {
        return false;
    }
    true
}

fn parse_usync_response(
    response: &Node,
    own_user: &str,
    own_device: u8,
    exclude_self: bool,
) -> Result<HashMap<String, Vec<JID>>> {
    let usync = response
        .find_child("usync")
        .ok_or_else(|| Error::ProtocolDecode("usync response missing <usync>".into()))?;
    let list = usync
        .find_child("list")
        .ok_or_else(|| Error::ProtocolDecode("usync response missing <list>".into()))?;

    let mut by_user: HashMap<String, Vec<JID>> = HashMap::new();

    for user_node in list.get_children().into_iter().flatten() {
        if user_node.tag != "user" {
            continue;
        }
        let jid_str = match user_node.get_attr("jid") {
            Some(s) => s,
            None => continue,
        };
        let user_jid: JID = match jid_str.parse() {
            Ok(j) => j,
            Err(_) => continue,
        };
        let user_key = user_jid.to_non_ad_string();

        let mut devices = Vec::new();
        if let Some(devices_node) = user_node.find_child("devices") {
            if let Some(device_list) = devices_node.find_child("device-list") {
                for device in device_list.get_children().into_iter().flatten() {
                    let device_id: u32 = device
                        .get_attr("id")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    if !device_qualifies(device, device_id, &user_jid.user, own_user, own_device, exclude_self) {
                        continue;
                    }
                    devices.push(JID::new_device(user_jid.user.clone(), device_id as u8, user_jid.server.clone()));
                }
            }
        }
        debug!(user = %user_key, count = devices.len(), "resolved devices for user");
        by_user.insert(user_key, devices);
    }

    Ok(by_user)
}

/// Cached group participant metadata.
#[derive(Debug, Clone)]
pub struct GroupMetadata {
    pub jid: JID,
    pub participants: Vec<JID>,
}

/// `groupJid → GroupMetadata`, 5-minute TTL per entry.
pub struct GroupRegistry {
    cache: RwLock<HashMap<JID, (GroupMetadata, Instant)>>,
    ttl: Duration,
}

impl GroupRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, socket: &dyn Socket, group_jid: &JID) -> Result<GroupMetadata> {
        {
            let cache = self.cache.read().await;
            if let Some((metadata, inserted)) = cache.get(group_jid) {
                if inserted.elapsed() < self.ttl {
                    return Ok(metadata.clone());
                }
            }
        }

        let query = Node::new("query".into()).attr("request".into(), "interactive".into());
        let response = socket.send_query("get", "w:g2", query).await?;
        let metadata = parse_group_metadata(group_jid, &response)?;

        self.cache
            .write()
            .await
            .insert(group_jid.clone(), (metadata.clone(), Instant::now()));
        Ok(metadata)
    }

    pub async fn invalidate(&self, group_jid: &JID) {
        self.cache.write().await.remove(group_jid);
    }
}

fn parse_group_metadata(group_jid: &JID, response: &Node) -> Result<GroupMetadata> {
    let group_node = response
        .find_child("group")
        .ok_or_else(|| Error::ProtocolDecode("group metadata response missing <group>".into()))?;

    let mut participants = Vec::new();
    if let NodeContent::Children(children) = &group_node.content {
        for child in children {
            if child.tag != "participant" {
                continue;
            }
            if let Some(jid_str) = child.get_attr("jid") {
                if let Ok(jid) = jid_str.parse::<JID>() {
                    participants.push(jid);
                }
            }
        }
    }

    Ok(GroupMetadata {
        jid: group_jid.clone(),
        participants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_node(id: u32, key_index: bool) -> Node {
        let mut n = Node::new("device".into()).attr("id".into(), id.to_string());
        if key_index {
            n = n.attr("key-index".into(), "1".into());
        }
        n
    }

    fn usync_response(user_jid: &str, devices: Vec<Node>) -> Node {
        let device_list = Node::new("device-list".into()).with_children(devices);
        let devices_node = Node::new("devices".into()).with_children(vec![device_list]);
        let user = Node::new("user".into())
            .attr("jid".into(), user_jid.into())
            .with_children(vec![devices_node]);
        let list = Node::new("list".into()).with_children(vec![user]);
        let usync = Node::new("usync".into()).with_children(vec![list]);
        Node::new("iq".into()).with_children(vec![usync])
    }

    #[test]
    fn device_zero_never_needs_key_index() {
        let d = device_node(0, false);
        assert!(device_qualifies(&d, 0, "bob", "alice", 0, true));
    }

    #[test]
    fn non_zero_device_without_key_index_is_rejected() {
        let d = device_node(2, false);
        assert!(!device_qualifies(&d, 2, "bob", "alice", 0, true));
    }

    #[test]
    fn own_primary_device_excluded_unless_exclude_self() {
        let d = device_node(0, false);
        assert!(!device_qualifies(&d, 0, "alice", "alice", 0, false));
        assert!(device_qualifies(&d, 0, "alice", "alice", 0, true));
    }

    #[test]
    fn parse_usync_response_extracts_qualifying_devices() {
        let response = usync_response(
            "bob@s.whatsapp.net",
            vec![device_node(0, false), device_node(1, true), device_node(2, false)],
        );
        let by_user = parse_usync_response(&response, "alice", 0, true).unwrap();
        let devices = by_user.get("bob@s.whatsapp.net").unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().any(|d| d.device == 0));
        assert!(devices.iter().any(|d| d.device == 1));
    }

    #[tokio::test]
    async fn cache_hit_avoids_requerying() {
        struct PanicSocket;
        #[async_trait::async_trait]
        impl Socket for PanicSocket {
            async fn send(&self, _stanza: Node) -> Result<()> {
                unreachable!()
            }
            async fn send_query(&self, _kind: &str, _xmlns: &str, _body: Node) -> Result<Node> {
                panic!("should not query when cached")
            }
            async fn await_ready_state(&self) -> Result<()> {
                Ok(())
            }
        }

        let registry = DeviceRegistry::new(Duration::from_secs(300));
        let bob = JID::new("bob", "s.whatsapp.net");
        registry
            .insert(bob.to_non_ad_string(), vec![JID::new_device("bob", 0, "s.whatsapp.net")])
            .await;

        let devices = registry
            .resolve(&PanicSocket, &[bob], "alice", 0, false)
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
    }
}
