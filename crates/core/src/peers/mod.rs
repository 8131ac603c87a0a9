//! Known controller addresses and their on-disk store.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Addresses that receive every outbound message, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    peers: Vec<IpAddr>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `ip` unless already known. The unspecified address is never
    /// a peer.
    pub fn insert(&mut self, ip: IpAddr) -> bool {
        if ip.is_unspecified() || self.peers.contains(&ip) {
            return false;
        }
        self.peers.push(ip);
        true
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.peers.contains(ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl FromIterator<IpAddr> for PeerSet {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        let mut set = PeerSet::new();
        for ip in iter {
            set.insert(ip);
        }
        set
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PeerFile {
    #[serde(default)]
    peers: Vec<IpAddr>,
}

/// JSON file holding the peer list between runs.
#[derive(Debug, Clone)]
pub struct PeerStore {
    path: PathBuf,
}

impl PeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/vrack/peers.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vrack").join("peers.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored peers. A missing file is an empty set.
    pub fn load(&self) -> Result<PeerSet> {
        if !self.path.exists() {
            return Ok(PeerSet::new());
        }
        let text = fs::read_to_string(&self.path)?;
        let file: PeerFile = serde_json::from_str(&text)?;
        Ok(file.peers.into_iter().collect())
    }

    pub fn save(&self, peers: &PeerSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = PeerFile {
            peers: peers.iter().copied().collect(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        tracing::debug!(path = %self.path.display(), count = peers.len(), "saved peers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn set_keeps_discovery_order_without_duplicates() {
        let mut peers = PeerSet::new();
        assert!(peers.insert(ip(4)));
        assert!(peers.insert(ip(2)));
        assert!(!peers.insert(ip(4)));
        assert!(!peers.insert(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));

        let order: Vec<_> = peers.iter().copied().collect();
        assert_eq!(order, [ip(4), ip(2)]);
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::new(dir.path().join("nested").join("peers.json"));
        let peers: PeerSet = [ip(1), ip(7)].into_iter().collect();

        store.save(&peers).unwrap();
        assert_eq!(store.load().unwrap(), peers);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::new(dir.path().join("peers.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn unspecified_entries_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        fs::write(&path, r#"{"peers": ["0.0.0.0", "10.0.0.3"]}"#).unwrap();

        let peers = PeerStore::new(&path).load().unwrap();
        assert_eq!(peers.iter().copied().collect::<Vec<_>>(), [ip(3)]);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        fs::write(&path, "not json").unwrap();
        assert!(PeerStore::new(&path).load().is_err());
    }
}
