//! Address allocation collaborator

use netbed_common::{Error, ResourceKey, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Interface names are limited by the kernel (IFNAMSIZ - 1)
pub const MAX_DEVICE_NAME: usize = 15;

/// Hands out MAC addresses and unique names
pub trait AddressAllocator: Send + Sync {
    fn get_mac(&self, resource: &ResourceKey) -> Result<String>;

    /// Name derived from `prefix`, stable per (attribute, resource) and
    /// unique within `scope`
    fn get_name(&self, attribute: &str, resource: &ResourceKey, prefix: &str, scope: &str) -> Result<String>;
}

#[derive(Default)]
struct AllocatorState {
    macs: HashMap<ResourceKey, String>,
    used_macs: HashSet<String>,
    names: HashMap<(String, ResourceKey), String>,
    used_names: HashMap<String, HashSet<String>>,
}

/// In-process allocator with deterministic, hash-derived MACs
#[derive(Default)]
pub struct LocalAddressAllocator {
    state: Mutex<AllocatorState>,
}

impl LocalAddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

fn mac_from_digest(digest: &[u8]) -> String {
    // Locally administered, unicast
    let first = (digest[0] & 0xfc) | 0x02;
    let octets: Vec<String> = std::iter::once(first)
        .chain(digest[1..6].iter().copied())
        .map(|b| format!("{:02x}", b))
        .collect();
    octets.join(":")
}

impl AddressAllocator for LocalAddressAllocator {
    fn get_mac(&self, resource: &ResourceKey) -> Result<String> {
        let mut state = self.state.lock();
        if let Some(mac) = state.macs.get(resource) {
            return Ok(mac.clone());
        }

        let mut seed = resource.to_string();
        for _ in 0..64 {
            let digest = Sha256::digest(seed.as_bytes());
            let mac = mac_from_digest(&digest);
            if state.used_macs.insert(mac.clone()) {
                state.macs.insert(resource.clone(), mac.clone());
                return Ok(mac);
            }
            seed.push('+');
        }
        Err(Error::Allocation(format!("no free MAC address for {}", resource)))
    }

    fn get_name(&self, attribute: &str, resource: &ResourceKey, prefix: &str, scope: &str) -> Result<String> {
        let mut state = self.state.lock();
        let id = (attribute.to_string(), resource.clone());
        if let Some(name) = state.names.get(&id) {
            return Ok(name.clone());
        }

        let used = state.used_names.entry(scope.to_string()).or_default();
        let mut chosen = None;
        for n in 0..1000usize {
            let suffix = if n == 0 { String::new() } else { format!("-{}", n) };
            let room = MAX_DEVICE_NAME.saturating_sub(suffix.len());
            let base: String = prefix.chars().take(room).collect();
            let candidate = format!("{}{}", base, suffix);
            if used.insert(candidate.clone()) {
                chosen = Some(candidate);
                break;
            }
        }

        let name = chosen.ok_or_else(|| {
            Error::Allocation(format!("no free name with prefix {} in {}", prefix, scope))
        })?;
        state.names.insert(id, name.clone());
        Ok(name)
    }
}
