use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use sd_iptable::{DEFAULT_GROUP, DEFAULT_LOCAL_GROUP, GroupId};

/// The host's current public IP and the group it falls in.
///
/// Written only by the identity monitor, read on every query. Each field is a
/// single atomic, so readers never see a torn value; they may see an IP and a
/// group from different refresh cycles, and a value up to one refresh
/// interval stale.
#[derive(Debug)]
pub struct LocalIdentity {
    ip: AtomicU32,
    group: AtomicU64,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self {
            ip: AtomicU32::new(0),
            group: AtomicU64::new(DEFAULT_LOCAL_GROUP),
        }
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip.load(Ordering::Relaxed))
    }

    pub fn local_group(&self) -> GroupId {
        self.group.load(Ordering::Relaxed)
    }

    /// Store a freshly classified address. An unclassified host is published
    /// as `DEFAULT_LOCAL_GROUP`, never `DEFAULT_GROUP`.
    pub fn publish(&self, ip: Ipv4Addr, raw_group: GroupId) -> GroupId {
        let group = if raw_group == DEFAULT_GROUP {
            DEFAULT_LOCAL_GROUP
        } else {
            raw_group
        };
        self.ip.store(u32::from(ip), Ordering::Relaxed);
        self.group.store(group, Ordering::Relaxed);
        group
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}
