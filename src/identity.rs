//! Host identity
//!
//! Network interfaces with a hardware address identify this machine. The
//! identity report carries MACs as lowercase colon-separated hex; commands
//! address the machine by token, the uppercase dash-separated form.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// One local network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIdentity {
    /// Interface display name
    pub name: String,
    /// Hardware address bytes
    pub mac: Vec<u8>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl InterfaceIdentity {
    pub fn new(name: impl Into<String>, mac: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            ipv4: None,
            ipv6: None,
        }
    }

    pub fn with_ipv4(mut self, addr: Ipv4Addr) -> Self {
        self.ipv4 = Some(addr);
        self
    }

    pub fn with_ipv6(mut self, addr: Ipv6Addr) -> Self {
        self.ipv6 = Some(addr);
        self
    }

    /// `aa:bb:cc:dd:ee:ff`
    pub fn mac_string(&self) -> String {
        self.mac
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// `AA-BB-CC-DD-EE-FF`
    pub fn token(&self) -> String {
        self.mac
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Canonical token form of an inbound value
pub fn normalize_token(value: &str) -> String {
    value.trim().to_ascii_uppercase().replace(':', "-")
}

/// Source of the host's identifying interfaces.
///
/// A pure query: every call re-reads the current state and may return
/// nothing.
pub trait IdentitySource: Send + Sync {
    fn interfaces(&self) -> Vec<InterfaceIdentity>;

    /// Tokens derived from [`IdentitySource::interfaces`]
    fn tokens(&self) -> Vec<String> {
        self.interfaces().iter().map(InterfaceIdentity::token).collect()
    }
}

/// Fixed interface list
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    interfaces: Vec<InterfaceIdentity>,
}

impl StaticIdentity {
    pub fn new(interfaces: Vec<InterfaceIdentity>) -> Self {
        Self { interfaces }
    }
}

impl IdentitySource for StaticIdentity {
    fn interfaces(&self) -> Vec<InterfaceIdentity> {
        self.interfaces.clone()
    }
}

/// Interfaces enumerated from the operating system
///
/// Enumeration is implemented for Linux, Android and macOS. Elsewhere the
/// list is always empty: the identity report carries no interfaces and no
/// shutdown command can match a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl SystemIdentity {
    /// Whether this platform can enumerate interfaces
    pub const fn is_supported() -> bool {
        cfg!(any(target_os = "linux", target_os = "android", target_os = "macos"))
    }
}

impl IdentitySource for SystemIdentity {
    fn interfaces(&self) -> Vec<InterfaceIdentity> {
        let interfaces = enumerate();
        debug!(count = interfaces.len(), "Enumerated network interfaces");
        interfaces
    }
}

#[derive(Default)]
struct PartialInterface {
    mac: Option<Vec<u8>>,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
}

fn collect(by_name: BTreeMap<String, PartialInterface>) -> Vec<InterfaceIdentity> {
    by_name
        .into_iter()
        .filter_map(|(name, partial)| {
            Some(InterfaceIdentity {
                name,
                mac: partial.mac?,
                ipv4: partial.ipv4,
                ipv6: partial.ipv6,
            })
        })
        .collect()
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
fn enumerate() -> Vec<InterfaceIdentity> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;

    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    let mut by_name: BTreeMap<String, PartialInterface> = BTreeMap::new();
    for ifaddr in addrs {
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
            continue;
        }
        let Some(address) = ifaddr.address else {
            continue;
        };
        let entry = by_name.entry(ifaddr.interface_name).or_default();

        if let Some(link) = address.as_link_addr() {
            if let Some(mac) = link.addr().filter(|mac| mac.iter().any(|b| *b != 0)) {
                entry.mac = Some(mac.to_vec());
            }
        } else if let Some(v4) = address.as_sockaddr_in() {
            entry.ipv4.get_or_insert(v4.ip());
        } else if let Some(v6) = address.as_sockaddr_in6() {
            entry.ipv6.get_or_insert(v6.ip());
        }
    }

    collect(by_name)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
fn enumerate() -> Vec<InterfaceIdentity> {
    tracing::warn!("Interface enumeration is not supported on this platform");
    collect(BTreeMap::new())
}
