//! Constantes et vocabulaire du protocole SSDP

use crate::errors::SsdpError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Adresse multicast SSDP (IPv4)
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Groupe multicast SSDP IPv6, portée lien local (FF02::C)
pub const SSDP_V6_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);

/// Groupe multicast SSDP IPv6, portée site (FF05::C)
pub const SSDP_V6_SITE_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);

/// Groupe multicast SSDP IPv6, portée globale (FF0E::C)
pub const SSDP_V6_GLOBAL: Ipv6Addr = Ipv6Addr::new(0xff0e, 0, 0, 0, 0, 0, 0, 0xc);

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (en secondes)
pub const MAX_AGE: u32 = 1800;

/// BOOTID.UPNP.ORG est un entier non signé sur 31 bits
pub const MAX_BOOT_ID: u32 = i32::MAX as u32;

/// CONFIGID.UPNP.ORG est assignable de 0 à 2^24 - 1
pub const MAX_CONFIG_ID: u32 = (1 << 24) - 1;

pub const BOOTID_HEADER: &str = "BOOTID.UPNP.ORG";
pub const CONFIGID_HEADER: &str = "CONFIGID.UPNP.ORG";
pub const NEXTBOOTID_HEADER: &str = "NEXTBOOTID.UPNP.ORG";

/// Intervalle de ré-annonce pour un max-age donné : max-age / 2,
/// la marge imposée par UPnP contre la perte de messages.
pub fn announce_interval(max_age: Duration) -> Duration {
    max_age / 2
}

/// Version de l'UPnP Device Architecture respectée par un client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UdaVersion {
    V1_0,
    V1_1,
}

impl UdaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            UdaVersion::V1_0 => "1.0",
            UdaVersion::V1_1 => "1.1",
        }
    }

    /// BOOTID/CONFIGID et ssdp:update n'existent qu'à partir d'UDA 1.1
    pub fn has_boot_id(&self) -> bool {
        matches!(self, UdaVersion::V1_1)
    }
}

impl fmt::Display for UdaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UdaVersion {
    type Err = SsdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(UdaVersion::V1_0),
            "1.1" => Ok(UdaVersion::V1_1),
            other => Err(SsdpError::Configuration(format!(
                "Unrecognized UDA version '{}'",
                other
            ))),
        }
    }
}

/// Sous-type de notification (en-tête NTS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSubType {
    Alive,
    ByeBye,
    Update,
}

impl NotificationSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSubType::Alive => "ssdp:alive",
            NotificationSubType::ByeBye => "ssdp:byebye",
            NotificationSubType::Update => "ssdp:update",
        }
    }
}

impl fmt::Display for NotificationSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationSubType {
    type Err = SsdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssdp:alive" => Ok(NotificationSubType::Alive),
            "ssdp:byebye" => Ok(NotificationSubType::ByeBye),
            "ssdp:update" => Ok(NotificationSubType::Update),
            other => Err(SsdpError::MalformedMessage(format!(
                "Unknown NTS value '{}'",
                other
            ))),
        }
    }
}

/// Portée du groupe multicast IPv6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MulticastScope {
    #[default]
    LinkLocal,
    SiteLocal,
    Global,
}

impl FromStr for MulticastScope {
    type Err = SsdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "link-local" => Ok(MulticastScope::LinkLocal),
            "site-local" => Ok(MulticastScope::SiteLocal),
            "global" => Ok(MulticastScope::Global),
            other => Err(SsdpError::Configuration(format!(
                "Unknown IPv6 multicast scope '{}'",
                other
            ))),
        }
    }
}

/// Destination multicast SSDP pour une famille d'adresses donnée.
///
/// Pour IPv4 : 239.255.255.250:1900. Pour IPv6 : `[FF0x::C]:1900`
/// selon la portée choisie.
pub fn multicast_target(local: IpAddr, scope: MulticastScope) -> SocketAddr {
    let group = match local {
        IpAddr::V4(_) => IpAddr::V4(SSDP_MULTICAST_ADDR),
        IpAddr::V6(_) => IpAddr::V6(match scope {
            MulticastScope::LinkLocal => SSDP_V6_LINK_LOCAL,
            MulticastScope::SiteLocal => SSDP_V6_SITE_LOCAL,
            MulticastScope::Global => SSDP_V6_GLOBAL,
        }),
    };
    SocketAddr::new(group, SSDP_PORT)
}

/// Valeur de l'en-tête HOST pour une destination multicast
/// (`SocketAddr` formate déjà l'IPv6 entre crochets).
pub fn host_header(target: SocketAddr) -> String {
    match target.ip() {
        IpAddr::V6(ip) => format!("[{}]:{}", ip.to_string().to_uppercase(), target.port()),
        IpAddr::V4(_) => target.to_string(),
    }
}
