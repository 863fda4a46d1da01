//! Utilitaires réseau et système pour les annonces.
//!
//! - [`list_interfaces`] : interfaces réseau utilisables pour l'émission multicast
//! - [`guess_local_ip`] : adresse IP utilisée pour les connexions sortantes
//! - [`default_server_id`] : valeur par défaut de l'en-tête SERVER

use crate::protocol::UdaVersion;
use get_if_addrs::get_if_addrs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, warn};

/// Interface réseau sur laquelle un client annonce ses ressources.
///
/// Poignée opaque pour le moteur : seule la famille d'adresse compte pour le
/// choix du groupe multicast, le reste sert au transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// Nom de l'interface (ex: "eth0", "en0")
    pub name: String,
    pub address: IpAddr,
    /// Index de l'interface (IPv6 uniquement, 0 = choix du système)
    pub index: u32,
}

impl NetworkInterface {
    pub fn new(name: &str, address: IpAddr) -> Self {
        Self {
            name: name.to_string(),
            address,
            index: 0,
        }
    }

    pub fn loopback() -> Self {
        Self::new("lo", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Interface portant l'adresse locale devinée par [`guess_local_ip`]
    pub fn guess() -> Self {
        let ip = guess_local_ip();
        list_interfaces()
            .into_iter()
            .find(|iface| iface.address == ip)
            .unwrap_or_else(|| Self::new("default", ip))
    }

    /// Recherche une interface par nom, en préférant son adresse IPv4
    pub fn by_name(name: &str) -> Option<Self> {
        let mut candidates: Vec<NetworkInterface> = list_interfaces()
            .into_iter()
            .filter(|iface| iface.name == name)
            .collect();
        candidates.sort_by_key(|iface| iface.address.is_ipv6());
        candidates.into_iter().next()
    }
}

/// Liste les interfaces non-loopback (IPv4 et IPv6).
///
/// En cas d'erreur lors de l'énumération, retourne une liste vide.
pub fn list_interfaces() -> Vec<NetworkInterface> {
    match get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| {
                let mut interface = NetworkInterface::new(&iface.name, iface.ip());
                match interface_index(&iface.name) {
                    Ok(index) => interface.index = index,
                    Err(e) => debug!("No index for interface {}: {}", iface.name, e),
                }
                interface
            })
            .collect(),
        Err(e) => {
            warn!("❌ Failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Index système d'une interface, nécessaire pour lier une socket IPv6
/// lien-local et choisir l'interface multicast.
#[cfg(unix)]
pub fn interface_index(name: &str) -> io::Result<u32> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name"))?;

    // SAFETY: c_name est une chaîne C terminée par NUL, lue seulement
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(index)
}

#[cfg(not(unix))]
pub fn interface_index(_name: &str) -> io::Result<u32> {
    Ok(0)
}

/// Devine l'adresse IP locale de la machine.
///
/// Un `connect` UDP vers 8.8.8.8 ne crée aucun trafic mais fait choisir au
/// système l'interface de sortie. Retourne `127.0.0.1` en cas d'échec.
pub fn guess_local_ip() -> IpAddr {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip();
                }
            }
            localhost
        }
        Err(_) => localhost,
    }
}

/// Retourne une chaîne décrivant le système d'exploitation et sa version.
///
/// Format : "Linux/6.5.0", "Ubuntu/22.04", "Windows/10.0.19045", "{OS}/Unknown"
pub fn get_os_string() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type());

    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version)
    } else {
        format!("{}/Unknown", os_type)
    }
}

/// En-tête SERVER par défaut : `OS/version UPnP/x.y PMOSSDP/version`
pub fn default_server_id(uda_version: UdaVersion) -> String {
    format!(
        "{} UPnP/{} PMOSSDP/{}",
        get_os_string(),
        uda_version,
        env!("CARGO_PKG_VERSION")
    )
}
