//! Port de transport : envoi d'un datagramme vers le groupe multicast SSDP
//!
//! L'envoi est « fire-and-forget » : SSDP repose sur UDP, aucun accusé de
//! réception n'est attendu. Deux implémentations sont fournies :
//!
//! - [`UdpTransport`] : socket UDP configurée pour l'émission multicast
//! - [`MemoryTransport`] : enregistre les datagrammes (tests, simulation)

use crate::errors::Result;
use crate::net::NetworkInterface;
use socket2::{Domain, Protocol, Socket, Type};
use std::cell::{Cell, RefCell};
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};
use std::rc::Rc;
use tracing::{debug, info};

/// TTL multicast recommandé par l'UDA
const MULTICAST_TTL: u32 = 4;

/// Envoi d'un datagramme SSDP.
///
/// Une erreur signale un échec au niveau socket ; elle n'est jamais fatale
/// pour le moteur d'annonces.
pub trait Transport {
    fn send(&self, payload: &[u8], target: SocketAddr) -> Result<()>;
}

/// Transport UDP réel, lié à l'adresse d'une interface sur un port éphémère.
///
/// Comme pour le client SSDP de contrôle, on ne se lie pas au port 1900 :
/// seule l'émission multicast est nécessaire ici.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Crée une socket d'émission multicast sur `interface`
    pub fn bind(interface: &NetworkInterface) -> io::Result<Self> {
        let domain = match interface.address {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };

        let socket2 = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        match interface.address {
            IpAddr::V4(ipv4) => {
                socket2.set_multicast_if_v4(&ipv4)?;
                socket2.set_multicast_ttl_v4(MULTICAST_TTL)?;
                socket2.set_multicast_loop_v4(true)?;
            }
            IpAddr::V6(_) => {
                socket2.set_multicast_if_v6(interface.index)?;
                socket2.set_multicast_hops_v6(MULTICAST_TTL)?;
                socket2.set_multicast_loop_v6(true)?;
            }
        }

        let bind_addr = bind_address(interface);
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        info!(
            "✅ SSDP transport ready on {} ({})",
            interface.name,
            socket.local_addr()?
        );

        Ok(Self { socket })
    }
}

/// Adresse locale de la socket : port éphémère, et pour l'IPv6 l'index de
/// l'interface comme scope id (obligatoire pour une adresse fe80::).
fn bind_address(interface: &NetworkInterface) -> SocketAddr {
    match interface.address {
        IpAddr::V4(ipv4) => SocketAddr::V4(SocketAddrV4::new(ipv4, 0)),
        IpAddr::V6(ipv6) => SocketAddr::V6(SocketAddrV6::new(ipv6, 0, 0, interface.index)),
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        let sent = self.socket.send_to(payload, target)?;
        debug!("📤 {} bytes sent to {}", sent, target);
        Ok(())
    }
}

/// Datagramme enregistré par [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub payload: Vec<u8>,
    pub target: SocketAddr,
}

/// Transport en mémoire : chaque envoi est enregistré au lieu d'être émis.
///
/// Les clones partagent le même journal, ce qui permet de garder une poignée
/// après avoir confié le transport à un [`crate::ClientContext`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Rc<RefCell<Vec<SentDatagram>>>,
    failing: Rc<Cell<bool>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fait échouer (ou réussir) les envois suivants
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.borrow().clone()
    }

    /// Vide le journal et retourne son contenu
    pub fn take(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        if self.failing.get() {
            return Err(io::Error::new(
                io::ErrorKind::NetworkUnreachable,
                "network is unreachable",
            )
            .into());
        }
        self.sent.borrow_mut().push(SentDatagram {
            payload: payload.to_vec(),
            target,
        });
        Ok(())
    }
}
