//! # PMOSSDP - Annonces SSDP
//!
//! Ce crate implémente la partie « annonce » du protocole SSDP (Simple Service
//! Discovery Protocol) pour UPnP : déclarer des ressources découvrables,
//! les ré-annoncer avant expiration de leur max-age et les retirer proprement.
//!
//! ## Fonctionnalités
//!
//! - ✅ Envoi de NOTIFY alive/byebye en multicast (IPv4 et IPv6)
//! - ✅ Propagation d'un changement de BOOTID par `ssdp:update` (UDA 1.1)
//! - ✅ Ré-annonces périodiques à max-age/2, sans dérive cumulée
//! - ✅ Échecs d'envoi remontés à l'hôte sans interrompre les annonces
//! - ✅ Arrêt propre avec byebye
//!
//! ## Architecture
//!
//! - [`ClientContext`] : version UDA, BOOTID/CONFIGID, transport et horloge
//! - [`ResourceGroup`] : ressources partageant une même disponibilité
//! - [`Scheduler`] : minuteur coopératif des ré-annonces
//! - [`SsdpMessage`] : codec des messages NOTIFY
//! - [`Transport`] : port d'émission ([`UdpTransport`], [`MemoryTransport`])
//!
//! ## Exemple
//!
//! ```no_run
//! use pmossdp::{ClientContext, ResourceGroup, Scheduler, SystemClock, UdaVersion, UdpTransport};
//! use pmossdp::net::NetworkInterface;
//!
//! # fn main() -> anyhow::Result<()> {
//! let interface = NetworkInterface::guess();
//! let transport = UdpTransport::bind(&interface)?;
//! let client = ClientContext::new(UdaVersion::V1_1, 1000, 1, transport, SystemClock)?;
//!
//! let mut group = ResourceGroup::new(&client);
//! group.add_resource_simple(
//!     "upnp:rootdevice",
//!     "uuid:1234abcd-12ab-12ab-12ab-1234567abc12::upnp:rootdevice",
//!     "http://192.168.1.100/",
//! )?;
//! group.set_available(true);
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.insert(group);
//! scheduler.tick();
//! # Ok(())
//! # }
//! ```
//!
//! ## Constantes SSDP
//!
//! - **Multicast Address**: 239.255.255.250:1900 (IPv6 : FF0x::C)
//! - **Max-Age**: 1800 secondes (30 minutes)
//! - **Announcement Period**: Max-Age/2

mod client;
mod clock;
mod errors;
mod message;
mod resource;
mod resource_group;
mod scheduler;

pub mod config_ext;
pub mod net;
pub mod protocol;
pub mod transport;

pub use client::{ClientContext, FailureHandler, GroupId, boot_id_from_time};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config_ext::{SsdpConfigExt, build_client, build_client_on};
pub use errors::{Result, SsdpError};
pub use message::SsdpMessage;
pub use protocol::{MAX_AGE, MulticastScope, NotificationSubType, SSDP_PORT, UdaVersion};
pub use resource::Resource;
pub use resource_group::{ResourceGroup, ScheduledAnnouncement};
pub use scheduler::{Scheduler, TickReport};
pub use transport::{MemoryTransport, SentDatagram, Transport, UdpTransport};
