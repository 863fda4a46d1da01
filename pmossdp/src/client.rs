//! Contexte client SSDP : version du protocole, époque de démarrage et émission
//!
//! Le [`ClientContext`] appartient à l'application. Les [`crate::ResourceGroup`]
//! créés contre lui n'en gardent qu'une référence. Toute la mutation passe par
//! une boucle d'événements unique : l'état mutable est en `Cell`/`RefCell`
//! et le contexte n'est ni `Send` ni `Sync`.

use crate::clock::Clock;
use crate::errors::{Result, SsdpError};
use crate::message::SsdpMessage;
use crate::net::{NetworkInterface, default_server_id};
use crate::protocol::{
    BOOTID_HEADER, CONFIGID_HEADER, MAX_BOOT_ID, MAX_CONFIG_ID, MulticastScope,
    NEXTBOOTID_HEADER, NotificationSubType, UdaVersion, host_header, multicast_target,
};
use crate::transport::Transport;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Identifiant d'un groupe de ressources, unique dans le processus
pub type GroupId = u32;

/// Callback `onAnnouncementFailure(resourceGroupId, error)` exposé à l'hôte
pub type FailureHandler = Box<dyn FnMut(GroupId, &SsdpError)>;

/// BOOTID dérivé de l'heure courante (secondes depuis l'epoch Unix),
/// borné à l'intervalle 31 bits de l'UDA.
pub fn boot_id_from_time() -> u32 {
    let secs = chrono::Utc::now().timestamp().clamp(0, MAX_BOOT_ID as i64);
    secs as u32
}

pub struct ClientContext {
    uda_version: UdaVersion,
    boot_id: Cell<u32>,
    config_id: Cell<u32>,
    interface: NetworkInterface,
    target: SocketAddr,
    server_id: RefCell<String>,
    headers: RefCell<Vec<(String, String)>>,
    active: Cell<bool>,
    transport: Box<dyn Transport>,
    clock: Rc<dyn Clock>,
    failure_handler: RefCell<Option<FailureHandler>>,
}

impl ClientContext {
    /// Crée un contexte.
    ///
    /// # Errors
    ///
    /// `Configuration` si `boot_id` dépasse 2^31 - 1 ou `config_id` 2^24 - 1.
    pub fn new(
        uda_version: UdaVersion,
        boot_id: u32,
        config_id: u32,
        transport: impl Transport + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        check_boot_id(boot_id)?;
        check_config_id(config_id)?;

        let interface = NetworkInterface::new("any", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let target = multicast_target(interface.address, MulticastScope::default());

        Ok(Self {
            uda_version,
            boot_id: Cell::new(boot_id),
            config_id: Cell::new(config_id),
            interface,
            target,
            server_id: RefCell::new(default_server_id(uda_version)),
            headers: RefCell::new(Vec::new()),
            active: Cell::new(true),
            transport: Box::new(transport),
            clock: Rc::new(clock),
            failure_handler: RefCell::new(None),
        })
    }

    /// Lie le contexte à une interface ; le groupe multicast suit sa famille
    /// d'adresse (`scope` ne sert qu'en IPv6).
    pub fn with_interface(mut self, interface: NetworkInterface, scope: MulticastScope) -> Self {
        self.target = multicast_target(interface.address, scope);
        self.interface = interface;
        self
    }

    pub fn protocol_version(&self) -> UdaVersion {
        self.uda_version
    }

    pub fn current_boot_id(&self) -> u32 {
        self.boot_id.get()
    }

    pub fn current_config_id(&self) -> u32 {
        self.config_id.get()
    }

    /// Incrémente le BOOTID et retourne la nouvelle valeur.
    ///
    /// N'émet rien : chaque groupe lié doit ensuite recevoir
    /// [`crate::ResourceGroup::update`] (voir aussi
    /// [`crate::Scheduler::propagate_boot_id`]).
    pub fn advance_boot_id(&self) -> Result<u32> {
        let current = self.boot_id.get();
        if current >= MAX_BOOT_ID {
            return Err(SsdpError::Configuration(format!(
                "Boot id {} cannot be advanced past {}",
                current, MAX_BOOT_ID
            )));
        }
        let next = current + 1;
        self.boot_id.set(next);
        debug!("🔁 Boot id advanced {} -> {}", current, next);
        Ok(next)
    }

    /// Change le CONFIGID (révision des documents de description).
    /// Pris en compte par les messages suivants.
    pub fn set_config_id(&self, config_id: u32) -> Result<()> {
        check_config_id(config_id)?;
        self.config_id.set(config_id);
        Ok(())
    }

    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }

    pub fn multicast_target(&self) -> SocketAddr {
        self.target
    }

    pub fn host(&self) -> String {
        host_header(self.target)
    }

    pub fn server_id(&self) -> String {
        self.server_id.borrow().clone()
    }

    pub fn set_server_id(&self, server_id: &str) {
        *self.server_id.borrow_mut() = server_id.to_string();
    }

    /// Ajoute un en-tête à tous les messages émis.
    ///
    /// Les en-têtes d'époque (BOOTID, CONFIGID, NEXTBOOTID) sont gérés par le
    /// moteur et ne peuvent pas être ajoutés ici.
    pub fn append_header(&self, name: &str, value: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name.contains(':') || is_epoch_header(name) {
            return Err(SsdpError::Configuration(format!(
                "Header '{}' cannot be set by the caller",
                name
            )));
        }
        self.headers
            .borrow_mut()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Retire toutes les occurrences de l'en-tête `name`
    pub fn remove_header(&self, name: &str) {
        self.headers
            .borrow_mut()
            .retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn clear_headers(&self) {
        self.headers.borrow_mut().clear();
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.headers.borrow().clone()
    }

    /// Un contexte passif n'émet aucun message
    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Installe le callback appelé à chaque échec d'envoi
    pub fn set_failure_handler<F>(&self, handler: F)
    where
        F: FnMut(GroupId, &SsdpError) + 'static,
    {
        *self.failure_handler.borrow_mut() = Some(Box::new(handler));
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Complète `message` (époque, SERVER, en-têtes personnalisés) et l'envoie.
    ///
    /// `boot_id` est celui du groupe émetteur : pendant un `update`, il diffère
    /// encore du BOOTID courant du contexte.
    ///
    /// Un échec est journalisé et transmis au handler avant d'être retourné.
    pub(crate) fn send(&self, group: GroupId, message: SsdpMessage, boot_id: u32) -> Result<()> {
        if !self.active.get() {
            trace!(
                "Passive client, dropping {} for {}",
                message.nts, message.unique_service_name
            );
            return Ok(());
        }

        let mut message = message;
        if self.uda_version.has_boot_id() {
            message = message.with_epoch(boot_id, self.config_id.get());
        }
        if message.nts == NotificationSubType::Alive {
            message = message.with_server(&self.server_id.borrow());
        }
        message = message.with_headers(&self.headers.borrow());

        let payload = message.encode();
        debug!(
            "📨 NOTIFY payload for group {}\n<details>\n\n```\n{}\n```\n</details>\n",
            group,
            String::from_utf8_lossy(&payload)
        );

        match self.transport.send(&payload, self.target) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "❌ Failed to send NOTIFY {} for {}: {}",
                    message.nts, message.unique_service_name, e
                );
                self.report_failure(group, &e);
                Err(e)
            }
        }
    }

    fn report_failure(&self, group: GroupId, error: &SsdpError) {
        // Un handler qui ré-émet depuis son propre callback n'est pas rappelé
        match self.failure_handler.try_borrow_mut() {
            Ok(mut handler) => {
                if let Some(handler) = handler.as_mut() {
                    handler(group, error);
                }
            }
            Err(_) => trace!("Failure handler re-entered for group {}", group),
        }
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("uda_version", &self.uda_version)
            .field("boot_id", &self.boot_id.get())
            .field("config_id", &self.config_id.get())
            .field("interface", &self.interface)
            .field("target", &self.target)
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}

fn check_boot_id(boot_id: u32) -> Result<()> {
    if boot_id > MAX_BOOT_ID {
        return Err(SsdpError::Configuration(format!(
            "Boot id {} exceeds {}",
            boot_id, MAX_BOOT_ID
        )));
    }
    Ok(())
}

fn check_config_id(config_id: u32) -> Result<()> {
    if config_id > MAX_CONFIG_ID {
        return Err(SsdpError::Configuration(format!(
            "Config id {} exceeds {}",
            config_id, MAX_CONFIG_ID
        )));
    }
    Ok(())
}

fn is_epoch_header(name: &str) -> bool {
    [BOOTID_HEADER, CONFIGID_HEADER, NEXTBOOTID_HEADER]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::MemoryTransport;

    fn client(uda: UdaVersion) -> (ClientContext, MemoryTransport) {
        let transport = MemoryTransport::new();
        let client =
            ClientContext::new(uda, 1000, 1, transport.clone(), ManualClock::new()).unwrap();
        (client, transport)
    }

    fn sent_text(transport: &MemoryTransport) -> String {
        String::from_utf8(transport.sent()[0].payload.clone()).unwrap()
    }

    #[test]
    fn test_new_rejects_out_of_range_ids() {
        let err = ClientContext::new(
            UdaVersion::V1_1,
            MAX_BOOT_ID + 1,
            1,
            MemoryTransport::new(),
            ManualClock::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SsdpError::Configuration(_)));

        let err = ClientContext::new(
            UdaVersion::V1_1,
            1,
            MAX_CONFIG_ID + 1,
            MemoryTransport::new(),
            ManualClock::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SsdpError::Configuration(_)));
    }

    #[test]
    fn test_advance_boot_id() {
        let (client, transport) = client(UdaVersion::V1_1);
        assert_eq!(client.advance_boot_id().unwrap(), 1001);
        assert_eq!(client.advance_boot_id().unwrap(), 1002);
        assert_eq!(client.current_boot_id(), 1002);
        // Aucune émission réseau
        assert!(transport.is_empty());
    }

    #[test]
    fn test_advance_boot_id_never_wraps() {
        let client = ClientContext::new(
            UdaVersion::V1_1,
            MAX_BOOT_ID,
            0,
            MemoryTransport::new(),
            ManualClock::new(),
        )
        .unwrap();
        assert!(client.advance_boot_id().is_err());
        assert_eq!(client.current_boot_id(), MAX_BOOT_ID);
    }

    #[test]
    fn test_boot_id_from_time_is_in_range() {
        let id = boot_id_from_time();
        assert!(id > 0 && id <= MAX_BOOT_ID);
    }

    #[test]
    fn test_send_adds_epoch_server_and_custom_headers() {
        let (client, transport) = client(UdaVersion::V1_1);
        client.set_server_id("Test/1.0 UPnP/1.1 PMOSSDP/0.1.0");
        client.append_header("X-User-Agent", "redsonic").unwrap();

        let msg = SsdpMessage::alive(&client.host(), "upnp:rootdevice", "uuid:x", "http://h/", 1800);
        client.send(1, msg, 999).unwrap();

        let text = sent_text(&transport);
        assert!(text.contains("BOOTID.UPNP.ORG: 999\r\n"));
        assert!(text.contains("CONFIGID.UPNP.ORG: 1\r\n"));
        assert!(text.contains("SERVER: Test/1.0 UPnP/1.1 PMOSSDP/0.1.0\r\n"));
        assert!(text.contains("X-User-Agent: redsonic\r\n"));
        assert_eq!(transport.sent()[0].target.to_string(), "239.255.255.250:1900");
    }

    #[test]
    fn test_uda_1_0_omits_epoch_headers() {
        let (client, transport) = client(UdaVersion::V1_0);
        let msg = SsdpMessage::byebye(&client.host(), "upnp:rootdevice", "uuid:x");
        client.send(1, msg, 1000).unwrap();

        let text = sent_text(&transport);
        assert!(!text.contains("BOOTID"));
        assert!(!text.contains("CONFIGID"));
    }

    #[test]
    fn test_epoch_headers_are_reserved() {
        let (client, _) = client(UdaVersion::V1_1);
        assert!(client.append_header("bootid.upnp.org", "1").is_err());
        assert!(client.append_header("NEXTBOOTID.UPNP.ORG", "1").is_err());

        client.append_header("X-A", "1").unwrap();
        client.append_header("X-A", "2").unwrap();
        client.append_header("X-B", "3").unwrap();
        client.remove_header("x-a");
        assert_eq!(client.headers(), vec![("X-B".to_string(), "3".to_string())]);
        client.clear_headers();
        assert!(client.headers().is_empty());
    }

    #[test]
    fn test_passive_client_sends_nothing() {
        let (client, transport) = client(UdaVersion::V1_1);
        client.set_active(false);
        let msg = SsdpMessage::byebye(&client.host(), "upnp:rootdevice", "uuid:x");
        client.send(1, msg, 1000).unwrap();
        assert!(transport.is_empty());
    }

    #[test]
    fn test_send_failure_reaches_handler() {
        let (client, transport) = client(UdaVersion::V1_1);
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        client.set_failure_handler(move |group, err| {
            sink.borrow_mut().push((group, err.to_string()));
        });

        transport.set_failing(true);
        let msg = SsdpMessage::byebye(&client.host(), "upnp:rootdevice", "uuid:x");
        assert!(client.send(7, msg, 1000).is_err());

        let failures = failures.borrow();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 7);
        assert!(failures[0].1.starts_with("Transport error"));
    }

    #[test]
    fn test_ipv6_interface_selects_v6_group() {
        let transport = MemoryTransport::new();
        let client = ClientContext::new(UdaVersion::V1_1, 1, 1, transport, ManualClock::new())
            .unwrap()
            .with_interface(
                NetworkInterface::new("eth0", "fe80::1".parse().unwrap()),
                MulticastScope::LinkLocal,
            );
        assert_eq!(client.host(), "[FF02::C]:1900");
        assert_eq!(client.interface().name, "eth0");
    }
}
