//! Groupe de ressources partageant un même cycle de disponibilité
//!
//! ## Cycle de vie
//!
//! - indisponible → disponible : une salve `ssdp:alive` (une par ressource),
//!   puis armement de la ré-annonce à `min(max-age) / 2`
//! - disponible → indisponible : une salve `ssdp:byebye`, puis annulation
//!   de la ré-annonce
//! - changement de BOOTID : une salve `ssdp:update` (BOOTID courant +
//!   NEXTBOOTID), bascule sur la nouvelle époque, puis salve `ssdp:alive`
//!
//! Tant que le groupe est indisponible, aucun message n'est émis.

use crate::client::{ClientContext, GroupId};
use crate::errors::{Result, SsdpError};
use crate::message::SsdpMessage;
use crate::protocol::{MAX_AGE, announce_interval};
use crate::resource::Resource;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

static LAST_GROUP_ID: AtomicU32 = AtomicU32::new(0);

/// Prochaine ré-annonce d'un groupe disponible.
///
/// Appartient exclusivement à son groupe : elle disparaît avec lui ou dès
/// qu'il devient indisponible, aucun minuteur ne peut donc viser un groupe
/// détruit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAnnouncement {
    next_fire_time: Instant,
    interval: Duration,
}

impl ScheduledAnnouncement {
    pub fn next_fire_time(&self) -> Instant {
        self.next_fire_time
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

pub struct ResourceGroup<'c> {
    id: GroupId,
    client: &'c ClientContext,
    resources: Vec<Resource>,
    available: bool,
    /// Dernière époque annoncée par ce groupe, reprise comme BOOTID du
    /// prochain `ssdp:update`
    boot_id: u32,
    schedule: Option<ScheduledAnnouncement>,
}

impl<'c> ResourceGroup<'c> {
    pub fn new(client: &'c ClientContext) -> Self {
        Self {
            id: LAST_GROUP_ID.fetch_add(1, Ordering::Relaxed) + 1,
            client,
            resources: Vec::new(),
            available: false,
            boot_id: client.current_boot_id(),
            schedule: None,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn client(&self) -> &'c ClientContext {
        self.client
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn boot_id(&self) -> u32 {
        self.boot_id
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn schedule(&self) -> Option<ScheduledAnnouncement> {
        self.schedule
    }

    /// Ajoute une ressource.
    ///
    /// Si le groupe est disponible, un alive est émis immédiatement pour elle
    /// et la ré-annonce est avancée si son max-age est plus court.
    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.position(resource.unique_service_name()).is_some() {
            return Err(SsdpError::DuplicateResource(
                resource.unique_service_name().to_string(),
            ));
        }

        if self.available {
            self.boot_id = self.epoch();
            self.send_alive(&resource);

            let now = self.client.now();
            let interval = announce_interval(resource.max_age());
            if let Some(schedule) = self.schedule.as_mut() {
                if interval < schedule.interval {
                    schedule.interval = interval;
                    schedule.next_fire_time = schedule.next_fire_time.min(now + interval);
                }
            }
        }

        debug!(
            "➕ Resource {} added to group {}",
            resource.unique_service_name(),
            self.id
        );
        self.resources.push(resource);
        Ok(())
    }

    /// Ajoute une ressource avec le max-age par défaut
    pub fn add_resource_simple(
        &mut self,
        notification_type: &str,
        unique_service_name: &str,
        location: &str,
    ) -> Result<()> {
        self.add_resource(Resource::new(notification_type, unique_service_name, location)?)
    }

    /// Retire une ressource, avec un byebye si le groupe est disponible
    pub fn remove_resource(&mut self, unique_service_name: &str) -> Result<Resource> {
        let index = self
            .position(unique_service_name)
            .ok_or_else(|| SsdpError::NotFound(unique_service_name.to_string()))?;

        if self.available {
            self.send_byebye(&self.resources[index]);
        }

        let resource = self.resources.remove(index);
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.interval = min_interval(&self.resources);
        }

        debug!(
            "➖ Resource {} removed from group {}",
            unique_service_name, self.id
        );
        Ok(resource)
    }

    /// Change la disponibilité du groupe. Sans effet si elle ne change pas.
    ///
    /// Les échecs d'envoi sont remontés au handler du client ; la bascule
    /// d'état a lieu quoi qu'il arrive.
    pub fn set_available(&mut self, available: bool) {
        if self.available == available {
            return;
        }

        if available {
            self.boot_id = self.epoch();
            let failures = self.alive_burst();
            self.arm(self.client.now());
            self.available = true;
            info!(
                "📡 Resource group {} available ({} resources, {} failed)",
                self.id,
                self.resources.len(),
                failures
            );
        } else {
            let failures = self
                .resources
                .iter()
                .filter(|r| !self.send_byebye(r))
                .count();
            self.schedule = None;
            self.available = false;
            info!(
                "👋 Resource group {} unavailable ({} resources, {} failed)",
                self.id,
                self.resources.len(),
                failures
            );
        }
    }

    /// Propage un nouveau BOOTID.
    ///
    /// Groupe disponible : salve `ssdp:update` (BOOTID courant, NEXTBOOTID =
    /// `new_boot_id`), bascule, puis salve `ssdp:alive` sous la nouvelle
    /// époque et ré-armement. En UDA 1.0, `ssdp:update` n'existe pas : seule
    /// la salve alive est émise. Groupe indisponible : bascule silencieuse.
    ///
    /// # Errors
    ///
    /// `Configuration` si `new_boot_id` n'est pas strictement supérieur au
    /// BOOTID du groupe.
    pub fn update(&mut self, new_boot_id: u32) -> Result<()> {
        if new_boot_id <= self.boot_id {
            return Err(SsdpError::Configuration(format!(
                "Boot id must increase: {} -> {}",
                self.boot_id, new_boot_id
            )));
        }

        let previous = self.boot_id;
        if !self.available {
            self.boot_id = new_boot_id;
            debug!(
                "Group {} unavailable, boot id {} -> {} without traffic",
                self.id, previous, new_boot_id
            );
            return Ok(());
        }

        if self.client.protocol_version().has_boot_id() {
            for resource in &self.resources {
                self.send_update(resource, new_boot_id);
            }
        }

        self.boot_id = new_boot_id;
        self.alive_burst();
        self.arm(self.client.now());

        info!(
            "🔁 Resource group {} moved to boot id {} (was {})",
            self.id, new_boot_id, previous
        );
        Ok(())
    }

    /// Ré-annonce périodique : renvoie un alive par ressource et calcule la
    /// prochaine échéance à partir de l'échéance prévue, pas de `now`.
    ///
    /// Si l'hôte a manqué plusieurs échéances, une seule salve est émise et
    /// l'échéance avance d'intervalles entiers jusqu'à dépasser `now`.
    ///
    /// Retourne le nombre d'envois en échec.
    pub(crate) fn reannounce(&mut self, now: Instant) -> usize {
        let Some(schedule) = self.schedule else {
            return 0;
        };

        // Rattrape un BOOTID avancé sans `update`
        self.boot_id = self.epoch();
        let failures = self.alive_burst();

        let interval = min_interval(&self.resources);
        let mut next = schedule.next_fire_time + interval;
        while next <= now {
            next += interval;
        }
        self.schedule = Some(ScheduledAnnouncement {
            next_fire_time: next,
            interval,
        });

        debug!(
            "⏰ Group {} re-announced, next in {:?}",
            self.id,
            next.saturating_duration_since(now)
        );
        failures
    }

    fn arm(&mut self, now: Instant) {
        let interval = min_interval(&self.resources);
        self.schedule = Some(ScheduledAnnouncement {
            next_fire_time: now + interval,
            interval,
        });
    }

    fn position(&self, unique_service_name: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|r| r.unique_service_name() == unique_service_name)
    }

    /// BOOTID des alive et byebye : le plus récent entre celui du client et
    /// celui adopté par `update`
    fn epoch(&self) -> u32 {
        self.client.current_boot_id().max(self.boot_id)
    }

    fn alive_burst(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| !self.send_alive(r))
            .count()
    }

    fn send_alive(&self, resource: &Resource) -> bool {
        let msg = SsdpMessage::alive(
            &self.client.host(),
            resource.notification_type(),
            resource.unique_service_name(),
            resource.location(),
            resource.max_age_secs(),
        );
        let boot_id = self.epoch();
        let ok = self.client.send(self.id, msg, boot_id).is_ok();
        if ok {
            info!(
                "✅ NOTIFY alive: {} (NT={}, BOOTID={})",
                resource.unique_service_name(),
                resource.notification_type(),
                boot_id
            );
        }
        ok
    }

    fn send_byebye(&self, resource: &Resource) -> bool {
        let msg = SsdpMessage::byebye(
            &self.client.host(),
            resource.notification_type(),
            resource.unique_service_name(),
        );
        let ok = self.client.send(self.id, msg, self.epoch()).is_ok();
        if ok {
            info!(
                "👋 NOTIFY byebye: {} (NT={})",
                resource.unique_service_name(),
                resource.notification_type()
            );
        }
        ok
    }

    fn send_update(&self, resource: &Resource, next_boot_id: u32) -> bool {
        let msg = SsdpMessage::update(
            &self.client.host(),
            resource.notification_type(),
            resource.unique_service_name(),
            resource.location(),
            next_boot_id,
        );
        let ok = self.client.send(self.id, msg, self.boot_id).is_ok();
        if ok {
            info!(
                "🔁 NOTIFY update: {} (BOOTID={}, NEXTBOOTID={})",
                resource.unique_service_name(),
                self.boot_id,
                next_boot_id
            );
        }
        ok
    }
}

impl Drop for ResourceGroup<'_> {
    fn drop(&mut self) {
        if self.available {
            info!(
                "✅ Dropping resource group {}, sending byebye for all resources",
                self.id
            );
            self.set_available(false);
        }
    }
}

/// Intervalle de ré-annonce : moitié du plus petit max-age du groupe
fn min_interval(resources: &[Resource]) -> Duration {
    let max_age = resources
        .iter()
        .map(Resource::max_age)
        .min()
        .unwrap_or(Duration::from_secs(MAX_AGE as u64));
    announce_interval(max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::protocol::{NotificationSubType, UdaVersion};
    use crate::transport::MemoryTransport;

    struct Fixture {
        transport: MemoryTransport,
        clock: ManualClock,
        client: ClientContext,
    }

    fn fixture(uda: UdaVersion) -> Fixture {
        let transport = MemoryTransport::new();
        let clock = ManualClock::new();
        let client = ClientContext::new(uda, 1000, 1, transport.clone(), clock.clone()).unwrap();
        Fixture {
            transport,
            clock,
            client,
        }
    }

    fn sent(transport: &MemoryTransport) -> Vec<SsdpMessage> {
        transport
            .take()
            .iter()
            .map(|d| SsdpMessage::decode(&d.payload).unwrap())
            .collect()
    }

    fn resource(name: &str, max_age: u64) -> Resource {
        Resource::new("upnp:rootdevice", name, "http://127.0.0.1/")
            .unwrap()
            .with_max_age(Duration::from_secs(max_age))
            .unwrap()
    }

    #[test]
    fn test_unavailable_group_is_silent() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);

        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.add_resource(resource("uuid:b", 1800)).unwrap();
        group.remove_resource("uuid:a").unwrap();
        group.add_resource(resource("uuid:c", 60)).unwrap();
        group.update(1001).unwrap();

        assert!(f.transport.is_empty());
        assert_eq!(group.boot_id(), 1001);
        assert!(group.schedule().is_none());
    }

    #[test]
    fn test_duplicate_and_missing_resources() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();

        assert!(matches!(
            group.add_resource(resource("uuid:a", 60)),
            Err(SsdpError::DuplicateResource(ref usn)) if usn == "uuid:a"
        ));
        assert!(matches!(
            group.remove_resource("uuid:zz"),
            Err(SsdpError::NotFound(_))
        ));
        assert_eq!(group.resources().len(), 1);
    }

    #[test]
    fn test_alive_then_byebye_per_resource() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.add_resource(resource("uuid:b", 1800)).unwrap();

        group.set_available(true);
        group.set_available(false);

        let msgs = sent(&f.transport);
        let summary: Vec<(NotificationSubType, &str)> = msgs
            .iter()
            .map(|m| (m.nts, m.unique_service_name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (NotificationSubType::Alive, "uuid:a"),
                (NotificationSubType::Alive, "uuid:b"),
                (NotificationSubType::ByeBye, "uuid:a"),
                (NotificationSubType::ByeBye, "uuid:b"),
            ]
        );
        assert!(msgs[2].location.is_none());
        assert!(msgs[2].max_age.is_none());
        assert!(group.schedule().is_none());
    }

    #[test]
    fn test_set_available_is_idempotent() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();

        group.set_available(true);
        let schedule = group.schedule();
        f.clock.advance(Duration::from_secs(10));
        group.set_available(true);

        assert_eq!(f.transport.len(), 1);
        assert_eq!(group.schedule(), schedule);

        group.set_available(false);
        group.set_available(false);
        assert_eq!(f.transport.len(), 2);
    }

    #[test]
    fn test_schedule_uses_min_max_age() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.add_resource(resource("uuid:b", 600)).unwrap();

        let start = f.clock.now();
        group.set_available(true);

        let schedule = group.schedule().unwrap();
        assert_eq!(schedule.interval(), Duration::from_secs(300));
        assert_eq!(schedule.next_fire_time(), start + Duration::from_secs(300));
    }

    #[test]
    fn test_resources_added_while_available_are_announced() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.set_available(true);
        f.transport.take();

        let start = f.clock.now();
        f.clock.advance(Duration::from_secs(100));
        group.add_resource(resource("uuid:b", 120)).unwrap();

        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].nts, NotificationSubType::Alive);
        assert_eq!(msgs[0].max_age, Some(120));

        let schedule = group.schedule().unwrap();
        assert_eq!(schedule.interval(), Duration::from_secs(60));
        assert_eq!(schedule.next_fire_time(), start + Duration::from_secs(160));
    }

    #[test]
    fn test_remove_while_available_sends_byebye() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.add_resource(resource("uuid:b", 100)).unwrap();
        group.set_available(true);
        f.transport.take();

        let removed = group.remove_resource("uuid:b").unwrap();
        assert_eq!(removed.unique_service_name(), "uuid:b");

        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].nts, NotificationSubType::ByeBye);
        assert_eq!(msgs[0].unique_service_name, "uuid:b");
        assert_eq!(group.schedule().unwrap().interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_update_sends_update_before_new_epoch_alive() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.add_resource(resource("uuid:b", 1800)).unwrap();
        group.set_available(true);
        f.transport.take();

        let next = f.client.advance_boot_id().unwrap();
        group.update(next).unwrap();

        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 4);
        for m in &msgs[..2] {
            assert_eq!(m.nts, NotificationSubType::Update);
            assert_eq!(m.boot_id, Some(1000));
            assert_eq!(m.next_boot_id, Some(1001));
        }
        for m in &msgs[2..] {
            assert_eq!(m.nts, NotificationSubType::Alive);
            assert_eq!(m.boot_id, Some(1001));
        }
        assert_eq!(group.boot_id(), 1001);
    }

    #[test]
    fn test_advanced_boot_id_reaches_next_reannouncement() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.set_available(true);
        f.transport.take();

        // Pas d'update : l'époque suit le client à la ré-annonce suivante
        assert_eq!(f.client.advance_boot_id().unwrap(), 1001);
        f.clock.advance(Duration::from_secs(900));
        group.reannounce(f.clock.now());

        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].nts, NotificationSubType::Alive);
        assert_eq!(msgs[0].boot_id, Some(1001));
        assert_eq!(group.boot_id(), 1001);

        group.set_available(false);
        assert_eq!(sent(&f.transport)[0].boot_id, Some(1001));
    }

    #[test]
    fn test_initial_alive_uses_current_boot_id() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();

        f.client.advance_boot_id().unwrap();
        group.set_available(true);

        let msgs = sent(&f.transport);
        assert_eq!(msgs[0].boot_id, Some(1001));

        // L'update suivant part de l'époque réellement annoncée
        let next = f.client.advance_boot_id().unwrap();
        group.update(next).unwrap();
        let msgs = sent(&f.transport);
        assert_eq!(msgs[0].nts, NotificationSubType::Update);
        assert_eq!(msgs[0].boot_id, Some(1001));
        assert_eq!(msgs[0].next_boot_id, Some(1002));
        assert_eq!(msgs[1].boot_id, Some(1002));
    }

    #[test]
    fn test_update_rejects_stale_boot_id() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        assert!(matches!(group.update(1000), Err(SsdpError::Configuration(_))));
        assert!(group.update(999).is_err());
    }

    #[test]
    fn test_update_under_uda_1_0_only_realives() {
        let f = fixture(UdaVersion::V1_0);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        group.set_available(true);
        f.transport.take();

        group.update(1001).unwrap();

        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].nts, NotificationSubType::Alive);
        assert_eq!(msgs[0].boot_id, None);
    }

    #[test]
    fn test_transport_failure_does_not_block_state_change() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();

        f.transport.set_failing(true);
        group.set_available(true);
        assert!(group.is_available());
        assert!(group.schedule().is_some());

        group.set_available(false);
        assert!(!group.is_available());
        assert!(group.schedule().is_none());
    }

    #[test]
    fn test_drop_sends_byebye() {
        let f = fixture(UdaVersion::V1_1);
        {
            let mut group = ResourceGroup::new(&f.client);
            group.add_resource(resource("uuid:a", 1800)).unwrap();
            group.set_available(true);
        }
        let msgs = sent(&f.transport);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].nts, NotificationSubType::ByeBye);
    }

    #[test]
    fn test_reannounce_is_anchored_on_schedule() {
        let f = fixture(UdaVersion::V1_1);
        let mut group = ResourceGroup::new(&f.client);
        group.add_resource(resource("uuid:a", 1800)).unwrap();
        let start = f.clock.now();
        group.set_available(true);

        // Réveil tardif de 3 intervalles et demi : une seule salve
        f.clock.advance(Duration::from_secs(900 * 3 + 450));
        f.transport.take();
        assert_eq!(group.reannounce(f.clock.now()), 0);

        assert_eq!(f.transport.len(), 1);
        assert_eq!(
            group.schedule().unwrap().next_fire_time(),
            start + Duration::from_secs(900 * 4)
        );
    }

    #[test]
    fn test_group_ids_are_unique() {
        let f = fixture(UdaVersion::V1_1);
        let g = fixture(UdaVersion::V1_0);
        let a = ResourceGroup::new(&f.client);
        let b = ResourceGroup::new(&f.client);
        let c = ResourceGroup::new(&g.client);
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_ne!(a.id(), c.id());
    }
}
