//! Scheduler des ré-annonces
//!
//! Minuteur coopératif mono-thread : le scheduler possède les groupes qu'on
//! lui confie et, à chaque `tick`, déclenche dans l'ordre des échéances la
//! ré-annonce des groupes dus. L'hôte pilote la boucle soit lui-même
//! ([`Scheduler::next_deadline`] + [`Scheduler::tick`]), soit via
//! [`Scheduler::run`] sur un runtime tokio mono-thread.
//!
//! Un échec d'envoi n'interrompt jamais la boucle : il est remonté au
//! handler du client et le groupe réessaiera à sa prochaine échéance normale.

use crate::client::{ClientContext, GroupId};
use crate::errors::Result;
use crate::resource_group::ResourceGroup;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Résultat d'un passage du scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Groupes ré-annoncés, dans l'ordre de leurs échéances
    pub fired: Vec<GroupId>,
    /// Nombre total d'envois en échec
    pub failures: usize,
}

/// Les échéances d'un groupe sont comparées à l'horloge de son propre
/// client, celle qui les a armées.
#[derive(Default)]
pub struct Scheduler<'c> {
    groups: BTreeMap<GroupId, ResourceGroup<'c>>,
}

impl<'c> Scheduler<'c> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confie un groupe au scheduler
    pub fn insert(&mut self, group: ResourceGroup<'c>) -> GroupId {
        let id = group.id();
        self.groups.insert(id, group);
        id
    }

    pub fn group(&self, id: GroupId) -> Option<&ResourceGroup<'c>> {
        self.groups.get(&id)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut ResourceGroup<'c>> {
        self.groups.get_mut(&id)
    }

    /// Retire un groupe ; son échéance part avec lui
    pub fn remove_group(&mut self, id: GroupId) -> Option<ResourceGroup<'c>> {
        self.groups.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &ResourceGroup<'c>> {
        self.groups.values()
    }

    /// Échéance la plus proche parmi les groupes disponibles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.groups
            .values()
            .filter_map(|g| g.schedule())
            .map(|s| s.next_fire_time())
            .min()
    }

    /// Délai avant la prochaine échéance, mesuré sur l'horloge de chaque groupe
    pub fn next_delay(&self) -> Option<Duration> {
        self.groups
            .values()
            .filter_map(|g| {
                g.schedule()
                    .map(|s| s.next_fire_time().saturating_duration_since(g.client().now()))
            })
            .min()
    }

    /// Ré-annonce tous les groupes dont l'échéance est passée
    pub fn tick(&mut self) -> TickReport {
        let mut due: BinaryHeap<Reverse<(Instant, GroupId)>> = self
            .groups
            .iter()
            .filter_map(|(id, g)| {
                g.schedule()
                    .map(|s| s.next_fire_time())
                    .filter(|at| *at <= g.client().now())
                    .map(|at| Reverse((at, *id)))
            })
            .collect();

        let mut report = TickReport::default();
        while let Some(Reverse((_, id))) = due.pop() {
            if let Some(group) = self.groups.get_mut(&id) {
                let now = group.client().now();
                let failures = group.reannounce(now);
                if failures > 0 {
                    warn!(
                        "❌ Re-announcement of group {} had {} failed sends, retrying at next interval",
                        id, failures
                    );
                }
                report.failures += failures;
                report.fired.push(id);
            }
        }
        report
    }

    /// Avance le BOOTID de `client` puis propage la nouvelle époque à chacun
    /// des groupes qui lui sont liés.
    pub fn propagate_boot_id(&mut self, client: &ClientContext) -> Result<u32> {
        let next = client.advance_boot_id()?;
        for group in self.groups.values_mut() {
            if !std::ptr::eq(group.client(), client) {
                continue;
            }
            if let Err(e) = group.update(next) {
                warn!("❌ Group {} did not take boot id {}: {}", group.id(), next, e);
            }
        }
        info!("🔁 Boot id {} propagated", next);
        Ok(next)
    }

    /// Rend tous les groupes indisponibles (byebye) et annule leurs échéances
    pub fn shutdown(&mut self) {
        info!("✅ Shutting down SSDP scheduler, sending byebye for all groups");
        for group in self.groups.values_mut() {
            group.set_available(false);
        }
    }

    /// Boucle d'annonce : dort jusqu'à la prochaine échéance, ré-annonce, et
    /// recommence jusqu'à ce que `shutdown` se termine. Les groupes sont alors
    /// rendus indisponibles.
    ///
    /// Le scheduler n'étant pas `Send`, cette future s'exécute sur un runtime
    /// mono-thread (ou une `LocalSet`).
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let delay = self.next_delay();
            debug!("Scheduler sleeping for {:?}", delay);

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep_or_pending(delay) => {
                    self.tick();
                }
            }
        }

        self.shutdown();
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
