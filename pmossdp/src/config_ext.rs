//! Extension pour intégrer la configuration SSDP dans pmoconfig
//!
//! Ce module fournit le trait `SsdpConfigExt` qui ajoute à `pmoconfig::Config`
//! les réglages des annonces (section `ssdp:` du fichier de configuration),
//! ainsi que [`build_client`] qui construit un [`ClientContext`] à partir
//! de ces réglages.

use crate::client::{ClientContext, boot_id_from_time};
use crate::clock::Clock;
use crate::net::NetworkInterface;
use crate::protocol::{MAX_AGE, MAX_CONFIG_ID, MulticastScope, UdaVersion};
use crate::transport::Transport;
use anyhow::{Result, anyhow};
use pmoconfig::Config;
use serde_yaml::Value;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_ID: u32 = 1;

/// Trait d'extension pour ajouter la configuration SSDP à pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmossdp::SsdpConfigExt;
///
/// let config = get_config();
/// let version = config.get_ssdp_uda_version()?;
/// let max_age = config.get_ssdp_max_age()?;
/// ```
pub trait SsdpConfigExt {
    /// Version UDA annoncée (défaut: 1.1)
    fn get_ssdp_uda_version(&self) -> Result<UdaVersion>;
    fn set_ssdp_uda_version(&self, version: UdaVersion) -> Result<()>;

    /// CONFIGID initial du client (défaut: 1)
    fn get_ssdp_config_id(&self) -> Result<u32>;
    fn set_ssdp_config_id(&self, config_id: u32) -> Result<()>;

    /// Max-age des ressources publiées (défaut: 1800 secondes)
    fn get_ssdp_max_age(&self) -> Result<Duration>;
    fn set_ssdp_max_age(&self, max_age: Duration) -> Result<()>;

    /// Nom de l'interface d'émission, `None` pour la deviner
    fn get_ssdp_interface(&self) -> Result<Option<String>>;
    fn set_ssdp_interface(&self, interface: Option<String>) -> Result<()>;

    /// Portée du groupe multicast IPv6 (défaut: link-local)
    fn get_ssdp_ipv6_scope(&self) -> Result<MulticastScope>;

    /// Valeur forcée de l'en-tête SERVER, `None` pour la valeur calculée
    fn get_ssdp_server_id(&self) -> Result<Option<String>>;

    /// Mode actif (émission) ou passif (défaut: actif)
    fn get_ssdp_active(&self) -> Result<bool>;
    fn set_ssdp_active(&self, active: bool) -> Result<()>;
}

impl SsdpConfigExt for Config {
    fn get_ssdp_uda_version(&self) -> Result<UdaVersion> {
        match self.get_value(&["ssdp", "uda_version"]) {
            Ok(Value::String(s)) => Ok(s.parse()?),
            // "1.0" sans guillemets est lu comme un flottant
            Ok(Value::Number(n)) => Ok(n.to_string().parse()?),
            _ => Ok(UdaVersion::V1_1),
        }
    }

    fn set_ssdp_uda_version(&self, version: UdaVersion) -> Result<()> {
        self.set_value(
            &["ssdp", "uda_version"],
            Value::String(version.as_str().to_string()),
        )
    }

    fn get_ssdp_config_id(&self) -> Result<u32> {
        match self.get_value(&["ssdp", "config_id"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .filter(|id| *id <= MAX_CONFIG_ID as u64)
                .map(|id| id as u32)
                .ok_or_else(|| anyhow!("ssdp.config_id must be in 0..={}", MAX_CONFIG_ID)),
            _ => Ok(DEFAULT_CONFIG_ID),
        }
    }

    fn set_ssdp_config_id(&self, config_id: u32) -> Result<()> {
        if config_id > MAX_CONFIG_ID {
            return Err(anyhow!("ssdp.config_id must be in 0..={}", MAX_CONFIG_ID));
        }
        self.set_value(&["ssdp", "config_id"], Value::Number(config_id.into()))
    }

    fn get_ssdp_max_age(&self) -> Result<Duration> {
        match self.get_value(&["ssdp", "max_age"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .filter(|secs| (1..=u32::MAX as u64).contains(secs))
                .map(Duration::from_secs)
                .ok_or_else(|| anyhow!("ssdp.max_age must be a positive number of seconds")),
            _ => Ok(Duration::from_secs(MAX_AGE as u64)),
        }
    }

    fn set_ssdp_max_age(&self, max_age: Duration) -> Result<()> {
        let secs = max_age.as_secs();
        if secs == 0 || secs > u32::MAX as u64 {
            return Err(anyhow!("ssdp.max_age must be a positive number of seconds"));
        }
        self.set_value(&["ssdp", "max_age"], Value::Number(secs.into()))
    }

    fn get_ssdp_interface(&self) -> Result<Option<String>> {
        match self.get_value(&["ssdp", "interface"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    fn set_ssdp_interface(&self, interface: Option<String>) -> Result<()> {
        self.set_value(
            &["ssdp", "interface"],
            Value::String(interface.unwrap_or_default()),
        )
    }

    fn get_ssdp_ipv6_scope(&self) -> Result<MulticastScope> {
        match self.get_value(&["ssdp", "ipv6_scope"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(s.parse()?),
            _ => Ok(MulticastScope::default()),
        }
    }

    fn get_ssdp_server_id(&self) -> Result<Option<String>> {
        match self.get_value(&["ssdp", "server_id"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    fn get_ssdp_active(&self) -> Result<bool> {
        match self.get_value(&["ssdp", "active"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(true),
        }
    }

    fn set_ssdp_active(&self, active: bool) -> Result<()> {
        self.set_value(&["ssdp", "active"], Value::Bool(active))
    }
}

/// Construit un [`ClientContext`] selon la section `ssdp:` de la configuration.
///
/// Le BOOTID initial est dérivé de l'heure courante ([`boot_id_from_time`]).
/// L'interface nommée doit exister ; sans nom, elle est devinée.
pub fn build_client(
    config: &Config,
    transport: impl Transport + 'static,
    clock: impl Clock + 'static,
) -> Result<ClientContext> {
    let interface = match config.get_ssdp_interface()? {
        Some(name) => NetworkInterface::by_name(&name)
            .ok_or_else(|| anyhow!("Network interface '{}' not found", name))?,
        None => NetworkInterface::guess(),
    };
    build_client_on(config, interface, transport, clock)
}

/// Comme [`build_client`], sur une interface fournie par l'appelant
pub fn build_client_on(
    config: &Config,
    interface: NetworkInterface,
    transport: impl Transport + 'static,
    clock: impl Clock + 'static,
) -> Result<ClientContext> {
    let uda_version = config.get_ssdp_uda_version()?;
    let config_id = config.get_ssdp_config_id()?;
    let boot_id = boot_id_from_time();

    let client = ClientContext::new(uda_version, boot_id, config_id, transport, clock)?
        .with_interface(interface, config.get_ssdp_ipv6_scope()?);

    if let Some(server_id) = config.get_ssdp_server_id()? {
        client.set_server_id(&server_id);
    }

    let active = config.get_ssdp_active()?;
    client.set_active(active);
    if !active {
        warn!("⚠️ SSDP client is passive, no announcement will be sent");
    }

    info!(
        "✅ SSDP client ready: UDA {} on {} ({}), BOOTID {}, CONFIGID {}",
        uda_version,
        client.interface().name,
        client.interface().address,
        boot_id,
        config_id
    );

    Ok(client)
}
