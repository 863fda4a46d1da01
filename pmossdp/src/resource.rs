//! Ressource annoncée

use crate::errors::{Result, SsdpError};
use crate::protocol::MAX_AGE;
use std::time::Duration;

/// Ressource découvrable (root device, device embarqué, service).
///
/// Immuable une fois ajoutée à un groupe ; son identité est l'USN, stable
/// d'un BOOTID à l'autre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    notification_type: String,
    unique_service_name: String,
    location: String,
    max_age: Duration,
}

impl Resource {
    /// Crée une ressource avec le max-age par défaut (1800 s).
    ///
    /// # Errors
    ///
    /// `Configuration` si un champ est vide ou contient un saut de ligne
    /// (il casserait le cadrage du message).
    pub fn new(notification_type: &str, unique_service_name: &str, location: &str) -> Result<Self> {
        check_field("NT", notification_type)?;
        check_field("USN", unique_service_name)?;
        check_field("LOCATION", location)?;

        Ok(Self {
            notification_type: notification_type.to_string(),
            unique_service_name: unique_service_name.to_string(),
            location: location.to_string(),
            max_age: Duration::from_secs(MAX_AGE as u64),
        })
    }

    /// Remplace le max-age (à la seconde près, entre 1 s et `u32::MAX` s)
    pub fn with_max_age(mut self, max_age: Duration) -> Result<Self> {
        let secs = max_age.as_secs();
        if secs == 0 || secs > u32::MAX as u64 {
            return Err(SsdpError::Configuration(format!(
                "Invalid max-age {:?} for {}",
                max_age, self.unique_service_name
            )));
        }
        self.max_age = Duration::from_secs(secs);
        Ok(self)
    }

    pub fn notification_type(&self) -> &str {
        &self.notification_type
    }

    pub fn unique_service_name(&self) -> &str {
        &self.unique_service_name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// max-age tel qu'il apparaît dans CACHE-CONTROL
    pub fn max_age_secs(&self) -> u32 {
        // borné par with_max_age
        self.max_age.as_secs() as u32
    }
}

fn check_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SsdpError::Configuration(format!("Empty {} field", name)));
    }
    if value.contains(['\r', '\n']) {
        return Err(SsdpError::Configuration(format!(
            "{} field contains a line break",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_age() {
        let r = Resource::new("upnp:rootdevice", "uuid:x::upnp:rootdevice", "http://h/").unwrap();
        assert_eq!(r.max_age_secs(), 1800);
    }

    #[test]
    fn test_rejects_malformed_fields() {
        assert!(Resource::new("", "uuid:x", "http://h/").is_err());
        assert!(Resource::new("upnp:rootdevice", "uuid:x\r\nNTS: ssdp:byebye", "http://h/").is_err());
        assert!(
            Resource::new("upnp:rootdevice", "uuid:x", "http://h/")
                .unwrap()
                .with_max_age(Duration::from_millis(500))
                .is_err()
        );
    }
}
