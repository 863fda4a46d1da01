//! Codec des messages NOTIFY SSDP
//!
//! Encode et décode les trois variantes de NOTIFY émises par un device :
//!
//! - `ssdp:alive` : HOST, CACHE-CONTROL, LOCATION, NT, NTS, SERVER, USN
//! - `ssdp:byebye` : HOST, NT, NTS, USN (pas de LOCATION ni de CACHE-CONTROL)
//! - `ssdp:update` : HOST, LOCATION, NT, NTS, USN, NEXTBOOTID.UPNP.ORG
//!
//! BOOTID.UPNP.ORG et CONFIGID.UPNP.ORG sont ajoutés quand ils sont renseignés
//! (UDA 1.1), suivis des en-têtes personnalisés du client.

use crate::errors::{Result, SsdpError};
use crate::protocol::{
    BOOTID_HEADER, CONFIGID_HEADER, NEXTBOOTID_HEADER, NotificationSubType,
};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::trace;

const NOTIFY_START_LINE: &str = "NOTIFY * HTTP/1.1";

/// Un message NOTIFY SSDP, indépendant du transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    /// Valeur de l'en-tête HOST (ex: "239.255.255.250:1900")
    pub host: String,
    pub nts: NotificationSubType,
    /// En-tête NT
    pub notification_type: String,
    /// En-tête USN
    pub unique_service_name: String,
    pub location: Option<String>,
    /// max-age en secondes (CACHE-CONTROL)
    pub max_age: Option<u32>,
    pub server: Option<String>,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub next_boot_id: Option<u32>,
    /// En-têtes supplémentaires, émis dans l'ordre après les en-têtes standards
    pub extra_headers: Vec<(String, String)>,
}

impl SsdpMessage {
    fn base(host: &str, nts: NotificationSubType, nt: &str, usn: &str) -> Self {
        Self {
            host: host.to_string(),
            nts,
            notification_type: nt.to_string(),
            unique_service_name: usn.to_string(),
            location: None,
            max_age: None,
            server: None,
            boot_id: None,
            config_id: None,
            next_boot_id: None,
            extra_headers: Vec::new(),
        }
    }

    /// Construit un NOTIFY ssdp:alive
    pub fn alive(host: &str, nt: &str, usn: &str, location: &str, max_age: u32) -> Self {
        let mut msg = Self::base(host, NotificationSubType::Alive, nt, usn);
        msg.location = Some(location.to_string());
        msg.max_age = Some(max_age);
        msg
    }

    /// Construit un NOTIFY ssdp:byebye
    pub fn byebye(host: &str, nt: &str, usn: &str) -> Self {
        Self::base(host, NotificationSubType::ByeBye, nt, usn)
    }

    /// Construit un NOTIFY ssdp:update annonçant `next_boot_id`
    pub fn update(host: &str, nt: &str, usn: &str, location: &str, next_boot_id: u32) -> Self {
        let mut msg = Self::base(host, NotificationSubType::Update, nt, usn);
        msg.location = Some(location.to_string());
        msg.next_boot_id = Some(next_boot_id);
        msg
    }

    pub fn with_server(mut self, server: &str) -> Self {
        self.server = Some(server.to_string());
        self
    }

    pub fn with_epoch(mut self, boot_id: u32, config_id: u32) -> Self {
        self.boot_id = Some(boot_id);
        self.config_id = Some(config_id);
        self
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.extra_headers.extend(headers.iter().cloned());
        self
    }

    /// Sérialise le message au format texte HTTP-over-UDP
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256);

        // write! sur une String ne peut pas échouer
        let _ = write!(out, "{}\r\n", NOTIFY_START_LINE);
        let _ = write!(out, "HOST: {}\r\n", self.host);

        if self.nts == NotificationSubType::Alive {
            if let Some(max_age) = self.max_age {
                let _ = write!(out, "CACHE-CONTROL: max-age={}\r\n", max_age);
            }
        }
        if self.nts != NotificationSubType::ByeBye {
            if let Some(ref location) = self.location {
                let _ = write!(out, "LOCATION: {}\r\n", location);
            }
        }

        let _ = write!(out, "NT: {}\r\n", self.notification_type);
        let _ = write!(out, "NTS: {}\r\n", self.nts);
        if let Some(ref server) = self.server {
            let _ = write!(out, "SERVER: {}\r\n", server);
        }
        let _ = write!(out, "USN: {}\r\n", self.unique_service_name);

        if let Some(boot_id) = self.boot_id {
            let _ = write!(out, "{}: {}\r\n", BOOTID_HEADER, boot_id);
        }
        if let Some(config_id) = self.config_id {
            let _ = write!(out, "{}: {}\r\n", CONFIGID_HEADER, config_id);
        }
        if self.nts == NotificationSubType::Update {
            if let Some(next) = self.next_boot_id {
                let _ = write!(out, "{}: {}\r\n", NEXTBOOTID_HEADER, next);
            }
        }

        for (name, value) in &self.extra_headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }

        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Décode un datagramme NOTIFY.
    ///
    /// Les noms d'en-têtes sont insensibles à la casse. NT, NTS et USN sont
    /// obligatoires ; leur absence rend le message mal formé.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)?;
        let mut lines = text.lines();

        let first_line = lines
            .next()
            .map(str::trim)
            .ok_or_else(|| SsdpError::MalformedMessage("Empty datagram".to_string()))?;
        if !first_line.eq_ignore_ascii_case(NOTIFY_START_LINE) {
            return Err(SsdpError::MalformedMessage(format!(
                "Not a NOTIFY request: '{}'",
                first_line
            )));
        }

        let mut headers = parse_headers(lines);

        let nts = required(&mut headers, "NTS")?.parse::<NotificationSubType>()?;
        let notification_type = required(&mut headers, "NT")?;
        let unique_service_name = required(&mut headers, "USN")?;

        let host = headers.remove("HOST").unwrap_or_default();
        let location = headers.remove("LOCATION");
        let server = headers.remove("SERVER");
        let max_age = headers
            .remove("CACHE-CONTROL")
            .and_then(|v| parse_max_age(&v));
        let boot_id = parse_id(&mut headers, BOOTID_HEADER)?;
        let config_id = parse_id(&mut headers, CONFIGID_HEADER)?;
        let next_boot_id = parse_id(&mut headers, NEXTBOOTID_HEADER)?;

        if nts == NotificationSubType::Update && next_boot_id.is_none() {
            return Err(SsdpError::MalformedMessage(format!(
                "ssdp:update without {}",
                NEXTBOOTID_HEADER
            )));
        }

        let mut extra_headers: Vec<(String, String)> = headers.into_iter().collect();
        extra_headers.sort();

        Ok(Self {
            host,
            nts,
            notification_type,
            unique_service_name,
            location,
            max_age,
            server,
            boot_id,
            config_id,
            next_boot_id,
            extra_headers,
        })
    }
}

fn required(headers: &mut HashMap<String, String>, name: &str) -> Result<String> {
    headers
        .remove(name)
        .ok_or_else(|| SsdpError::MalformedMessage(format!("Missing {} header", name)))
}

fn parse_id(headers: &mut HashMap<String, String>, name: &str) -> Result<Option<u32>> {
    match headers.remove(name) {
        Some(value) => value.parse::<u32>().map(Some).map_err(|e| {
            SsdpError::MalformedMessage(format!("Invalid {} '{}': {}", name, value, e))
        }),
        None => Ok(None),
    }
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();

        if line.is_empty() {
            break;
        }

        // Les valeurs peuvent contenir ':' (URL, USN)
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();

            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            } else {
                trace!("Skipping malformed header: '{}'", line);
            }
        } else {
            trace!("Skipping line without colon: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: &str) -> Option<u32> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("max-age")?;
    let after_eq = value[idx + 7..]
        .trim_start()
        .trim_start_matches('=')
        .trim_start();
    let digits: String = after_eq
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<u32>() {
        Ok(age) => Some(age),
        Err(_) => {
            trace!("Could not parse max-age from CACHE-CONTROL: '{}'", value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "239.255.255.250:1900";

    fn lines(msg: &SsdpMessage) -> Vec<String> {
        String::from_utf8(msg.encode())
            .unwrap()
            .split("\r\n")
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_alive_encoding() {
        let msg = SsdpMessage::alive(
            HOST,
            "upnp:rootdevice",
            "uuid:abc::upnp:rootdevice",
            "http://127.0.0.1/",
            1800,
        )
        .with_server("Linux/6.1 UPnP/1.1 PMOSSDP/0.1.0")
        .with_epoch(1000, 1);

        let l = lines(&msg);
        assert_eq!(l[0], "NOTIFY * HTTP/1.1");
        assert!(l.contains(&"HOST: 239.255.255.250:1900".to_string()));
        assert!(l.contains(&"CACHE-CONTROL: max-age=1800".to_string()));
        assert!(l.contains(&"LOCATION: http://127.0.0.1/".to_string()));
        assert!(l.contains(&"NTS: ssdp:alive".to_string()));
        assert!(l.contains(&"BOOTID.UPNP.ORG: 1000".to_string()));
        assert!(l.contains(&"CONFIGID.UPNP.ORG: 1".to_string()));
        assert!(!l.iter().any(|h| h.starts_with("NEXTBOOTID")));
        assert!(msg.encode().ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_byebye_omits_location_and_cache_control() {
        let mut msg = SsdpMessage::byebye(HOST, "upnp:rootdevice", "uuid:abc::upnp:rootdevice");
        // Même si le champ est renseigné, un byebye ne le transporte pas
        msg.location = Some("http://127.0.0.1/".to_string());
        msg.max_age = Some(1800);

        let text = String::from_utf8(msg.encode()).unwrap();
        assert!(!text.contains("LOCATION"));
        assert!(!text.contains("CACHE-CONTROL"));
        assert!(text.contains("NTS: ssdp:byebye\r\n"));
    }

    #[test]
    fn test_update_carries_both_boot_ids() {
        let msg = SsdpMessage::update(HOST, "upnp:rootdevice", "uuid:abc", "http://h/", 1001)
            .with_epoch(1000, 7);
        let l = lines(&msg);
        assert!(l.contains(&"NTS: ssdp:update".to_string()));
        assert!(l.contains(&"BOOTID.UPNP.ORG: 1000".to_string()));
        assert!(l.contains(&"NEXTBOOTID.UPNP.ORG: 1001".to_string()));
        assert!(!l.iter().any(|h| h.starts_with("CACHE-CONTROL")));
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        let raw = "notify * HTTP/1.1\r\n\
                   Host: 239.255.255.250:1900\r\n\
                   Cache-Control: max-age = 120\r\n\
                   Location: http://192.168.1.2:8080/desc.xml\r\n\
                   nt: upnp:rootdevice\r\n\
                   Nts: ssdp:alive\r\n\
                   usn: uuid:1234::upnp:rootdevice\r\n\
                   BootId.UPnP.org: 42\r\n\
                   X-Custom: yes\r\n\
                   \r\n";
        let msg = SsdpMessage::decode(raw.as_bytes()).unwrap();
        assert_eq!(msg.nts, NotificationSubType::Alive);
        assert_eq!(msg.max_age, Some(120));
        assert_eq!(msg.location.as_deref(), Some("http://192.168.1.2:8080/desc.xml"));
        assert_eq!(msg.unique_service_name, "uuid:1234::upnp:rootdevice");
        assert_eq!(msg.boot_id, Some(42));
        assert_eq!(
            msg.extra_headers,
            vec![("X-CUSTOM".to_string(), "yes".to_string())]
        );
    }

    #[test]
    fn test_decode_rejects_missing_required_headers() {
        for missing in ["NT", "NTS", "USN"] {
            let mut raw = String::from("NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\n");
            for (name, value) in [
                ("NT", "upnp:rootdevice"),
                ("NTS", "ssdp:byebye"),
                ("USN", "uuid:1"),
            ] {
                if name != missing {
                    raw.push_str(&format!("{}: {}\r\n", name, value));
                }
            }
            raw.push_str("\r\n");

            let err = SsdpMessage::decode(raw.as_bytes()).unwrap_err();
            assert!(
                matches!(err, SsdpError::MalformedMessage(ref m) if m.contains(missing)),
                "missing {} should be rejected, got {:?}",
                missing,
                err
            );
        }
    }

    #[test]
    fn test_decode_rejects_search_and_bad_ids() {
        let search = "M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n\r\n";
        assert!(SsdpMessage::decode(search.as_bytes()).is_err());

        let bad_id = "NOTIFY * HTTP/1.1\r\nNT: a\r\nNTS: ssdp:alive\r\nUSN: b\r\n\
                      BOOTID.UPNP.ORG: soon\r\n\r\n";
        assert!(SsdpMessage::decode(bad_id.as_bytes()).is_err());

        let update_without_next = "NOTIFY * HTTP/1.1\r\nNT: a\r\nNTS: ssdp:update\r\nUSN: b\r\n\r\n";
        assert!(SsdpMessage::decode(update_without_next.as_bytes()).is_err());
    }

    #[test]
    fn test_decode_reads_back_encoded_update() {
        let msg = SsdpMessage::update(HOST, "urn:x", "uuid:y::urn:x", "http://h/", 8)
            .with_epoch(7, 3)
            .with_headers(&[("X-A".to_string(), "1".to_string())]);
        assert_eq!(SsdpMessage::decode(&msg.encode()).unwrap(), msg);
    }
}
