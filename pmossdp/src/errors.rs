use thiserror::Error;

/// Erreurs du moteur d'annonces SSDP
#[derive(Error, Debug)]
pub enum SsdpError {
    /// Version de protocole inconnue, identifiant hors plage ou ressource mal formée.
    /// Fatale à la construction : aucun objet n'est construit partiellement.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Échec d'envoi au niveau socket. Jamais propagée à travers le scheduler,
    /// seulement remontée au handler d'échec du [`crate::ClientContext`].
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Malformed SSDP message: {0}")]
    MalformedMessage(String),
}

impl From<std::str::Utf8Error> for SsdpError {
    fn from(err: std::str::Utf8Error) -> Self {
        SsdpError::MalformedMessage(format!("Invalid UTF-8: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SsdpError>;
