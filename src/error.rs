use thiserror::Error;

/// Error taxonomy for remote directory operations.
///
/// Remote absence of a user or group is modeled as [`Error::NotFound`] so
/// adapters can branch on it without string matching; everything a service
/// reports as a business-rule failure (a Discourse `errors` array, a
/// serverquery `error id != 0` line) becomes [`Error::Remote`]. Transport
/// failures keep their source error attached.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {name} not found on {service}")]
    NotFound {
        service: &'static str,
        entity: &'static str,
        name: String,
    },

    #[error("{service} rejected the request: {message}")]
    Remote {
        service: &'static str,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serverquery protocol error: {context}: {message}")]
    Protocol { context: String, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

impl Error {
    /// Remote-not-found is a normal branch for most operations, not a
    /// failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub(crate) fn remote(service: &'static str, message: impl Into<String>) -> Self {
        Error::Remote {
            service,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(service: &'static str, entity: &'static str, name: &str) -> Self {
        Error::NotFound {
            service,
            entity,
            name: name.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let err = Error::not_found("discourse", "user", "alice");
        assert!(err.is_not_found());
        assert!(!Error::remote("discourse", "boom").is_not_found());
    }

    #[test]
    fn display_includes_service_context() {
        let err = Error::remote("teamspeak3", "invalid serverID");
        assert_eq!(
            err.to_string(),
            "teamspeak3 rejected the request: invalid serverID"
        );
    }
}
