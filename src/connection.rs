//! Session lifecycle against the remote registry.
//!
//! The connection manager owns how a session is established (endpoint,
//! credentials, logging) and how an error seen elsewhere is classified as
//! fatal to the session. It owns no retry policy: retries and backoff are
//! driven by the scheduler's failure handling.

use tracing::info;

use crate::client::{ClientError, Credentials, RegistryClient, RegistrySession};
use crate::config::PipeConfig;

/// Establishes sessions to one registry endpoint.
pub struct ConnectionManager {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
}

impl ConnectionManager {
    /// Builds a manager from the pipe configuration.
    ///
    /// An absent or empty username means the connect primitive is called
    /// without credentials.
    #[must_use]
    pub fn new(config: &PipeConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            credentials: config.credentials(),
        }
    }

    /// Opens a new session, logging the attempt.
    pub fn connect(
        &self,
        client: &dyn RegistryClient,
    ) -> Result<Box<dyn RegistrySession>, ClientError> {
        info!(
            host = %self.host,
            port = self.port,
            authenticated = self.credentials.is_some(),
            "establishing registry connection"
        );
        client.connect(&self.host, self.port, self.credentials.as_ref())
    }

    /// Classifies an error encountered elsewhere: is the session dead?
    ///
    /// Callers that discard a session on a positive answer must also reset
    /// the pending-subscription set, since listeners attached to the dead
    /// session are unrecoverable.
    #[must_use]
    pub fn is_lost(&self, error: &ClientError) -> bool {
        error.is_connection_lost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegistry;
    use std::time::Duration;

    #[test]
    fn test_connect_passes_credentials_through() {
        let mut config = PipeConfig::new("registry.local", 1099, Duration::from_secs(1));
        config.username = Some("monitorRole".into());
        config.password = Some("pw".into());

        let registry = MockRegistry::new();
        let manager = ConnectionManager::new(&config);
        manager.connect(&registry).expect("connects");

        assert_eq!(
            registry.last_credentials().map(|c| c.username),
            Some("monitorRole".to_string())
        );
    }

    #[test]
    fn test_connect_without_credentials() {
        let config = PipeConfig::new("registry.local", 1099, Duration::from_secs(1));
        let registry = MockRegistry::new();
        let manager = ConnectionManager::new(&config);
        manager.connect(&registry).expect("connects");

        assert!(registry.last_credentials().is_none());
    }

    #[test]
    fn test_loss_classification_delegates_to_error() {
        let config = PipeConfig::new("h", 1, Duration::from_secs(1));
        let manager = ConnectionManager::new(&config);

        assert!(manager.is_lost(&ClientError::transport("reset")));
        assert!(!manager.is_lost(&ClientError::remote("bad attribute")));
    }
}
