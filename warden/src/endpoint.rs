use std::fmt;

use serde::Serialize;

/// A reachable backend instance. Immutable once resolved; the host/port pair
/// identifies the instance for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL the client uses for all backend requests.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Well-known liveness path.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
