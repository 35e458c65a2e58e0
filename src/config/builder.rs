//! Fluent builder for assembling a registry in code.

use crate::config::descriptor::{CommunicationPair, ServiceDescriptor};
use crate::config::registry::ServiceRegistry;
use crate::error::ConfigError;

/// Accumulates descriptors and communication pairs, then validates the whole
/// set in one shot via [`ServiceRegistry::new`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    services: Vec<ServiceDescriptor>,
    communication_pairs: Vec<CommunicationPair>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service descriptor (declaration order matters for tie-breaking)
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Declare a communication check from `source` to `target`
    pub fn communication_pair(mut self, source: &str, target: &str) -> Self {
        self.communication_pairs
            .push(CommunicationPair::new(source, target));
        self
    }

    pub fn build(self) -> Result<ServiceRegistry, ConfigError> {
        ServiceRegistry::new(self.services, self.communication_pairs)
    }
}
