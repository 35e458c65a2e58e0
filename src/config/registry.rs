//! Service registry: validated descriptor set and deterministic start order.
//!
//! The registry is validated once at construction (duplicate ids/ports,
//! unknown dependencies, cycles, dangling communication pairs) so that every
//! configuration error is surfaced before any process is spawned. No mutation
//! after load.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::descriptor::{CommunicationPair, ServiceDescriptor};
use crate::error::ConfigError;

/// Immutable, validated mapping of service ids to descriptors, in
/// declaration order, plus the declared communication pairs.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
    communication_pairs: Vec<CommunicationPair>,
    index: HashMap<String, usize>,
}

/// On-disk registry shape.
#[derive(Deserialize)]
struct RegistryFile {
    services: Vec<ServiceDescriptor>,
    #[serde(default)]
    communication_pairs: Vec<CommunicationPair>,
}

impl ServiceRegistry {
    /// Build and validate a registry. Any violation is a [`ConfigError`];
    /// nothing is ever spawned from an invalid registry.
    pub fn new(
        mut services: Vec<ServiceDescriptor>,
        communication_pairs: Vec<CommunicationPair>,
    ) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(services.len());
        let mut port_owner: HashMap<u16, String> = HashMap::new();

        for (position, service) in services.iter_mut().enumerate() {
            if service.display_name.is_empty() {
                service.display_name = service.id.clone();
            }
            if index.insert(service.id.clone(), position).is_some() {
                return Err(ConfigError::DuplicateId {
                    id: service.id.clone(),
                });
            }
            if service.port == 0 {
                return Err(ConfigError::InvalidPort {
                    id: service.id.clone(),
                });
            }
            if let Some(first) = port_owner.insert(service.port, service.id.clone()) {
                return Err(ConfigError::DuplicatePort {
                    port: service.port,
                    first,
                    second: service.id.clone(),
                });
            }
        }

        for service in &services {
            for dependency in &service.dependencies {
                if !index.contains_key(dependency) {
                    return Err(ConfigError::UnknownDependency {
                        id: service.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for pair in &communication_pairs {
            for endpoint in [&pair.source, &pair.target] {
                if !index.contains_key(endpoint) {
                    return Err(ConfigError::UnknownPairEndpoint {
                        id: endpoint.clone(),
                    });
                }
            }
        }

        let registry = Self {
            services,
            communication_pairs,
            index,
        };
        // Fail fast on cycles too, so a bad graph never reaches the orchestrator.
        registry.start_order()?;
        Ok(registry)
    }

    /// Load and validate a registry from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = serde_json::from_str(json)?;
        Self::new(file.services, file.communication_pairs)
    }

    /// Load and validate a registry from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Deterministic topological start order over the dependency DAG, ties
    /// broken by declaration order. Teardown is the reverse of the order
    /// actually achieved, which the orchestrator derives itself.
    pub fn start_order(&self) -> Result<Vec<String>, ConfigError> {
        let mut placed: HashSet<&str> = HashSet::with_capacity(self.services.len());
        let mut order = Vec::with_capacity(self.services.len());

        while order.len() < self.services.len() {
            let mut advanced = false;
            for service in &self.services {
                if placed.contains(service.id.as_str()) {
                    continue;
                }
                if service
                    .dependencies
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
                {
                    placed.insert(service.id.as_str());
                    order.push(service.id.clone());
                    advanced = true;
                }
            }
            if !advanced {
                let stuck: Vec<&str> = self
                    .services
                    .iter()
                    .filter(|s| !placed.contains(s.id.as_str()))
                    .map(|s| s.id.as_str())
                    .collect();
                return Err(ConfigError::DependencyCycle {
                    services: stuck.join(", "),
                });
            }
        }
        Ok(order)
    }

    pub fn get(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.index.get(id).map(|&position| &self.services[position])
    }

    /// All descriptors in declaration order.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn communication_pairs(&self) -> &[CommunicationPair] {
        &self.communication_pairs
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Declared ports, in declaration order.
    pub fn ports(&self) -> Vec<u16> {
        self.services.iter().map(|s| s.port).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn descriptor(id: &str, port: u16, deps: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor::new(id, "", "demo", port).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn start_order_respects_dependencies() {
        let registry = ServiceRegistry::new(
            vec![
                descriptor("mesh", 8081, &[]),
                descriptor("fcc", 8082, &["mesh"]),
                descriptor("rotor", 8083, &["fcc"]),
                descriptor("bios", 8087, &[]),
                descriptor("swarm", 8089, &["rotor", "bios"]),
            ],
            vec![],
        )
        .expect("valid registry");

        let order = registry.start_order().expect("acyclic");
        let position = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(position("mesh") < position("fcc"));
        assert!(position("fcc") < position("rotor"));
        assert!(position("rotor") < position("swarm"));
        assert!(position("bios") < position("swarm"));
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let registry = ServiceRegistry::new(
            vec![
                descriptor("c", 1003, &[]),
                descriptor("a", 1001, &[]),
                descriptor("b", 1002, &[]),
            ],
            vec![],
        )
        .expect("valid registry");
        assert_eq!(registry.start_order().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn cycle_is_a_config_error() {
        let result = ServiceRegistry::new(
            vec![
                descriptor("a", 1001, &["b"]),
                descriptor("b", 1002, &["a"]),
            ],
            vec![],
        );
        assert_matches!(result, Err(ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let result = ServiceRegistry::new(vec![descriptor("a", 1001, &["a"])], vec![]);
        assert_matches!(result, Err(ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let result = ServiceRegistry::new(vec![descriptor("a", 1001, &["ghost"])], vec![]);
        assert_matches!(
            result,
            Err(ConfigError::UnknownDependency { id, dependency })
                if id == "a" && dependency == "ghost"
        );
    }

    #[test]
    fn duplicate_port_is_rejected() {
        let result = ServiceRegistry::new(
            vec![descriptor("a", 1001, &[]), descriptor("b", 1001, &[])],
            vec![],
        );
        assert_matches!(result, Err(ConfigError::DuplicatePort { port: 1001, .. }));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let result = ServiceRegistry::new(
            vec![descriptor("a", 1001, &[]), descriptor("a", 1002, &[])],
            vec![],
        );
        assert_matches!(result, Err(ConfigError::DuplicateId { .. }));
    }

    #[test]
    fn pair_endpoints_must_be_declared() {
        let result = ServiceRegistry::new(
            vec![descriptor("a", 1001, &[])],
            vec![CommunicationPair::new("a", "ghost")],
        );
        assert_matches!(result, Err(ConfigError::UnknownPairEndpoint { id }) if id == "ghost");
    }

    #[test]
    fn empty_display_name_falls_back_to_id() {
        let registry = ServiceRegistry::new(vec![descriptor("mesh", 8081, &[])], vec![]).unwrap();
        assert_eq!(registry.get("mesh").unwrap().display_name, "mesh");
    }
}
