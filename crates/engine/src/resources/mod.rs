//! Resource kinds
//!
//! Each kind provides its schema and a [`Lifecycle`](crate::Lifecycle)
//! implementation. [`Schemas`] builds every schema once from the engine
//! configuration.

pub mod commands;
pub mod container;
pub mod forwarder;
pub mod forwarder_host;
pub mod forwarder_interface;
pub mod net_device;
pub mod node;

use crate::attribute::Schema;
use netbed_common::{EngineConfig, Result};
use std::sync::Arc;

pub use container::Container;
pub use forwarder::Forwarder;
pub use forwarder_host::ForwarderHost;
pub use forwarder_interface::ForwarderInterface;
pub use net_device::{NetDevice, ParentDevice};
pub use node::Node;

pub const NODE: &str = "node";
pub const FORWARDER_HOST: &str = "forwarder_host";
pub const CONTAINER: &str = "container";
pub const NET_DEVICE: &str = "net_device";
pub const FORWARDER: &str = "forwarder";
pub const FORWARDER_INTERFACE: &str = "forwarder_interface";

/// Schemas of every resource kind
#[derive(Debug)]
pub struct Schemas {
    pub node: Arc<Schema>,
    pub forwarder_host: Arc<Schema>,
    pub container: Arc<Schema>,
    pub net_device: Arc<Schema>,
    pub forwarder: Arc<Schema>,
    pub forwarder_interface: Arc<Schema>,
}

impl Schemas {
    pub fn new(config: &EngineConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            node: node::schema(config)?,
            forwarder_host: forwarder_host::schema(config)?,
            container: container::schema(config)?,
            net_device: net_device::schema(config)?,
            forwarder: forwarder::schema(config)?,
            forwarder_interface: forwarder_interface::schema(config)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_build() {
        let schemas = Schemas::new(&EngineConfig::default()).unwrap();
        assert_eq!(schemas.forwarder_interface.kind(), FORWARDER_INTERFACE);
        assert_eq!(
            schemas.forwarder_interface.key_attributes(),
            &["forwarder".to_string(), "name".to_string()]
        );
        assert_eq!(schemas.net_device.key_attributes(), &["node".to_string(), "name".to_string()]);
    }
}
