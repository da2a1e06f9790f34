//! netbed Engine
//!
//! Declarative resources, their attribute model and lifecycle, and the task
//! algebra used to provision nodes, containers, network devices and packet
//! forwarders.

pub mod address;
pub mod attribute;
pub mod engine;
pub mod hypervisor;
pub mod lifecycle;
pub mod lock;
pub mod manager;
pub mod parse;
pub mod requirement;
pub mod resources;
pub mod task;
pub mod template;

// Re-export commonly used types
pub use address::{AddressAllocator, LocalAddressAllocator};
pub use attribute::{AttrType, Attribute, DefaultRule, Multiplicity, Schema};
pub use engine::Engine;
pub use hypervisor::{ContainerDescriptor, HypervisorClient, ImageSource, SourceMode};
pub use lifecycle::{FailureReport, Lifecycle, ResourceContext};
pub use lock::ForwarderLock;
pub use manager::{Resource, ResourceEntry, ResourceHandle, ResourceManager};
pub use parse::{parse_memif, MemifRecord};
pub use requirement::Requirement;
pub use resources::Schemas;
pub use task::{ExternalTask, Step, Task, TaskOutput, Update};
pub use template::{Binding, Bindings, CommandTemplate};
