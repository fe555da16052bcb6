pub mod cache;
pub mod gateway;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod tool;

pub use cache::{Cache, CacheOptions, CacheStats};
pub use gateway::GatewayService;
pub use policy::{NamespaceSelector, PolicyAction, PolicyRule, Resolution};
pub use registry::{RegistryEvent, ToolRegistry};
pub use router::{CallResult, RouterConfig, RouterError, ToolRouter};
pub use tool::{Namespace, ServerRegistration, Tool, ToolRegistration};
