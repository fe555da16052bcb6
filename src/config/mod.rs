pub mod discovery;
pub mod loader;
pub mod models;
pub mod validation;

pub use discovery::{DiscoveryError, discover_server, discover_servers};
pub use loader::load_config;
pub use models::*;
pub use validation::{ServerConfigValidator, ValidationError, ValidationResult};
