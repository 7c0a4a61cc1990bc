mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{ActionConfig, Config, DispatchConfig, HostCommand, SupervisorConfig};
pub use validation::warn_unknown_fields;
