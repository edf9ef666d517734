//! Agent pool: static profiles and the registry that ties each profile to
//! its adapter, circuit and reward.

mod registry;
mod types;

pub use registry::{AgentRegistry, RegistryError};
pub use types::AgentProfile;
