pub mod broadcast;
pub mod dispatcher;
pub mod presence;
pub mod registry;
pub mod server;

pub use broadcast::Broadcaster;
pub use dispatcher::Dispatcher;
pub use registry::{ConnectionRegistry, Identity, RegistryError};
pub use server::{start, ServerConfig, ServerHandle};
