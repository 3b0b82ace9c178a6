use std::time::Duration;
use thiserror::Error;

pub use registry::{OpenOptions, RegistryConfig, SharedRegistry};
pub use server::ServerInstance;
pub use tunnel::{NgrokTunnel, PublicUrls, Tunnel, TunnelError};

mod registry;
#[allow(clippy::module_inception)]
mod server;
mod tunnel;

#[derive(Error, Debug)]
pub enum Error {
    #[error("server did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("cannot start server: {0}")]
    Startup(#[from] crate::server::Error),
    #[error("server thread exited before it was ready")]
    ServerExited,
    #[error("cannot spawn server thread: {0}")]
    Thread(std::io::Error),
    #[error("cannot expose server publicly: {0}")]
    TunnelFailure(#[from] TunnelError),
}
