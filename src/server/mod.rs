use std::net::SocketAddr;

pub mod builder;
pub(crate) mod handler;
#[allow(clippy::module_inception)]
pub(crate) mod server;
pub(crate) mod state;

pub use builder::InstanceBuilder;
pub use server::Error;

/// Connection-level facts that `hyper` does not carry on the request itself. Inserted into
/// the request extensions before the request reaches the handler.
#[derive(Clone, Debug)]
pub(crate) struct RequestMetadata {
    pub remote_address: SocketAddr,
}

impl RequestMetadata {
    pub fn new(remote_address: SocketAddr) -> Self {
        Self { remote_address }
    }
}
