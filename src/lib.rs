//! `webhook_recorder` is a Rust crate that records webhook calls in your tests. It contains
//! two major components:
//!
//! * a **recorder server** that runs in the background of your tests, records every request it
//!   receives and answers with responses you configure per path, and
//! * a **shared registry** that keeps one server alive across many tests and reconfigures it
//!   for each of them.
//!
//! Starting an HTTP server for every single test is slow and, when the server has to be reachable
//! from the internet through a tunnel, often not possible at all. The registry therefore creates
//! the server lazily on first use and hands the same instance to every later test. Each
//! [`open`](crate::open) call atomically installs the caller's response table and clears the
//! request log, so tests never observe requests or responses of other tests.
//!
//! # Getting Started
//! Add `webhook-recorder` in your `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! webhook-recorder = "0.1"
//! ```
//!
//! You can then use `webhook_recorder` in your tests like shown in the following example:
//! ```rust
//! use webhook_recorder::{OpenOptions, ResponseSpec};
//!
//! let server = webhook_recorder::open(
//!     OpenOptions::new().response("/payment", ResponseSpec::new(200).body("received")),
//! )
//! .unwrap();
//!
//! // Send a webhook the way the code under test would.
//! let response = reqwest::blocking::Client::builder()
//!     .no_proxy()
//!     .build()
//!     .unwrap()
//!     .post(server.url("/payment?attempt=1"))
//!     .header("content-type", "application/json")
//!     .body(r#"{"amount":42}"#)
//!     .send()
//!     .unwrap();
//!
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.text().unwrap(), "received");
//!
//! let requests = server.requests();
//! assert_eq!(requests.len(), 1);
//! assert_eq!(requests[0].method(), "POST");
//! assert_eq!(requests[0].path(), "/payment");
//! assert_eq!(requests[0].query(), "attempt=1");
//! assert_eq!(requests[0].body_string(), r#"{"amount":42}"#);
//! ```
//!
//! # Unconfigured paths
//! A request to a path that is not part of the current response table is still recorded. It is
//! answered with status `404` and a body naming the path, and a warning is logged.
//!
//! # Public exposure
//! Webhooks sent by third-party services need a public URL. With
//! [`OpenOptions::expose_publicly`] the registry starts an ngrok agent for the server's port and
//! stores the public URLs on the instance ([`ServerInstance::https_url`]). A failing tunnel is
//! reported as [`Error::TunnelFailure`], while the local server keeps running.
//!
//! # Explicit registries
//! The functions at the crate root use a process-wide [`SharedRegistry`] that stops its server
//! when the process exits. Tests that want full control create their own registry with
//! [`SharedRegistry::new`] and stop it with [`SharedRegistry::stop_shared`] or by dropping it.
//!
//! # Logging
//! The crate logs through `tracing` (with its `log` feature enabled). Lifecycle events are
//! logged at `info`, unconfigured paths and shutdown problems at `warn`. Set
//! `WEBHOOK_RECORDER_LOG_VERBOSE=true` to log every handled request.
#[macro_use]
extern crate lazy_static;

use std::sync::Arc;

pub use api::{
    Error, NgrokTunnel, OpenOptions, PublicUrls, RegistryConfig, ServerInstance, SharedRegistry,
    Tunnel, TunnelError,
};
pub use common::{
    data::{RequestRecord, ResponseSpec, ResponseTable},
    util::find_available_port,
};
pub use server::InstanceBuilder;

mod api;
pub mod common;
pub mod server;

pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        find_available_port, open, open_scoped, stop_shared, InstanceBuilder, OpenOptions,
        RequestRecord, ResponseSpec, ResponseTable, ServerInstance, SharedRegistry,
    };
}

/// Opens the process-wide shared server. See [`SharedRegistry::open`].
pub fn open(options: OpenOptions) -> Result<Arc<ServerInstance>, Error> {
    SharedRegistry::global().open(options)
}

/// Opens the process-wide shared server and runs `f` with it. See
/// [`SharedRegistry::open_scoped`].
pub fn open_scoped<F, R>(options: OpenOptions, f: F) -> Result<R, Error>
where
    F: FnOnce(&ServerInstance) -> R,
{
    SharedRegistry::global().open_scoped(options, f)
}

/// Stops the process-wide shared server, if one is running.
pub fn stop_shared() {
    SharedRegistry::global().stop_shared()
}
