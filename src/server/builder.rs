use crate::{
    api::{Error, ServerInstance},
    server::{
        handler::RecordingHandler,
        server::{RecorderServer, RecorderServerConfig},
        state::{RecorderState, StateManager},
    },
};
use std::{sync::Arc, time::Duration};

pub(crate) const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const DEFAULT_WORKER_THREADS: usize = 4;

/// Configures and starts a single [`ServerInstance`].
///
/// Most tests do not need this directly and go through
/// [`SharedRegistry::open`](crate::SharedRegistry::open), which reuses one instance across
/// many tests. Use the builder when a test needs a dedicated server that nothing else touches.
///
/// **Example**:
/// ```
/// use webhook_recorder::{InstanceBuilder, ResponseSpec, ResponseTable};
///
/// let server = InstanceBuilder::new().start().unwrap();
/// server.reconfigure(ResponseTable::new().with("/hook", ResponseSpec::new(204)));
///
/// assert!(server.is_running());
/// server.stop();
/// assert!(!server.is_running());
/// ```
pub struct InstanceBuilder {
    port: Option<u16>,
    expose: Option<bool>,
    print_access_log: Option<bool>,
    history_limit: Option<usize>,
    startup_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    worker_threads: Option<usize>,
}

impl InstanceBuilder {
    /// Creates a new instance of `InstanceBuilder` with default settings.
    pub fn new() -> Self {
        InstanceBuilder {
            port: None,
            expose: None,
            print_access_log: None,
            history_limit: None,
            startup_timeout: None,
            shutdown_timeout: None,
            worker_threads: None,
        }
    }

    /// Sets the port to listen on. Without a port, the operating system assigns a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the port to listen on as an optional value.
    pub fn port_option(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Sets whether the server listens on all interfaces (`0.0.0.0`) instead of `127.0.0.1`.
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = Some(expose);
        self
    }

    /// Sets whether the server listens on all interfaces as an optional value.
    pub fn expose_option(mut self, expose: Option<bool>) -> Self {
        self.expose = expose;
        self
    }

    /// Sets whether every handled request is logged at `info` level.
    pub fn print_access_log(mut self, enabled: bool) -> Self {
        self.print_access_log = Some(enabled);
        self
    }

    /// Sets whether every handled request is logged as an optional value.
    pub fn print_access_log_option(mut self, enabled: Option<bool>) -> Self {
        self.print_access_log = enabled;
        self
    }

    /// Sets the maximum number of recorded requests. Older requests are dropped first.
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Sets the maximum number of recorded requests as an optional value.
    pub fn history_limit_option(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sets how long [`start`](Self::start) waits for the listener. Defaults to 10 seconds.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Sets how long [`ServerInstance::stop`] waits for in-flight requests before it
    /// terminates them. Defaults to 2 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Sets the number of threads that handle requests. Defaults to 4.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Starts the server and blocks until it accepts connections.
    ///
    /// # Errors
    /// - [`Error::StartupTimeout`] if the listener is not ready in time.
    /// - [`Error::Startup`] if the port cannot be bound.
    pub fn start(self) -> Result<ServerInstance, Error> {
        let state = Arc::new(RecorderState::new(self.history_limit.unwrap_or(usize::MAX)));
        let startup_timeout = self.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT);
        let shutdown_timeout = self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let worker_threads = self.worker_threads.unwrap_or(DEFAULT_WORKER_THREADS).max(1);

        let server = self.build_with_state(state.clone(), shutdown_timeout);

        ServerInstance::launch(
            server,
            state,
            worker_threads,
            startup_timeout,
            shutdown_timeout,
        )
    }

    pub(crate) fn build_with_state<S>(
        self,
        state: Arc<S>,
        drain_timeout: Duration,
    ) -> RecorderServer<RecordingHandler<S>>
    where
        S: StateManager + Send + Sync + 'static,
    {
        let handler = RecordingHandler::new(state, self.print_access_log.unwrap_or(false));

        RecorderServer::new(
            Box::new(handler),
            RecorderServerConfig {
                static_port: self.port,
                expose: self.expose.unwrap_or(false),
                drain_timeout,
            },
        )
    }
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
