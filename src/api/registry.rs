use crate::{
    api::{Error, NgrokTunnel, ServerInstance, Tunnel},
    common::{
        data::{ResponseSpec, ResponseTable},
        util::{read_env_flag, read_env_opt},
    },
    server::builder::{InstanceBuilder, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STARTUP_TIMEOUT},
};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, Once, TryLockError},
    time::Duration,
};

lazy_static! {
    static ref GLOBAL_REGISTRY: SharedRegistry =
        SharedRegistry::with_config(RegistryConfig::from_env()).install_exit_hook();
}

static EXIT_HOOK: Once = Once::new();

/// Settings shared by every instance a [`SharedRegistry`] creates.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Listen on all interfaces instead of `127.0.0.1`.
    pub expose: bool,
    pub print_access_log: bool,
    pub history_limit: Option<usize>,
    /// Auth token passed to the tunnel when an [`OpenOptions`] does not carry its own.
    pub tunnel_token: Option<String>,
    pub tunnel_config: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl RegistryConfig {
    /// Reads the configuration from the environment:
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `WEBHOOK_RECORDER_EXPOSE` | listen on all interfaces |
    /// | `WEBHOOK_RECORDER_LOG_VERBOSE` | log every handled request |
    /// | `WEBHOOK_RECORDER_HISTORY_LIMIT` | maximum number of recorded requests |
    /// | `NGROK_AUTH_TOKEN` | default tunnel auth token |
    /// | `NGROK_CONFIG_FILE` | tunnel agent config file |
    pub fn from_env() -> Self {
        let history_limit = read_env_opt("WEBHOOK_RECORDER_HISTORY_LIMIT").and_then(|value| {
            match value.trim().parse::<usize>() {
                Ok(limit) => Some(limit),
                Err(err) => {
                    tracing::warn!(
                        "ignoring WEBHOOK_RECORDER_HISTORY_LIMIT={}: {}",
                        value,
                        err
                    );
                    None
                }
            }
        });

        RegistryConfig {
            expose: read_env_flag("WEBHOOK_RECORDER_EXPOSE"),
            print_access_log: read_env_flag("WEBHOOK_RECORDER_LOG_VERBOSE"),
            history_limit,
            tunnel_token: read_env_opt("NGROK_AUTH_TOKEN"),
            tunnel_config: read_env_opt("NGROK_CONFIG_FILE").map(PathBuf::from),
            ..RegistryConfig::default()
        }
    }

    pub(crate) fn instance_builder(&self, port: Option<u16>) -> InstanceBuilder {
        InstanceBuilder::new()
            .port_option(port)
            .expose(self.expose)
            .print_access_log(self.print_access_log)
            .history_limit_option(self.history_limit)
            .startup_timeout(self.startup_timeout)
            .shutdown_timeout(self.shutdown_timeout)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            expose: false,
            print_access_log: false,
            history_limit: None,
            tunnel_token: None,
            tunnel_config: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// The arguments of one [`SharedRegistry::open`] call.
///
/// **Example**:
/// ```
/// use webhook_recorder::{OpenOptions, ResponseSpec};
///
/// let options = OpenOptions::new()
///     .response("/hook", ResponseSpec::new(200).body("ok"))
///     .response("/other", ResponseSpec::new(204));
/// ```
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    pub(crate) port: Option<u16>,
    pub(crate) responses: ResponseTable,
    pub(crate) expose_publicly: bool,
    pub(crate) tunnel_token: Option<String>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a specific port. A running instance on another port is replaced.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port_option(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Replaces the whole response table.
    pub fn responses(mut self, responses: ResponseTable) -> Self {
        self.responses = responses;
        self
    }

    /// Adds one path to the response table.
    pub fn response<P: Into<String>>(mut self, path: P, response: ResponseSpec) -> Self {
        self.responses.insert(path, response);
        self
    }

    /// Exposes the instance through the registry's tunnel. Once exposed, an instance stays
    /// exposed until it is stopped.
    pub fn expose_publicly(mut self, expose: bool) -> Self {
        self.expose_publicly = expose;
        self
    }

    pub fn tunnel_token<T: Into<String>>(mut self, token: T) -> Self {
        self.tunnel_token = Some(token.into());
        self
    }
}

struct RegistryState {
    instance: Option<Arc<ServerInstance>>,
    tunnel: Box<dyn Tunnel>,
    tunnel_active: bool,
}

/// Holds at most one running [`ServerInstance`] and hands it to every test that asks for one.
///
/// Each [`open`](Self::open) installs the caller's response table and clears the request log,
/// so tests that reuse the instance never see each other's requests. Calls to `open` are
/// serialized. Asking for a different port than the running instance has replaces it.
///
/// **Example**:
/// ```
/// use webhook_recorder::{OpenOptions, ResponseSpec, SharedRegistry};
///
/// let registry = SharedRegistry::new();
///
/// let server = registry
///     .open(OpenOptions::new().response("/hook", ResponseSpec::new(200).body("thanks")))
///     .unwrap();
///
/// let res = reqwest::blocking::Client::builder()
///     .no_proxy()
///     .build()
///     .unwrap()
///     .post(server.url("/hook"))
///     .body("{}")
///     .send()
///     .unwrap();
///
/// assert_eq!(res.status(), 200);
/// assert_eq!(server.request_count(), 1);
///
/// registry.stop_shared();
/// ```
pub struct SharedRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    exit_hook: bool,
}

impl SharedRegistry {
    /// Creates a registry with default settings and an ngrok tunnel configured from the
    /// environment.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        SharedRegistry {
            config,
            state: Mutex::new(RegistryState {
                instance: None,
                tunnel: Box::new(NgrokTunnel::from_env()),
                tunnel_active: false,
            }),
            exit_hook: false,
        }
    }

    /// Replaces the tunnel used for public exposure.
    pub fn with_tunnel<T: Tunnel + 'static>(self, tunnel: T) -> Self {
        {
            let mut state = self.lock();
            state.tunnel = Box::new(tunnel);
        }
        self
    }

    /// The process-wide registry, configured from the environment
    /// (see [`RegistryConfig::from_env`]). Its instance is stopped when the process exits.
    pub fn global() -> &'static SharedRegistry {
        &GLOBAL_REGISTRY
    }

    fn install_exit_hook(mut self) -> Self {
        self.exit_hook = true;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns a running instance configured with `options.responses` and an empty request
    /// log.
    ///
    /// The running instance is reused unless `options.port` names a different port or the
    /// instance has stopped. If public exposure is requested and the instance is not exposed
    /// yet, the tunnel is started for its port.
    ///
    /// # Errors
    /// - [`Error::StartupTimeout`] / [`Error::Startup`] if a new instance cannot be started.
    /// - [`Error::TunnelFailure`] if exposure fails. The instance stays running and is
    ///   returned by later calls.
    pub fn open(&self, options: OpenOptions) -> Result<Arc<ServerInstance>, Error> {
        let mut state = self.lock();

        if let Some(current) = &state.instance {
            let port_changed = options.port.is_some_and(|port| port != current.port());
            if port_changed || !current.is_running() {
                tracing::debug!(
                    "Replacing server on port {} (requested port: {:?}, running: {})",
                    current.port(),
                    options.port,
                    current.is_running()
                );
                Self::teardown(&mut state);
            }
        }

        let instance = match &state.instance {
            Some(instance) => {
                tracing::debug!("Reusing server on port {}", instance.port());
                instance.clone()
            }
            None => {
                let instance = Arc::new(self.config.instance_builder(options.port).start()?);
                tracing::debug!("Started shared server on port {}", instance.port());
                state.instance = Some(instance.clone());
                self.register_exit_hook();
                instance
            }
        };

        instance.reconfigure(options.responses);

        if options.expose_publicly && !instance.is_exposed() {
            let token = options
                .tunnel_token
                .as_deref()
                .or(self.config.tunnel_token.as_deref());

            let urls = state
                .tunnel
                .start(instance.port(), token, self.config.tunnel_config.as_deref())
                .map_err(|err| {
                    tracing::warn!("Cannot expose port {}: {}", instance.port(), err);
                    err
                })?;

            instance.set_public_urls(urls);
            state.tunnel_active = true;
        }

        Ok(instance)
    }

    /// Like [`open`](Self::open), but passes the instance to `f` and returns its result.
    /// The registry lock is not held while `f` runs.
    pub fn open_scoped<F, R>(&self, options: OpenOptions, f: F) -> Result<R, Error>
    where
        F: FnOnce(&ServerInstance) -> R,
    {
        let instance = self.open(options)?;
        Ok(f(&instance))
    }

    /// The instance currently held, if any.
    pub fn current(&self) -> Option<Arc<ServerInstance>> {
        self.lock().instance.clone()
    }

    /// Stops the tunnel and the instance and forgets both. Calling it again has no effect.
    pub fn stop_shared(&self) {
        Self::teardown(&mut self.lock());
    }

    fn teardown(state: &mut RegistryState) {
        if state.tunnel_active {
            state.tunnel.stop();
            state.tunnel_active = false;
        }
        if let Some(instance) = state.instance.take() {
            instance.stop();
        }
    }

    fn register_exit_hook(&self) {
        if !self.exit_hook {
            return;
        }

        EXIT_HOOK.call_once(|| {
            extern "C" fn stop_global_registry() {
                let _ = std::panic::catch_unwind(|| GLOBAL_REGISTRY.stop_at_exit());
            }

            unsafe {
                libc::atexit(stop_global_registry);
            }
        });
    }

    /// Tears down like [`stop_shared`](Self::stop_shared) but gives up instead of waiting
    /// when another thread holds the registry lock. Returns whether the teardown ran.
    fn stop_at_exit(&self) -> bool {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("registry is busy at process exit; skipping server shutdown");
                return false;
            }
        };
        Self::teardown(&mut state);
        true
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SharedRegistry {
    fn drop(&mut self) {
        self.stop_shared();
    }
}
