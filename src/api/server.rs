use crate::{
    api::{Error, PublicUrls},
    common::{
        data::{RequestRecord, ResponseTable},
        runtime,
        util::join_with_timeout,
    },
    server::{
        self,
        handler::RecordingHandler,
        server::RecorderServer,
        state::{RecorderState, StateManager},
    },
};
use std::{
    net::SocketAddr,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::oneshot;

// Extra time granted to the server thread on top of the drain timeout, covering the runtime
// shutdown after the accept loop returned.
const THREAD_EXIT_GRACE: Duration = Duration::from_secs(1);

struct ServerTask {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<Result<(), server::Error>>,
}

/// A running recorder bound to one TCP port.
///
/// Every request that reaches the server is recorded and then answered from the currently
/// installed [`ResponseTable`]. The table and the recorded requests form one generation:
/// [`reconfigure`](Self::reconfigure) replaces the table and clears the log in a single step.
///
/// The server runs on its own thread with a multi-threaded runtime, so requests are handled
/// in parallel with the test thread. Dropping the instance stops it.
pub struct ServerInstance {
    addr: SocketAddr,
    state: Arc<RecorderState>,
    public_urls: Mutex<Option<PublicUrls>>,
    task: Mutex<Option<ServerTask>>,
    shutdown_timeout: Duration,
}

impl ServerInstance {
    /// Starts a server on the given port (or an OS-assigned one) with default settings.
    /// See [`InstanceBuilder`](crate::InstanceBuilder) for more options.
    pub fn start(port: Option<u16>) -> Result<Self, Error> {
        crate::InstanceBuilder::new().port_option(port).start()
    }

    pub(crate) fn launch(
        server: RecorderServer<RecordingHandler<RecorderState>>,
        state: Arc<RecorderState>,
        worker_threads: usize,
        startup_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self, Error> {
        let (addr_sender, addr_receiver) = mpsc::channel::<SocketAddr>();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("webhook-recorder-server".to_string())
            .spawn(move || {
                let runtime = runtime::new(worker_threads, 1).map_err(server::Error::RuntimeError)?;

                let result = runtime.block_on(server.start_with_signals(
                    Some(addr_sender),
                    async move {
                        let _ = shutdown_receiver.await;
                    },
                ));

                // Connections that outlived the drain timeout are cancelled here.
                runtime.shutdown_timeout(Duration::from_millis(100));
                result
            })
            .map_err(Error::Thread)?;

        let addr = match addr_receiver.recv_timeout(startup_timeout) {
            Ok(addr) => addr,
            Err(RecvTimeoutError::Timeout) => {
                let _ = shutdown_sender.send(());
                if join_with_timeout(thread, shutdown_timeout + THREAD_EXIT_GRACE).is_none() {
                    tracing::warn!("server thread did not exit after a failed startup");
                }
                return Err(Error::StartupTimeout(startup_timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The thread ended before it published an address, so it is done already.
                return match thread.join() {
                    Ok(Err(err)) => Err(Error::Startup(err)),
                    _ => Err(Error::ServerExited),
                };
            }
        };

        Ok(ServerInstance {
            addr,
            state,
            public_urls: Mutex::new(None),
            task: Mutex::new(Some(ServerTask {
                shutdown: shutdown_sender,
                thread,
            })),
            shutdown_timeout,
        })
    }

    /// The host clients should connect to. A server listening on all interfaces is reached
    /// through `127.0.0.1`.
    pub fn host(&self) -> String {
        if self.addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            self.addr.ip().to_string()
        }
    }

    /// The TCP port that the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The address the listener is bound to.
    pub fn address(&self) -> &SocketAddr {
        &self.addr
    }

    /// Builds the local URL for a specific path on the server.
    ///
    /// **Example**:
    /// ```
    /// let server = webhook_recorder::ServerInstance::start(None).unwrap();
    ///
    /// let expected_url = format!("http://127.0.0.1:{}/hello", server.port());
    /// assert_eq!(expected_url, server.url("/hello"));
    /// ```
    pub fn url<S: Into<String>>(&self, path: S) -> String {
        format!("http://{}:{}{}", self.host(), self.port(), path.into())
    }

    /// Builds the local base URL of the server.
    pub fn base_url(&self) -> String {
        self.url("")
    }

    /// The public plain-HTTP URL, once the server has been exposed through a tunnel.
    pub fn http_url(&self) -> Option<String> {
        self.lock_public_urls().as_ref().map(|u| u.http.clone())
    }

    /// The public HTTPS URL, once the server has been exposed through a tunnel.
    pub fn https_url(&self) -> Option<String> {
        self.lock_public_urls().as_ref().map(|u| u.https.clone())
    }

    pub fn public_urls(&self) -> Option<PublicUrls> {
        self.lock_public_urls().clone()
    }

    pub fn is_exposed(&self) -> bool {
        self.lock_public_urls().is_some()
    }

    pub(crate) fn set_public_urls(&self, urls: PublicUrls) {
        *self.lock_public_urls() = Some(urls);
    }

    /// Whether the server still accepts connections.
    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|task| !task.thread.is_finished())
    }

    /// Installs a new response table and clears the recorded requests in one step.
    /// Requests that arrive afterwards are answered from the new table only.
    ///
    /// Returns the id of the new configuration generation.
    pub fn reconfigure(&self, responses: ResponseTable) -> u64 {
        self.state.install(responses)
    }

    /// The response table that is currently served.
    pub fn response_table(&self) -> Arc<ResponseTable> {
        self.state.response_table()
    }

    /// The id of the current configuration generation. It increases with every
    /// [`reconfigure`](Self::reconfigure).
    pub fn generation(&self) -> u64 {
        self.state.generation()
    }

    /// A snapshot of the requests recorded since the last reconfiguration, in arrival order.
    /// Requests arriving after this call do not change the returned vector.
    pub fn requests(&self) -> Vec<Arc<RequestRecord>> {
        self.state.requests()
    }

    pub fn request_count(&self) -> usize {
        self.state.request_count()
    }

    pub fn last_request(&self) -> Option<Arc<RequestRecord>> {
        self.state.requests().pop()
    }

    /// Deletes all recorded requests but keeps the response table.
    pub fn clear_requests(&self) {
        self.state.clear_requests()
    }

    /// Blocks until at least `count` requests have been recorded or `timeout` elapses.
    /// Returns whether the count was reached. Useful when the code under test sends its
    /// webhook from a background task.
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        self.state.wait_for_requests(count, timeout)
    }

    /// Stops accepting connections, waits a bounded time for in-flight requests and releases
    /// the port. Calling it again has no effect.
    pub fn stop(&self) {
        let task = match self.lock_task().take() {
            Some(task) => task,
            None => return,
        };

        let _ = task.shutdown.send(());

        match join_with_timeout(task.thread, self.shutdown_timeout + THREAD_EXIT_GRACE) {
            Some(Ok(())) => tracing::info!("Server on {} stopped", self.addr),
            Some(Err(err)) => tracing::warn!("Server on {} stopped with error: {}", self.addr, err),
            None => tracing::warn!(
                "Server on {} did not stop within {:?}; leaving its thread behind",
                self.addr,
                self.shutdown_timeout + THREAD_EXIT_GRACE
            ),
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<ServerTask>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_public_urls(&self) -> MutexGuard<'_, Option<PublicUrls>> {
        self.public_urls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("addr", &self.addr)
            .field("generation", &self.generation())
            .field("public_urls", &self.public_urls())
            .finish()
    }
}
