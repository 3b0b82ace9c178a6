use crate::common::{
    http::{self, HttpClient, RecorderHttpClient},
    runtime,
    util::{read_env, with_retry},
};
use serde::{Deserialize, Serialize};
use std::{
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    time::Duration,
};
use thiserror::Error;
use url::Url;

const DEFAULT_NGROK_BIN: &str = "ngrok";
const DEFAULT_NGROK_API_ADDR: &str = "127.0.0.1:4040";
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("cannot spawn tunnel agent '{0}': {1}")]
    Spawn(String, std::io::Error),
    #[error("tunnel agent exited early ({0})")]
    Exited(ExitStatus),
    #[error("tunnel was not established within {0:?}")]
    Timeout(Duration),
    #[error("cannot query tunnel agent: {0}")]
    Api(#[from] http::Error),
    #[error("invalid response from tunnel agent: {0}")]
    InvalidResponse(String),
    #[error("cannot run tunnel client: {0}")]
    Runtime(std::io::Error),
}

/// The public addresses under which a local server is reachable once it has been exposed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicUrls {
    pub http: String,
    pub https: String,
}

/// Makes a local port reachable from the internet.
///
/// A failing tunnel never affects the local server it was started for.
pub trait Tunnel: Send {
    fn start(
        &mut self,
        local_port: u16,
        auth_token: Option<&str>,
        config: Option<&Path>,
    ) -> Result<PublicUrls, TunnelError>;

    fn stop(&mut self);
}

/// A [`Tunnel`] backed by a locally installed ngrok agent.
///
/// The agent is started as a child process (`ngrok http <port>`) and its local API is polled
/// until the public URLs of the tunnel show up.
pub struct NgrokTunnel {
    binary: String,
    api_addr: String,
    ready_timeout: Duration,
    child: Option<Child>,
}

impl NgrokTunnel {
    pub fn new<B: Into<String>, A: Into<String>>(binary: B, api_addr: A) -> Self {
        Self {
            binary: binary.into(),
            api_addr: api_addr.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            child: None,
        }
    }

    /// Reads the agent binary from `NGROK_BIN` and its API address from `NGROK_API_ADDR`.
    pub fn from_env() -> Self {
        Self::new(
            read_env("NGROK_BIN", DEFAULT_NGROK_BIN),
            read_env("NGROK_API_ADDR", DEFAULT_NGROK_API_ADDR),
        )
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn spawn_agent(
        &self,
        local_port: u16,
        auth_token: Option<&str>,
        config: Option<&Path>,
    ) -> Result<Child, TunnelError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("http")
            .arg(local_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(token) = auth_token {
            command.arg("--authtoken").arg(token);
        }
        if let Some(path) = config {
            command.arg("--config").arg(path);
        }

        command
            .spawn()
            .map_err(|e| TunnelError::Spawn(self.binary.clone(), e))
    }

    fn await_public_urls(&mut self, local_port: u16) -> Result<PublicUrls, TunnelError> {
        let api_url = format!("http://{}/api/tunnels", self.api_addr);
        let retries = (self.ready_timeout.as_millis() / POLL_INTERVAL.as_millis()) as usize;

        let result = runtime::block_on_detached(async move {
            let client = RecorderHttpClient::new();
            with_retry(retries, POLL_INTERVAL, || {
                fetch_public_urls(&client, &api_url, local_port)
            })
            .await
        })
        .map_err(TunnelError::Runtime)?;

        match result {
            Ok(urls) => Ok(urls),
            Err(err) => {
                tracing::debug!("last tunnel agent poll failed: {}", err);
                match self.child.as_mut().map(|c| c.try_wait()) {
                    Some(Ok(Some(status))) => Err(TunnelError::Exited(status)),
                    _ => Err(TunnelError::Timeout(self.ready_timeout)),
                }
            }
        }
    }
}

impl Default for NgrokTunnel {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Tunnel for NgrokTunnel {
    fn start(
        &mut self,
        local_port: u16,
        auth_token: Option<&str>,
        config: Option<&Path>,
    ) -> Result<PublicUrls, TunnelError> {
        self.stop();

        tracing::debug!("Starting ngrok agent for local port {}", local_port);
        self.child = Some(self.spawn_agent(local_port, auth_token, config)?);

        match self.await_public_urls(local_port) {
            Ok(urls) => {
                tracing::info!("Exposed port {} as {} and {}", local_port, urls.http, urls.https);
                Ok(urls)
            }
            Err(err) => {
                self.stop();
                Err(err)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                tracing::warn!("cannot stop ngrok agent: {}", err);
            }
            let _ = child.wait();
            tracing::debug!("Stopped ngrok agent");
        }
    }
}

impl Drop for NgrokTunnel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Deserialize)]
struct TunnelList {
    tunnels: Vec<TunnelInfo>,
}

#[derive(Deserialize)]
struct TunnelInfo {
    public_url: String,
    #[serde(default)]
    proto: String,
    #[serde(default)]
    config: TunnelConfig,
}

#[derive(Deserialize, Default)]
struct TunnelConfig {
    #[serde(default)]
    addr: String,
}

async fn fetch_public_urls(
    client: &RecorderHttpClient,
    api_url: &str,
    local_port: u16,
) -> Result<PublicUrls, TunnelError> {
    let res = client.get(api_url).await?;
    if !res.status().is_success() {
        return Err(TunnelError::InvalidResponse(format!(
            "status {}",
            res.status()
        )));
    }

    let list: TunnelList = serde_json::from_slice(res.body())
        .map_err(|e| TunnelError::InvalidResponse(e.to_string()))?;

    public_urls_for_port(&list, local_port)
        .ok_or_else(|| TunnelError::InvalidResponse("no tunnel for port yet".to_string()))
}

fn forwards_to_port(addr: &str, port: u16) -> bool {
    let port = port.to_string();
    addr == port || addr.rsplit(':').next() == Some(port.as_str())
}

fn public_urls_for_port(list: &TunnelList, local_port: u16) -> Option<PublicUrls> {
    let mut http = None;
    let mut https = None;

    for tunnel in list
        .tunnels
        .iter()
        .filter(|t| forwards_to_port(&t.config.addr, local_port))
    {
        if tunnel.proto == "https" || tunnel.public_url.starts_with("https://") {
            https.get_or_insert_with(|| tunnel.public_url.clone());
        } else {
            http.get_or_insert_with(|| tunnel.public_url.clone());
        }
    }

    match (http, https) {
        (Some(http), Some(https)) => Some(PublicUrls { http, https }),
        (None, Some(https)) => Some(PublicUrls {
            http: with_scheme(&https, "http")?,
            https,
        }),
        (Some(http), None) => Some(PublicUrls {
            https: with_scheme(&http, "https")?,
            http,
        }),
        (None, None) => None,
    }
}

fn with_scheme(url: &str, scheme: &str) -> Option<String> {
    let mut url = Url::parse(url).ok()?;
    url.set_scheme(scheme).ok()?;
    Some(url.as_str().trim_end_matches('/').to_string())
}
