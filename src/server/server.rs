use crate::server::{
    handler::{self, Handler},
    server::Error::{
        BufferError, HandlerError, LocalSocketAddrError, PublishSocketAddrError, SocketBindError,
    },
    RequestMetadata,
};
use http::{Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::{rt::tokio::TokioIo, server::graceful::GracefulShutdown};
use std::{future::Future, net::SocketAddr, sync::mpsc::Sender, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    task::spawn,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBindError(SocketAddr, std::io::Error),
    #[error("cannot parse socket address: {0}")]
    SocketAddrParseError(#[from] std::net::AddrParseError),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(std::io::Error),
    #[error("cannot send reserved TCP address to test thread {0}")]
    PublishSocketAddrError(SocketAddr),
    #[error("cannot create response: {0}")]
    ResponseConstructionError(#[from] http::Error),
    #[error("buffering error: {0}")]
    BufferError(hyper::Error),
    #[error("cannot process request: {0}")]
    HandlerError(#[from] handler::Error),
    #[error("cannot build server runtime: {0}")]
    RuntimeError(std::io::Error),
}

pub struct RecorderServerConfig {
    pub static_port: Option<u16>,
    pub expose: bool,
    /// How long in-flight connections may take to finish once shutdown was requested.
    pub drain_timeout: Duration,
}

/// Accepts HTTP/1.1 connections and passes every buffered request to the handler.
pub struct RecorderServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    handler: Box<H>,
    config: RecorderServerConfig,
}

impl<H> RecorderServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    pub fn new(handler: Box<H>, config: RecorderServerConfig) -> Self {
        RecorderServer { handler, config }
    }

    /// Binds the listener, publishes the bound address through `socket_addr_sender` and
    /// serves connections until `shutdown` resolves.
    pub async fn start_with_signals<F>(
        self,
        socket_addr_sender: Option<Sender<SocketAddr>>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let host = if self.config.expose {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        let addr: SocketAddr =
            format!("{}:{}", host, self.config.static_port.unwrap_or(0)).parse()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SocketBindError(addr, e))?;

        let addr = listener.local_addr().map_err(LocalSocketAddrError)?;
        if let Some(sender) = socket_addr_sender {
            sender
                .send(addr)
                .map_err(|err| PublishSocketAddrError(err.0))?;
        }

        tracing::info!("Listening on {}", addr);
        self.run_accept_loop(listener, shutdown).await
    }

    pub async fn run_accept_loop<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let drain_timeout = self.config.drain_timeout;
        let server = Arc::new(self);
        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((tcp_stream, remote_address)) => {
                            Self::serve_connection(&server, &graceful, tcp_stream, remote_address);
                        },
                        Err(err) =>  {
                            tracing::error!("TCP error: {:?}", err);
                        },
                    };
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        // Release the port before waiting for in-flight requests.
        drop(listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::trace!("all connections closed");
            }
            _ = tokio::time::sleep(drain_timeout) => {
                tracing::warn!(
                    "connections did not finish within {:?}; terminating them",
                    drain_timeout
                );
            }
        }

        Ok(())
    }

    fn serve_connection(
        server: &Arc<Self>,
        graceful: &GracefulShutdown,
        stream: TcpStream,
        remote_address: SocketAddr,
    ) {
        tracing::trace!("new TCP connection incoming from {}", remote_address);

        let server = server.clone();
        let connection = http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(
                TokioIo::new(stream),
                service_fn(move |mut req: Request<Incoming>| {
                    req.extensions_mut()
                        .insert(RequestMetadata::new(remote_address));
                    server.clone().service(req)
                }),
            );

        let connection = graceful.watch(connection);
        spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(
                    "connection from {} ended with error: {:?}",
                    remote_address,
                    err
                );
            }
        });
    }

    async fn service(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
        tracing::trace!("New HTTP request received: {}", req.uri());

        let req = match buffer_request(req).await {
            Ok(req) => req,
            Err(err) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, BufferError(err));
            }
        };

        match self.handler.handle(req).await {
            Ok(response) => to_service_response(response),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, HandlerError(err)),
        }
    }
}

async fn buffer_request(req: Request<Incoming>) -> Result<Request<Bytes>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Request::from_parts(parts, body))
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn error_response(
    code: StatusCode,
    err: Error,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    tracing::error!("failed to process request: {}", err);
    Ok(Response::builder()
        .status(code)
        .body(full(err.to_string()))?)
}

fn to_service_response(
    response: Response<Bytes>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, full(body)))
}
