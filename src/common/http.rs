use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot send request: {0}")]
    HyperError(#[from] hyper::Error),
    #[error("cannot send request: {0}")]
    HyperUtilError(#[from] hyper_util::client::legacy::Error),
    #[error("cannot build request: {0}")]
    RequestError(#[from] http::Error),
}

/// A minimal HTTP client used to talk to local helper services (such as a tunnel agent API).
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;

    async fn get(&self, uri: &str) -> Result<Response<Bytes>, Error> {
        let req = Request::get(uri).body(Bytes::new())?;
        self.send(req).await
    }
}

pub struct RecorderHttpClient {
    client: Arc<Client<HttpConnector, Full<Bytes>>>,
}

impl RecorderHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(Client::builder(TokioExecutor::new()).build(HttpConnector::new())),
        }
    }
}

impl Default for RecorderHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for RecorderHttpClient {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let (req_parts, req_body) = req.into_parts();
        let hyper_req = Request::from_parts(req_parts, Full::new(req_body));

        let res = self.client.request(hyper_req).await?;

        let (res_parts, res_body) = res.into_parts();
        let body = res_body.collect().await?.to_bytes();

        Ok(Response::from_parts(res_parts, body))
    }
}
