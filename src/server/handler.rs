use crate::{
    common::{
        data::{missing_body_message, unconfigured_path_message, RequestRecord, ResponseSpec},
        runtime,
    },
    server::{
        handler::Error::{InvalidHeader, ResponseConstructionError},
        state::StateManager,
    },
};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue, StatusCode};
use hyper::{body::Bytes, Request, Response};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid status code: {0}")]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("cannot construct response: {0}")]
    ResponseConstructionError(http::Error),
}

#[async_trait]
pub(crate) trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

/// Records every request and answers it from the response table of the generation that was
/// active when the request was recorded.
pub(crate) struct RecordingHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    state: Arc<S>,
    print_access_log: bool,
}

impl<S> RecordingHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<S>, print_access_log: bool) -> Self {
        Self {
            state,
            print_access_log,
        }
    }

    async fn serve(&self, path: &str, spec: &ResponseSpec) -> Result<Response<Bytes>, Error> {
        let status_code = StatusCode::from_u16(spec.status)?;

        let mut builder = Response::builder().status(status_code);

        if let Some(headers) = &spec.headers {
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| InvalidHeader(format!("{}: {}", name, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| InvalidHeader(format!("{}: {}", name, e)))?;
                builder = builder.header(name, value);
            }
        }

        let body = match &spec.body {
            Some(body) => body.clone(),
            None => Bytes::from(missing_body_message(path)),
        };

        let response = builder.body(body).map_err(ResponseConstructionError)?;

        if let Some(duration) = spec.delay {
            runtime::sleep(duration).await;
        }

        Ok(response)
    }
}

#[async_trait]
impl<S> Handler for RecordingHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        tracing::trace!("Recording incoming request: {:?}", req);

        let record = RequestRecord::from(&req);
        let method = record.method().to_string();
        let path = record.path().to_string();

        let dispatch = self.state.record(record);

        let response = match dispatch.table.get(&path) {
            Some(spec) => self.serve(&path, spec).await?,
            None => {
                tracing::warn!(
                    "No response configured for path {} (generation {})",
                    path,
                    dispatch.generation
                );
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Bytes::from(unconfigured_path_message(&path)))
                    .map_err(ResponseConstructionError)?
            }
        };

        if self.print_access_log {
            tracing::info!("{} {} -> {}", method, path, response.status().as_u16());
        }

        Ok(response)
    }
}
