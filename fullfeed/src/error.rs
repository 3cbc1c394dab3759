use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use thiserror::Error;

/// Failures that abort a whole feed request.
///
/// Anything that only affects one item (resolution, fetch, extraction, cache
/// I/O) is handled inside the enricher and never reaches this type.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing required query parameter: url")]
    MissingUrl,
    #[error("invalid feed URL {0:?}: expected an absolute http(s) URL")]
    InvalidUrl(String),
    #[error("source feed unavailable: {0:#}")]
    SourceFeed(anyhow::Error),
    #[error("failed to render feed: {0:#}")]
    Serialization(anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> Status {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl(_) => Status::BadRequest,
            ProxyError::SourceFeed(_) => Status::BadGateway,
            ProxyError::Serialization(_) => Status::InternalServerError,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ProxyError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected: {}", self);
        }
        (status, self.to_string()).respond_to(request)
    }
}
