use std::io;
use std::process::ExitStatus;

use http::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;
use crate::request::RequestError;
use crate::response::ResponseError;

/// An error that ends the request with a response generated by the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("invalid request: {0}")]
  Request(#[from] RequestError),
  #[error("cannot run the backend: {0:#}")]
  BackendUnavailable(anyhow::Error),
  #[error("the backend exited unsuccessfully ({0})")]
  BackendFailed(ExitStatus),
  #[error("invalid backend response: {0}")]
  BackendProtocol(#[from] ResponseError),
  #[error("the backend's Status header doesn't contain a status code")]
  MissingStatusCode,
  #[error("the backend declared an unsupported status code {0}")]
  UnsupportedStatus(u16),
  #[error("cannot send the response: {0}")]
  Streaming(#[source] io::Error),
}

impl BridgeError {
  /// The status code of the terminal response reporting this error
  pub fn status(&self) -> StatusCode {
    match self {
      BridgeError::Request(error) => error.status(),
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Checks whether the response for this error can still be sent
  pub fn is_before_response(&self) -> bool {
    !matches!(self, BridgeError::Streaming(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status() {
    assert_eq!(
      BridgeError::from(RequestError::MethodNotAllowed("PUT".to_string())).status(),
      StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
      BridgeError::from(RequestError::UnterminatedHeaders).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      BridgeError::from(ConfigError::MissingBackend).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      BridgeError::from(ResponseError::UnterminatedHead).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      BridgeError::UnsupportedStatus(550).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn test_display() {
    let error = BridgeError::BackendUnavailable(
      anyhow::anyhow!("No such file or directory").context("Cannot start the CGI program at /usr/lib/backend"),
    );
    assert_eq!(
      error.to_string(),
      "cannot run the backend: Cannot start the CGI program at /usr/lib/backend: No such file or directory"
    );
    assert!(error.is_before_response());
    assert!(!BridgeError::Streaming(io::ErrorKind::BrokenPipe.into()).is_before_response());
  }
}
