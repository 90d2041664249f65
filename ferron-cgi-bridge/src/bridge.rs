use std::io;

use futures_util::FutureExt;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite};

use crate::backend::{Backend, BackendInput};
use crate::config::{ConfigError, ValidatedConfig};
use crate::environment::BackendEnvironment;
use crate::error::BridgeError;
use crate::logging::ErrorLogger;
use crate::request::read_request;
use crate::response::BackendResponse;
use crate::rewriter::{self, Disposition, ResponsePlan};

/// Serves a single request read from `input`, writing exactly one HTTP response into `output`.
///
/// The configuration is checked before anything is read from the connection.
pub async fn serve<I, O, B, F>(
  config: Result<ValidatedConfig, ConfigError>,
  make_backend: F,
  input: I,
  output: &mut O,
  error_logger: &ErrorLogger,
) -> io::Result<()>
where
  I: AsyncBufRead + Send + Unpin + 'static,
  O: AsyncWrite + Unpin,
  B: Backend,
  F: FnOnce(&ValidatedConfig) -> B,
{
  let result = match config {
    Ok(config) => handle_request(&config, make_backend(&config), input, output, error_logger).await,
    Err(error) => Err(BridgeError::Config(error)),
  };

  let error = match result {
    Ok(()) => return Ok(()),
    Err(error) => error,
  };

  if !error.is_before_response() {
    error_logger.log(&format!("Cannot complete the response: {error}")).await;
    return Ok(());
  }

  let status = error.status();
  if status.is_server_error() {
    error_logger
      .log(&format!(
        "{}: {}",
        status.canonical_reason().unwrap_or_default(),
        error
      ))
      .await;
  }
  rewriter::write_error_response(output, status).await
}

async fn handle_request<I, O, B>(
  config: &ValidatedConfig,
  backend: B,
  mut input: I,
  output: &mut O,
  error_logger: &ErrorLogger,
) -> Result<(), BridgeError>
where
  I: AsyncBufRead + Send + Unpin + 'static,
  O: AsyncWrite + Unpin,
  B: Backend,
{
  let request = read_request(&mut input).await?;
  let environment = BackendEnvironment::build(&request, config);

  // The request body is passed to the backend without being interpreted
  let stdin: BackendInput = match request.headers.body_length() {
    Some(body_length) => Box::new(input.take(body_length)),
    None => Box::new(input),
  };

  let mut process = backend
    .invoke(&environment, stdin)
    .await
    .map_err(BridgeError::BackendUnavailable)?;

  let mut backend_response = BackendResponse::new(process.stdout);
  let head = backend_response.read_head().await?;

  // A backend that already failed can't be trusted to have produced a complete response
  let early_exit_status = match (&mut process.exit_status).now_or_never() {
    Some(Ok(exit_status)) if !exit_status.success() => {
      process.diagnostics.await;
      return Err(BridgeError::BackendFailed(exit_status));
    }
    Some(Err(error)) => return Err(BridgeError::BackendUnavailable(error.into())),
    early_exit_status => early_exit_status,
  };

  let plan = ResponsePlan::new(&head, request.headers.accepts_gzip())?;
  rewriter::write_response(&plan, &head.headers, backend_response, output)
    .await
    .map_err(BridgeError::Streaming)?;

  if plan.disposition == Disposition::ServerError {
    error_logger
      .log(&format!("The backend responded with {} {}", plan.code, plan.message))
      .await;
  }

  let exit_status = match early_exit_status {
    Some(exit_status) => exit_status,
    None => process.exit_status.await,
  };
  process.diagnostics.await;
  match exit_status {
    Ok(exit_status) if !exit_status.success() => {
      error_logger
        .log(&format!("The CGI program exited unsuccessfully ({exit_status})"))
        .await;
    }
    Ok(_) => (),
    Err(error) => {
      error_logger
        .log(&format!("Cannot wait for the CGI program: {error}"))
        .await;
    }
  }

  Ok(())
}
