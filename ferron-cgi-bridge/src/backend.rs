use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use anyhow::Context;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::copy_move::Copier;
use crate::environment::BackendEnvironment;
use crate::logging::ErrorLogger;

/// The stream connected to the backend's standard input
pub type BackendInput = Box<dyn AsyncRead + Send + Unpin>;

/// The stream carrying the backend's standard output
pub type BackendOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A running backend invocation
pub struct BackendProcess {
  /// The CGI response produced by the backend
  pub stdout: BackendOutput,
  /// Resolves to the exit status once the backend has exited, and is ready on the first poll if it already has
  pub exit_status: BoxFuture<'static, io::Result<ExitStatus>>,
  /// Resolves once the backend's error output has ended and has been logged
  pub diagnostics: BoxFuture<'static, ()>,
}

/// An external program producing CGI responses
#[async_trait]
pub trait Backend {
  /// Starts the backend with the specified environment and standard input
  async fn invoke(
    &self,
    environment: &BackendEnvironment,
    stdin: BackendInput,
  ) -> anyhow::Result<BackendProcess>;
}

/// A backend executed as a child process
pub struct CgiBackend {
  executable: PathBuf,
  error_logger: ErrorLogger,
}

impl CgiBackend {
  pub fn new(executable: PathBuf, error_logger: ErrorLogger) -> Self {
    Self {
      executable,
      error_logger,
    }
  }
}

#[async_trait]
impl Backend for CgiBackend {
  async fn invoke(
    &self,
    environment: &BackendEnvironment,
    stdin: BackendInput,
  ) -> anyhow::Result<BackendProcess> {
    let mut command = Command::new(&self.executable);

    // Set standard I/O to be piped
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    for name in environment.unset_variables() {
      command.env_remove(name);
    }
    command.envs(environment.variables());

    let mut child = command
      .spawn()
      .with_context(|| format!("Cannot start the CGI program at {}", self.executable.display()))?;

    let child_stdin = child
      .stdin
      .take()
      .ok_or_else(|| anyhow::anyhow!("The CGI process doesn't have standard input"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| anyhow::anyhow!("The CGI process doesn't have standard output"))?;
    let stderr = child.stderr.take();

    // The backend may exit without reading the whole request body, so copy errors are ignored
    let stdin_copy = tokio::spawn(async move {
      Copier::with_shutdown(stdin, child_stdin)
        .copy()
        .await
        .unwrap_or_default();
    });

    let error_logger = self.error_logger.clone();
    let stderr_drain = stderr.map(|mut stderr| {
      tokio::spawn(async move {
        let mut stderr_string = String::new();
        stderr
          .read_to_string(&mut stderr_string)
          .await
          .unwrap_or_default();
        let stderr_string_trimmed = stderr_string.trim();
        if !stderr_string_trimmed.is_empty() {
          error_logger
            .log(&format!("There were CGI errors: {}", stderr_string_trimmed))
            .await;
        }
      })
    });

    let exit_status = async move {
      let exit_status = child.wait().await;

      // The request stream may stay open after the backend exits, since clients wait for the response
      stdin_copy.abort();

      exit_status
    }
    .boxed();

    let diagnostics = async move {
      if let Some(stderr_drain) = stderr_drain {
        stderr_drain.await.unwrap_or_default();
      }
    }
    .boxed();

    Ok(BackendProcess {
      stdout: Box::new(stdout),
      exit_status,
      diagnostics,
    })
  }
}
