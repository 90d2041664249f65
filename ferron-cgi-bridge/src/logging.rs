use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type LogWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An error logger writing timestamped lines into the diagnostic stream
#[derive(Clone)]
pub struct ErrorLogger {
  writer: Arc<Mutex<LogWriter>>,
}

impl ErrorLogger {
  /// Creates an error logger writing into the specified stream
  pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
    Self {
      writer: Arc::new(Mutex::new(Box::new(writer))),
    }
  }

  /// Creates an error logger writing into the standard error
  pub fn stderr() -> Self {
    Self::new(tokio::io::stderr())
  }

  /// Logs an error message
  pub async fn log(&self, message: &str) {
    let now: DateTime<Local> = Local::now();
    let formatted_time = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let line = format!("[{formatted_time}]: {message}\n");

    let mut writer = self.writer.lock().await;
    if let Err(e) = writer.write_all(line.as_bytes()).await {
      eprintln!("Failed to write to the error log: {e}");
      return;
    }
    writer.flush().await.unwrap_or_default();
  }
}
