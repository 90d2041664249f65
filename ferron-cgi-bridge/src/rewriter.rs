use std::io;

use async_compression::tokio::bufread::GzipEncoder;
use async_compression::Level;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::copy_move::Copier;
use crate::error::BridgeError;
use crate::response::ResponseHead;

const COMPRESSED_STREAM_READER_BUFFER_SIZE: usize = 16384;

/// How a backend-declared status is relayed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  Success,
  ClientError,
  ServerError,
}

/// Classifies a backend-declared status code.
///
/// Client and server errors are only relayed if the status code is a registered one.
/// Anything else (informational, redirection, unregistered codes) isn't supported.
pub fn classify(code: u16) -> Option<Disposition> {
  match code {
    200..=299 => Some(Disposition::Success),
    400..=599 => {
      StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())?;
      if code < 500 {
        Some(Disposition::ClientError)
      } else {
        Some(Disposition::ServerError)
      }
    }
    _ => None,
  }
}

/// The response sent for a backend response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePlan {
  pub code: u16,
  pub message: String,
  pub disposition: Disposition,
  pub compress: bool,
}

impl ResponsePlan {
  /// Decides the status line and the body encoding of the response
  pub fn new(head: &ResponseHead, accepts_gzip: bool) -> Result<Self, BridgeError> {
    let (code, message) = match &head.status {
      Some(status) => (
        status.code.ok_or(BridgeError::MissingStatusCode)?,
        status.message.clone(),
      ),
      None => (200, None),
    };
    let disposition = classify(code).ok_or(BridgeError::UnsupportedStatus(code))?;
    let message = message.unwrap_or_else(|| match disposition {
      Disposition::Success => "OK".to_string(),
      _ => format!("{code} error"),
    });

    Ok(Self {
      code,
      message,
      disposition,
      compress: disposition == Disposition::Success && !head.has_content_encoding && accepts_gzip,
    })
  }

  /// Serializes the response head, including the terminating empty line
  pub fn serialize_head(&self, headers: &[String]) -> Vec<u8> {
    let mut response_head = format!("HTTP/1.0 {} {}\r\nConnection: close\r\n", self.code, self.message);
    for header in headers {
      response_head.push_str(header);
      response_head.push_str("\r\n");
    }
    if self.compress {
      response_head.push_str("Content-Encoding: gzip\r\n");
    }
    response_head.push_str("\r\n");
    response_head.into_bytes()
  }
}

/// Writes the response head and streams the body, compressing it if planned
pub async fn write_response<R, W>(
  plan: &ResponsePlan,
  headers: &[String],
  body: R,
  output: &mut W,
) -> io::Result<u64>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  output.write_all(&plan.serialize_head(headers)).await?;

  if plan.compress {
    // The fastest compression level is used to keep the CPU usage low
    let body_reader = BufReader::with_capacity(COMPRESSED_STREAM_READER_BUFFER_SIZE, body);
    let encoder = GzipEncoder::with_quality(body_reader, Level::Fastest);
    Copier::new(encoder, output).copy().await
  } else {
    Copier::new(body, output).copy().await
  }
}

/// Writes a complete plain-text response whose body is the reason phrase
pub async fn write_error_response<W>(output: &mut W, status: StatusCode) -> io::Result<()>
where
  W: AsyncWrite + Unpin,
{
  let message = status.canonical_reason().unwrap_or("Unknown Error");
  let response = format!(
    "HTTP/1.0 {} {}\r\nConnection: close\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
    status.as_u16(),
    message,
    message.len(),
    message
  );
  output.write_all(response.as_bytes()).await?;
  output.flush().await
}
