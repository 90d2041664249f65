use std::io;

use http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Maximum length of a single request line or header line, including the terminator
pub const MAX_LINE_LENGTH: usize = 16384;

/// An error caused by the inbound request itself
#[derive(Debug, Error)]
pub enum RequestError {
  #[error("the connection was closed before the request line")]
  MissingRequestLine,
  #[error("the method `{0}` is not allowed")]
  MethodNotAllowed(String),
  #[error("the request line `{0}` is malformed")]
  MalformedRequestLine(String),
  #[error("the header line `{0}` is malformed")]
  MalformedHeader(String),
  #[error("a request line is too long")]
  LineTooLong,
  #[error("the connection was closed before the end of the header block")]
  UnterminatedHeaders,
  #[error("the request target `{0}` doesn't begin with a slash")]
  InvalidTarget(String),
  #[error("cannot read the request: {0}")]
  Io(#[from] io::Error),
}

impl RequestError {
  /// The status code of the response reporting this error
  pub fn status(&self) -> StatusCode {
    match self {
      RequestError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
      _ => StatusCode::BAD_REQUEST,
    }
  }
}

/// The accepted request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

impl Method {
  fn from_token(token: &str) -> Option<Self> {
    match token {
      "GET" => Some(Method::Get),
      "POST" => Some(Method::Post),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
    }
  }
}

/// Values of the request headers that are forwarded to the backend.
///
/// A header that wasn't sent stays `None`, which is distinct from a header sent with an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognizedHeaders {
  pub accept: Option<String>,
  pub accept_encoding: Option<String>,
  pub content_encoding: Option<String>,
  pub content_length: Option<String>,
  pub content_type: Option<String>,
  pub user_agent: Option<String>,
}

impl RecognizedHeaders {
  fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
    let slot = if name.eq_ignore_ascii_case("accept") {
      &mut self.accept
    } else if name.eq_ignore_ascii_case("accept-encoding") {
      &mut self.accept_encoding
    } else if name.eq_ignore_ascii_case("content-encoding") {
      &mut self.content_encoding
    } else if name.eq_ignore_ascii_case("content-length") {
      &mut self.content_length
    } else if name.eq_ignore_ascii_case("content-type") {
      &mut self.content_type
    } else if name.eq_ignore_ascii_case("user-agent") {
      &mut self.user_agent
    } else {
      return None;
    };
    Some(slot)
  }

  /// Checks whether the client accepts gzip-compressed responses
  pub fn accepts_gzip(&self) -> bool {
    self
      .accept_encoding
      .as_deref()
      .is_some_and(|accept_encoding| accept_encoding.contains("gzip"))
  }

  /// The declared request body length, if it's a valid number
  pub fn body_length(&self) -> Option<u64> {
    self
      .content_length
      .as_deref()
      .and_then(|content_length| content_length.trim().parse().ok())
  }
}

/// The request line and the recognized headers of an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
  pub method: Method,
  pub target: String,
  pub protocol: Option<String>,
  pub headers: RecognizedHeaders,
}

impl InboundRequest {
  /// The part of the target before the first `?`
  pub fn path(&self) -> &str {
    match self.target.split_once('?') {
      Some((path, _)) => path,
      None => &self.target,
    }
  }

  /// The part of the target after the first `?`, or an empty string
  pub fn query(&self) -> &str {
    match self.target.split_once('?') {
      Some((_, query)) => query,
      None => "",
    }
  }
}

/// Reads the request line and the header block, leaving the request body in the reader.
pub async fn read_request<R>(reader: &mut R) -> Result<InboundRequest, RequestError>
where
  R: AsyncBufRead + Unpin,
{
  let request_line = read_line(reader)
    .await?
    .ok_or(RequestError::MissingRequestLine)?;

  let mut request_line_split = request_line.split_ascii_whitespace();
  let method_token = request_line_split.next().unwrap_or_default();
  let method = Method::from_token(method_token)
    .ok_or_else(|| RequestError::MethodNotAllowed(method_token.to_string()))?;
  let target = match request_line_split.next() {
    Some(target) => target.to_string(),
    None => return Err(RequestError::MalformedRequestLine(request_line)),
  };
  let protocol = request_line_split.next().map(|protocol| protocol.to_string());

  let mut headers = RecognizedHeaders::default();
  loop {
    let header_line = read_line(reader)
      .await?
      .ok_or(RequestError::UnterminatedHeaders)?;
    if header_line.is_empty() {
      break;
    }

    let (name, value) = match header_line.split_once(':') {
      Some((name, value)) if !name.is_empty() => (name, value),
      _ => return Err(RequestError::MalformedHeader(header_line)),
    };
    if let Some(slot) = headers.slot_mut(name) {
      *slot = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
    }
  }

  if !target.starts_with('/') {
    return Err(RequestError::InvalidTarget(target));
  }

  Ok(InboundRequest {
    method,
    target,
    protocol,
    headers,
  })
}

/// Reads a line terminated by LF or CRLF, without the terminator. Returns `None` at the end of the stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, RequestError>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = Vec::new();
  let read_bytes = (&mut *reader)
    .take(MAX_LINE_LENGTH as u64)
    .read_until(b'\n', &mut line)
    .await?;

  if read_bytes == 0 {
    return Ok(None);
  }

  if line.last() == Some(&b'\n') {
    line.pop();
    if line.last() == Some(&b'\r') {
      line.pop();
    }
  } else if read_bytes == MAX_LINE_LENGTH {
    return Err(RequestError::LineTooLong);
  }

  Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, BufReader};

  #[tokio::test]
  async fn test_read_request() {
    let mut reader: &[u8] =
      b"POST /repo.git/git-upload-pack?service=x&y=z HTTP/1.1\r\nContent-Type: application/x-git-upload-pack-request\r\nAccept-Encoding: gzip\r\nHost: example.com\r\nContent-Length: 4\r\n\r\nbody";

    let request = read_request(&mut reader).await.unwrap();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.path(), "/repo.git/git-upload-pack");
    assert_eq!(request.query(), "service=x&y=z");
    assert_eq!(request.protocol.as_deref(), Some("HTTP/1.1"));
    assert_eq!(
      request.headers.content_type.as_deref(),
      Some("application/x-git-upload-pack-request")
    );
    assert!(request.headers.accepts_gzip());
    assert_eq!(request.headers.body_length(), Some(4));
    assert_eq!(request.headers.user_agent, None);

    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"body");
  }

  #[tokio::test]
  async fn test_lf_line_endings_and_case_insensitive_names() {
    let mut reader: &[u8] = b"GET /info/refs\nuser-agent: git/2.43.0\nACCEPT:  */*\n\n";

    let request = read_request(&mut reader).await.unwrap();
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.path(), "/info/refs");
    assert_eq!(request.query(), "");
    assert_eq!(request.protocol, None);
    assert_eq!(request.headers.user_agent.as_deref(), Some("git/2.43.0"));
    // Only a single leading space is stripped
    assert_eq!(request.headers.accept.as_deref(), Some(" */*"));
  }

  #[tokio::test]
  async fn test_last_header_wins_and_empty_value_is_kept() {
    let mut reader: &[u8] = b"GET / HTTP/1.0\r\nAccept: a\r\naccept: b\r\nContent-Encoding:\r\n\r\n";

    let request = read_request(&mut reader).await.unwrap();
    assert_eq!(request.headers.accept.as_deref(), Some("b"));
    assert_eq!(request.headers.content_encoding.as_deref(), Some(""));
  }

  #[tokio::test]
  async fn test_method_not_allowed() {
    let mut reader: &[u8] = b"PUT / HTTP/1.0\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(&error, RequestError::MethodNotAllowed(method) if method == "PUT"));
    assert_eq!(error.status(), StatusCode::METHOD_NOT_ALLOWED);

    // Methods are case-sensitive
    let mut reader: &[u8] = b"get / HTTP/1.0\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert_eq!(error.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn test_method_checked_before_headers() {
    let mut reader: &[u8] = b"DELETE / HTTP/1.0\r\nAccept: */*\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert_eq!(error.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn test_unterminated_headers() {
    let mut reader: &[u8] = b"GET / HTTP/1.0\r\nAccept: */*\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::UnterminatedHeaders));
    assert_eq!(error.status(), StatusCode::BAD_REQUEST);

    let mut reader: &[u8] = b"";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::MissingRequestLine));
    assert_eq!(error.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_invalid_target() {
    let mut reader: &[u8] = b"GET http://example.com/ HTTP/1.0\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(&error, RequestError::InvalidTarget(target) if target == "http://example.com/"));
    assert_eq!(error.status(), StatusCode::BAD_REQUEST);

    let mut reader: &[u8] = b"GET\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::MalformedRequestLine(_)));
  }

  #[tokio::test]
  async fn test_malformed_header() {
    let mut reader: &[u8] = b"GET / HTTP/1.0\r\nno colon here\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::MalformedHeader(_)));

    let mut reader: &[u8] = b"GET / HTTP/1.0\r\n: value\r\n\r\n";
    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::MalformedHeader(_)));
  }

  #[tokio::test]
  async fn test_line_too_long() {
    let mut data = b"GET / HTTP/1.0\r\nUser-Agent: ".to_vec();
    data.extend(vec![b'A'; MAX_LINE_LENGTH]);
    data.extend_from_slice(b"\r\n\r\n");
    let mut reader = BufReader::new(&data[..]);

    let error = read_request(&mut reader).await.unwrap_err();
    assert!(matches!(error, RequestError::LineTooLong));
  }

  #[tokio::test]
  async fn test_split_reads() {
    let mut stream = tokio_test::io::Builder::new()
      .read(b"GET /a?b")
      .read(b" HTTP/1.0\r\nAccept-En")
      .read(b"coding: deflate\r")
      .read(b"\n\r\n")
      .build();
    let mut reader = BufReader::new(&mut stream);

    let request = read_request(&mut reader).await.unwrap();
    assert_eq!(request.path(), "/a");
    assert_eq!(request.query(), "b");
    assert_eq!(request.headers.accept_encoding.as_deref(), Some("deflate"));
    assert!(!request.headers.accepts_gzip());
  }
}
