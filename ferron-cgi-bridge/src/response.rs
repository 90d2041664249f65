use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use memchr::memchr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Constant defining the capacity of the response head buffer
const RESPONSE_BUFFER_CAPACITY: usize = 16384;

/// An error caused by a backend violating the CGI response convention
#[derive(Debug, Error)]
pub enum ResponseError {
  #[error("the backend output ended before the end of the header block")]
  UnterminatedHead,
  #[error("the backend header block is too large")]
  HeadTooLarge,
  #[error("cannot read the backend output: {0}")]
  Io(#[from] io::Error),
}

/// The status declared by the backend in a `Status` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredStatus {
  /// The numeric status code, or `None` if the header doesn't begin with a number
  pub code: Option<u16>,
  /// The reason phrase, or `None` if it's empty
  pub message: Option<String>,
}

impl DeclaredStatus {
  fn parse(value: &str) -> Self {
    let value = value.trim_start_matches([' ', '\t']);
    let digits_length = value.bytes().take_while(|byte| byte.is_ascii_digit()).count();
    let (digits, remainder) = value.split_at(digits_length);
    let remainder = remainder.strip_prefix(' ').unwrap_or(remainder);

    Self {
      code: digits.parse().ok(),
      message: Some(remainder.to_string()).filter(|message| !message.is_empty()),
    }
  }
}

/// The parsed header block of a backend response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
  /// The status from the last `Status` header, if there was any
  pub status: Option<DeclaredStatus>,
  /// The header lines to forward to the client, without line terminators
  pub headers: Vec<String>,
  /// Whether the backend declared its own `Content-Encoding`
  pub has_content_encoding: bool,
}

/// The state of the backend response head parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
  /// More header lines may follow
  Headers,
  /// The header block was terminated by an empty line
  Body,
}

/// A line-oriented parser for CGI response header blocks
#[derive(Debug)]
pub struct HeadParser {
  state: HeadState,
  head: ResponseHead,
}

impl HeadParser {
  pub fn new() -> Self {
    Self {
      state: HeadState::Headers,
      head: ResponseHead::default(),
    }
  }

  /// Feeds a single line of the header block, without its terminator, into the parser and returns the new state.
  pub fn feed_line(&mut self, line: &[u8]) -> HeadState {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
      self.state = HeadState::Body;
      return self.state;
    }

    let line = String::from_utf8_lossy(line);
    if let Some(value) = strip_header_name(&line, "Status") {
      self.head.status = Some(DeclaredStatus::parse(value));
    } else {
      if strip_header_name(&line, "Content-Encoding").is_some() {
        self.head.has_content_encoding = true;
      }
      self.head.headers.push(line.into_owned());
    }

    self.state
  }

  /// Finishes parsing once the backend output has ended or the header block is complete.
  pub fn finish(self) -> Result<ResponseHead, ResponseError> {
    match self.state {
      HeadState::Body => Ok(self.head),
      HeadState::Headers => Err(ResponseError::UnterminatedHead),
    }
  }
}

/// Returns the header value if the line is a header with the specified name, matched case-insensitively
fn strip_header_name<'a>(line: &'a str, name: &str) -> Option<&'a str> {
  let prefix = line.as_bytes().get(..name.len() + 1)?;
  if prefix[..name.len()].eq_ignore_ascii_case(name.as_bytes()) && prefix[name.len()] == b':' {
    line.get(name.len() + 1..)
  } else {
    None
  }
}

/// A backend response, which wraps the backend's output stream.
///
/// After the head is read, reading from this struct yields the response body.
pub struct BackendResponse<R>
where
  R: AsyncRead + Unpin,
{
  stream: R,
  response_buf: Vec<u8>,
  body_offset: Option<usize>,
}

impl<R> BackendResponse<R>
where
  R: AsyncRead + Unpin,
{
  /// Constructor to create a new BackendResponse instance
  pub fn new(stream: R) -> Self {
    Self {
      stream,
      response_buf: Vec::with_capacity(RESPONSE_BUFFER_CAPACITY),
      body_offset: None,
    }
  }

  /// Reads and parses the response header block
  pub async fn read_head(&mut self) -> Result<ResponseHead, ResponseError> {
    let mut temp_buf = [0u8; RESPONSE_BUFFER_CAPACITY];
    let mut parser = HeadParser::new();
    let mut line_start = 0;

    loop {
      // Parse the complete lines already in the buffer
      while let Some(newline_index) = memchr(b'\n', &self.response_buf[line_start..]) {
        let line_end = line_start + newline_index;
        let state = parser.feed_line(&self.response_buf[line_start..line_end]);
        line_start = line_end + 1;
        if state == HeadState::Body {
          self.body_offset = Some(line_start);
          return parser.finish();
        }
      }

      if self.response_buf.len() >= RESPONSE_BUFFER_CAPACITY {
        return Err(ResponseError::HeadTooLarge);
      }

      let read_bytes = self.stream.read(&mut temp_buf).await?;
      if read_bytes == 0 {
        return parser.finish();
      }
      self.response_buf.extend_from_slice(&temp_buf[..read_bytes]);
    }
  }
}

// Implementation of AsyncRead for the BackendResponse struct
impl<R> AsyncRead for BackendResponse<R>
where
  R: AsyncRead + Unpin,
{
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    // Body bytes that were read together with the head are returned first
    if let Some(body_offset) = self.body_offset {
      if self.response_buf.len() > body_offset {
        let remaining_data = &self.response_buf[body_offset..];
        let to_read = remaining_data.len().min(buf.remaining());
        buf.put_slice(&remaining_data[..to_read]);
        self.body_offset = Some(body_offset + to_read);
        return Poll::Ready(Ok(()));
      }
    }

    Pin::new(&mut self.stream).poll_read(cx, buf)
  }
}
