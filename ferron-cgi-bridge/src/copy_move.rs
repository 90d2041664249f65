use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copies a stream into a writer, then flushes the writer and optionally shuts it down
pub struct Copier<R, W> {
  reader: R,
  writer: W,
  shutdown: bool,
}

impl<R, W> Copier<R, W>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  pub fn new(reader: R, writer: W) -> Self {
    Self {
      reader,
      writer,
      shutdown: false,
    }
  }

  /// Creates a copier that shuts the writer down after copying, signalling the end of the stream to the peer
  pub fn with_shutdown(reader: R, writer: W) -> Self {
    Self {
      reader,
      writer,
      shutdown: true,
    }
  }

  pub async fn copy(mut self) -> Result<u64, tokio::io::Error> {
    let copied_size = tokio::io::copy(&mut self.reader, &mut self.writer).await?;
    self.writer.flush().await?;
    if self.shutdown {
      self.writer.shutdown().await?;
    }
    Ok(copied_size)
  }
}
