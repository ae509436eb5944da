//! Byte stream → line splitter

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use super::LinkError;

/// Longest line kept, terminator included; anything longer is line noise
pub const MAX_LINE_LEN: u64 = 1024;

/// Splits a serial byte stream into lines
///
/// One reader per connection. Any read error, and end of stream, is
/// reported as a [`LinkError`] and ends the connection; nothing is
/// retried here.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(128),
        }
    }

    /// Next line without its `\r\n`; invalid UTF-8 is replaced, not rejected
    ///
    /// Lines longer than [`MAX_LINE_LEN`] are dropped whole.
    pub async fn next_line(&mut self) -> Result<String, LinkError> {
        loop {
            let read = self.read_chunk().await?;
            if read == 0 {
                return Err(LinkError::Closed);
            }

            // A short read without a newline is the tail of the stream
            if self.buf.ends_with(b"\n") || (read as u64) < MAX_LINE_LEN {
                let line = String::from_utf8_lossy(&self.buf);
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }

            debug!("Discarding serial line longer than {} bytes", MAX_LINE_LEN);
            while !self.buf.ends_with(b"\n") {
                if self.read_chunk().await? == 0 {
                    return Err(LinkError::Closed);
                }
            }
        }
    }

    async fn read_chunk(&mut self) -> Result<usize, LinkError> {
        self.buf.clear();
        let read = (&mut self.inner)
            .take(MAX_LINE_LEN)
            .read_until(b'\n', &mut self.buf)
            .await?;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_splits_lines_and_strips_cr() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);

        device.write_all(b"512|1023|0\r\nheart").await.unwrap();
        device.write_all(b"beat\n").await.unwrap();

        assert_eq!(reader.next_line().await.unwrap(), "512|1023|0");
        assert_eq!(reader.next_line().await.unwrap(), "heartbeat");
    }

    #[tokio::test]
    async fn test_noise_is_decoded_lossily() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);

        device.write_all(b"\xff\xfe12|34\r\n").await.unwrap();
        let line = reader.next_line().await.unwrap();
        assert!(line.ends_with("12|34"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped() {
        let (mut device, host) = tokio::io::duplex(8192);
        let mut reader = LineReader::new(host);

        device.write_all(&[b'x'; 3000]).await.unwrap();
        device.write_all(b"\r\n12|34\r\n").await.unwrap();

        assert_eq!(reader.next_line().await.unwrap(), "12|34");
    }

    #[tokio::test]
    async fn test_end_of_stream_is_an_error() {
        let (device, host) = tokio::io::duplex(64);
        let mut reader = LineReader::new(host);
        drop(device);

        assert!(matches!(reader.next_line().await, Err(LinkError::Closed)));
    }
}
