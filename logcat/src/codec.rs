//! Line framing of the log stream.
//!
//! Streams read through a pseudo-terminal carry `\r\n` line endings and the first line read is
//! usually a partial one. [`LineFraming::Pty`] treats the text between a `\n` and the next `\r` as
//! a line, which drops that partial first line. [`LineFraming::Newline`] is plain `\n` framing with
//! a trailing `\r` trimmed.

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio_util::codec::Decoder;

use remote::StreamProcess;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineFraming {
    /// `\n<line>\r`
    Pty,
    /// `<line>\n`, optional `\r` before the `\n`
    #[default]
    Newline,
}

#[derive(Debug, Clone)]
pub struct LineCodec {
    framing: LineFraming,
    /// Drop input up to the next line boundary before decoding again
    skip_partial: bool,
}

impl LineCodec {
    pub fn new(framing: LineFraming) -> Self {
        Self {
            framing,
            skip_partial: false,
        }
    }

    /// Discards whatever is left of the current line.
    pub fn skip_partial_line(&mut self) {
        // pty lines only start at a newline, the remainder is skipped anyway
        self.skip_partial = self.framing == LineFraming::Newline;
    }

    fn decode_pty(buf: &mut BytesMut) -> Option<String> {
        let Some(start) = buf.iter().position(|b| *b == b'\n') else {
            buf.clear();
            return None;
        };
        let Some(len) = buf[start + 1..].iter().position(|b| *b == b'\r') else {
            buf.advance(start);
            return None;
        };
        let line = String::from_utf8_lossy(&buf[start + 1..start + 1 + len]).into_owned();
        buf.advance(start + len + 2);
        Some(line)
    }

    fn decode_newline(buf: &mut BytesMut) -> Option<String> {
        let pos = buf.iter().position(|b| *b == b'\n')?;
        let raw = buf.split_to(pos + 1);
        Some(trim_line(&raw[..pos]))
    }
}

fn trim_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if self.skip_partial {
            match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    buf.advance(pos + 1);
                    self.skip_partial = false;
                }
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }
        Ok(match self.framing {
            LineFraming::Pty => Self::decode_pty(buf),
            LineFraming::Newline => Self::decode_newline(buf),
        })
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        // an unterminated pty line is never complete
        if self.framing == LineFraming::Newline && !buf.is_empty() {
            let rest = buf.split();
            return Ok(Some(trim_line(&rest)));
        }
        buf.clear();
        Ok(None)
    }
}

const READ_CHUNK: usize = 8 * 1024;

/// Line reader over a spawned stream that can also scan the raw bytes for a marker.
#[derive(Debug)]
pub struct LineStream {
    process: StreamProcess,
    buffer: BytesMut,
    codec: LineCodec,
    eof: bool,
}

impl LineStream {
    pub fn new(process: StreamProcess, framing: LineFraming) -> Self {
        Self {
            process,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            codec: LineCodec::new(framing),
            eof: false,
        }
    }

    pub fn args(&self) -> &[String] {
        self.process.args()
    }

    /// Reads more input, returns `false` at end of stream.
    async fn fill(&mut self) -> std::io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.buffer.reserve(READ_CHUNK);
        let n = self.process.stdout().read_buf(&mut self.buffer).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Next complete line, `None` once the stream ended.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(line));
            }
            if !self.fill().await? {
                return self.codec.decode_eof(&mut self.buffer);
            }
        }
    }

    /// Consumes the stream up to and including the first occurrence of `marker`.
    ///
    /// Returns `false` if the stream ended first. The rest of the marker's line is discarded.
    pub async fn scan_for(&mut self, marker: &str) -> std::io::Result<bool> {
        let marker = marker.as_bytes();
        loop {
            if let Some(pos) = self
                .buffer
                .windows(marker.len())
                .position(|window| window == marker)
            {
                self.buffer.advance(pos + marker.len());
                self.codec.skip_partial_line();
                return Ok(true);
            }
            // keep a tail that may hold the start of the marker
            let keep = marker.len().saturating_sub(1).min(self.buffer.len());
            let drop = self.buffer.len() - keep;
            self.buffer.advance(drop);
            if !self.fill().await? {
                return Ok(false);
            }
        }
    }

    pub async fn kill(&mut self) {
        self.process.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    fn stream(data: &'static [u8], framing: LineFraming) -> LineStream {
        LineStream::new(StreamProcess::from_reader(vec![], data), framing)
    }

    #[test]
    fn pty_skips_partial_first_line() {
        let mut codec = LineCodec::new(LineFraming::Pty);
        let lines = decode_all(&mut codec, b"tial\r\nfirst\r\nsecond\r\nthi");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn pty_line_split_across_reads() {
        let mut codec = LineCodec::new(LineFraming::Pty);
        let mut buf = BytesMut::from(&b"x\r\nhel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn newline_trims_carriage_returns() {
        let mut codec = LineCodec::new(LineFraming::Newline);
        let lines = decode_all(&mut codec, b"one\r\ntwo\n\nthree");
        assert_eq!(lines, vec!["one", "two", ""]);
    }

    #[test]
    fn newline_eof_returns_the_unterminated_tail() {
        let mut codec = LineCodec::new(LineFraming::Newline);
        let mut buf = BytesMut::from(&b"tail"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("tail".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        let mut codec = LineCodec::new(LineFraming::Pty);
        let mut buf = BytesMut::from(&b"\nincomplete"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn scan_skips_history_and_the_marker_line() -> anyhow::Result<()> {
        let mut lines = stream(
            b"old 1\nold 2\nI log : sync_marker_1 tail\nnew 1\nnew 2\n",
            LineFraming::Newline,
        );
        assert!(lines.scan_for("sync_marker_1").await?);
        assert_eq!(lines.next_line().await?, Some("new 1".to_string()));
        assert_eq!(lines.next_line().await?, Some("new 2".to_string()));
        assert_eq!(lines.next_line().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn scan_with_pty_framing() -> anyhow::Result<()> {
        let mut lines = stream(b"old\r\nmarker_x\r\nnew\r\n", LineFraming::Pty);
        assert!(lines.scan_for("marker_x").await?);
        assert_eq!(lines.next_line().await?, Some("new".to_string()));
        assert_eq!(lines.next_line().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn scan_reports_end_of_stream() -> anyhow::Result<()> {
        let mut lines = stream(b"nothing to see\n", LineFraming::Newline);
        assert!(!lines.scan_for("marker").await?);
        Ok(())
    }

    #[tokio::test]
    async fn marker_split_across_reads() -> anyhow::Result<()> {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = LineStream::new(
            StreamProcess::from_reader(vec![], rx),
            LineFraming::Newline,
        );
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"noise mark").await?;
            tokio::task::yield_now().await;
            tx.write_all(b"er_42\nafter\n").await?;
            Ok::<_, std::io::Error>(())
        });
        assert!(lines.scan_for("marker_42").await?);
        assert_eq!(lines.next_line().await?, Some("after".to_string()));
        writer.await??;
        Ok(())
    }
}
