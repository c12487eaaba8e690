use crate::response::{status_reason, HeaderVec, Response};
use crate::stream::{ChunkEncoder, ChunkSink, EncodedSink, ResponseHead, StreamChunk};
use std::io::{self, Write};

/// Headers the transport owns; values set by handlers are dropped.
const TRANSPORT_HEADERS: [&str; 4] = [
    "content-length",
    "transfer-encoding",
    "connection",
    "content-type",
];

fn write_head<W: Write>(
    w: &mut W,
    status: u16,
    headers: &HeaderVec,
    content_type: Option<&str>,
    framing: &str,
) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {status} {}\r\n", status_reason(status));
    if let Some(ct) = content_type {
        head.push_str("Content-Type: ");
        head.push_str(ct);
        head.push_str("\r\n");
    }
    for (name, value) in headers {
        if TRANSPORT_HEADERS
            .iter()
            .any(|t| name.eq_ignore_ascii_case(t))
        {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(framing);
    head.push_str("Connection: close\r\n\r\n");
    w.write_all(head.as_bytes())
}

/// Write a complete response with a `Content-Length` body.
pub fn write_response<W: Write>(w: &mut W, response: &Response) -> io::Result<()> {
    write_head(
        w,
        response.status,
        &response.headers,
        response.content_type(),
        &format!("Content-Length: {}\r\n", response.body.len()),
    )?;
    w.write_all(&response.body)?;
    w.flush()
}

/// Status line and headers of `response` without the body, for `HEAD`.
pub fn write_response_head<W: Write>(w: &mut W, response: &Response) -> io::Result<()> {
    write_head(
        w,
        response.status,
        &response.headers,
        response.content_type(),
        &format!("Content-Length: {}\r\n", response.body.len()),
    )?;
    w.flush()
}

/// Head of a chunked stream. `HEAD` requests get this and nothing else.
pub fn write_stream_head<W: Write>(
    w: &mut W,
    head: &ResponseHead,
    content_type: &str,
) -> io::Result<()> {
    write_head(
        w,
        head.status,
        &head.headers,
        Some(content_type),
        "Transfer-Encoding: chunked\r\n",
    )?;
    w.flush()
}

/// `Transfer-Encoding: chunked` body. Every `write` call becomes one chunk.
pub struct ChunkedBody<W: Write> {
    inner: W,
}

impl<W: Write> ChunkedBody<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Terminating zero-length chunk.
    pub fn finish(&mut self) -> io::Result<()> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChunkedBody<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        write!(self.inner, "{:x}\r\n", buf.len())?;
        self.inner.write_all(buf)?;
        self.inner.write_all(b"\r\n")?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stream sink that writes an HTTP/1.1 chunked response.
pub struct HttpChunkSink<E: ChunkEncoder, W: Write> {
    sink: EncodedSink<E, ChunkedBody<W>>,
}

impl<E: ChunkEncoder, W: Write> HttpChunkSink<E, W> {
    pub fn new(encoder: E, writer: W) -> Self {
        Self {
            sink: EncodedSink::new(encoder, ChunkedBody::new(writer)),
        }
    }
}

impl<E: ChunkEncoder, W: Write> ChunkSink for HttpChunkSink<E, W> {
    fn start(&mut self, head: &ResponseHead) -> io::Result<()> {
        let content_type = self.sink.encoder().content_type();
        write_stream_head(self.sink.get_mut().get_mut(), head, content_type)
    }

    fn send(&mut self, chunk: &StreamChunk) -> io::Result<()> {
        self.sink.send(chunk)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.sink.finish()?;
        self.sink.get_mut().finish()
    }
}
