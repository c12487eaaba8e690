use super::chunk::{ResponseHead, StreamChunk};
use super::encode::ChunkEncoder;
use std::io::{self, Write};
use std::time::Instant;

/// Outbound side of one stream. Exactly one assembler owns a sink.
pub trait ChunkSink {
    /// Called once, right before the shell. Status and headers are final.
    fn start(&mut self, head: &ResponseHead) -> io::Result<()>;
    fn send(&mut self, chunk: &StreamChunk) -> io::Result<()>;
    /// Called once after the last chunk.
    fn finish(&mut self) -> io::Result<()>;
}

/// Keeps every chunk in memory with its arrival time.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub head: Option<ResponseHead>,
    pub chunks: Vec<StreamChunk>,
    pub arrivals: Vec<Instant>,
    pub finished: bool,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shell chunk, if one was sent.
    #[must_use]
    pub fn shell(&self) -> Option<&StreamChunk> {
        self.chunks.first().filter(|c| c.is_shell())
    }

    /// Everything after the shell.
    #[must_use]
    pub fn settled(&self) -> &[StreamChunk] {
        match self.chunks.first() {
            Some(c) if c.is_shell() => &self.chunks[1..],
            _ => &self.chunks,
        }
    }
}

impl ChunkSink for CollectSink {
    fn start(&mut self, head: &ResponseHead) -> io::Result<()> {
        self.head = Some(head.clone());
        Ok(())
    }

    fn send(&mut self, chunk: &StreamChunk) -> io::Result<()> {
        self.chunks.push(chunk.clone());
        self.arrivals.push(Instant::now());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Encodes chunks with `E` and writes them to `W`, flushing after each one.
/// The head is not written; transports that need it wrap this sink.
pub struct EncodedSink<E, W> {
    encoder: E,
    writer: W,
    buf: Vec<u8>,
}

impl<E: ChunkEncoder, W: Write> EncodedSink<E, W> {
    pub fn new(encoder: E, writer: W) -> Self {
        Self {
            encoder,
            writer,
            buf: Vec::with_capacity(1024),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }
}

impl<E: ChunkEncoder, W: Write> ChunkSink for EncodedSink<E, W> {
    fn start(&mut self, _head: &ResponseHead) -> io::Result<()> {
        Ok(())
    }

    fn send(&mut self, chunk: &StreamChunk) -> io::Result<()> {
        self.buf.clear();
        self.encoder.encode(chunk, &mut self.buf)?;
        if self.buf.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buf)?;
        self.writer.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
