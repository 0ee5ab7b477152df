//! Delimiter-based frame reader over a streaming byte source.
//!
//! Provider frames may contain single newlines, so streamed responses are
//! split on a configurable delimiter (two newlines by default) instead of
//! line by line. The reader works over any `Stream` of byte chunks, which
//! is what `reqwest::Response::bytes_stream` yields.

use futures::{Stream, StreamExt};

/// Outcome of one split attempt over buffered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// A frame occupies `data[..end]`; drop `consumed` bytes afterwards.
    Frame { end: usize, consumed: usize },
    /// No delimiter yet; read more input.
    NeedMore,
    /// Input exhausted and nothing buffered.
    End,
}

/// Decide what to do with the buffered bytes.
///
/// A complete frame is returned as soon as the delimiter is found. At end
/// of input a non-empty remainder is returned as the final frame.
pub fn split_frame(data: &[u8], at_eof: bool, delimiter: &[u8]) -> Split {
    if at_eof && data.is_empty() {
        return Split::End;
    }
    if let Some(pos) = find(data, delimiter) {
        return Split::Frame {
            end: pos,
            consumed: pos + delimiter.len(),
        };
    }
    if at_eof {
        return Split::Frame {
            end: data.len(),
            consumed: data.len(),
        };
    }
    Split::NeedMore
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Pulls delimiter-bounded frames out of a chunked byte stream.
pub struct FrameReader<S> {
    stream: S,
    buffer: Vec<u8>,
    delimiter: Vec<u8>,
    eof: bool,
}

impl<S, B, E> FrameReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(stream: S, delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            delimiter: delimiter.into(),
            eof: false,
        }
    }

    /// The next frame, `None` at end of input, or the source's read error.
    ///
    /// Frames are decoded as UTF-8 lossily; only complete frames are
    /// decoded, so multi-byte characters split across chunks survive.
    pub async fn next_frame(&mut self) -> Result<Option<String>, E> {
        loop {
            match split_frame(&self.buffer, self.eof, &self.delimiter) {
                Split::Frame { end, consumed } => {
                    let frame = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                    self.buffer.drain(..consumed);
                    return Ok(Some(frame));
                }
                Split::End => return Ok(None),
                Split::NeedMore => match self.stream.next().await {
                    Some(Ok(chunk)) => self.buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => return Err(e),
                    None => self.eof = true,
                },
            }
        }
    }

}
