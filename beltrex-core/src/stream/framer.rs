//! MJPEG part scanner. Splits a raw chunk stream on the textual boundary
//! marker and yields the JPEG payload of each complete part.

use bytes::{Bytes, BytesMut};
use tracing::warn;

/// Absolute cap on the rolling buffer. Exceeding it discards the older half
/// so a fast producer cannot pin unbounded memory behind a slow reader.
pub const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

const BOUNDARY: &[u8] = b"--frame";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug)]
pub struct MjpegFramer {
    buffer: BytesMut,
    cap: usize,
}

impl Default for MjpegFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegFramer {
    pub fn new() -> Self {
        Self::with_cap(MAX_BUFFER_SIZE)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            cap,
        }
    }

    /// Bytes currently buffered between parts.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk, returning every JPEG payload completed by it.
    ///
    /// A part runs from one boundary marker to the next; the payload sits
    /// between the blank line ending the part headers and the CRLF that
    /// precedes the next boundary. A part with no trailing CRLF is accepted
    /// as-is.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > self.cap {
            let keep = self.cap / 2;
            let discard = self.buffer.len() - keep;
            warn!(
                "mjpeg buffer exceeded {} bytes, discarding {} older bytes",
                self.cap, discard
            );
            let _ = self.buffer.split_to(discard);
        }

        let mut frames = Vec::new();
        loop {
            let Some(start) = find(&self.buffer, BOUNDARY) else {
                break;
            };
            let Some(next) = find(&self.buffer[start + 1..], BOUNDARY) else {
                break;
            };
            let end = start + 1 + next;

            let part = self.buffer.split_to(end).freeze();
            let part = &part[start..];
            if let Some(payload) = extract_payload(part) {
                frames.push(payload);
            }
        }
        frames
    }
}

/// Pull the JPEG bytes out of one complete multipart part.
fn extract_payload(part: &[u8]) -> Option<Bytes> {
    let header_end = find(part, HEADER_TERMINATOR)?;
    let body = &part[header_end + HEADER_TERMINATOR.len()..];
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);
    if body.is_empty() {
        return None;
    }
    Some(Bytes::copy_from_slice(body))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x13, 0x37, 0xFF, 0xD9];

    fn part(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn extracts_frames_between_boundaries() {
        let mut framer = MjpegFramer::new();
        let mut stream = part(JPEG);
        stream.extend_from_slice(&part(JPEG));
        // Final part stays pending until the next boundary shows up.
        let frames = framer.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], JPEG);

        let frames = framer.push(b"--frame\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], JPEG);
    }

    #[test]
    fn reassembles_across_chunk_joins() {
        let mut framer = MjpegFramer::new();
        let mut stream = part(JPEG);
        stream.extend_from_slice(&part(JPEG));
        stream.extend_from_slice(&part(JPEG));

        let mut frames = Vec::new();
        for chunk in stream.chunks(5) {
            frames.extend(framer.push(chunk));
        }
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| &f[..] == JPEG));
    }

    #[test]
    fn missing_trailing_crlf_is_accepted() {
        let mut framer = MjpegFramer::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        stream.extend_from_slice(JPEG);
        stream.extend_from_slice(b"--frame\r\n");
        let frames = framer.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], JPEG);
    }

    #[test]
    fn payload_containing_crlf_survives() {
        let payload = b"\xFF\xD8\r\nstill-jpeg\r\n\xFF\xD9";
        let mut framer = MjpegFramer::new();
        let mut stream = part(payload);
        stream.extend_from_slice(b"--frame\r\n");
        let frames = framer.push(&stream);
        assert_eq!(&frames[0][..], payload.as_slice());
    }

    #[test]
    fn garbage_before_first_boundary_is_skipped() {
        let mut framer = MjpegFramer::new();
        let mut stream = b"HTTP noise".to_vec();
        stream.extend_from_slice(&part(JPEG));
        stream.extend_from_slice(b"--frame\r\n");
        let frames = framer.push(&stream);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn buffer_cap_discards_older_half() {
        let mut framer = MjpegFramer::with_cap(1024);
        // No boundary ever arrives; the buffer must still stay bounded.
        for _ in 0..100 {
            let frames = framer.push(&[0xAB; 100]);
            assert!(frames.is_empty());
            assert!(framer.buffered() <= 1024);
        }
        assert!(framer.buffered() >= 512 - 100);
    }

    #[test]
    fn frames_after_truncation_still_parse() {
        let mut framer = MjpegFramer::with_cap(1024);
        framer.push(&vec![0xAB; 2000]);
        let mut stream = part(JPEG);
        stream.extend_from_slice(b"--frame\r\n");
        let frames = framer.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], JPEG);
    }
}
