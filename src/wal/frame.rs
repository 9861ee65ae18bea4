//! Entry framing (magic + length + crc32c).

use std::io::{Read, Write};

use crc32c::crc32c;

use super::entry::WalEntry;
use super::{WalError, WalResult};

const FRAME_MAGIC: u32 = 0x5753_4631; // "WSF1"
const FRAME_HEADER_LEN: usize = 12;

pub struct FrameReader<R> {
    reader: R,
    max_entry_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_entry_bytes: usize) -> Self {
        Self {
            reader,
            max_entry_bytes,
        }
    }

    /// Read the next framed entry. Returns `None` at a clean end of file;
    /// a frame cut off mid-header or mid-body is an error, the splitter
    /// quarantines torn files rather than repairing them.
    pub fn read_next(&mut self) -> WalResult<Option<WalEntry>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = self
                .reader
                .read(&mut header[read..])
                .map_err(|source| WalError::Io { path: None, source })?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(WalError::FrameTruncated {
                    reason: format!("frame header cut off after {read} bytes"),
                });
            }
            read += n;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FRAME_MAGIC {
            return Err(WalError::FrameMagicMismatch { got: magic });
        }

        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length == 0 {
            return Err(WalError::FrameTruncated {
                reason: "frame length cannot be zero".to_string(),
            });
        }
        if length > self.max_entry_bytes {
            return Err(WalError::EntryTooLarge {
                max_bytes: self.max_entry_bytes,
                got_bytes: length,
            });
        }

        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let mut body = vec![0u8; length];
        let mut read_body = 0usize;
        while read_body < length {
            let n = self
                .reader
                .read(&mut body[read_body..])
                .map_err(|source| WalError::Io { path: None, source })?;
            if n == 0 {
                return Err(WalError::FrameTruncated {
                    reason: format!("frame body cut off after {read_body} of {length} bytes"),
                });
            }
            read_body += n;
        }

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            return Err(WalError::FrameCrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        let entry = WalEntry::decode_body(&body)?;
        Ok(Some(entry))
    }
}

pub struct FrameWriter<W> {
    writer: W,
    max_entry_bytes: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W, max_entry_bytes: usize) -> Self {
        Self {
            writer,
            max_entry_bytes,
        }
    }

    pub fn write_entry(&mut self, entry: &WalEntry) -> WalResult<usize> {
        let frame = encode_frame(entry, self.max_entry_bytes)?;
        self.writer
            .write_all(&frame)
            .map_err(|source| WalError::Io { path: None, source })?;
        Ok(frame.len())
    }
}

pub fn encode_frame(entry: &WalEntry, max_entry_bytes: usize) -> WalResult<Vec<u8>> {
    let body = entry.encode_body()?;
    if body.len() > max_entry_bytes {
        return Err(WalError::EntryTooLarge {
            max_bytes: max_entry_bytes,
            got_bytes: body.len(),
        });
    }

    let length = u32::try_from(body.len()).map_err(|_| WalError::FrameTruncated {
        reason: "frame length exceeds u32".to_string(),
    })?;
    let crc = crc32c(&body);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}
