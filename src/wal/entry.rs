//! Log entry and key layout.

use std::fmt;

use bytes::Bytes;

use super::{WalError, WalResult};

/// Upper bound on an encoded entry body. Keeps a corrupted length field from
/// turning into an unbounded allocation.
pub const MAX_ENTRY_BYTES: usize = 32 * 1024 * 1024;

const ENTRY_VERSION: u16 = 1;
const ENTRY_HEADER_LEN: usize = 2 + 2 + 2 + 2 + 8;

/// Raw region identifier. Ordered lexicographically; the demultiplex key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionKey(Bytes);

impl RegionKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.as_ref() {
            if (0x20..0x7f).contains(&b) && b != b'\\' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Key carried by every entry: originating table, region and sequence id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryKey {
    pub table: Bytes,
    pub region: RegionKey,
    pub sequence_id: u64,
}

/// A single commit-log entry. The payload is opaque to the splitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalEntry {
    pub key: EntryKey,
    pub payload: Bytes,
}

impl WalEntry {
    pub fn new(
        table: impl Into<Bytes>,
        region: impl Into<Bytes>,
        sequence_id: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: EntryKey {
                table: table.into(),
                region: RegionKey::new(region),
                sequence_id,
            },
            payload: payload.into(),
        }
    }

    pub fn encode_body(&self) -> WalResult<Vec<u8>> {
        let table = self.key.table.as_ref();
        let region = self.key.region.as_bytes();
        let table_len = u16::try_from(table.len()).map_err(|_| WalError::EntryInvalid {
            reason: format!("table name too long ({} bytes)", table.len()),
        })?;
        let region_len = u16::try_from(region.len()).map_err(|_| WalError::EntryInvalid {
            reason: format!("region name too long ({} bytes)", region.len()),
        })?;
        if region.is_empty() {
            return Err(WalError::EntryInvalid {
                reason: "region name cannot be empty".to_string(),
            });
        }

        let mut buf =
            Vec::with_capacity(ENTRY_HEADER_LEN + table.len() + region.len() + self.payload.len());
        buf.extend_from_slice(&ENTRY_VERSION.to_le_bytes());
        buf.extend_from_slice(&table_len.to_le_bytes());
        buf.extend_from_slice(&region_len.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.key.sequence_id.to_le_bytes());
        buf.extend_from_slice(table);
        buf.extend_from_slice(region);
        buf.extend_from_slice(self.payload.as_ref());
        Ok(buf)
    }

    pub fn decode_body(body: &[u8]) -> WalResult<Self> {
        if body.len() < ENTRY_HEADER_LEN {
            return Err(WalError::EntryInvalid {
                reason: "entry header truncated".to_string(),
            });
        }

        let mut offset = 0usize;
        let version = read_u16_le(body, &mut offset)?;
        if version != ENTRY_VERSION {
            return Err(WalError::EntryInvalid {
                reason: format!("unsupported entry version {version}"),
            });
        }
        let table_len = read_u16_le(body, &mut offset)? as usize;
        let region_len = read_u16_le(body, &mut offset)? as usize;
        let reserved = read_u16_le(body, &mut offset)?;
        if reserved != 0 {
            return Err(WalError::EntryInvalid {
                reason: format!("entry reserved field not zero ({reserved})"),
            });
        }
        if region_len == 0 {
            return Err(WalError::EntryInvalid {
                reason: "region name cannot be empty".to_string(),
            });
        }
        let sequence_id = read_u64_le(body, &mut offset)?;

        let table = Bytes::copy_from_slice(take(body, &mut offset, table_len)?);
        let region = Bytes::copy_from_slice(take(body, &mut offset, region_len)?);
        let payload = Bytes::copy_from_slice(&body[offset..]);

        Ok(Self {
            key: EntryKey {
                table,
                region: RegionKey(region),
                sequence_id,
            },
            payload,
        })
    }
}

fn read_u16_le(bytes: &[u8], offset: &mut usize) -> WalResult<u16> {
    let slice = take(bytes, offset, 2)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u64_le(bytes: &[u8], offset: &mut usize) -> WalResult<u64> {
    let slice = take(bytes, offset, 8)?;
    Ok(u64::from_le_bytes([
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ]))
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> WalResult<&'a [u8]> {
    let end = offset.checked_add(len).ok_or_else(|| WalError::EntryInvalid {
        reason: "entry length overflow".to_string(),
    })?;
    if end > bytes.len() {
        return Err(WalError::EntryInvalid {
            reason: "entry truncated".to_string(),
        });
    }
    let slice = &bytes[*offset..end];
    *offset = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_body_roundtrip() {
        let entry = WalEntry::new(
            &b"orders"[..],
            &b"orders,row-0100,1700000000"[..],
            42,
            &b"put row-0123 col=qty val=7"[..],
        );
        let body = entry.encode_body().unwrap();
        let decoded = WalEntry::decode_body(&body).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn entry_decode_rejects_unknown_version() {
        let entry = WalEntry::new(&b"t"[..], &b"r"[..], 1, &b"p"[..]);
        let mut body = entry.encode_body().unwrap();
        body[0] = 9;
        let err = WalEntry::decode_body(&body).unwrap_err();
        assert!(matches!(err, WalError::EntryInvalid { .. }));
    }

    #[test]
    fn entry_decode_rejects_truncated_body() {
        let entry = WalEntry::new(&b"orders"[..], &b"region-a"[..], 3, &b""[..]);
        let body = entry.encode_body().unwrap();
        let err = WalEntry::decode_body(&body[..body.len() - 4]).unwrap_err();
        assert!(matches!(err, WalError::EntryInvalid { .. }));
    }

    #[test]
    fn entry_encode_rejects_empty_region() {
        let entry = WalEntry::new(&b"t"[..], &b""[..], 1, &b"p"[..]);
        let err = entry.encode_body().unwrap_err();
        assert!(matches!(err, WalError::EntryInvalid { .. }));
    }

    #[test]
    fn region_keys_order_lexicographically() {
        let a = RegionKey::new(&b"aaa"[..]);
        let b = RegionKey::new(&b"aab"[..]);
        assert!(a < b);
    }

    #[test]
    fn region_key_display_escapes_non_printable() {
        let key = RegionKey::new(&b"r\x01x"[..]);
        assert_eq!(key.to_string(), "r\\x01x");
    }
}
