use bytes::Buf;
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

/// Bytes of the CRC32 checksum leading every encoded record.
pub(crate) const CRC_SIZE: usize = 4;
/// Bytes of the record type tag following the CRC.
pub(crate) const TYPE_SIZE: usize = 1;

/// What a log record means to the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogRecordType {
    /// A live key/value pair.
    Normal = 0,
    /// A tombstone: the key is gone until written again.
    Deleted = 1,
    /// Closes a write batch; carries no user key.
    TxnFinished = 2,
}

impl LogRecordType {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => LogRecordType::Normal,
            1 => LogRecordType::Deleted,
            2 => LogRecordType::TxnFinished,
            _ => panic!("unknown log record type {v}"),
        }
    }
}

/// The atomic unit appended to a data file. Immutable once written; a key
/// is updated by appending a newer record and deleted by appending a
/// tombstone, never by touching old bytes.
///
/// Encoded layout:
///
/// ```text
/// +-------+------+----------+------------+-----+-------+
/// |  crc  | type | key_size | value_size | key | value |
/// +-------+------+----------+------------+-----+-------+
///  4 (LE)   1      varint     varint
/// ```
///
/// The checksum is CRC32/IEEE over every byte after the crc field. Sizes
/// are zigzag varints, so the header is at most [`max_log_record_header_size`]
/// bytes. A header of all zero bytes marks the logical end of a file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogRecord {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) record_type: LogRecordType,
}

/// Decoded header fields. The type tag stays raw here: it is only mapped to
/// [`LogRecordType`] after the checksum over the full record has passed.
pub(crate) struct LogRecordHeader {
    pub(crate) crc: u32,
    pub(crate) record_type: u8,
    pub(crate) key_size: usize,
    pub(crate) value_size: usize,
}

/// Where a record lives on disk; the value type of every index entry.
/// `size` is the full encoded length, fed to the reclaim accountant when
/// the record dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
    pub(crate) file_id: u32,
    pub(crate) offset: u64,
    pub(crate) size: u32,
}

/// A batch record held back during replay until its sequence sees a
/// [`LogRecordType::TxnFinished`] marker.
pub(crate) struct TransactionRecord {
    pub(crate) record: LogRecord,
    pub(crate) pos: LogRecordPos,
}

impl LogRecord {
    /// Serializes the record, checksum first.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        // Leave room for the checksum, then lay down the rest.
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.record_type as u8);
        encode_varint(zigzag(self.key.len() as i64), &mut buf);
        encode_varint(zigzag(self.value.len() as i64), &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub(crate) fn encoded_len(&self) -> usize {
        CRC_SIZE
            + TYPE_SIZE
            + encoded_len_varint(zigzag(self.key.len() as i64))
            + encoded_len_varint(zigzag(self.value.len() as i64))
            + self.key.len()
            + self.value.len()
    }
}

/// Largest possible encoded header: checksum, type, and two maximal
/// length varints (zigzag widens a u32 length to 33 bits, still five
/// varint bytes each).
pub(crate) fn max_log_record_header_size() -> usize {
    CRC_SIZE + TYPE_SIZE + 2 * encoded_len_varint(zigzag(u32::MAX as i64))
}

/// Decodes a header from the front of `buf`, returning it with its encoded
/// length. `None` means the bytes cannot be a header, which happens on a
/// truncated tail read and terminates the scan of that file.
pub(crate) fn decode_log_record_header(mut buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    let total = buf.len();
    if total < CRC_SIZE + TYPE_SIZE {
        return None;
    }
    let crc = buf.get_u32_le();
    let record_type = buf.get_u8();
    let key_size = unzigzag(decode_varint(&mut buf).ok()?);
    let value_size = unzigzag(decode_varint(&mut buf).ok()?);
    if key_size < 0 || value_size < 0 {
        return None;
    }
    let header = LogRecordHeader {
        crc,
        record_type,
        key_size: key_size as usize,
        value_size: value_size as usize,
    };
    Some((header, total - buf.remaining()))
}

impl LogRecordPos {
    /// Serializes a position as three varints; the payload of hint records.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(self.file_id as u64, &mut buf);
        encode_varint(self.offset, &mut buf);
        encode_varint(self.size as u64, &mut buf);
        buf
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Self {
        let file_id = decode_varint(&mut buf).expect("corrupt log record position");
        let offset = decode_varint(&mut buf).expect("corrupt log record position");
        let size = decode_varint(&mut buf).expect("corrupt log record position");
        Self { file_id: file_id as u32, offset, size: size as u32 }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_header() {
        let record = LogRecord {
            key: b"name".to_vec(),
            value: b"prince hamlet".to_vec(),
            record_type: LogRecordType::Normal,
        };
        let buf = record.encode();
        assert_eq!(buf.len(), record.encoded_len());

        let (header, header_size) = decode_log_record_header(&buf).expect("header must decode");
        assert_eq!(header.record_type, LogRecordType::Normal as u8);
        assert_eq!(header.key_size, 4);
        assert_eq!(header.value_size, 13);
        assert_eq!(header.crc, crc32fast::hash(&buf[CRC_SIZE..]));
        assert_eq!(header_size + header.key_size + header.value_size, buf.len());
    }

    #[test]
    fn empty_value_and_tombstone_encode() {
        let empty = LogRecord {
            key: b"name".to_vec(),
            value: Vec::new(),
            record_type: LogRecordType::Normal,
        };
        let (header, _) = decode_log_record_header(&empty.encode()).unwrap();
        assert_eq!(header.value_size, 0);

        let tombstone = LogRecord {
            key: b"name".to_vec(),
            value: Vec::new(),
            record_type: LogRecordType::Deleted,
        };
        let (header, _) = decode_log_record_header(&tombstone.encode()).unwrap();
        assert_eq!(header.record_type, LogRecordType::Deleted as u8);
    }

    #[test]
    fn all_zero_header_is_the_eof_sentinel() {
        let buf = vec![0u8; max_log_record_header_size()];
        let (header, _) = decode_log_record_header(&buf).unwrap();
        assert_eq!(header.crc, 0);
        assert_eq!(header.key_size, 0);
        assert_eq!(header.value_size, 0);
    }

    #[test]
    fn truncated_header_does_not_decode() {
        let record = LogRecord {
            key: b"name".to_vec(),
            value: b"value".to_vec(),
            record_type: LogRecordType::Normal,
        };
        let buf = record.encode();
        assert!(decode_log_record_header(&buf[..3]).is_none());
    }

    #[test]
    fn position_roundtrip() {
        let pos = LogRecordPos { file_id: 7, offset: 1 << 33, size: 512 };
        assert_eq!(LogRecordPos::decode(&pos.encode()), pos);
    }

    #[test]
    fn header_upper_bound_is_fifteen_bytes() {
        assert_eq!(max_log_record_header_size(), 15);
    }
}
