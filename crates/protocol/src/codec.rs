//! Trace file serialization using postcard
//!
//! A trace file is a short header followed by framed records:
//!
//! ```text
//! Header: [magic "UBDT"][major u8][minor u8][patch u8]
//! Frame:  [Length: u32 (big-endian)][CRC32: u32 (big-endian)][postcard payload]
//! ```
//!
//! Maximum frame size is 1 MiB; a single control transfer never comes close.

use crate::error::{ProtocolError, Result};
use crate::integrity::{IntegrityResult, check_frame, compute_checksum};
use crate::trace::TraceRecord;
use crate::version::{CURRENT_VERSION, TraceVersion};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

/// Maximum allowed frame payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix plus checksum
pub const FRAME_HEADER_SIZE: usize = 8;

/// Magic bytes at the start of every trace file
pub const TRACE_MAGIC: [u8; 4] = *b"UBDT";

/// Encode a record to bytes using postcard
pub fn encode_record(record: &TraceRecord) -> Result<Vec<u8>> {
    postcard::to_allocvec(record).map_err(ProtocolError::from)
}

/// Decode a record from bytes using postcard
pub fn decode_record(bytes: &[u8]) -> Result<TraceRecord> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}

/// Validate trace version compatibility
///
/// Major versions must match; a reader replays any older minor version.
pub fn validate_version(trace_version: &TraceVersion) -> Result<()> {
    if !CURRENT_VERSION.is_compatible_with(trace_version) {
        return Err(ProtocolError::IncompatibleVersion {
            major: trace_version.major,
            minor: trace_version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }
    Ok(())
}

/// Encode a record with length prefix and checksum
///
/// # Example
/// ```
/// use protocol::{TraceEntry, TraceRecord, TransportOp, encode_framed};
///
/// let record = TraceRecord {
///     sequence: 0,
///     entry: TraceEntry::Op(TransportOp::SetAddress { address: 5 }),
/// };
/// let framed = encode_framed(&record).unwrap();
/// assert!(framed.len() > 8);
/// ```
pub fn encode_framed(record: &TraceRecord) -> Result<Vec<u8>> {
    let payload = encode_record(record)?;
    let payload_len = payload.len();

    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload_len);
    frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
    frame.extend_from_slice(&compute_checksum(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Decode one framed record
pub fn decode_framed(frame: &[u8]) -> Result<TraceRecord> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: FRAME_HEADER_SIZE,
            actual: frame.len(),
        });
    }

    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let checksum = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if frame.len() < FRAME_HEADER_SIZE + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: FRAME_HEADER_SIZE + length,
            actual: frame.len(),
        });
    }

    let payload = &frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length];
    verify_payload(payload, checksum)?;
    decode_record(payload)
}

/// Write the trace file header
pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(&TRACE_MAGIC)?;
    writer.write_u8(CURRENT_VERSION.major)?;
    writer.write_u8(CURRENT_VERSION.minor)?;
    writer.write_u8(CURRENT_VERSION.patch)?;
    Ok(())
}

/// Read and validate the trace file header
pub fn read_header<R: Read>(reader: &mut R) -> Result<TraceVersion> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != TRACE_MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let version = TraceVersion {
        major: reader.read_u8()?,
        minor: reader.read_u8()?,
        patch: reader.read_u8()?,
    };
    validate_version(&version)?;
    Ok(version)
}

/// Write a framed record to a writer
pub fn write_framed<W: Write>(writer: &mut W, record: &TraceRecord) -> Result<()> {
    let framed = encode_framed(record)?;
    writer.write_all(&framed)?;
    Ok(())
}

/// Read the next framed record, or `None` at a clean end of stream
///
/// # Example
/// ```
/// use protocol::{TraceEntry, TraceRecord, TransportOp, read_framed, write_framed};
/// use std::io::Cursor;
///
/// let record = TraceRecord {
///     sequence: 7,
///     entry: TraceEntry::Op(TransportOp::SetAddress { address: 5 }),
/// };
/// let mut buffer = Vec::new();
/// write_framed(&mut buffer, &record).unwrap();
///
/// let mut cursor = Cursor::new(buffer);
/// assert_eq!(read_framed(&mut cursor).unwrap(), Some(record));
/// assert_eq!(read_framed(&mut cursor).unwrap(), None);
/// ```
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Option<TraceRecord>> {
    let Some(header) = read_frame_header(reader)? else {
        return Ok(None);
    };
    let length = BigEndian::read_u32(&header[..4]) as usize;
    let checksum = BigEndian::read_u32(&header[4..]);

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    verify_payload(&payload, checksum)?;

    decode_record(&payload).map(Some)
}

/// Read every record after the header
pub fn read_all<R: Read>(reader: &mut R) -> Result<Vec<TraceRecord>> {
    read_header(reader)?;
    let mut records = Vec::new();
    while let Some(record) = read_framed(reader)? {
        records.push(record);
    }
    Ok(records)
}

/// Write the header followed by every record
pub fn write_all<W: Write>(writer: &mut W, records: &[TraceRecord]) -> Result<()> {
    write_header(writer)?;
    for record in records {
        write_framed(writer, record)?;
    }
    Ok(())
}

/// Fill a frame header, or `None` if the stream ended before its first byte
fn read_frame_header<R: Read>(reader: &mut R) -> Result<Option<[u8; FRAME_HEADER_SIZE]>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        FRAME_HEADER_SIZE => Ok(Some(header)),
        actual => Err(ProtocolError::IncompleteFrame {
            expected: FRAME_HEADER_SIZE,
            actual,
        }),
    }
}

fn verify_payload(payload: &[u8], checksum: u32) -> Result<()> {
    match check_frame(payload, checksum) {
        IntegrityResult::ChecksumMismatch { expected, computed } => {
            Err(ProtocolError::ChecksumMismatch { expected, computed })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceEntry;
    use crate::types::{DeviceSpeed, EndpointAddress, TransportEvent, TransportOp};
    use std::io::Cursor;

    fn sample_records() -> Vec<TraceRecord> {
        vec![
            TraceRecord {
                sequence: 0,
                entry: TraceEntry::Event(TransportEvent::Reset {
                    speed: DeviceSpeed::High,
                }),
            },
            TraceRecord {
                sequence: 1,
                entry: TraceEntry::Event(TransportEvent::Setup {
                    packet: [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00],
                }),
            },
            TraceRecord {
                sequence: 2,
                entry: TraceEntry::Op(TransportOp::Transmit {
                    endpoint: EndpointAddress::EP0_IN,
                    data: vec![0x12, 0x01, 0x00, 0x02],
                }),
            },
        ]
    }

    #[test]
    fn test_framed_encode_decode() {
        let record = sample_records().remove(2);
        let framed = encode_framed(&record).unwrap();
        assert_eq!(
            u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize,
            framed.len() - FRAME_HEADER_SIZE
        );
        assert_eq!(decode_framed(&framed).unwrap(), record);
    }

    #[test]
    fn test_framed_incomplete_frame() {
        let incomplete = vec![0, 0, 0, 10, 0, 0, 0, 0];
        let result = decode_framed(&incomplete);
        let Err(ProtocolError::IncompleteFrame { expected, actual }) = result else {
            panic!("Expected IncompleteFrame error, got {:?}", result);
        };
        assert_eq!(expected, 18);
        assert_eq!(actual, 8);
    }

    #[test]
    fn test_framed_too_large() {
        let too_large = vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        assert!(matches!(
            decode_framed(&too_large),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let record = sample_records().remove(1);
        let mut framed = encode_framed(&record).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        assert!(matches!(
            decode_framed(&framed),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_frame() {
        assert!(matches!(
            decode_framed(&[]),
            Err(ProtocolError::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_trace_file_roundtrip() {
        let records = sample_records();
        let mut buffer = Vec::new();
        write_all(&mut buffer, &records).unwrap();
        assert_eq!(&buffer[..4], b"UBDT");

        let decoded = read_all(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_bad_magic() {
        let mut cursor = Cursor::new(b"NOPE\x01\x00\x00".to_vec());
        assert!(matches!(
            read_header(&mut cursor),
            Err(ProtocolError::BadMagic)
        ));
    }

    #[test]
    fn test_header_newer_major_rejected() {
        let mut cursor = Cursor::new(b"UBDT\x02\x00\x00".to_vec());
        assert!(matches!(
            read_header(&mut cursor),
            Err(ProtocolError::IncompatibleVersion { major: 2, .. })
        ));
    }

    #[test]
    fn test_validate_version_newer_minor() {
        let v1_5 = TraceVersion {
            major: 1,
            minor: 5,
            patch: 0,
        };
        // A 1.0 reader cannot be sure it understands 1.5 records
        assert!(validate_version(&v1_5).is_err());
        assert!(validate_version(&CURRENT_VERSION).is_ok());
    }

    #[test]
    fn test_truncated_frame_header_is_error() {
        let mut buffer = Vec::new();
        write_all(&mut buffer, &sample_records()).unwrap();
        let complete = buffer.len();

        // Cut the next frame's header short after a few bytes
        write_framed(&mut buffer, &sample_records().remove(0)).unwrap();
        buffer.truncate(complete + 3);

        let result = read_all(&mut Cursor::new(buffer));
        let Err(ProtocolError::IncompleteFrame { expected, actual }) = result else {
            panic!("Expected IncompleteFrame error, got {:?}", result);
        };
        assert_eq!(expected, FRAME_HEADER_SIZE);
        assert_eq!(actual, 3);
    }

    #[test]
    fn test_truncated_stream_is_error() {
        let record = sample_records().remove(0);
        let mut framed = encode_framed(&record).unwrap();
        framed.truncate(framed.len() - 1);
        assert!(read_framed(&mut Cursor::new(framed)).is_err());
    }
}
