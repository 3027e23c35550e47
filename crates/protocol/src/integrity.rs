//! Trace frame integrity
//!
//! Every trace frame carries a CRC32 of its payload so a truncated or
//! hand-edited capture is rejected before replay instead of producing a
//! confusing divergence.

use crc32fast::Hasher;

/// Compute the CRC32 of a frame payload
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify the CRC32 of a frame payload
#[inline]
pub fn verify_checksum(data: &[u8], expected_checksum: u32) -> bool {
    compute_checksum(data) == expected_checksum
}

/// Integrity verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityResult {
    /// Frame passed integrity check
    Valid,
    /// Checksum mismatch - payload is corrupted
    ChecksumMismatch { expected: u32, computed: u32 },
    /// Record sequence numbers are not contiguous
    SequenceGap { expected: u64, received: u64 },
}

impl IntegrityResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, IntegrityResult::Valid)
    }
}

/// Check a payload against its checksum
pub fn check_frame(payload: &[u8], expected: u32) -> IntegrityResult {
    let computed = compute_checksum(payload);
    if computed == expected {
        IntegrityResult::Valid
    } else {
        IntegrityResult::ChecksumMismatch { expected, computed }
    }
}

/// Check that `received` directly follows `previous`
pub fn check_sequence(previous: Option<u64>, received: u64) -> IntegrityResult {
    let expected = previous.map_or(0, |p| p + 1);
    if received == expected {
        IntegrityResult::Valid
    } else {
        IntegrityResult::SequenceGap { expected, received }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_detects_corruption() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let checksum = compute_checksum(&data);

        assert!(verify_checksum(&data, checksum));

        let mut corrupted_data = data.clone();
        corrupted_data[2] = 0xFF;
        assert!(!verify_checksum(&corrupted_data, checksum));
        assert!(matches!(
            check_frame(&corrupted_data, checksum),
            IntegrityResult::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn test_checksum_empty_data() {
        let checksum = compute_checksum(&[]);
        assert!(check_frame(&[], checksum).is_valid());
    }

    #[test]
    fn test_sequence_check() {
        assert!(check_sequence(None, 0).is_valid());
        assert!(check_sequence(Some(4), 5).is_valid());
        assert_eq!(
            check_sequence(Some(4), 7),
            IntegrityResult::SequenceGap {
                expected: 5,
                received: 7
            }
        );
        assert!(!check_sequence(None, 1).is_valid());
    }
}
