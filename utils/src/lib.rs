#![no_std]

/// CRC-32 the secure enclave expects trailing a sealed configuration record.
pub const CONFIG_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

pub const fn config_checksum(record: &[u8]) -> u32 {
    CONFIG_CRC.checksum(record)
}

/// Serializes words little-endian, the byte order the enclave checksums them in.
///
/// The output length is checked when the function is instantiated:
///
/// ```compile_fail
/// let bytes: [u8; 7] = trustzone_pc_utils::words_to_bytes([1u32, 2]);
/// ```
pub fn words_to_bytes<const W: usize, const B: usize>(words: [u32; W]) -> [u8; B] {
    const { assert!(W * 4 == B, "output must hold exactly four bytes per word") };

    let mut bytes = [0u8; B];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}
