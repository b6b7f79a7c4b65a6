/// CRC32 of a segment's raw URL string, used as its identity across polls.
pub fn crc32(data: &[u8]) -> u32 {
    zlib_rs::crc32::crc32(0, data)
}

#[cfg(test)]
mod tests {
    use super::crc32;

    #[test]
    fn known_vectors_match_zlib() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"hello"), 0x3610_A686);
    }
}
