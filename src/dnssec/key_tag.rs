/// Calculate the key tag for a DNSKEY record (RFC 4034 Appendix B).
///
/// The checksum runs over the DNSKEY RDATA: flags, protocol, algorithm and
/// the public key, treated as a sequence of big-endian 16-bit words.
pub fn calculate_key_tag(flags: u16, protocol: u8, algorithm: u8, public_key: &[u8]) -> u16 {
    let header = [
        (flags >> 8) as u8,
        flags as u8,
        protocol,
        algorithm,
    ];

    let accumulator = header
        .iter()
        .chain(public_key)
        .enumerate()
        .fold(0u32, |acc, (i, &byte)| {
            if i % 2 == 0 {
                acc + (u32::from(byte) << 8)
            } else {
                acc + u32::from(byte)
            }
        });

    (accumulator.wrapping_add(accumulator >> 16) & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    #[test]
    fn test_key_tag_rfc4034_vector() {
        // RFC 4034 Appendix B.5 style RSA/SHA-1 KSK
        let public_key = hex::decode(
            "030101a80020a95566ba42e886bb804cda84e47ef56dbd7aec612615552cec906d3e9b72dc4f90d3fc09b8e9d0ff2ae8ee5ed8cd61d7622c39ee2d76a2153bc0ac8b9e254125c46e0a224507fb358d7f6b5d7a42f75e60b9748e7c0747e2447f4bd7d10ca24bb1498de34a504406bbeb3b041fe48d0ad2b1de5adadb87d0c8824e7cc4dc3e5b7f0b3e8ac72c3d3d8aa7251abcaad82ad5ececed8cd83825d19ffd95e93bca729fdd88901b20fc598fb6a0779ddfa95e3e42ca9d0a7739d3c4ad3a7a5a30b3c60a73a6f09fdb812746e0d69edfba06754465f2e1dd5e3802e6d05bd6148e38fd8ca1632b71f6559fe9b6e18d73c5a750e3e2f2f205972e7b28ae04ddae5e27915a08d217db5ce090c119d23f79fb"
        ).unwrap();

        assert_eq!(calculate_key_tag(0x0101, 3, 5, &public_key), 55495);
    }

    #[test]
    fn test_key_tag_ed25519() {
        // RFC 8080 section 6.1 example key
        let public_key = BASE64
            .decode("l02Woi0iS8Aa25FQkUd9RMzZHJpBoRQwAQEX1SxZJA4=")
            .unwrap();
        assert_eq!(calculate_key_tag(257, 3, 15, &public_key), 3613);
    }
}
