//! Transcoding between host-newline bytes and the netascii wire form used by
//! TFTP's `netascii` transfer mode (RFC 764 §"NVT ASCII", referenced by RFC 1350).
//!
//! A netascii line feed is always the two bytes CR LF (`\x0d\x0a`); a bare CR
//! that is not part of a host newline is escaped as CR NUL (`\x0d\x00`).

/// Netascii's encoding of a line feed.
pub const NA_LF: [u8; 2] = [0x0d, 0x0a];
/// Netascii's encoding of a lone carriage return.
pub const NA_CR: [u8; 2] = [0x0d, 0x00];

/// Encodes `data`, which uses `host_newline` as its line separator, into
/// netascii form.
///
/// At every position, a match of `host_newline` takes priority over a match
/// of a lone CR: if the host newline itself begins with CR (e.g. CRLF), a CR
/// that starts a full host-newline match is never separately reinterpreted as
/// a lone CR.
pub fn encode(data: &[u8], host_newline: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if !host_newline.is_empty() && data[i..].starts_with(host_newline) {
            out.extend_from_slice(&NA_LF);
            i += host_newline.len();
        } else if data[i] == b'\r' {
            out.extend_from_slice(&NA_CR);
            i += 1;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Decodes netascii-encoded `data` back into bytes using `host_newline` as
/// the line separator.
///
/// CR LF is decoded before CR NUL is considered: both share a leading CR, and
/// the second byte disambiguates which one matched.
pub fn decode(data: &[u8], host_newline: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(&NA_LF) {
            out.extend_from_slice(host_newline);
            i += 2;
        } else if data[i..].starts_with(&NA_CR) {
            out.push(b'\r');
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Encodes using the current platform's line separator.
pub fn encode_platform(data: &[u8]) -> Vec<u8> {
    encode(data, platform_newline())
}

/// Decodes using the current platform's line separator.
pub fn decode_platform(data: &[u8]) -> Vec<u8> {
    decode(data, platform_newline())
}

#[cfg(windows)]
fn platform_newline() -> &'static [u8] {
    b"\r\n"
}

#[cfg(not(windows))]
fn platform_newline() -> &'static [u8] {
    b"\n"
}

/// Owned form of the current platform's line separator, for callers that
/// need to stash it (e.g. a long-lived reader/writer) rather than borrow it.
pub fn platform_newline_owned() -> Vec<u8> {
    platform_newline().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LF: &[u8] = b"\n";
    const CRLF: &[u8] = b"\r\n";

    #[test]
    fn encode_lf_newline() {
        assert_eq!(encode(b"hi\n", LF), b"hi\x0d\x0a");
    }

    #[test]
    fn encode_lone_cr() {
        assert_eq!(encode(b"a\rb", LF), b"a\x0d\x00b");
    }

    #[test]
    fn encode_identity_when_no_cr_or_newline() {
        let data = b"the quick brown fox";
        assert_eq!(encode(data, LF), data);
    }

    #[test]
    fn encode_crlf_passthrough_when_host_is_lf() {
        // A CR immediately followed by LF: the host-newline match (bare LF)
        // takes the single LF byte, the CR in front is a lone CR and gets
        // escaped as CR NUL, then the LF is encoded as CR LF.
        assert_eq!(encode(b"\r\n", LF), b"\x0d\x00\x0d\x0a");
    }

    #[test]
    fn decode_reverses_encode_lf() {
        let data = b"line one\nline two\r\nline three\r";
        let encoded = encode(data, LF);
        assert_eq!(decode(&encoded, LF), data);
    }

    #[test]
    fn decode_reverses_encode_crlf() {
        let data = b"line one\r\nline two\rline three";
        let encoded = encode(data, CRLF);
        assert_eq!(decode(&encoded, CRLF), data);
    }

    #[test]
    fn decode_prefers_lf_over_cr_nul_ambiguity() {
        // CR LF must decode as one newline, not as CR-escaped-CR followed by
        // a stray LF.
        assert_eq!(decode(b"\x0d\x0a", LF), b"\n");
        assert_eq!(decode(b"\x0d\x00", LF), b"\r");
    }

    #[test]
    fn round_trip_random_bytes() {
        // Deterministic pseudo-random byte soup, including runs of CR and
        // LF, exercised against both canonical host newlines.
        let mut data = Vec::new();
        let mut state: u32 = 0x1234_5678;
        for _ in 0..2000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        for nl in [LF, CRLF] {
            let encoded = encode(&data, nl);
            assert_eq!(decode(&encoded, nl), data);
        }
    }

    #[test]
    fn platform_round_trip() {
        let data = b"hello\nworld\r\n!";
        let encoded = encode_platform(data);
        assert_eq!(decode_platform(&encoded), data);
    }
}
