//! Byte-buffer helpers and the static-IP formatter (C1).
//!
//! The wire layer in this crate works directly with `bytes::BytesMut`/`Bytes`
//! for packet assembly. `ByteBuffer` below exists for the handful of call
//! sites that need mutable, append-and-format semantics (building the
//! NetConsole outbound stream) rather than a one-shot packet encode.

use std::fmt::Write as _;

/// A growable byte sequence used for packet assembly and free-form text,
/// mirroring the C original's `sds`-backed buffers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteBuffer(Vec<u8>);

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        ByteBuffer(Vec::with_capacity(cap))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u8) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    /// Appends a `printf`-style formatted string to the buffer.
    pub fn append_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        let mut s = String::new();
        let _ = s.write_fmt(args);
        self.0.extend_from_slice(s.as_bytes());
    }

    /// Joins a list of byte slices with the given separator into a new buffer.
    pub fn join(parts: &[&[u8]], separator: u8) -> ByteBuffer {
        let mut out = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.extend_from_slice(part);
        }
        ByteBuffer(out)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Drains the entire buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(v: Vec<u8>) -> Self {
        ByteBuffer(v)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(v: &[u8]) -> Self {
        ByteBuffer(v.to_vec())
    }
}

/// Formats the static IP address `net.(team/100).(team%100).host`, the
/// canonical addressing scheme every protocol's radio/robot address is
/// derived from. Teams below 100 collapse the hundreds digit away:
/// `net.0.team.host`.
pub fn ip(net: u8, team: u32, host: u8) -> String {
    if team < 100 {
        format!("{net}.0.{team}.{host}")
    } else {
        let te = team / 100;
        let am = team % 100;
        format!("{net}.{te}.{am}.{host}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_ip_matches_known_team_numbers() {
        assert_eq!(ip(10, 3794, 2), "10.37.94.2");
        assert_eq!(ip(10, 18, 1), "10.0.18.1");
        assert_eq!(ip(10, 1, 1), "10.0.1.1");
        assert_eq!(ip(10, 99, 2), "10.0.99.2");
        assert_eq!(ip(10, 100, 2), "10.1.0.2");
    }

    #[test]
    fn static_ip_round_trips_for_small_teams() {
        for team in 0..=9999u32 {
            let addr = ip(10, team, 2);
            let octets: Vec<u32> = addr.split('.').map(|s| s.parse().unwrap()).collect();
            assert_eq!(octets[0], 10);
            assert_eq!(octets[1] * 100 + octets[2], team);
            assert_eq!(octets[3], 2);
        }
    }

    #[test]
    fn byte_buffer_join_and_append() {
        let joined = ByteBuffer::join(&[b"10", b"37", b"94", b"2"], b'.');
        assert_eq!(joined.as_slice(), b"10.37.94.2");

        let mut buf = ByteBuffer::new();
        buf.append_fmt(format_args!("team {}", 3794));
        assert_eq!(buf.as_slice(), b"team 3794");
    }
}
