//! RSP packet framer (spec §4.1, component C2).
//!
//! Wraps/unwraps `$<data>#<cksum-hi><cksum-lo>` packets: checksum, `}`-escape
//! decoding, ACK/NAK handshake, and the optional two-hex-digit sequence-ID
//! preamble (`xx:`).

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use avrbridge_hex as hex;
use log::{debug, trace, warn};

use crate::error::Error;

/// Cap on the raw (escaped) packet body, matching the original `BUFMAX`.
const BUFMAX: usize = 400;

/// How long to wait between polls of a non-blocking stream with no data
/// ready. The framer has no read timeout of its own (spec §4.1): this only
/// avoids a busy-spin while emulating a blocking `select`.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

const ESCAPE: u8 = 0x7d;
const ESCAPE_XOR: u8 = 0x20;
const START: u8 = b'$';
const END: u8 = b'#';
const ACK: u8 = b'+';
const NAK: u8 = b'-';

/// Frames and unframes RSP packets over a byte stream.
///
/// `S` is typically a [`std::net::TcpStream`] set non-blocking (spec §6); a
/// non-blocking read that would block is retried after a short sleep,
/// approximating the original's indefinite `select`-based wait.
pub struct Framer<S> {
    stream: S,
}

impl<S: Read + Write> Framer<S> {
    /// Wraps a stream (already configured non-blocking by the caller).
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Consumes the framer, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Receives one packet, returning its payload and an optional
    /// two-hex-digit sequence-ID prefix (spec §4.1 step 6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the stream is closed.
    pub fn receive(&mut self) -> Result<(Vec<u8>, Option<u16>), Error> {
        loop {
            // Step 1: discard bytes until '$'.
            self.seek_start()?;

            // Step 2-4: read the raw packet body up to '#', then the
            // checksum digits, unescaping as we go.
            let Some((raw, payload, cksum_wire)) = self.read_body()? else {
                // Resynchronize: a '$' appeared mid-packet.
                continue;
            };

            let cksum_actual = hex::checksum(&raw);
            if cksum_actual != cksum_wire {
                warn!(
                    "bad checksum: got {cksum_wire:#04x}, expected {cksum_actual:#04x}; sending NAK"
                );
                self.write_byte(NAK)?;
                continue;
            }
            self.write_byte(ACK)?;

            // Step 6: optional sequence-ID prefix "xx:".
            if payload.len() >= 3 && payload[2] == b':' {
                if let (Some(hi), Some(lo)) = (hex::nibble(payload[0]), hex::nibble(payload[1])) {
                    let seq = u16::from(hi << 4 | lo);
                    self.write_byte(hex::encode_byte((hi << 4) | lo)[0])?;
                    self.write_byte(hex::encode_byte((hi << 4) | lo)[1])?;
                    trace!("received packet with sequence id {seq:#04x}");
                    return Ok((payload[3..].to_vec(), Some(seq)));
                }
            }

            return Ok((payload, None));
        }
    }

    /// Sends one packet, retransmitting on NAK.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the stream is closed.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        loop {
            let cksum = hex::checksum(payload);
            self.write_byte(START)?;
            self.write_all(payload)?;
            self.write_byte(END)?;
            let [hi, lo] = hex::encode_byte(cksum);
            self.write_byte(hi)?;
            self.write_byte(lo)?;

            match self.read_byte()? {
                ACK => return Ok(()),
                NAK => {
                    debug!("retransmitting after NAK");
                    continue;
                }
                other => {
                    // Unexpected byte; treat as implicit ACK rather than
                    // looping forever, but note it.
                    warn!("expected ACK/NAK, got {other:#04x}");
                    return Ok(());
                }
            }
        }
    }

    fn seek_start(&mut self) -> Result<(), Error> {
        loop {
            if self.read_byte()? == START {
                return Ok(());
            }
        }
    }

    /// Reads the packet body and checksum digits. Returns `Ok(None)` if a
    /// stray `$` was seen mid-packet (caller should resynchronize).
    #[allow(clippy::type_complexity)]
    fn read_body(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>, u8)>, Error> {
        let mut raw = Vec::new();
        let mut payload = Vec::new();
        let mut escaped = false;

        loop {
            let byte = self.read_byte()?;
            if byte == START {
                return Ok(None);
            }
            if raw.len() >= BUFMAX {
                return Err(Error::Protocol("packet exceeds maximum length".into()));
            }
            raw.push(byte);
            if escaped {
                payload.push(byte ^ ESCAPE_XOR);
                escaped = false;
                continue;
            }
            if byte == ESCAPE {
                escaped = true;
                continue;
            }
            if byte == END {
                raw.pop(); // '#' is not included in the checksummed data
                let hi = hex::nibble(self.read_byte()?)
                    .ok_or_else(|| Error::Protocol("bad checksum digit".into()))?;
                let lo = hex::nibble(self.read_byte()?)
                    .ok_or_else(|| Error::Protocol("bad checksum digit".into()))?;
                return Ok(Some((raw, payload, (hi << 4) | lo)));
            }
            payload.push(byte);
        }
    }

    fn read_byte(&mut self) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::Fatal("debugger closed connection".into())),
                Ok(_) => return Ok(buf[0]),
                Err(ref e) if would_block(e) => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(Error::Fatal(e.to_string())),
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.write_all(&[byte])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        loop {
            match self.stream.write_all(buf) {
                Ok(()) => return Ok(()),
                Err(ref e) if would_block(e) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(Error::Fatal(e.to_string())),
            }
        }
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    use super::*;

    /// An in-memory byte pipe standing in for a socket in tests.
    #[derive(Default)]
    struct MemPipe {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl MemPipe {
        fn feed(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes);
        }
    }

    impl Read for MemPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let mut n = 0;
            for slot in buf.iter_mut() {
                let Some(byte) = self.inbound.pop_front() else {
                    break;
                };
                *slot = byte;
                n += 1;
            }
            Ok(n)
        }
    }

    impl Write for MemPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn build_packet(payload: &[u8]) -> Vec<u8> {
        let cksum = hex::checksum(payload);
        let mut out = vec![START];
        out.extend_from_slice(payload);
        out.push(END);
        out.extend_from_slice(&hex::encode_byte(cksum));
        out
    }

    #[test]
    fn receive_acks_good_checksum() {
        let mut pipe = MemPipe::default();
        pipe.feed(&build_packet(b"g"));
        let mut framer = Framer::new(pipe);
        let (payload, seq) = framer.receive().unwrap();
        assert_eq!(payload, b"g");
        assert_eq!(seq, None);
        assert_eq!(framer.stream.outbound, vec![ACK]);
    }

    #[test]
    fn receive_naks_bad_checksum_then_recovers() {
        let mut pipe = MemPipe::default();
        // Bad checksum first, then a correctly checksummed retransmit.
        pipe.feed(b"$g#00");
        pipe.feed(&build_packet(b"g"));
        let mut framer = Framer::new(pipe);
        let (payload, _) = framer.receive().unwrap();
        assert_eq!(payload, b"g");
        assert_eq!(framer.stream.outbound, vec![NAK, ACK]);
    }

    #[test]
    fn receive_resynchronizes_on_stray_dollar() {
        let mut pipe = MemPipe::default();
        let mut stray = vec![START];
        stray.extend_from_slice(b"abandoned");
        stray.extend(build_packet(b"g"));
        pipe.feed(&stray);
        let mut framer = Framer::new(pipe);
        let (payload, _) = framer.receive().unwrap();
        assert_eq!(payload, b"g");
    }

    #[test]
    fn receive_unescapes_payload() {
        // Escape the literal byte 0x03: 0x7d, 0x03 ^ 0x20 = 0x23 ('#').
        let mut raw_payload = vec![b'a'];
        raw_payload.push(ESCAPE);
        raw_payload.push(b'#' ^ ESCAPE_XOR);
        raw_payload.push(b'b');
        // Checksum is computed over the raw (escaped) bytes.
        let cksum = hex::checksum(&raw_payload);
        let mut packet = vec![START];
        packet.extend_from_slice(&raw_payload);
        packet.push(END);
        packet.extend_from_slice(&hex::encode_byte(cksum));

        let mut pipe = MemPipe::default();
        pipe.feed(&packet);
        let mut framer = Framer::new(pipe);
        let (payload, _) = framer.receive().unwrap();
        assert_eq!(payload, b"a#b");
    }

    #[test]
    fn receive_splits_sequence_prefix() {
        let mut pipe = MemPipe::default();
        pipe.feed(&build_packet(b"0b:g"));
        let mut framer = Framer::new(pipe);
        let (payload, seq) = framer.receive().unwrap();
        assert_eq!(payload, b"g");
        assert_eq!(seq, Some(0x0b));
    }

    #[test]
    fn send_retransmits_on_nak() {
        let mut pipe = MemPipe::default();
        pipe.feed(&[NAK, ACK]);
        let mut framer = Framer::new(pipe);
        framer.send(b"OK").unwrap();
        let expected_packet = build_packet(b"OK");
        let mut expected = expected_packet.clone();
        expected.extend_from_slice(&expected_packet);
        assert_eq!(framer.stream.outbound, expected);
    }

    #[test]
    fn closed_stream_is_fatal() {
        struct Closed;
        impl Read for Closed {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        impl Write for Closed {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut framer = Framer::new(Closed);
        assert!(matches!(framer.receive(), Err(Error::Fatal(_))));
    }
}
