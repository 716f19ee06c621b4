use crate::error::{Error, Result};
use serde::Serialize;
use std::{
    env,
    net::UdpSocket,
    sync::RwLock,
};

/// `{"format": "json", "version": 1}` followed by a newline, prepended to
/// every datagram sent to the daemon.
const PROTOCOL_HEADER: &[u8] = br#"{"format": "json", "version": 1}"#;

/// The maximum size, in bytes, of a datagram written to the daemon,
/// inclusive of the protocol header and its trailing newline.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Frames segment documents into the X-Ray daemon wire protocol and ships
/// them over UDP.
///
/// Owns a single lazily-dialed socket; writes are serialized under the
/// emitter's lock so concurrent `send` calls never interleave datagrams.
#[derive(Debug)]
pub struct Emitter {
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    addr: String,
    socket: Option<UdpSocket>,
}

impl Default for Emitter {
    /// An emitter targeting `XRAY_DAEMON_HOST`/`XRAY_DAEMON_PORT`, falling
    /// back to `127.0.0.1:2000`.
    fn default() -> Self {
        let host = env::var("XRAY_DAEMON_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let port = env::var("XRAY_DAEMON_PORT").unwrap_or_else(|_| "2000".into());
        Emitter::new(&host, &port)
    }
}

impl Emitter {
    /// Creates an emitter targeting `host:port`. The socket is not dialed
    /// until the first `send`.
    pub fn new(
        host: &str,
        port: &str,
    ) -> Self {
        Emitter {
            state: RwLock::new(State {
                addr: format!("{}:{}", host, port),
                socket: None,
            }),
        }
    }

    /// Atomically replaces the daemon address. If a socket is open, it is
    /// closed so the next `send` re-dials.
    pub fn set_daemon_host_and_port(
        &self,
        host: &str,
        port: &str,
    ) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.addr = format!("{}:{}", host, port);
        state.socket = None;
    }

    /// Serializes `value` and writes it to the daemon as a single UDP
    /// datagram: the protocol header, a newline, then the JSON body.
    ///
    /// Rejects payloads whose total packet size — header included — would
    /// exceed the 64KiB datagram budget, and treats a partial write as a
    /// failure.
    pub fn send<S: Serialize>(
        &self,
        value: &S,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;

        let mut packet = Vec::with_capacity(PROTOCOL_HEADER.len() + 1 + body.len());
        packet.extend_from_slice(PROTOCOL_HEADER);
        packet.push(b'\n');
        packet.extend_from_slice(&body);

        if packet.len() >= MAX_DATAGRAM_SIZE {
            return Err(Error::SegmentTooLarge {
                segment_id: String::new(),
                size: packet.len(),
            });
        }

        log::trace!("sending {} bytes to the xray daemon", packet.len());

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.socket.is_none() {
            state.socket = Some(dial(&state.addr)?);
        }
        let socket = state.socket.as_ref().expect("socket dialed above");

        let written = socket.send(&packet)?;
        if written != packet.len() {
            return Err(Error::EmitterTransport(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "partial write to xray daemon socket",
            )));
        }
        Ok(())
    }
}

fn dial(addr: &str) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(addr)?;
    log::trace!("connected to xray daemon at {}", addr);
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oversize_payload_is_rejected_before_dialing() {
        let emitter = Emitter::new("127.0.0.1", "2000");
        let huge = "x".repeat(MAX_DATAGRAM_SIZE + 1);
        let err = emitter.send(&json!({ "name": huge })).unwrap_err();
        assert!(matches!(err, Error::SegmentTooLarge { .. }));
    }

    #[test]
    fn a_datagram_of_exactly_the_limit_is_rejected() {
        // the framed packet (header + newline + body) must come out to
        // exactly MAX_DATAGRAM_SIZE bytes; "exceeds" in the spec is
        // inclusive of this boundary, not strictly past it.
        let emitter = Emitter::new("127.0.0.1", "2000");
        let prefix_len = PROTOCOL_HEADER.len() + 1 + r#"{"name":""}"#.len();
        let padding = MAX_DATAGRAM_SIZE - prefix_len;
        let body = "x".repeat(padding);
        let err = emitter.send(&json!({ "name": body })).unwrap_err();
        assert!(matches!(err, Error::SegmentTooLarge { .. }));
    }

    #[test]
    fn set_daemon_host_and_port_drops_the_open_socket() {
        let emitter = Emitter::new("127.0.0.1", "2000");
        emitter.send(&json!({ "ok": true })).unwrap();
        assert!(emitter.state.read().unwrap().socket.is_some());
        emitter.set_daemon_host_and_port("127.0.0.1", "2001");
        assert!(emitter.state.read().unwrap().socket.is_none());
        assert_eq!(emitter.state.read().unwrap().addr, "127.0.0.1:2001");
    }
}
