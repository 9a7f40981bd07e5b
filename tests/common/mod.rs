//! Shared test support: a `Transport` backed by a real socketpair (so
//! `poll(2)` behaves as it would against a live connection) with packet
//! bytes exchanged through plain in-memory queues instead of a wire
//! codec, plus raw encoders for the handful of message types these
//! tests need to hand the engine.

use filedescriptor::{socketpair, AsRawSocketDescriptor, FileDescriptor, SocketDescriptor};
use ssh_channel_mux::{ByteBuffer, Error, FlushOutcome, Result, Transport};
use std::collections::VecDeque;
use std::convert::TryInto;
use std::io::{Read, Write};

pub struct MockTransport {
    signal: FileDescriptor,
    peer_signal: FileDescriptor,
    inbound: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (signal, peer_signal) = socketpair().expect("socketpair");
        Self {
            signal,
            peer_signal,
            inbound: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queue one inbound packet (message-type byte included) and mark
    /// the transport fd readable so `poll` wakes the event loop for it.
    pub fn push_inbound(&mut self, packet: Vec<u8>) {
        self.inbound.push_back(packet);
        self.peer_signal.write_all(&[0u8]).expect("signal write");
    }
}

impl Transport for MockTransport {
    fn new_packet(&mut self) -> Result<ByteBuffer> {
        Ok(ByteBuffer::new())
    }

    fn send_packet(&mut self, packet: ByteBuffer) -> Result<()> {
        self.sent.push(packet.into_vec());
        Ok(())
    }

    fn send_flush(&mut self) -> Result<FlushOutcome> {
        Ok(FlushOutcome::Flushed)
    }

    fn send_is_pending(&self) -> bool {
        false
    }

    fn recv_packet(&mut self) -> Result<Option<ByteBuffer>> {
        match self.inbound.pop_front() {
            Some(bytes) => {
                let mut discard = [0u8; 1];
                let _ = self.signal.read(&mut discard);
                Ok(Some(ByteBuffer::from(bytes)))
            }
            None => Ok(None),
        }
    }

    fn as_socket_descriptor(&self) -> SocketDescriptor {
        self.signal.as_socket_descriptor()
    }

    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<()> {
        self.signal.set_non_blocking(non_blocking).map_err(|e| {
            Error::TransportIo(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
    }
}

fn u32_be(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn push_string(buf: &mut Vec<u8>, s: &[u8]) {
    buf.extend_from_slice(&u32_be(s.len() as u32));
    buf.extend_from_slice(s);
}

pub const MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub const MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
pub const MSG_CHANNEL_DATA: u8 = 94;
pub const MSG_CHANNEL_SUCCESS: u8 = 99;

pub fn open_confirmation(recipient: u32, sender: u32, window: u32, max_packet: u32) -> Vec<u8> {
    let mut buf = vec![MSG_CHANNEL_OPEN_CONFIRMATION];
    buf.extend_from_slice(&u32_be(recipient));
    buf.extend_from_slice(&u32_be(sender));
    buf.extend_from_slice(&u32_be(window));
    buf.extend_from_slice(&u32_be(max_packet));
    buf
}

pub fn open_failure(recipient: u32, reason: u32, description: &str) -> Vec<u8> {
    let mut buf = vec![MSG_CHANNEL_OPEN_FAILURE];
    buf.extend_from_slice(&u32_be(recipient));
    buf.extend_from_slice(&u32_be(reason));
    push_string(&mut buf, description.as_bytes());
    push_string(&mut buf, b""); // language tag
    buf
}

pub fn channel_success(recipient: u32) -> Vec<u8> {
    let mut buf = vec![MSG_CHANNEL_SUCCESS];
    buf.extend_from_slice(&u32_be(recipient));
    buf
}

pub fn channel_data(recipient: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![MSG_CHANNEL_DATA];
    buf.extend_from_slice(&u32_be(recipient));
    push_string(&mut buf, data);
    buf
}

/// A packet claiming an inner string length longer than the bytes that
/// actually follow it — used to exercise the truncation-is-fatal path.
pub fn channel_data_with_inflated_length(recipient: u32, claimed_len: u32, actual: &[u8]) -> Vec<u8> {
    let mut buf = vec![MSG_CHANNEL_DATA];
    buf.extend_from_slice(&u32_be(recipient));
    buf.extend_from_slice(&u32_be(claimed_len));
    buf.extend_from_slice(actual);
    buf
}

/// Decode the handful of outbound message shapes the tests assert on,
/// message-type byte included, without pulling in the crate's private
/// wire module.
pub mod decode {
    pub const MSG_CHANNEL_OPEN: u8 = 90;
    pub const MSG_CHANNEL_REQUEST: u8 = 98;

    pub struct ChannelOpen {
        pub channel_type: String,
        pub sender: u32,
        pub window: u32,
        pub max_packet: u32,
    }

    fn read_u32(bytes: &[u8], pos: &mut usize) -> u32 {
        let v = u32::from_be_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        v
    }

    fn read_string<'a>(bytes: &'a [u8], pos: &mut usize) -> &'a [u8] {
        let len = read_u32(bytes, pos) as usize;
        let view = &bytes[*pos..*pos + len];
        *pos += len;
        view
    }

    pub fn channel_open(bytes: &[u8]) -> ChannelOpen {
        assert_eq!(bytes[0], MSG_CHANNEL_OPEN);
        let mut pos = 1;
        let channel_type = String::from_utf8(read_string(bytes, &mut pos).to_vec()).unwrap();
        let sender = read_u32(bytes, &mut pos);
        let window = read_u32(bytes, &mut pos);
        let max_packet = read_u32(bytes, &mut pos);
        ChannelOpen {
            channel_type,
            sender,
            window,
            max_packet,
        }
    }

    pub struct ChannelRequest {
        pub recipient: u32,
        pub name: String,
        pub want_reply: bool,
        pub tail: Vec<u8>,
    }

    pub struct PtyReq {
        pub term: String,
        pub cols: u32,
        pub rows: u32,
    }

    pub fn pty_req_payload(tail: &[u8]) -> PtyReq {
        let mut pos = 0;
        let term = String::from_utf8(read_string(tail, &mut pos).to_vec()).unwrap();
        let cols = read_u32(tail, &mut pos);
        let rows = read_u32(tail, &mut pos);
        PtyReq { term, cols, rows }
    }

    pub fn channel_request(bytes: &[u8]) -> ChannelRequest {
        assert_eq!(bytes[0], MSG_CHANNEL_REQUEST);
        let mut pos = 1;
        let recipient = read_u32(bytes, &mut pos);
        let name = String::from_utf8(read_string(bytes, &mut pos).to_vec()).unwrap();
        let want_reply = bytes[pos] != 0;
        pos += 1;
        ChannelRequest {
            recipient,
            name,
            want_reply,
            tail: bytes[pos..].to_vec(),
        }
    }
}
