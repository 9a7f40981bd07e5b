//! Minimal demonstration of wiring a [`Transport`] impl to
//! [`ChannelEngine`]. This is not a full SSH client: key exchange,
//! authentication, and packet encryption are out of this crate's scope
//! (see the crate's top-level docs), so `PlaintextFramedStream` below
//! speaks a toy length-prefixed framing instead of the real binary
//! packet protocol. It exists to show the shape a real transport/crypto
//! layer would fill in, the same role `libssh2`/`libssh-rs` play for
//! `wezterm-ssh`'s own `SessionWrap`.

use ssh_channel_mux::{
    Channel, ChannelConfig, ChannelEngine, ChannelHandler, EngineLimits, Error, Result,
    SessionConfig, SocketDescriptor, Transport, ByteBuffer, FlushOutcome,
};
use std::convert::TryInto;
use std::io::{Read, Write};
use std::net::TcpStream;

struct PlaintextFramedStream {
    conn: TcpStream,
    outbox: Vec<u8>,
    inbox: Vec<u8>,
}

impl PlaintextFramedStream {
    fn new(conn: TcpStream) -> Self {
        Self {
            conn,
            outbox: Vec::new(),
            inbox: Vec::new(),
        }
    }
}

impl Transport for PlaintextFramedStream {
    fn new_packet(&mut self) -> Result<ByteBuffer> {
        Ok(ByteBuffer::new())
    }

    fn send_packet(&mut self, packet: ByteBuffer) -> Result<()> {
        let bytes = packet.into_vec();
        self.outbox.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.outbox.extend_from_slice(&bytes);
        Ok(())
    }

    fn send_flush(&mut self) -> Result<FlushOutcome> {
        while !self.outbox.is_empty() {
            match self.conn.write(&self.outbox) {
                Ok(0) => return Err(Error::TransportEof),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::WouldBlock)
                }
                Err(e) => return Err(Error::TransportIo(e)),
            }
        }
        Ok(FlushOutcome::Flushed)
    }

    fn send_is_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn recv_packet(&mut self) -> Result<Option<ByteBuffer>> {
        let mut chunk = [0u8; 4096];
        loop {
            if self.inbox.len() >= 4 {
                let len = u32::from_be_bytes(self.inbox[..4].try_into().unwrap()) as usize;
                if self.inbox.len() >= 4 + len {
                    let packet = self.inbox[4..4 + len].to_vec();
                    self.inbox.drain(..4 + len);
                    return Ok(Some(ByteBuffer::from(packet)));
                }
            }
            match self.conn.read(&mut chunk) {
                Ok(0) => return Err(Error::TransportEof),
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(Error::TransportIo(e)),
            }
        }
    }

    fn as_socket_descriptor(&self) -> SocketDescriptor {
        use filedescriptor::AsRawSocketDescriptor;
        self.conn.as_socket_descriptor()
    }

    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<()> {
        self.conn.set_nonblocking(non_blocking).map_err(Error::TransportIo)
    }
}

struct EchoHandler;

impl ChannelHandler for EchoHandler {
    fn on_open(&mut self, channel: &mut Channel, transport: &mut dyn Transport) -> Result<()> {
        println!("channel {} open", channel.get_num());
        channel.send(transport, b"hello from ssh-channel-mux\n")?;
        Ok(())
    }

    fn on_received(&mut self, channel: &mut Channel, _transport: &mut dyn Transport, data: &[u8]) {
        print!("{}", String::from_utf8_lossy(data));
        let _ = channel;
    }

    fn on_closed(&mut self, channel: &mut Channel) {
        println!("channel {} closed", channel.get_num());
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:2222".to_string());
    let conn = TcpStream::connect(&addr).map_err(Error::TransportIo)?;
    let mut transport = PlaintextFramedStream::new(conn);

    let config = ChannelConfig::session(SessionConfig::default(), Box::new(EchoHandler));

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config])
}
