//! Per-channel state and the host-facing handler trait.

use crate::error::{Error, Result};
use crate::pollset::Interest;
use crate::transport::Transport;
use crate::wire;
use filedescriptor::SocketDescriptor;

/// Default window the engine offers the peer for each channel it opens,
/// per spec (262,144 bytes).
pub const DEFAULT_WINDOW: u32 = 262_144;
/// Default maximum packet size the engine offers the peer, per spec
/// (65,536 bytes).
pub const DEFAULT_MAX_PACKET: u32 = 65_536;
/// Maximum number of fds a single channel may watch.
pub const MAX_WATCH_FDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Created,
    Requested,
    Open,
    Closed,
}

/// The only channel kind this client speaks, per spec's scope (no
/// direct-tcpip, no X11, no agent forwarding, no SFTP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Session,
}

impl ChannelType {
    pub fn wire_name(self) -> &'static str {
        match self {
            ChannelType::Session => "session",
        }
    }
}

/// `session`-channel-specific open parameters: whether to allocate a pty,
/// the terminal type and initial geometry, and an optional command (a
/// `shell` request is sent when absent, `exec` when present).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: Option<String>,
    pub pty: bool,
    pub term: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: None,
            pty: true,
            term: "xterm".to_string(),
            width: 80,
            height: 24,
        }
    }
}

/// The host-facing capability set for a channel, replacing the C
/// callback-struct-plus-`void*` contract with a trait object (per the
/// "callbacks vs. message passing" design note: a trait object is the
/// direct match in a language with them).
///
/// A negative/`Err` return from any of the fallible methods causes the
/// engine to close the channel.
pub trait ChannelHandler {
    /// The channel transitioned from `Requested` to `Open`. `transport`
    /// is threaded through so the handler can call [`Channel::send`]
    /// immediately, which needs it to actually enqueue wire data (Rust
    /// has no room for the hidden session pointer the original C
    /// callback signature relied on).
    fn on_open(&mut self, channel: &mut Channel, transport: &mut dyn Transport) -> Result<()> {
        let _ = (channel, transport);
        Ok(())
    }

    /// `CHANNEL_OPEN_FAILURE` was received; mutually exclusive with
    /// `on_open`.
    fn on_open_failed(&mut self, channel: &mut Channel, reason: &str) {
        let _ = (channel, reason);
    }

    /// The channel has moved to `Closed`, by any of: host-initiated
    /// close, peer-initiated close, or a fatal error. Invoked at most
    /// once per channel.
    fn on_closed(&mut self, channel: &mut Channel) {
        let _ = channel;
    }

    /// A watched fd became ready; `interest` reports which of
    /// READ/WRITE/CLOSE fired.
    fn on_fd_ready(
        &mut self,
        channel: &mut Channel,
        transport: &mut dyn Transport,
        fd: SocketDescriptor,
        interest: Interest,
    ) -> Result<()> {
        let _ = (channel, transport, fd, interest);
        Ok(())
    }

    /// `CHANNEL_DATA` payload arrived on the channel's primary stream.
    fn on_received(&mut self, channel: &mut Channel, transport: &mut dyn Transport, data: &[u8]) {
        let _ = (channel, transport, data);
    }

    /// `CHANNEL_EXTENDED_DATA` payload arrived, tagged with its
    /// data-type code (e.g. `SSH_EXTENDED_DATA_STDERR == 1`).
    fn on_received_ext(
        &mut self,
        channel: &mut Channel,
        transport: &mut dyn Transport,
        code: u32,
        data: &[u8],
    ) {
        let _ = (channel, transport, code, data);
    }
}

/// A channel configuration supplied by the host when calling
/// [`crate::engine::ChannelEngine::run`]: the kind of channel to open,
/// its kind-specific parameters, and the handler that will receive its
/// lifecycle and data events.
pub struct ChannelConfig {
    pub channel_type: ChannelType,
    pub session: SessionConfig,
    pub handler: Box<dyn ChannelHandler>,
}

impl ChannelConfig {
    pub fn session(session: SessionConfig, handler: Box<dyn ChannelHandler>) -> Self {
        Self {
            channel_type: ChannelType::Session,
            session,
            handler,
        }
    }
}

struct WatchedFd {
    fd: SocketDescriptor,
    interest: Interest,
}

/// Per-channel engine state: protocol status, flow-control windows, and
/// the set of host fds this channel wants to be told about.
///
/// Invariant: `local_num` is unique among non-`Closed` channels owned by
/// one [`crate::engine::ChannelEngine`]; `Closed` channels are freed by
/// the engine's sweep between loop iterations and must not be touched
/// afterward (enforced by the engine owning the storage, not the host).
pub struct Channel {
    pub(crate) status: ChannelStatus,
    pub(crate) local_num: u32,
    pub(crate) remote_num: Option<u32>,
    pub(crate) local_window: u32,
    pub(crate) local_max_packet: u32,
    pub(crate) remote_window: u32,
    pub(crate) remote_max_packet: u32,
    pub(crate) channel_type: ChannelType,
    pub(crate) session: SessionConfig,
    watch_fds: Vec<WatchedFd>,
    pub(crate) close_requested: bool,
    pub(crate) close_sent: bool,
}

impl Channel {
    pub(crate) fn new(local_num: u32, channel_type: ChannelType, session: SessionConfig) -> Self {
        Self {
            status: ChannelStatus::Created,
            local_num,
            remote_num: None,
            local_window: DEFAULT_WINDOW,
            local_max_packet: DEFAULT_MAX_PACKET,
            remote_window: 0,
            remote_max_packet: 0,
            channel_type,
            session,
            watch_fds: Vec::with_capacity(MAX_WATCH_FDS),
            close_requested: false,
            close_sent: false,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn get_num(&self) -> u32 {
        self.local_num
    }

    pub fn remote_num(&self) -> Option<u32> {
        self.remote_num
    }

    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    /// Merge `enable`/`disable` into the watch set for `fd`. Mirrors
    /// [`crate::pollset::PollSet::update`]'s semantics, scoped to this
    /// channel's own fds (capped at [`MAX_WATCH_FDS`]).
    pub fn watch_fd(&mut self, fd: SocketDescriptor, enable: Interest, disable: Interest) -> Result<()> {
        if let Some(w) = self.watch_fds.iter_mut().find(|w| w.fd == fd) {
            w.interest = (w.interest | enable) & !disable;
            return Ok(());
        }
        let interest = enable & !disable;
        if interest.is_empty() {
            return Ok(());
        }
        if self.watch_fds.len() >= MAX_WATCH_FDS {
            return Err(Error::TooManyFds(format!(
                "channel {} already watches {} fds",
                self.local_num, MAX_WATCH_FDS
            )));
        }
        self.watch_fds.push(WatchedFd { fd, interest });
        Ok(())
    }

    pub(crate) fn watched_fds(&self) -> impl Iterator<Item = (SocketDescriptor, Interest)> + '_ {
        self.watch_fds
            .iter()
            .filter(|w| !w.interest.is_empty())
            .map(|w| (w.fd, w.interest))
    }

    /// Idempotent request to close: the engine observes this on its next
    /// sweep. Calling this on an already-`Closed` channel is a no-op.
    pub fn close(&mut self) {
        if self.status != ChannelStatus::Closed {
            self.close_requested = true;
        }
    }

    /// Segment `data` into `CHANNEL_DATA` packets no larger than
    /// `remote_max_packet`, bounded by `remote_window`. Returns the
    /// number of bytes actually accepted, which may be less than
    /// `data.len()` if the window is exhausted; the caller should retry
    /// the remainder later.
    pub(crate) fn clamp_send_len(&self, data_len: usize) -> usize {
        if self.status != ChannelStatus::Open {
            return 0;
        }
        let max_packet = self.remote_max_packet.max(1) as usize;
        let window = self.remote_window as usize;
        data_len.min(max_packet).min(window)
    }

    /// Segment `data` into `CHANNEL_DATA` packets no larger than
    /// `remote_max_packet`, bounded by `remote_window`, emitting one
    /// packet per segment. Returns the number of bytes actually sent,
    /// which is less than `data.len()` when the window runs out first;
    /// the host should retry the remainder once more `WINDOW_ADJUST`
    /// arrives.
    pub fn send(&mut self, transport: &mut dyn Transport, data: &[u8]) -> Result<usize> {
        self.send_with(transport, data, |buf, recipient, chunk| {
            wire::encode_channel_data(buf, recipient, chunk)
        })
    }

    /// As [`Self::send`], but emits `CHANNEL_EXTENDED_DATA` tagged with
    /// `code` (e.g. the stderr data-type code) instead of plain
    /// `CHANNEL_DATA`.
    pub fn send_ext(&mut self, transport: &mut dyn Transport, code: u32, data: &[u8]) -> Result<usize> {
        self.send_with(transport, data, |buf, recipient, chunk| {
            wire::encode_channel_extended_data(buf, recipient, code, chunk)
        })
    }

    fn send_with(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
        encode: impl Fn(&mut crate::buffer::ByteBuffer, u32, &[u8]) -> Result<()>,
    ) -> Result<usize> {
        let recipient = match self.remote_num {
            Some(n) => n,
            None => return Ok(0),
        };
        let mut sent = 0;
        while sent < data.len() {
            let chunk_len = self.clamp_send_len(data.len() - sent);
            if chunk_len == 0 {
                break;
            }
            let chunk = &data[sent..sent + chunk_len];
            let mut packet = transport.new_packet()?;
            encode(&mut packet, recipient, chunk)?;
            transport.send_packet(packet)?;
            self.remote_window -= chunk_len as u32;
            sent += chunk_len;
        }
        Ok(sent)
    }
}
