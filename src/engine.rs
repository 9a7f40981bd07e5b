//! The channel multiplexing event loop.
//!
//! A single [`ChannelEngine`] drives one SSH connection: it owns the set
//! of channels, polls the transport socket plus every channel's watched
//! fds, dispatches inbound packets, and tears channels down. See spec.md
//! §4.4 and §5 for the full contract; this module is a direct
//! implementation of both.

use crate::buffer::ByteBuffer;
use crate::channel::{Channel, ChannelConfig, ChannelHandler, ChannelStatus, ChannelType};
use crate::error::{Error, Result};
use crate::limits::EngineLimits;
use crate::pollset::{Interest, PollSet};
use crate::reader::ByteReader;
use crate::transport::{FlushOutcome, Transport};
use crate::wire;
use filedescriptor::SocketDescriptor;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

struct ChannelSlot {
    channel: Channel,
    handler: Box<dyn ChannelHandler>,
}

/// Owns every channel on one connection and drives the event loop that
/// services them. Construct one per connection; `run` is the whole
/// public contract.
pub struct ChannelEngine {
    slots: Vec<Option<ChannelSlot>>,
    free_ids: BinaryHeap<Reverse<u32>>,
    next_fresh: u32,
    limits: EngineLimits,
}

impl ChannelEngine {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            slots: Vec::new(),
            free_ids: BinaryHeap::new(),
            next_fresh: 0,
            limits,
        }
    }

    fn open_channel_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Allocate the smallest non-negative integer not already in use by
    /// a non-`Closed` channel. Tracked explicitly via a free-id min-heap
    /// rather than the linear/quadratic rescan flagged in spec.md §9.
    fn alloc_local_num(&mut self) -> u32 {
        if let Some(Reverse(id)) = self.free_ids.pop() {
            return id;
        }
        let id = self.next_fresh;
        self.next_fresh += 1;
        id
    }

    fn slot_mut(&mut self, local_num: u32) -> Option<&mut ChannelSlot> {
        self.slots
            .get_mut(local_num as usize)
            .and_then(|s| s.as_mut())
    }

    fn insert_slot(&mut self, local_num: u32, slot: ChannelSlot) {
        let idx = local_num as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(slot);
    }

    /// Entry point: open every channel in `configs`, then service events
    /// until all channels have been torn down. Returns `Ok(())` once the
    /// last channel closes cleanly; returns `Err` on a fatal transport or
    /// protocol error, after closing and sweeping whatever channels
    /// remained.
    pub fn run<T: Transport>(&mut self, transport: &mut T, configs: Vec<ChannelConfig>) -> Result<()> {
        transport.set_non_blocking(true)?;

        for config in configs {
            self.open_one(transport, config)?;
        }

        let result = self.event_loop(transport);

        // Whether we exited cleanly or hit a fatal error, any channel
        // still alive must be torn down before we hand control back.
        self.close_all_and_sweep(transport);

        result
    }

    fn open_one<T: Transport>(&mut self, transport: &mut T, config: ChannelConfig) -> Result<()> {
        if self.open_channel_count() >= self.limits.max_channels {
            return Err(Error::TooManyFds(format!(
                "connection already has {} channels open",
                self.limits.max_channels
            )));
        }

        let local_num = self.alloc_local_num();
        let mut channel = Channel::new(local_num, config.channel_type, config.session);
        channel.local_window = self.limits.window;
        channel.local_max_packet = self.limits.max_packet;

        let mut packet = transport.new_packet()?;
        wire::encode_channel_open(
            &mut packet,
            channel.channel_type.wire_name(),
            local_num,
            channel.local_window,
            channel.local_max_packet,
        )?;
        transport.send_packet(packet)?;

        channel.status = ChannelStatus::Requested;
        self.insert_slot(
            local_num,
            ChannelSlot {
                channel,
                handler: config.handler,
            },
        );
        Ok(())
    }

    fn event_loop<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
        loop {
            self.sweep_closed(transport);
            if self.open_channel_count() == 0 {
                return Ok(());
            }

            let mut poll_set = PollSet::with_capacity(1 + self.slots.len() * 8);
            let transport_fd = transport.as_socket_descriptor();
            let transport_events = if transport.send_is_pending() {
                Interest::READ | Interest::WRITE
            } else {
                Interest::READ
            };
            poll_set.update(transport_fd, transport_events, Interest::empty())?;

            // Multiple channels may watch the same fd; the poll set only
            // needs one merged entry per fd, but dispatch still needs to
            // reach every channel that asked about it.
            let mut watchers: HashMap<SocketDescriptor, Vec<u32>> = HashMap::new();
            for slot in self.slots.iter().flatten() {
                for (fd, interest) in slot.channel.watched_fds() {
                    poll_set.update(fd, interest, Interest::empty())?;
                    watchers.entry(fd).or_default().push(slot.channel.local_num);
                }
            }

            let mut pollfds = poll_set.to_pollfds();
            filedescriptor::poll(&mut pollfds, Some(Duration::from_secs(3600)))
                .map_err(|err| Error::protocol(format!("poll failed: {err}")))?;
            poll_set.record_readiness(&pollfds);

            let transport_revents = pollfds
                .iter()
                .find(|p| p.fd == transport_fd)
                .map(|p| Interest::from_poll_revents(p.revents))
                .unwrap_or_else(Interest::empty);

            if transport_revents.contains(Interest::READ) {
                self.process_inbound(transport)?;
            }
            if transport_revents.contains(Interest::WRITE) {
                match transport.send_flush() {
                    Ok(FlushOutcome::Flushed) | Ok(FlushOutcome::WouldBlock) => {}
                    Err(err) => return Err(err),
                }
            }

            for (fd, interest) in poll_set.iter_readiness() {
                if fd == transport_fd {
                    continue;
                }
                if let Some(local_nums) = watchers.get(&fd) {
                    for &local_num in local_nums {
                        self.dispatch_fd_ready(transport, local_num, fd, interest);
                    }
                }
            }
        }
    }

    fn dispatch_fd_ready<T: Transport>(
        &mut self,
        transport: &mut T,
        local_num: u32,
        fd: SocketDescriptor,
        interest: Interest,
    ) {
        let slot = match self.slot_mut(local_num) {
            Some(s) => s,
            None => return,
        };
        let result = slot.handler.on_fd_ready(&mut slot.channel, transport, fd, interest);
        if let Err(err) = result {
            log::debug!("channel {local_num} fd_ready callback failed: {err}; closing channel");
            self.close_channel(transport, local_num, true);
        }
    }

    /// `process_inbound`: pull decrypted packets off the transport until
    /// `EWOULDBLOCK`, dispatching each by its message-type byte.
    fn process_inbound<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
        loop {
            let packet = match transport.recv_packet()? {
                Some(p) => p,
                None => return Ok(()),
            };
            self.dispatch_packet(transport, packet)?;
        }
    }

    fn dispatch_packet<T: Transport>(&mut self, transport: &mut T, packet: ByteBuffer) -> Result<()> {
        let bytes = packet.into_vec();
        let mut r = ByteReader::new(&bytes);
        let msg_type = r.read_u8()?;
        match msg_type {
            wire::SSH_MSG_GLOBAL_REQUEST => self.handle_global_request(transport, &mut r),
            wire::SSH_MSG_CHANNEL_OPEN_CONFIRMATION => {
                self.handle_open_confirmation(transport, &mut r)
            }
            wire::SSH_MSG_CHANNEL_OPEN_FAILURE => self.handle_open_failure(transport, &mut r),
            wire::SSH_MSG_CHANNEL_SUCCESS => self.handle_channel_success(transport, &mut r),
            wire::SSH_MSG_CHANNEL_FAILURE => self.handle_channel_failure(transport, &mut r),
            wire::SSH_MSG_CHANNEL_WINDOW_ADJUST => self.handle_window_adjust(&mut r),
            wire::SSH_MSG_CHANNEL_DATA => self.handle_channel_data(transport, &mut r),
            wire::SSH_MSG_CHANNEL_EXTENDED_DATA => self.handle_channel_extended_data(transport, &mut r),
            wire::SSH_MSG_CHANNEL_EOF => self.handle_channel_eof(transport, &mut r),
            wire::SSH_MSG_CHANNEL_CLOSE => self.handle_channel_close(transport, &mut r),
            other => {
                log::warn!("ignoring unknown inbound packet type {other}");
                Ok(())
            }
        }
    }

    fn handle_global_request<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let req = wire::decode_global_request(r)?;
        log::trace!("peer global request {:?} (want_reply={})", req.name, req.want_reply);
        if req.want_reply {
            // This implementation advertises no global capabilities.
            let mut packet = transport.new_packet()?;
            wire::encode_request_failure(&mut packet)?;
            transport.send_packet(packet)?;
        }
        Ok(())
    }

    fn handle_open_confirmation<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let confirm = wire::decode_channel_open_confirmation(r)?;
        let local_num = confirm.recipient;

        let channel_type = {
            let slot = self
                .slot_mut(local_num)
                .ok_or_else(|| Error::protocol(format!("CHANNEL_OPEN_CONFIRMATION for unknown channel {local_num}")))?;
            slot.channel.remote_num = Some(confirm.sender);
            slot.channel.remote_window = confirm.window;
            slot.channel.remote_max_packet = confirm.max_packet;
            slot.channel.channel_type
        };

        match channel_type {
            ChannelType::Session => self.send_session_followups(transport, local_num)?,
        }
        Ok(())
    }

    fn send_session_followups<T: Transport>(&mut self, transport: &mut T, local_num: u32) -> Result<()> {
        let (remote_num, session) = {
            let slot = self.slot_mut(local_num).expect("just confirmed above");
            (
                slot.channel.remote_num.expect("set by caller"),
                slot.channel.session.clone(),
            )
        };

        if session.pty {
            let mut packet = transport.new_packet()?;
            wire::encode_channel_request_header(&mut packet, remote_num, "pty-req", false)?;
            wire::encode_pty_req_payload(&mut packet, &session.term, session.width, session.height, 0, 0)?;
            transport.send_packet(packet)?;
        }

        let mut packet = transport.new_packet()?;
        match &session.command {
            Some(cmd) => {
                wire::encode_channel_request_header(&mut packet, remote_num, "exec", true)?;
                packet.write_cstring(cmd)?;
            }
            None => {
                wire::encode_channel_request_header(&mut packet, remote_num, "shell", true)?;
            }
        }
        transport.send_packet(packet)?;
        Ok(())
    }

    fn handle_open_failure<T: Transport>(&mut self, _transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let failure = wire::decode_channel_open_failure(r)?;
        let local_num = failure.recipient;
        let reason = format!(
            "{}: {}",
            wire::open_failure_reason_str(failure.reason),
            failure.description.to_string_lossy()
        );
        if let Some(slot) = self.slot_mut(local_num) {
            slot.handler.on_open_failed(&mut slot.channel, &reason);
            slot.channel.status = ChannelStatus::Closed;
        } else {
            return Err(Error::protocol(format!(
                "CHANNEL_OPEN_FAILURE for unknown channel {local_num}"
            )));
        }
        Ok(())
    }

    fn handle_channel_success<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let local_num = wire::decode_recipient_only(r)?;
        let slot = self
            .slot_mut(local_num)
            .ok_or_else(|| Error::protocol(format!("CHANNEL_SUCCESS for unknown channel {local_num}")))?;
        if slot.channel.status != ChannelStatus::Requested {
            // A later CHANNEL_SUCCESS (e.g. acking setenv) on an already
            // open channel carries no state transition.
            return Ok(());
        }
        slot.channel.status = ChannelStatus::Open;
        let result = slot.handler.on_open(&mut slot.channel, transport);
        if let Err(err) = result {
            log::debug!("channel {local_num} on_open failed: {err}; closing");
            self.close_channel(transport, local_num, true);
        }
        Ok(())
    }

    fn handle_channel_failure<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let local_num = wire::decode_recipient_only(r)?;
        log::debug!("CHANNEL_FAILURE for channel {local_num}; closing");
        self.close_channel(transport, local_num, true);
        Ok(())
    }

    fn handle_window_adjust(&mut self, r: &mut ByteReader) -> Result<()> {
        let (local_num, delta) = wire::decode_window_adjust(r)?;
        if let Some(slot) = self.slot_mut(local_num) {
            slot.channel.remote_window = slot.channel.remote_window.saturating_add(delta);
        }
        // An adjust for an already-closed/unknown channel is harmless noise.
        Ok(())
    }

    fn handle_channel_data<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let (local_num, data) = wire::decode_channel_data(r)?;
        let slot = self
            .slot_mut(local_num)
            .ok_or_else(|| Error::protocol(format!("CHANNEL_DATA for unknown channel {local_num}")))?;

        let len = data.len() as u32;
        if len > slot.channel.local_window {
            return Err(Error::protocol(format!(
                "peer sent {len} bytes of channel data exceeding local window {}",
                slot.channel.local_window
            )));
        }
        slot.channel.local_window -= len;
        slot.handler.on_received(&mut slot.channel, transport, data.as_bytes());

        self.maybe_replenish_window(transport, local_num)
    }

    fn handle_channel_extended_data<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let (local_num, code, data) = wire::decode_channel_extended_data(r)?;
        let slot = self
            .slot_mut(local_num)
            .ok_or_else(|| Error::protocol(format!("CHANNEL_EXTENDED_DATA for unknown channel {local_num}")))?;

        let len = data.len() as u32;
        if len > slot.channel.local_window {
            return Err(Error::protocol(format!(
                "peer sent {len} bytes of extended channel data exceeding local window {}",
                slot.channel.local_window
            )));
        }
        slot.channel.local_window -= len;
        slot.handler.on_received_ext(&mut slot.channel, transport, code, data.as_bytes());

        self.maybe_replenish_window(transport, local_num)
    }

    fn maybe_replenish_window<T: Transport>(&mut self, transport: &mut T, local_num: u32) -> Result<()> {
        let slot = match self.slot_mut(local_num) {
            Some(s) => s,
            None => return Ok(()),
        };
        if slot.channel.local_window > self.limits.replenish_threshold() {
            return Ok(());
        }
        let remote_num = match slot.channel.remote_num {
            Some(n) => n,
            None => return Ok(()),
        };
        let deficit = self.limits.window.saturating_sub(slot.channel.local_window);
        if deficit == 0 {
            return Ok(());
        }
        let mut packet = transport.new_packet()?;
        wire::encode_window_adjust(&mut packet, remote_num, deficit)?;
        transport.send_packet(packet)?;
        slot.channel.local_window = slot.channel.local_window.saturating_add(deficit);
        Ok(())
    }

    fn handle_channel_eof<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let local_num = wire::decode_recipient_only(r)?;
        self.close_channel(transport, local_num, false);
        Ok(())
    }

    fn handle_channel_close<T: Transport>(&mut self, transport: &mut T, r: &mut ByteReader) -> Result<()> {
        let local_num = wire::decode_recipient_only(r)?;
        self.close_channel(transport, local_num, true);
        Ok(())
    }

    /// Idempotent transition to `Closed`. Sends our own `CHANNEL_CLOSE`
    /// if `send_wire_close` is set and we haven't already sent one, and
    /// invokes `on_closed` exactly once, only for channels that reached
    /// `Open` (a channel that never got past `Requested` either already
    /// got `on_open_failed`, or never got to run a callback at all).
    fn close_channel<T: Transport>(&mut self, transport: &mut T, local_num: u32, send_wire_close: bool) {
        let slot = match self.slot_mut(local_num) {
            Some(s) => s,
            None => return,
        };
        if slot.channel.status == ChannelStatus::Closed {
            return;
        }
        let was_open = slot.channel.status == ChannelStatus::Open;

        if send_wire_close && !slot.channel.close_sent {
            if let Some(remote_num) = slot.channel.remote_num {
                if let Ok(mut packet) = transport.new_packet() {
                    if wire::encode_channel_close(&mut packet, remote_num).is_ok() {
                        let _ = transport.send_packet(packet);
                    }
                }
            }
            slot.channel.close_sent = true;
        }

        slot.channel.status = ChannelStatus::Closed;
        if was_open {
            slot.handler.on_closed(&mut slot.channel);
        }
    }

    /// Finalize any channel the host asked to close via [`Channel::close`],
    /// sending its `CHANNEL_CLOSE`, then free every now-`Closed` slot,
    /// returning its `local_num` to the free-id pool so it can be reused
    /// by a later channel.
    fn sweep_closed<T: Transport>(&mut self, transport: &mut T) {
        let wants_close: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| match s {
                Some(slot) if slot.channel.close_requested && slot.channel.status != ChannelStatus::Closed => {
                    Some(idx as u32)
                }
                _ => None,
            })
            .collect();
        for local_num in wants_close {
            self.close_channel(transport, local_num, true);
        }

        for idx in 0..self.slots.len() {
            let is_closed = matches!(
                &self.slots[idx],
                Some(slot) if slot.channel.status == ChannelStatus::Closed
            );
            if is_closed {
                self.free_ids.push(Reverse(idx as u32));
                self.slots[idx] = None;
            }
        }
    }

    fn close_all_and_sweep<T: Transport>(&mut self, transport: &mut T) {
        let local_nums: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.as_ref().map(|_| idx as u32))
            .collect();
        for local_num in local_nums {
            self.close_channel(transport, local_num, true);
        }
        self.sweep_closed(transport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SessionConfig;

    struct NullTransport;
    impl Transport for NullTransport {
        fn new_packet(&mut self) -> Result<ByteBuffer> {
            Ok(ByteBuffer::new())
        }
        fn send_packet(&mut self, _packet: ByteBuffer) -> Result<()> {
            Ok(())
        }
        fn send_flush(&mut self) -> Result<FlushOutcome> {
            Ok(FlushOutcome::Flushed)
        }
        fn send_is_pending(&self) -> bool {
            false
        }
        fn recv_packet(&mut self) -> Result<Option<ByteBuffer>> {
            Ok(None)
        }
        fn as_socket_descriptor(&self) -> SocketDescriptor {
            0
        }
        fn set_non_blocking(&mut self, _non_blocking: bool) -> Result<()> {
            Ok(())
        }
    }

    struct NullHandler;
    impl ChannelHandler for NullHandler {}

    fn open_channel_slot(local_num: u32) -> ChannelSlot {
        let mut channel = Channel::new(local_num, ChannelType::Session, SessionConfig::default());
        channel.status = ChannelStatus::Open;
        ChannelSlot {
            channel,
            handler: Box::new(NullHandler),
        }
    }

    #[test]
    fn local_num_allocation_reuses_freed_ids_before_minting_fresh_ones() {
        let mut engine = ChannelEngine::new(EngineLimits::default());
        let a = engine.alloc_local_num();
        let b = engine.alloc_local_num();
        let c = engine.alloc_local_num();
        assert_eq!((a, b, c), (0, 1, 2));

        engine.insert_slot(a, open_channel_slot(a));
        engine.insert_slot(b, open_channel_slot(b));
        engine.insert_slot(c, open_channel_slot(c));

        let mut transport = NullTransport;
        engine.close_channel(&mut transport, b, false);
        engine.sweep_closed(&mut transport);

        assert_eq!(engine.alloc_local_num(), b);
        assert_eq!(engine.alloc_local_num(), 3);
    }

    #[test]
    fn on_closed_fires_at_most_once_per_channel() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct CountingHandler(Rc<Cell<u32>>);
        impl ChannelHandler for CountingHandler {
            fn on_closed(&mut self, _channel: &mut Channel) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut engine = ChannelEngine::new(EngineLimits::default());
        let local_num = engine.alloc_local_num();
        let count = Rc::new(Cell::new(0));
        let mut channel = Channel::new(local_num, ChannelType::Session, SessionConfig::default());
        channel.status = ChannelStatus::Open;
        engine.insert_slot(
            local_num,
            ChannelSlot {
                channel,
                handler: Box::new(CountingHandler(count.clone())),
            },
        );

        let mut transport = NullTransport;
        engine.close_channel(&mut transport, local_num, false);
        engine.close_channel(&mut transport, local_num, false);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn open_failure_does_not_trigger_on_closed() {
        struct PanicOnClose;
        impl ChannelHandler for PanicOnClose {
            fn on_closed(&mut self, _channel: &mut Channel) {
                panic!("on_closed must not fire for a channel that never reached Open");
            }
        }

        let mut engine = ChannelEngine::new(EngineLimits::default());
        let local_num = engine.alloc_local_num();
        engine.insert_slot(
            local_num,
            ChannelSlot {
                channel: Channel::new(local_num, ChannelType::Session, SessionConfig::default()),
                handler: Box::new(PanicOnClose),
            },
        );

        if let Some(slot) = engine.slot_mut(local_num) {
            slot.handler.on_open_failed(&mut slot.channel, "admin prohibited");
            slot.channel.status = ChannelStatus::Closed;
        }
        engine.sweep_closed(&mut NullTransport);
        assert!(engine.slot_mut(local_num).is_none());
    }
}
