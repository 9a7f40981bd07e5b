//! End-to-end scenarios driving `ChannelEngine` over a `MockTransport`.

mod common;

use common::{
    channel_data, channel_data_with_inflated_length, channel_success, decode, open_confirmation,
    open_failure, MockTransport,
};
use filedescriptor::AsRawSocketDescriptor;
use ssh_channel_mux::{
    Channel, ChannelConfig, ChannelEngine, ChannelHandler, EngineLimits, Error, Interest, Result,
    SessionConfig, SocketDescriptor, Transport, DEFAULT_WINDOW,
};
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;

#[test]
fn scenario_one_channel_sends_open_pty_req_shell_then_fires_open() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_confirmation(0, 7, 131_072, 32_768));
    transport.push_inbound(channel_success(0));

    struct Handler {
        opened: Rc<Cell<u32>>,
    }
    impl ChannelHandler for Handler {
        fn on_open(&mut self, channel: &mut Channel, _transport: &mut dyn Transport) -> Result<()> {
            self.opened.set(self.opened.get() + 1);
            channel.close();
            Ok(())
        }
    }

    let opened = Rc::new(Cell::new(0));
    let handler = Box::new(Handler { opened: opened.clone() });
    let config = ChannelConfig::session(SessionConfig::default(), handler);

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config]).unwrap();

    assert_eq!(opened.get(), 1);
    assert!(transport.sent.len() >= 3);

    let open = decode::channel_open(&transport.sent[0]);
    assert_eq!(open.channel_type, "session");
    assert_eq!(open.sender, 0);
    assert_eq!(open.window, 262_144);
    assert_eq!(open.max_packet, 65_536);

    let pty_req = decode::channel_request(&transport.sent[1]);
    assert_eq!(pty_req.recipient, 7);
    assert_eq!(pty_req.name, "pty-req");
    assert!(!pty_req.want_reply);
    let pty_payload = decode::pty_req_payload(&pty_req.tail);
    assert_eq!(pty_payload.term, "xterm");
    assert_eq!(pty_payload.cols, 80);
    assert_eq!(pty_payload.rows, 24);

    let shell_req = decode::channel_request(&transport.sent[2]);
    assert_eq!(shell_req.recipient, 7);
    assert_eq!(shell_req.name, "shell");
    assert!(shell_req.want_reply);
}

#[test]
fn scenario_open_failure_fires_open_failed_and_closes_without_a_wire_close() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_failure(0, 2, "admin prohibited"));

    struct Handler {
        reason: Rc<RefCell<Option<String>>>,
    }
    impl ChannelHandler for Handler {
        fn on_open_failed(&mut self, _channel: &mut Channel, reason: &str) {
            *self.reason.borrow_mut() = Some(reason.to_string());
        }
    }

    let reason = Rc::new(RefCell::new(None));
    let handler = Box::new(Handler { reason: reason.clone() });
    let config = ChannelConfig::session(SessionConfig::default(), handler);

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config]).unwrap();

    assert!(reason.borrow().as_ref().unwrap().contains("admin prohibited"));
    // remote_num was never learned, so there is nothing to address a
    // CHANNEL_CLOSE to: only the original CHANNEL_OPEN was ever sent.
    assert_eq!(transport.sent.len(), 1);
}

#[test]
fn scenario_channel_data_delivers_payload_and_shrinks_local_window() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_confirmation(0, 7, 131_072, 32_768));
    transport.push_inbound(channel_success(0));
    transport.push_inbound(channel_data(0, b"hello"));

    struct Handler {
        received: Rc<RefCell<Vec<u8>>>,
        window_after: Rc<Cell<u32>>,
    }
    impl ChannelHandler for Handler {
        fn on_received(&mut self, channel: &mut Channel, _transport: &mut dyn Transport, data: &[u8]) {
            self.received.borrow_mut().extend_from_slice(data);
            self.window_after.set(channel.local_window());
            channel.close();
        }
    }

    let received = Rc::new(RefCell::new(Vec::new()));
    let window_after = Rc::new(Cell::new(0));
    let handler = Box::new(Handler {
        received: received.clone(),
        window_after: window_after.clone(),
    });
    let config = ChannelConfig::session(SessionConfig::default(), handler);

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config]).unwrap();

    assert_eq!(&*received.borrow(), b"hello");
    assert_eq!(window_after.get(), DEFAULT_WINDOW - 5);
}

#[test]
fn scenario_two_channels_each_fire_fd_ready_exactly_once() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_confirmation(0, 100, 131_072, 32_768));
    transport.push_inbound(open_confirmation(1, 101, 131_072, 32_768));
    transport.push_inbound(channel_success(0));
    transport.push_inbound(channel_success(1));

    struct Handler {
        fd: SocketDescriptor,
        fires: Rc<Cell<u32>>,
    }
    impl ChannelHandler for Handler {
        fn on_open(&mut self, channel: &mut Channel, _transport: &mut dyn Transport) -> Result<()> {
            channel.watch_fd(self.fd, Interest::READ, Interest::empty())
        }
        fn on_fd_ready(
            &mut self,
            channel: &mut Channel,
            _transport: &mut dyn Transport,
            _fd: SocketDescriptor,
            _interest: Interest,
        ) -> Result<()> {
            self.fires.set(self.fires.get() + 1);
            channel.close();
            Ok(())
        }
    }

    let (sig_a_local, mut sig_a_peer) = filedescriptor::socketpair().unwrap();
    let (sig_b_local, mut sig_b_peer) = filedescriptor::socketpair().unwrap();
    sig_a_peer.write_all(&[0u8]).unwrap();
    sig_b_peer.write_all(&[0u8]).unwrap();

    let fires_a = Rc::new(Cell::new(0));
    let fires_b = Rc::new(Cell::new(0));

    let config_a = ChannelConfig::session(
        SessionConfig {
            pty: false,
            ..Default::default()
        },
        Box::new(Handler {
            fd: sig_a_local.as_socket_descriptor(),
            fires: fires_a.clone(),
        }),
    );
    let config_b = ChannelConfig::session(
        SessionConfig {
            pty: false,
            ..Default::default()
        },
        Box::new(Handler {
            fd: sig_b_local.as_socket_descriptor(),
            fires: fires_b.clone(),
        }),
    );

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config_a, config_b]).unwrap();

    assert_eq!(fires_a.get(), 1);
    assert_eq!(fires_b.get(), 1);
}

#[test]
fn scenario_host_initiated_close_fires_closed_exactly_once() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_confirmation(0, 7, 131_072, 32_768));
    transport.push_inbound(channel_success(0));

    struct Handler {
        opens: Rc<Cell<u32>>,
        closes: Rc<Cell<u32>>,
    }
    impl ChannelHandler for Handler {
        fn on_open(&mut self, channel: &mut Channel, _transport: &mut dyn Transport) -> Result<()> {
            self.opens.set(self.opens.get() + 1);
            channel.close();
            Ok(())
        }
        fn on_closed(&mut self, _channel: &mut Channel) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    let opens = Rc::new(Cell::new(0));
    let closes = Rc::new(Cell::new(0));
    let handler = Box::new(Handler {
        opens: opens.clone(),
        closes: closes.clone(),
    });
    let config = ChannelConfig::session(SessionConfig::default(), handler);

    let mut engine = ChannelEngine::new(EngineLimits::default());
    engine.run(&mut transport, vec![config]).unwrap();

    assert_eq!(opens.get(), 1);
    assert_eq!(closes.get(), 1);
}

#[test]
fn scenario_truncated_channel_data_is_fatal_and_terminates_the_connection() {
    let mut transport = MockTransport::new();
    transport.push_inbound(open_confirmation(0, 7, 131_072, 32_768));
    transport.push_inbound(channel_success(0));
    transport.push_inbound(channel_data_with_inflated_length(0, 1000, b"short"));

    struct Handler;
    impl ChannelHandler for Handler {}

    let config = ChannelConfig::session(SessionConfig::default(), Box::new(Handler));
    let mut engine = ChannelEngine::new(EngineLimits::default());

    let err = engine.run(&mut transport, vec![config]).unwrap_err();
    assert!(matches!(err, Error::WireMalformed(_)));
}
