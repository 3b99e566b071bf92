use osal_core::{Error, SocketCount, StreamFlags, StreamParameter};
use osal_net::{NetContext, NetHandle};
use osal_transport::{EmbeddedStack, EmbeddedStream, Readiness, SelectEvent, StackHandle, Stream, WakeEvent};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn setup() -> (StackHandle, NetHandle) {
    let _ = env_logger::builder().is_test(true).try_init();
    (EmbeddedStack::new().unwrap(), NetContext::new_handle())
}

fn wait_for(s: &mut EmbeddedStream, expected: SelectEvent) {
    let r = EmbeddedStream::select(&mut [&mut *s], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Stream { index: 0, event: expected });
}

fn pair(stack: &StackHandle, net: &NetHandle, flags: StreamFlags) -> (EmbeddedStream, EmbeddedStream, EmbeddedStream) {
    let mut l = EmbeddedStream::open_on(stack.clone(), net.clone(), ":0", StreamFlags::LISTEN | flags).unwrap();
    let mut client =
        EmbeddedStream::open_on(stack.clone(), net.clone(), &format!(":{}", l.port()), flags).unwrap();
    wait_for(&mut l, SelectEvent::Accept);
    let accepted = l.accept(StreamFlags::empty()).unwrap().expect("pending connection");
    assert_eq!(accepted.remote, "127.0.0.1");
    wait_for(&mut client, SelectEvent::Connect);
    (l, client, accepted.stream)
}

#[test]
fn listener_gets_ephemeral_port() {
    let (stack, net) = setup();
    let l = EmbeddedStream::open_on(stack, net.clone(), ":0", StreamFlags::LISTEN).unwrap();
    assert!(l.port() >= 49152);
    assert_eq!(net.count(SocketCount::Listening), 1);
}

#[test]
fn ping_echo() {
    let (stack, net) = setup();
    let (_l, mut client, mut server) = pair(&stack, &net, StreamFlags::empty());

    assert_eq!(client.write(b"PING", StreamFlags::empty()).unwrap(), 4);
    wait_for(&mut server, SelectEvent::Read);
    assert_eq!(server.get_parameter(StreamParameter::RxAvailable), 4);
    let mut buf = [0u8; 16];
    let n = server.read(&mut buf, StreamFlags::empty()).unwrap();
    assert_eq!(&buf[..n], b"PING");

    server.write(&buf[..n], StreamFlags::empty()).unwrap();
    wait_for(&mut client, SelectEvent::Read);
    let n = client.read(&mut buf, StreamFlags::empty()).unwrap();
    assert_eq!(&buf[..n], b"PING");
    assert_eq!(net.count(SocketCount::Connected), 2);
}

#[test]
fn nodelay_ring_coalesces_until_flush() {
    let (stack, net) = setup();
    let (_l, mut client, mut server) = pair(&stack, &net, StreamFlags::TCP_NODELAY);

    client.write(b"ab", StreamFlags::empty()).unwrap();
    client.write(b"cd", StreamFlags::empty()).unwrap();
    assert_eq!(client.get_parameter(StreamParameter::TxBuffered), 4);
    let r = EmbeddedStream::select(&mut [&mut server], None, Some(Duration::from_millis(20)), StreamFlags::empty())
        .unwrap();
    assert_eq!(r, Readiness::Timeout);

    client.flush(StreamFlags::empty()).unwrap();
    assert_eq!(client.get_parameter(StreamParameter::TxBuffered), 0);
    wait_for(&mut server, SelectEvent::Read);
    let mut buf = [0u8; 8];
    let n = server.read(&mut buf, StreamFlags::empty()).unwrap();
    assert_eq!(&buf[..n], b"abcd");
}

#[test]
fn window_flow_control_delivers_everything() {
    let (stack, net) = setup();
    let (_l, mut client, mut server) = pair(&stack, &net, StreamFlags::empty());

    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = [0u8; 1000];
    while received.len() < data.len() {
        if sent < data.len() {
            sent += client.write(&data[sent..], StreamFlags::empty()).unwrap();
        }
        let r = EmbeddedStream::select(&mut [&mut client, &mut server], None, WAIT, StreamFlags::empty()).unwrap();
        match r {
            Readiness::Stream { index: 1, event: SelectEvent::Read } => {
                let n = server.read(&mut buf, StreamFlags::empty()).unwrap();
                received.extend_from_slice(&buf[..n]);
            }
            Readiness::Stream { index: 0, event: SelectEvent::Write } => {}
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(received, data);
}

#[test]
fn connect_without_listener_is_refused() {
    let (stack, net) = setup();
    let mut client = EmbeddedStream::open_on(stack, net, ":7001", StreamFlags::empty()).unwrap();
    wait_for(&mut client, SelectEvent::Close);
    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf, StreamFlags::empty()), Err(Error::ConnectionRefused)));
}

#[test]
fn peer_close_after_data() {
    let (stack, net) = setup();
    let (_l, mut client, mut server) = pair(&stack, &net, StreamFlags::empty());

    client.write(b"bye", StreamFlags::empty()).unwrap();
    client.close(StreamFlags::empty());

    wait_for(&mut server, SelectEvent::Read);
    let mut buf = [0u8; 8];
    assert_eq!(server.read(&mut buf, StreamFlags::empty()).unwrap(), 3);
    wait_for(&mut server, SelectEvent::Close);
    assert!(matches!(server.read(&mut buf, StreamFlags::empty()), Err(Error::StreamClosed)));
    assert!(matches!(server.write(b"x", StreamFlags::empty()), Err(Error::StreamClosed)));
}

#[test]
fn closing_listener_ends_unaccepted_connections() {
    let (stack, net) = setup();
    let mut l = EmbeddedStream::open_on(stack.clone(), net.clone(), ":0", StreamFlags::LISTEN).unwrap();
    let mut client = EmbeddedStream::open_on(stack, net.clone(), &format!(":{}", l.port()), StreamFlags::empty()).unwrap();
    wait_for(&mut client, SelectEvent::Connect);

    l.close(StreamFlags::empty());
    wait_for(&mut client, SelectEvent::Close);
    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf, StreamFlags::empty()), Err(Error::StreamClosed)));
    assert_eq!(net.count(SocketCount::Listening), 0);
    assert_eq!(net.count(SocketCount::Connected), 1);
}

#[test]
fn wake_event_interrupts_select() {
    let (stack, net) = setup();
    let mut l = EmbeddedStream::open_on(stack, net, ":0", StreamFlags::LISTEN).unwrap();
    let event = Arc::new(WakeEvent::new().unwrap());
    let setter = Arc::clone(&event);
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        setter.set();
    });
    let r = EmbeddedStream::select(&mut [&mut l], Some(&event), None, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::CustomEvent);
    t.join().unwrap();
}

#[test]
fn multicast_is_not_supported() {
    let (stack, net) = setup();
    let r = EmbeddedStream::open_on(stack, net, ":6000", StreamFlags::UDP_MULTICAST);
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
}

#[test]
fn counters_return_to_zero() {
    let (stack, net) = setup();
    for _ in 0..20 {
        let (l, client, server) = pair(&stack, &net, StreamFlags::empty());
        drop((l, client, server));
    }
    assert_eq!(net.count(SocketCount::Connected), 0);
    assert_eq!(net.count(SocketCount::Listening), 0);
}
