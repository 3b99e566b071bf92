use osal_core::{Error, Progress, SocketCount, StreamFlags, StreamParameter, DEFAULT_RING_BUFFER_SIZE};
use osal_net::{NetContext, NetHandle};
use osal_transport::{Readiness, SelectEvent, SocketStream, Stream, WakeEvent};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn listener(net: &NetHandle, flags: StreamFlags) -> (SocketStream, u16) {
    let l = SocketStream::open_in(net.clone(), "127.0.0.1:0", None, StreamFlags::LISTEN | flags).unwrap();
    let port = l.local_addr().unwrap().port();
    (l, port)
}

fn connect(net: &NetHandle, port: u16, flags: StreamFlags) -> SocketStream {
    SocketStream::open_in(net.clone(), &format!("127.0.0.1:{}", port), None, flags).unwrap()
}

fn accept_one(l: &mut SocketStream) -> SocketStream {
    let r = SocketStream::select(&mut [&mut *l], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Stream { index: 0, event: SelectEvent::Accept });
    let accepted = l.accept(StreamFlags::empty()).unwrap().expect("pending connection");
    assert_eq!(accepted.remote, "127.0.0.1");
    accepted.stream
}

/// Read exactly `n` bytes, waiting in select between partial reads
fn read_n(s: &mut SocketStream, n: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::with_capacity(n);
    let mut buf = [0u8; 4096];
    while out.len() < n {
        assert!(Instant::now() < deadline, "timed out after {} of {} bytes", out.len(), n);
        let want = (n - out.len()).min(buf.len());
        let got = s.read(&mut buf[..want], StreamFlags::empty()).unwrap();
        if got == 0 {
            SocketStream::select(&mut [&mut *s], None, Some(Duration::from_millis(100)), StreamFlags::empty())
                .unwrap();
        }
        out.extend_from_slice(&buf[..got]);
    }
    out
}

/// Write everything, flushing and waiting while the stream pushes back
fn write_all(s: &mut SocketStream, mut data: &[u8]) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !data.is_empty() {
        assert!(Instant::now() < deadline, "write stalled");
        let n = s.write(data, StreamFlags::empty()).unwrap();
        data = &data[n..];
        s.flush(StreamFlags::empty()).unwrap();
        if n == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    while s.get_parameter(StreamParameter::TxBuffered) > 0 {
        assert!(Instant::now() < deadline, "flush stalled");
        s.flush(StreamFlags::empty()).unwrap();
    }
}

#[test]
fn ping_echo_over_nodelay_connection() {
    init_log();
    let net = NetContext::new_handle();
    // Wildcard bind on an ephemeral port
    let mut l = SocketStream::open_in(net.clone(), ":0", None, StreamFlags::LISTEN | StreamFlags::TCP_NODELAY).unwrap();
    let port = l.local_addr().unwrap().port();
    let mut client = connect(&net, port, StreamFlags::TCP_NODELAY);
    let mut server = accept_one(&mut l);

    assert_eq!(client.write(b"PING", StreamFlags::empty()).unwrap(), 4);
    assert_eq!(client.get_parameter(StreamParameter::TxBuffered), 4);

    // Nothing leaves before flush
    let r = SocketStream::select(&mut [&mut server], None, Some(Duration::from_millis(50)), StreamFlags::empty())
        .unwrap();
    assert_eq!(r, Readiness::Timeout);
    let mut buf = [0u8; 8];
    assert_eq!(server.read(&mut buf, StreamFlags::empty()).unwrap(), 0);

    write_all(&mut client, b"");

    let r = SocketStream::select(&mut [&mut server], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Stream { index: 0, event: SelectEvent::Read });
    let ping = read_n(&mut server, 4);
    assert_eq!(ping, b"PING");

    write_all(&mut server, &ping);
    assert_eq!(read_n(&mut client, 4), b"PING");

    client.close(StreamFlags::empty());
    server.close(StreamFlags::empty());
    l.close(StreamFlags::empty());
    assert_eq!(net.count(SocketCount::Connected), 0);
    assert_eq!(net.count(SocketCount::Listening), 0);
}

#[test]
fn ring_buffer_wraps_without_losing_bytes() {
    let net = NetContext::new_handle();
    let (mut l, port) = listener(&net, StreamFlags::empty());
    let mut client = connect(&net, port, StreamFlags::TCP_NODELAY);
    let mut server = accept_one(&mut l);

    let chunk = DEFAULT_RING_BUFFER_SIZE - 1;
    for cycle in 0..10u8 {
        let data: Vec<u8> = (0..chunk).map(|i| (i as u8).wrapping_mul(7).wrapping_add(cycle)).collect();
        write_all(&mut client, &data);
        assert_eq!(read_n(&mut server, chunk), data, "cycle {}", cycle);
    }
}

#[test]
fn write_into_full_ring_is_short() {
    let net = NetContext::new_handle();
    let (mut l, port) = listener(&net, StreamFlags::empty());
    let mut client = connect(&net, port, StreamFlags::TCP_NODELAY);
    let _server = accept_one(&mut l);

    let data = vec![0x5a; 2000];
    let taken = client.write(&data, StreamFlags::empty()).unwrap();
    assert_eq!(taken, DEFAULT_RING_BUFFER_SIZE - 1);
    assert_eq!(client.write(&data[taken..], StreamFlags::empty()).unwrap(), 0);
    assert_eq!(client.get_parameter(StreamParameter::TxBuffered), taken as i64);
}

#[test]
fn zero_timeout_select_repeats_until_consumed() {
    let net = NetContext::new_handle();
    let (mut l, port) = listener(&net, StreamFlags::empty());
    let mut client = connect(&net, port, StreamFlags::empty());
    let mut server = accept_one(&mut l);

    write_all(&mut client, b"hello");
    let first = SocketStream::select(&mut [&mut l, &mut server], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(first, Readiness::Stream { index: 1, event: SelectEvent::Read });
    for _ in 0..3 {
        let again =
            SocketStream::select(&mut [&mut l, &mut server], None, Some(Duration::ZERO), StreamFlags::empty()).unwrap();
        assert_eq!(again, first);
    }

    assert_eq!(read_n(&mut server, 5), b"hello");
    let idle = SocketStream::select(&mut [&mut l, &mut server], None, Some(Duration::ZERO), StreamFlags::empty()).unwrap();
    assert_eq!(idle, Readiness::Timeout);
}

#[test]
fn open_close_keeps_counters_balanced() {
    let net = NetContext::new_handle();
    for _ in 0..1000 {
        let (mut l, _) = listener(&net, StreamFlags::empty());
        assert_eq!(net.count(SocketCount::Listening), 1);
        l.close(StreamFlags::empty());
    }
    assert_eq!(net.count(SocketCount::Listening), 0);

    let (mut l, port) = listener(&net, StreamFlags::empty());
    for _ in 0..50 {
        let client = connect(&net, port, StreamFlags::empty());
        let server = accept_one(&mut l);
        assert_eq!(net.count(SocketCount::Connected), 2);
        // Dropping releases like close
        drop(client);
        drop(server);
    }
    assert_eq!(net.count(SocketCount::Connected), 0);
}

#[test]
fn connect_to_closed_port_is_refused() {
    let net = NetContext::new_handle();
    let (mut l, port) = listener(&net, StreamFlags::empty());
    l.close(StreamFlags::empty());

    let mut client = match SocketStream::open_in(net.clone(), &format!("127.0.0.1:{}", port), None, StreamFlags::empty()) {
        Ok(s) => s,
        Err(e) => {
            assert!(matches!(e, Error::ConnectionRefused), "{:?}", e);
            return;
        }
    };
    let r = SocketStream::select(&mut [&mut client], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Stream { index: 0, event: SelectEvent::Close });
    let mut buf = [0u8; 8];
    assert!(matches!(client.read(&mut buf, StreamFlags::empty()), Err(Error::ConnectionRefused)));

    // A failed stream still closes once and gives back its counter
    assert_eq!(net.count(SocketCount::Connected), 1);
    client.close(StreamFlags::empty());
    assert_eq!(net.count(SocketCount::Connected), 0);
}

#[test]
fn peer_close_reads_as_stream_closed() {
    let net = NetContext::new_handle();
    let (mut l, port) = listener(&net, StreamFlags::empty());
    let mut client = connect(&net, port, StreamFlags::empty());
    let mut server = accept_one(&mut l);

    client.close(StreamFlags::empty());
    SocketStream::select(&mut [&mut server], None, WAIT, StreamFlags::empty()).unwrap();
    let mut buf = [0u8; 8];
    assert!(matches!(server.read(&mut buf, StreamFlags::empty()), Err(Error::StreamClosed)));
}

#[test]
fn wake_event_interrupts_select() {
    let net = NetContext::new_handle();
    let (mut l, _) = listener(&net, StreamFlags::empty());
    let event = Arc::new(WakeEvent::new().unwrap());

    let setter = Arc::clone(&event);
    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        setter.set();
    });
    let r = SocketStream::select(&mut [&mut l], Some(&event), None, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::CustomEvent);
    t.join().unwrap();

    // A set before select is not lost, and is reported once
    event.set();
    let r = SocketStream::select(&mut [&mut l], Some(&event), WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::CustomEvent);
    let r = SocketStream::select(&mut [&mut l], Some(&event), Some(Duration::from_millis(20)), StreamFlags::empty())
        .unwrap();
    assert_eq!(r, Readiness::Timeout);
}

#[test]
fn select_times_out_on_idle_streams() {
    let net = NetContext::new_handle();
    let (mut l, _) = listener(&net, StreamFlags::empty());
    let started = Instant::now();
    let r = SocketStream::select(&mut [&mut l], None, Some(Duration::from_millis(50)), StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(45));
}

#[test]
fn accept_without_pending_connection() {
    let net = NetContext::new_handle();
    let (mut l, _) = listener(&net, StreamFlags::empty());
    assert!(l.accept(StreamFlags::empty()).unwrap().is_none());
}

#[test]
fn timeout_parameters_round_trip() {
    let net = NetContext::new_handle();
    let (mut l, _) = listener(&net, StreamFlags::empty());
    assert_eq!(l.get_parameter(StreamParameter::ReadTimeoutMs), 0);
    l.set_parameter(StreamParameter::ReadTimeoutMs, 250);
    assert_eq!(l.get_parameter(StreamParameter::ReadTimeoutMs), 250);
    assert_eq!(l.get_parameter(StreamParameter::RxAvailable), -1);
    l.set_parameter(StreamParameter::TxBuffered, 9);
    assert_eq!(l.get_parameter(StreamParameter::TxBuffered), 0);
}

#[test]
fn multicast_round_trip_on_loopback() {
    init_log();
    let net = NetContext::new_handle();
    let group = Some("239.255.42.99");
    let mut rx = SocketStream::open_in(
        net.clone(),
        "127.0.0.1:47399",
        group,
        StreamFlags::UDP_MULTICAST | StreamFlags::LISTEN,
    )
    .unwrap();
    let mut tx = SocketStream::open_in(net.clone(), "127.0.0.1:47399", group, StreamFlags::UDP_MULTICAST).unwrap();
    assert_eq!(net.count(SocketCount::Udp), 2);

    let mut buf = [0u8; 64];
    assert!(rx.receive_packet(&mut buf, StreamFlags::empty()).unwrap().is_none());

    assert_eq!(tx.send_packet(b"hello", StreamFlags::empty()).unwrap(), Progress::Done);
    let r = SocketStream::select(&mut [&mut rx], None, WAIT, StreamFlags::empty()).unwrap();
    assert_eq!(r, Readiness::Stream { index: 0, event: SelectEvent::Read });
    let packet = rx.receive_packet(&mut buf, StreamFlags::empty()).unwrap().expect("queued datagram");
    assert_eq!(&buf[..packet.len], b"hello");
    assert_eq!(packet.remote, "127.0.0.1");

    // Datagram calls on the wrong side of the pair are refused
    assert!(matches!(rx.send_packet(b"x", StreamFlags::empty()), Err(Error::InvalidArgument(_))));

    tx.close(StreamFlags::empty());
    rx.close(StreamFlags::empty());
    assert_eq!(net.count(SocketCount::Udp), 0);
}

#[test]
fn multicast_sender_ignores_hint_of_other_family() {
    init_log();
    let net = NetContext::new_handle();
    let tx = SocketStream::open_in(net.clone(), "[::1]:47398", Some("239.255.42.98"), StreamFlags::UDP_MULTICAST)
        .unwrap();
    assert!(!tx.is_ipv6());
    assert_eq!(net.count(SocketCount::Udp), 1);
    drop(tx);
    assert_eq!(net.count(SocketCount::Udp), 0);

    let bad = SocketStream::open_in(net.clone(), ":47398", Some("10.0.0.1"), StreamFlags::UDP_MULTICAST);
    assert!(matches!(bad, Err(Error::AddressParse(_))));
    assert_eq!(net.count(SocketCount::Udp), 0);
}
