//! Push-server sink against a real WebSocket client on localhost.
//!
//! The sink is non-blocking, so every test drives it with `poll()` until
//! the expected state is reached or a short deadline passes.

use std::io::{BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use roastmon::app::ports::{LinkStatus, SinkPort};
use roastmon::app::reading::{Reading, TempUnit};
use roastmon::config::PushServerConfig;
use roastmon::sinks::PushServerSink;

const TEXT: u8 = 0x1;
const CLOSE: u8 = 0x8;
const PING: u8 = 0x9;
const PONG: u8 = 0xA;

struct Up;

impl LinkStatus for Up {
    fn is_connected(&self) -> bool {
        true
    }
}

fn started(unit: TempUnit) -> PushServerSink {
    let mut sink = PushServerSink::new(
        PushServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        unit,
    );
    sink.initialize(Some(&Up)).unwrap();
    sink
}

fn poll_until(sink: &mut PushServerSink, mut done: impl FnMut(&PushServerSink) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        sink.poll();
        if done(sink) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Give the sink a moment to service whatever the client sent.
fn pump(sink: &mut PushServerSink) {
    for _ in 0..20 {
        sink.poll();
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Connect, upgrade, and return the client stream.
fn connect(sink: &mut PushServerSink) -> TcpStream {
    let addr: SocketAddr = sink.local_addr().unwrap();
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();
    assert!(poll_until(sink, |s| s.has_client()), "handshake never completed");

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).unwrap();
        response.push(byte[0]);
    }
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 101"));
    assert!(text.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    client
}

fn send_masked(client: &mut TcpStream, opcode: u8, payload: &[u8]) {
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    client.write_all(&frame).unwrap();
}

/// Read one unmasked server frame.
fn recv(client: &mut impl Read) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).unwrap();
    assert_eq!(head[1] & 0x80, 0, "server frames are unmasked");
    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            client.read_exact(&mut ext).unwrap();
            u16::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    client.read_exact(&mut payload).unwrap();
    (head[0] & 0x0F, payload)
}

fn recv_json(client: &mut impl Read) -> serde_json::Value {
    let (opcode, payload) = recv(client);
    assert_eq!(opcode, TEXT);
    serde_json::from_slice(&payload).unwrap()
}

#[test]
fn pushes_readings_with_increasing_ids() {
    let mut sink = started(TempUnit::Celsius);
    let mut client = connect(&mut sink);

    for (i, t) in [150.5_f32, 151.0, 151.75].into_iter().enumerate() {
        sink.output_reading(&Reading::valid(t, i as f64)).unwrap();
        let msg = recv_json(&mut client);
        assert_eq!(msg["id"], (i + 1) as u64);
        assert_eq!(msg["data"]["temp1"].as_f64().unwrap() as f32, t);
        assert_eq!(msg["data"]["temp2"].as_f64().unwrap(), 0.0);
    }
    assert_eq!(sink.next_id(), 4);
    sink.cleanup();
}

#[test]
fn fahrenheit_unit_is_pushed() {
    let mut sink = started(TempUnit::Fahrenheit);
    let mut client = connect(&mut sink);

    sink.output_reading(&Reading::valid(100.0, 0.0)).unwrap();
    let msg = recv_json(&mut client);
    assert!((msg["data"]["temp1"].as_f64().unwrap() - 212.0).abs() < 0.01);
    sink.cleanup();
}

#[test]
fn ping_is_answered_with_pong() {
    let mut sink = started(TempUnit::Celsius);
    let mut client = connect(&mut sink);

    send_masked(&mut client, PING, b"beans");
    pump(&mut sink);
    let (opcode, payload) = recv(&mut client);
    assert_eq!(opcode, PONG);
    assert_eq!(payload, b"beans");
    sink.cleanup();
}

#[test]
fn request_is_answered_with_its_own_id() {
    let mut sink = started(TempUnit::Celsius);
    let mut client = connect(&mut sink);

    sink.output_reading(&Reading::valid(200.25, 1.0)).unwrap();
    assert_eq!(recv_json(&mut client)["id"], 1);

    send_masked(&mut client, TEXT, br#"{"command":"getData","id":4242}"#);
    pump(&mut sink);
    let reply = recv_json(&mut client);
    assert_eq!(reply["id"], 4242);
    assert_eq!(reply["data"]["temp1"].as_f64().unwrap() as f32, 200.25);

    // Replies sit outside the push sequence.
    assert_eq!(sink.next_id(), 2);
    sink.cleanup();
}

#[test]
fn client_close_frees_the_slot() {
    let mut sink = started(TempUnit::Celsius);
    let mut client = connect(&mut sink);

    send_masked(&mut client, CLOSE, &[]);
    assert!(poll_until(&mut sink, |s| !s.has_client()));
    let (opcode, _) = recv(&mut client);
    assert_eq!(opcode, CLOSE);

    // No client: readings are dropped quietly and ids do not move.
    let before = sink.next_id();
    sink.output_reading(&Reading::valid(150.0, 5.0)).unwrap();
    assert_eq!(sink.next_id(), before);

    // A second client is accepted and the sequence continues.
    let mut second = connect(&mut sink);
    sink.output_reading(&Reading::valid(150.0, 6.0)).unwrap();
    assert_eq!(recv_json(&mut second)["id"], before);
    assert_eq!(sink.clients_served(), 2);
    sink.cleanup();
}

#[test]
fn stalled_client_still_receives_whole_frames() {
    let mut sink = started(TempUnit::Celsius);
    let client = connect(&mut sink);

    // The client reads nothing until the socket buffers are full and a
    // reading is refused.
    let mut refused = false;
    for i in 0..10_000_000u32 {
        if sink.output_reading(&Reading::valid(150.5, f64::from(i))).is_err() {
            refused = true;
            break;
        }
    }
    assert!(refused, "socket never filled up");
    assert!(sink.has_client());
    assert!(sink.pending_bytes() > 0);
    let committed = sink.next_id() - 1;
    let expected_last = committed + 5;

    let reader = std::thread::spawn(move || {
        let mut stream = BufReader::new(client);
        let mut expected_id = 1;
        while expected_id <= expected_last {
            let msg = recv_json(&mut stream);
            assert_eq!(msg["id"], expected_id);
            expected_id += 1;
        }
        expected_id - 1
    });

    assert!(poll_until(&mut sink, |s| s.pending_bytes() == 0), "backlog never drained");
    let mut pushed = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while pushed < 5 && Instant::now() < deadline {
        sink.poll();
        if sink.output_reading(&Reading::valid(151.0, 0.0)).is_ok() {
            pushed += 1;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(pushed, 5);
    assert!(poll_until(&mut sink, |s| s.pending_bytes() == 0));

    assert_eq!(reader.join().unwrap(), expected_last);
    assert_eq!(sink.next_id(), expected_last + 1);
    sink.cleanup();
}
