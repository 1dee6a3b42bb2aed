//! Integration tests for fraggle-client.
//!
//! The first half checks framing and codec together; the second half runs
//! real clients against throwaway TCP servers on a `LocalSet`.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use fraggle_client::codec::MsgPackCodec;
use fraggle_client::protocol::{build_frame, FrameBuffer, LENGTH_PREFIX_SIZE};
use fraggle_client::request::RequestRecord;
use fraggle_client::response::flags;
use fraggle_client::{Client, ErrCode, Event, Request, Responder, Response, Value, Verb};

/// Full frame encode/decode cycle with a response record.
#[test]
fn test_frame_with_response_record() {
    let res = Response::new(42, flags::VALID | flags::DONE)
        .with_value("Hello, world!")
        .with_rev(9)
        .with_path("/greeting");

    let frame_bytes = build_frame(&MsgPackCodec::encode(&res).unwrap());

    let mut buffer = FrameBuffer::new();
    let frames = buffer.push(&frame_bytes).unwrap();

    assert_eq!(frames.len(), 1);
    let decoded = MsgPackCodec::decode_response(&frames[0]).unwrap();
    assert_eq!(decoded, res);
    assert!(buffer.is_empty());
}

/// Several records in one chunk, split at awkward offsets.
#[test]
fn test_multiple_frames_sequence() {
    let mut all_bytes = Vec::new();
    for tag in 1u32..=5 {
        let res = Response::new(tag, flags::VALID).with_path(format!("/walk/{}", tag));
        all_bytes.extend(build_frame(&MsgPackCodec::encode(&res).unwrap()));
    }

    let mut buffer = FrameBuffer::new();
    let mut decoded = Vec::new();
    for chunk in all_bytes.chunks(7) {
        for frame in buffer.push(chunk).unwrap() {
            decoded.push(MsgPackCodec::decode_response(&frame).unwrap());
        }
    }

    assert_eq!(decoded.len(), 5);
    for (i, res) in decoded.iter().enumerate() {
        let tag = i as u32 + 1;
        assert_eq!(res.tag, tag);
        assert_eq!(res.path.as_deref(), Some(format!("/walk/{}", tag).as_str()));
    }
}

/// Service errors survive the wire and surface as typed errors.
#[test]
fn test_error_response() {
    let res = Response::new(3, flags::VALID | flags::DONE).with_err(ErrCode::RevMismatch, Some("rev 4"));
    let frame_bytes = build_frame(&MsgPackCodec::encode(&res).unwrap());

    let mut buffer = FrameBuffer::new();
    let frames = buffer.push(&frame_bytes).unwrap();
    let decoded = MsgPackCodec::decode_response(&frames[0]).unwrap();

    assert_eq!(decoded.err_code, Some(ErrCode::RevMismatch));
    let err = decoded.error().unwrap();
    assert!(err.to_string().contains("rev 4"));
}

/// Nested values delivered as named events.
#[test]
fn test_responder_from_named_events() {
    let out = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = out.clone();
    let mut responder = Responder::new(move |v| sink.borrow_mut().push(v));

    for (name, payload) in [
        ("array", &b"2"[..]),
        ("value", &b"x"[..]),
        ("array", &b"1"[..]),
        ("error", &b"nope"[..]),
    ] {
        responder
            .receive_event(name, Bytes::copy_from_slice(payload))
            .unwrap();
    }
    responder.receive(Event::Status("OK".into()));

    assert_eq!(
        *out.borrow(),
        vec![
            Value::Array(vec![
                Value::Data(Bytes::from_static(b"x")),
                Value::Array(vec![Value::Error("nope".into())]),
            ]),
            Value::Status("OK".into()),
        ]
    );
}

// -------------------------------------------------------------------------
// TCP
// -------------------------------------------------------------------------

const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_request(stream: &mut TcpStream) -> Option<RequestRecord> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await.ok()?;
    let mut record = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut record).await.ok()?;
    MsgPackCodec::decode_request(&record).ok()
}

async fn write_response(stream: &mut TcpStream, res: &Response) {
    let frame = build_frame(&MsgPackCodec::encode(res).unwrap());
    stream.write_all(&frame).await.unwrap();
}

/// Server answering every request with `value` at revision `rev`.
async fn serve_value(listener: TcpListener, value: &'static str, rev: i64) {
    let (mut stream, _) = listener.accept().await.unwrap();
    while let Some(req) = read_request(&mut stream).await {
        let res = Response::new(req.tag, flags::VALID | flags::DONE)
            .with_value(value)
            .with_rev(rev);
        write_response(&mut stream, &res).await;
    }
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[derive(Debug)]
enum Outcome {
    Valid(Response),
    Error(String),
    Done,
}

fn observed(req: Request, tx: mpsc::UnboundedSender<Outcome>) -> Request {
    let (v, e) = (tx.clone(), tx.clone());
    req.on_valid(move |res| {
        let _ = v.send(Outcome::Valid(res.clone()));
    })
    .on_error(move |err| {
        let _ = e.send(Outcome::Error(err.to_string()));
    })
    .on_done(move || {
        let _ = tx.send(Outcome::Done);
    })
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    loop {
        let next = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for request to resolve")
            .expect("callbacks dropped before done");
        let done = matches!(next, Outcome::Done);
        outcomes.push(next);
        if done {
            return outcomes;
        }
    }
}

#[tokio::test]
async fn test_tcp_get_roundtrip() {
    let (listener, addr) = listener().await;
    tokio::spawn(serve_value(listener, "bar", 3));

    LocalSet::new()
        .run_until(async move {
            let client = Client::builder().addr(addr).build().unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let req = client
                .resend(observed(Request::new(Verb::Get).path("/foo"), tx))
                .unwrap();
            let outcomes = collect(&mut rx).await;

            assert_eq!(outcomes.len(), 2);
            match &outcomes[0] {
                Outcome::Valid(res) => {
                    assert_eq!(res.value.as_deref(), Some(&b"bar"[..]));
                    assert_eq!(res.rev, Some(3));
                }
                other => panic!("unexpected outcome {:?}", other),
            }
            assert_eq!(req.rev(), Some(3));
            assert!(req.is_resolved());

            client.close();
        })
        .await;
}

#[tokio::test]
async fn test_tcp_readonly_fails_over_to_next_server() {
    let (readonly, readonly_addr) = listener().await;
    let (writable, writable_addr) = listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = readonly.accept().await.unwrap();
        while let Some(req) = read_request(&mut stream).await {
            let res = Response::new(req.tag, flags::VALID | flags::DONE)
                .with_err(ErrCode::Readonly, Some("elsewhere"));
            write_response(&mut stream, &res).await;
        }
    });
    tokio::spawn(serve_value(writable, "", 6));

    LocalSet::new()
        .run_until(async move {
            let client = Client::builder()
                .addrs([readonly_addr, writable_addr.clone()])
                .build()
                .unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            client
                .idemp(observed(
                    Request::new(Verb::Set).path("/foo").value("x").rev(5),
                    tx,
                ))
                .unwrap();
            let outcomes = collect(&mut rx).await;

            assert!(outcomes.iter().all(|o| !matches!(o, Outcome::Error(_))));
            assert!(matches!(&outcomes[0], Outcome::Valid(res) if res.rev == Some(6)));
            assert_eq!(client.current_addr(), writable_addr);
            assert!(client.addrs().is_empty());

            client.close();
        })
        .await;
}

#[tokio::test]
async fn test_tcp_dropped_connection_replays_resend() {
    let (flaky, flaky_addr) = listener().await;
    let (steady, steady_addr) = listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = flaky.accept().await.unwrap();
        // read the request, then hang up without answering
        let _ = read_request(&mut stream).await;
    });
    tokio::spawn(serve_value(steady, "baz", 11));

    LocalSet::new()
        .run_until(async move {
            let client = Client::builder()
                .addrs([flaky_addr, steady_addr.clone()])
                .build()
                .unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            client
                .resend(observed(Request::new(Verb::Get).path("/bar"), tx))
                .unwrap();
            let outcomes = collect(&mut rx).await;

            assert_eq!(outcomes.len(), 2);
            assert!(matches!(
                &outcomes[0],
                Outcome::Valid(res) if res.value.as_deref() == Some(&b"baz"[..])
            ));
            assert_eq!(client.current_addr(), steady_addr);

            client.close();
        })
        .await;
}

#[tokio::test]
async fn test_tcp_unreachable_send_is_disconnected() {
    // bind then drop so the port refuses connections
    let (gone, gone_addr) = listener().await;
    drop(gone);
    let (live, live_addr) = listener().await;
    tokio::spawn(serve_value(live, "ok", 1));

    LocalSet::new()
        .run_until(async move {
            let client = Client::builder()
                .addrs([gone_addr, live_addr.clone()])
                .build()
                .unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            client
                .send(observed(Request::new(Verb::Nop), tx))
                .unwrap();
            let outcomes = collect(&mut rx).await;

            assert_eq!(outcomes.len(), 2);
            assert!(matches!(&outcomes[0], Outcome::Error(msg) if msg == "Disconnected"));
            assert_eq!(client.current_addr(), live_addr);

            client.close();
        })
        .await;
}
