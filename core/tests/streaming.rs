//! Large payloads must flow through build, dispatch and the transport without
//! buffering.

mod common;

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use wxapi_core::{
    ApiError, Arg, ArgKind, BodyMode, ClientConfig, Dispatcher, Executor, FileKind, HttpMethod,
    ParameterBinding, RawResponse, ReqwestTransport, RequestBuilder, RequestDescriptor,
    SerializationPolicy, StaticCredential, Transport, WireBody, WireRequest,
};

const SIZE: u64 = 128 * 1024 * 1024;

/// Produces `SIZE` bytes on demand and records how many were pulled.
struct Generator {
    produced: Arc<AtomicU64>,
}

impl Read for Generator {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let done = self.produced.load(Ordering::SeqCst);
        let n = buf.len().min((SIZE - done) as usize);
        buf[..n].fill(b'x');
        self.produced.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

struct Unreachable;

impl Transport for Unreachable {
    fn send(&self, _request: WireRequest) -> Result<RawResponse, ApiError> {
        Err(ApiError::Transport("not connected".to_string()))
    }
}

fn builder() -> RequestBuilder {
    RequestBuilder::new(
        "https://api.example.com",
        Arc::new(StaticCredential::new("tok")),
        SerializationPolicy::Degrade,
    )
}

fn upload() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Post, "/cgi-bin/media/upload")
        .body_mode(BodyMode::Form)
        .param(ParameterBinding::form_file(0, FileKind::Stream).named("media"))
        .build()
        .unwrap()
}

#[test]
fn multipart_upload_is_untouched_until_sent() {
    let produced = Arc::new(AtomicU64::new(0));
    let request = builder()
        .build(
            &upload(),
            vec![Arg::stream(Generator {
                produced: Arc::clone(&produced),
            })],
        )
        .unwrap();
    let wire = Dispatcher::new(Arc::new(Unreachable)).lower(request).unwrap();
    assert!(matches!(wire.body, WireBody::Multipart(_)));
    assert_eq!(produced.load(Ordering::SeqCst), 0);
}

#[test]
fn multipart_upload_is_pulled_as_the_server_reads() {
    let produced = Arc::new(AtomicU64::new(0));
    let (paused_tx, paused_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let mut paused = false;
    let (addr, server) = common::serve_once(false, move |received| {
        if !paused && received >= 1024 * 1024 {
            paused = true;
            paused_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
        }
    });

    let client = {
        let produced = Arc::clone(&produced);
        thread::spawn(move || {
            let config = ClientConfig::new(&format!("http://{addr}"));
            let exec = Executor::new(
                &config,
                Arc::new(StaticCredential::new("tok")),
                Arc::new(ReqwestTransport::new(None).unwrap()),
            );
            exec.execute(&upload(), vec![Arg::stream(Generator { produced })])
                .map(|value| value.into_json::<serde_json::Value>())
        })
    };

    paused_rx.recv().unwrap();
    // The server has read 1 MiB and stopped; the client may only be ahead
    // by what fits in its send buffers.
    let in_flight = produced.load(Ordering::SeqCst);
    assert!(in_flight < SIZE / 4, "pulled {in_flight} bytes ahead of the server");
    resume_tx.send(()).unwrap();

    let reply = client.join().unwrap().unwrap().unwrap();
    assert_eq!(reply["errcode"], 0);
    server.join().unwrap();
    assert_eq!(produced.load(Ordering::SeqCst), SIZE);
}

#[test]
fn raw_json_body_stream_is_passed_through() {
    let produced = Arc::new(AtomicU64::new(0));
    let d = RequestDescriptor::builder(HttpMethod::Post, "/cgi-bin/raw")
        .body_mode(BodyMode::Json)
        .param(ParameterBinding::json_body(0, ArgKind::FileLike(FileKind::Stream)))
        .build()
        .unwrap();

    let request = builder()
        .build(
            &d,
            vec![Arg::stream(Generator {
                produced: Arc::clone(&produced),
            })],
        )
        .unwrap();
    let wire = Dispatcher::new(Arc::new(Unreachable)).lower(request).unwrap();
    assert_eq!(produced.load(Ordering::SeqCst), 0);

    let WireBody::Stream { mut reader, length } = wire.body else {
        panic!("expected a streamed body");
    };
    assert_eq!(length, None);
    let mut chunk = [0u8; 1024];
    reader.read_exact(&mut chunk).unwrap();
    assert_eq!(produced.load(Ordering::SeqCst), 1024);
}
