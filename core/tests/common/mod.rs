//! A one-shot HTTP/1.1 listener that records exactly what reached the wire.

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};

pub struct Captured {
    /// Request line and headers, without the blank line.
    pub head: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

fn read_line(reader: &mut impl BufRead) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

fn consume(reader: &mut impl Read, n: u64, keep: bool, body: &mut Vec<u8>) {
    let mut limited = reader.by_ref().take(n);
    if keep {
        limited.read_to_end(body).unwrap();
    } else {
        io::copy(&mut limited, &mut io::sink()).unwrap();
    }
}

/// Accept one request and answer `{"errcode":0}`.
///
/// `on_progress` sees the running count of body bytes after every chunk; it
/// may block to hold the client back. With `keep_body` false the body is
/// discarded as it arrives.
pub fn serve_once<F>(keep_body: bool, mut on_progress: F) -> (SocketAddr, JoinHandle<Captured>)
where
    F: FnMut(u64) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        loop {
            let line = read_line(&mut reader);
            if line.is_empty() || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let mut captured = Captured {
            head,
            body: Vec::new(),
        };

        let chunked = captured
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if let Some(length) = captured.header("content-length") {
            let length: u64 = length.parse().unwrap();
            consume(&mut reader, length, keep_body, &mut captured.body);
            on_progress(length);
        } else if chunked {
            let mut received = 0;
            loop {
                let line = read_line(&mut reader);
                let size = line.trim().split(';').next().unwrap_or_default();
                let size = u64::from_str_radix(size, 16).unwrap();
                if size == 0 {
                    while !matches!(read_line(&mut reader).as_str(), "" | "\r\n") {}
                    break;
                }
                consume(&mut reader, size, keep_body, &mut captured.body);
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).unwrap();
                received += size;
                on_progress(received);
            }
        }

        let reply = r#"{"errcode":0,"errmsg":"ok"}"#;
        write!(
            stream,
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\
             connection: close\r\n\r\n{reply}",
            reply.len()
        )
        .unwrap();
        captured
    });
    (addr, handle)
}
