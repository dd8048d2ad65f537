use std::hint::black_box;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, criterion_group, criterion_main};
use futures::executor::block_on;
use harbor_http::codec::{MessageParser, ResponseEncoder};
use harbor_http::config::ParserConfig;
use harbor_http::connection::HttpConnection;
use harbor_http::handler::{BoxError, DefaultErrorHandler, make_handler};
use harbor_http::protocol::body::BodySink;
use harbor_http::protocol::{Message, PayloadSize, ResponseHead};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::{Decoder, Encoder};

const SIMPLE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

const BROWSER_REQUEST: &[u8] = b"GET /index/?a=1&b=2 HTTP/1.1\r\n\
Host: 127.0.0.1:8080\r\n\
Connection: keep-alive\r\n\
Cache-Control: max-age=0\r\n\
Upgrade-Insecure-Requests: 1\r\n\
User-Agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Accept-Language: zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7\r\n\
\r\n";

const CHUNKED_REQUEST: &[u8] =
    b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n0123456789abcdef\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n";

// Mock IO for driving a connection without sockets
#[derive(Clone)]
struct MockIO {
    read_data: Vec<u8>,
    write_data: Vec<u8>,
    read_pos: usize,
}

impl MockIO {
    fn new(read_data: Vec<u8>) -> Self {
        Self { read_data, write_data: Vec::new(), read_pos: 0 }
    }
}

impl AsyncRead for MockIO {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.read_data[self.read_pos..];
        let amt = std::cmp::min(remaining.len(), buf.remaining());
        buf.put_slice(&remaining[..amt]);
        self.read_pos += amt;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockIO {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        self.write_data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

async fn hello(_request: Request<BodySink>) -> Result<Response<String>, BoxError> {
    Ok(Response::new("Hello World!".to_string()))
}

fn bench_parser(c: &mut Criterion) {
    for (name, input) in
        [("parse_simple_request", SIMPLE_REQUEST), ("parse_browser_request", BROWSER_REQUEST), ("parse_chunked_request", CHUNKED_REQUEST)]
    {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut parser = MessageParser::default();
                let mut bytes = BytesMut::from(input);
                black_box(parser.decode(&mut bytes).unwrap());
            });
        });
    }

    c.bench_function("parse_browser_request_byte_by_byte", |b| {
        b.iter(|| {
            let mut parser = MessageParser::new(ParserConfig::request());
            let mut message = None;
            for byte in BROWSER_REQUEST {
                message = parser.feed(std::slice::from_ref(byte)).unwrap();
            }
            black_box(message.unwrap());
        });
    });
}

fn bench_response_encoder(c: &mut Criterion) {
    let response = Response::builder().status(StatusCode::OK).body("Hello World!".to_string()).unwrap();

    c.bench_function("encode_simple_response", |b| {
        b.iter(|| {
            let mut encoder = ResponseEncoder::new();
            let mut bytes = BytesMut::new();
            let (header, body) = response.clone().into_parts();
            let payload_size = PayloadSize::Length(body.len() as u64);
            let message = Message::<_, Bytes>::Header((ResponseHead::from_parts(header, ()), payload_size));
            encoder.encode(message, &mut bytes).unwrap();
            black_box(bytes);
        });
    });
}

fn bench_http_connection(c: &mut Criterion) {
    let handler = make_handler(hello);

    c.bench_function("process_simple_request", |b| {
        b.iter(|| {
            let mock_io = MockIO::new(SIMPLE_REQUEST.to_vec());
            let (reader, writer) = (mock_io.clone(), mock_io);
            let connection = HttpConnection::new(reader, writer);
            block_on(connection.process(&handler, &DefaultErrorHandler)).unwrap();
        });
    });
}

criterion_group!(benches, bench_parser, bench_response_encoder, bench_http_connection);
criterion_main!(benches);
