use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use websocket_core::error::CloseCode;
use websocket_core::frame::{apply_mask, encode_header, OpCode};
use websocket_core::handshake::{accept_async, connect_async};
use websocket_core::message::{DataType, Message};
use websocket_core::stream::SocketFlowStream;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn echoes_a_text_message_round_trip() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, mut writer) = conn.split();
        while let Some(Ok(msg)) = reader.next().await {
            writer.send_message(msg).await.unwrap();
        }
    });

    let conn = connect_async(&format!("ws://{addr}/")).await.unwrap();
    let (mut reader, mut writer) = conn.split();

    writer.send_as_text("hello".to_string()).await.unwrap();

    let echoed = timeout(TEST_TIMEOUT, reader.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, Message::Text("hello".to_string()));
}

#[tokio::test]
async fn reassembles_a_fragmented_binary_message() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, mut writer) = conn.split();
        while let Some(Ok(msg)) = reader.next().await {
            writer.send_message(msg).await.unwrap();
        }
    });

    let conn = connect_async(&format!("ws://{addr}/")).await.unwrap();
    let (mut reader, mut writer) = conn.split();

    writer
        .send_fragmented_start(DataType::Binary, b"abc".to_vec())
        .await
        .unwrap();
    writer
        .send_fragmented_cont(false, b"def".to_vec())
        .await
        .unwrap();
    writer
        .send_fragmented_cont(true, b"ghi".to_vec())
        .await
        .unwrap();

    let echoed = timeout(TEST_TIMEOUT, reader.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, Message::Binary(b"abcdefghi".to_vec()));
}

#[tokio::test]
async fn unsolicited_ping_does_not_disrupt_the_message_stream() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, mut writer) = conn.split();
        while let Some(Ok(msg)) = reader.next().await {
            writer.send_message(msg).await.unwrap();
        }
    });

    let conn = connect_async(&format!("ws://{addr}/")).await.unwrap();
    let (mut reader, mut writer) = conn.split();

    writer.send_ping().await.unwrap();
    writer.send_as_text("still alive".to_string()).await.unwrap();

    let echoed = timeout(TEST_TIMEOUT, reader.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, Message::Text("still alive".to_string()));
}

#[tokio::test]
async fn graceful_close_ends_both_sides_message_stream() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, mut writer) = conn.split();
        while let Some(Ok(msg)) = reader.next().await {
            writer.send_message(msg).await.unwrap();
        }
    });

    let conn = connect_async(&format!("ws://{addr}/")).await.unwrap();
    let (mut reader, mut writer) = conn.split();

    writer.close_connection(CloseCode::NORMAL).await.unwrap();
    assert!(!writer.is_connected());

    let next = timeout(TEST_TIMEOUT, reader.next()).await.unwrap();
    assert!(next.is_none());
}

/// Speaks the opening handshake by hand so the rest of the test can push
/// malformed frames the high-level `connect_async` client would never
/// construct.
async fn raw_handshake(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream
}

async fn write_masked_frame(stream: &mut TcpStream, opcode: OpCode, payload: &[u8]) {
    let mask = [0x12, 0x34, 0x56, 0x78];
    let mut header = encode_header(opcode, true, true, mask, payload.len());
    let mut masked_payload = payload.to_vec();
    apply_mask(mask, &mut masked_payload);
    header.extend_from_slice(&masked_payload);
    stream.write_all(&header).await.unwrap();
}

/// Reads one server-to-client (unmasked) close frame and returns its code.
async fn read_close_code(stream: &mut TcpStream) -> u16 {
    let mut head = [0u8; 2];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut head))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head[0] & 0x0F, OpCode::Close.as_u8());
    let len = (head[1] & 0x7F) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    u16::from_be_bytes([payload[0], payload[1]])
}

#[tokio::test]
async fn invalid_utf8_text_payload_closes_with_1007() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, _writer) = conn.split();
        // Drain until the protocol error tears the connection down.
        while reader.next().await.is_some() {}
    });

    let mut client = raw_handshake(addr).await;
    // 0xC0 0xAF is a textbook overlong encoding, never valid UTF-8.
    write_masked_frame(&mut client, OpCode::Text, &[0xC0, 0xAF]).await;

    let code = read_close_code(&mut client).await;
    assert_eq!(code, CloseCode::INVALID_DATA.get());
}

#[tokio::test]
async fn oversized_control_frame_closes_with_1002() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = accept_async(SocketFlowStream::Plain(stream)).await.unwrap();
        let (mut reader, _writer) = conn.split();
        while reader.next().await.is_some() {}
    });

    let mut client = raw_handshake(addr).await;
    let oversized_payload = vec![0u8; 200];
    write_masked_frame(&mut client, OpCode::Ping, &oversized_payload).await;

    let code = read_close_code(&mut client).await;
    assert_eq!(code, CloseCode::PROTOCOL_ERROR.get());
}
