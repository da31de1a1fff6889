#![no_main]

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use libfuzzer_sys::fuzz_target;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use websocket_core::handshake::accept_async;
use websocket_core::stream::SocketFlowStream;

fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();

    let data_vec = Vec::from(data);
    runtime.block_on(async move {
        // Create a local TCP listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Spawn a task to accept the incoming connection and handle fuzz data.
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                // Construct a WebSocket handshake with fuzzed data.
                let handshake = build_fuzzed_handshake(&data_vec);

                // Write fuzzed handshake data into the socket for the server to read.
                let _ = socket.write_all(handshake.as_bytes()).await;
            }
        });

        // Connect to the listener using TcpStream.
        if let Ok(client_stream) = TcpStream::connect(addr).await {
            // Wrap the client stream in a SocketFlowStream.
            let stream = SocketFlowStream::Plain(client_stream);

            // Test the handshake function with the fuzzed input.
            let result = accept_async(stream).await;

            if let Err(err) = result {
                println!("{:?}", err);
            }
        }
    });
});

// Builds a WebSocket handshake request whose Sec-WebSocket-Key (and a couple
// of header values) are derived from the fuzzer's input, so the fuzzer can
// reach the header-parsing and accept-key-derivation paths.
fn build_fuzzed_handshake(data: &[u8]) -> String {
    let mut handshake = String::from(
        "GET / HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n",
    );

    let key = generate_fuzzed_key(data);
    handshake.push_str(&format!("Sec-WebSocket-Key: {}\r\n", key));
    handshake.push_str("Sec-WebSocket-Version: 13\r\n");

    if data.len() % 2 == 0 {
        handshake.push_str("Connection: Fuzzed-Value\r\n");
    }

    handshake.push_str("\r\n");
    handshake
}

// Generates a random-looking Sec-WebSocket-Key from fuzz data.
fn generate_fuzzed_key(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}
