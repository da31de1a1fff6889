use crate::config::WebSocketConfig;
use crate::connection::{ConnState, SharedState};
use crate::error::{CloseCode, Error};
use crate::frame::{Frame, OpCode};
use crate::message::{DataType, Message};
use crate::write::Writer;
use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

use futures::Stream;

pub struct WSReader {
    read_rx: ReceiverStream<Result<Message, Error>>,
}

impl WSReader {
    pub fn new(read_rx: ReceiverStream<Result<Message, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

pub struct WSWriter {
    pub(crate) writer: Arc<Mutex<Writer>>,
    pub(crate) web_socket_config: WebSocketConfig,
    state: SharedState,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl WSWriter {
    pub fn new(
        writer: Arc<Mutex<Writer>>,
        web_socket_config: WebSocketConfig,
        state: SharedState,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            writer,
            web_socket_config,
            state,
            peer_addr,
            local_addr,
            user_data,
        }
    }

    /// Sends a close frame carrying `code`, then gives the peer a brief
    /// window to finish its own close handshake before this handle drops.
    pub async fn close_connection(&mut self, code: CloseCode) -> Result<(), Error> {
        self.write_frames(vec![Frame::new(
            true,
            OpCode::Close,
            code.to_be_bytes().to_vec(),
        )])
        .await?;

        self.state.set(ConnState::Closed);
        sleep(Duration::from_millis(500)).await;

        Ok(())
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.write_message(message).await
    }

    /// Sends raw bytes as a TEXT frame; the bytes must be valid UTF-8.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Text(String::from_utf8(data)?))
            .await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Binary(data)).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.write_message(Message::Text(data)).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.write_frames(vec![Frame::new(true, OpCode::Ping, Vec::new())])
            .await
    }

    /// Opens a fragmented message: a single frame with `fin=false` and the
    /// opcode for `data_type`. Must be followed by one or more
    /// `send_fragmented_cont` calls, the last with `fin=true`. Callers MUST
    /// NOT interleave fragmented sends from multiple tasks against the same
    /// connection — frame order on the wire is the caller's responsibility.
    pub async fn send_fragmented_start(
        &mut self,
        data_type: DataType,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        let opcode = match data_type {
            DataType::Text => OpCode::Text,
            DataType::Binary => OpCode::Binary,
        };
        self.write_frames(vec![Frame::new(false, opcode, data)])
            .await
    }

    /// Continues a message opened by `send_fragmented_start`, as a
    /// `Continue` frame. Pass `fin = true` on the last chunk.
    pub async fn send_fragmented_cont(&mut self, fin: bool, data: Vec<u8>) -> Result<(), Error> {
        self.write_frames(vec![Frame::new(fin, OpCode::Continue, data)])
            .await
    }

    /// Splits `data` into chunks of `fragment_size`, sent as a TEXT message
    /// opened by the first chunk and continued with `OpCode::Continue`.
    pub async fn send_large_data_fragmented(
        &mut self,
        data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or_default();
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(
                fragment_size,
                max_frame_size,
            ));
        }

        if data.len() > self.web_socket_config.max_message_size.unwrap_or_default() {
            return Err(Error::MaxMessageSize);
        }

        if data.is_empty() {
            return self
                .write_frames(vec![Frame::new(true, OpCode::Text, data)])
                .await;
        }

        let chunks = data.chunks(fragment_size);
        let total_chunks = chunks.len();

        for (i, chunk) in chunks.enumerate() {
            let is_final = i == total_chunks - 1;
            let opcode = if i == 0 { OpCode::Text } else { OpCode::Continue };

            self.write_frames(vec![Frame::new(is_final, opcode, Vec::from(chunk))])
                .await?
        }

        Ok(())
    }

    /// Liveness per §4.F: `state != CLOSED` (true during the handshake too,
    /// not just once frames are flowing — see `write_frames` for the
    /// stricter `Connected`-only gate sends are held to).
    pub fn is_connected(&self) -> bool {
        self.state.get() != ConnState::Closed
    }

    pub fn peer_ip(&self) -> Result<IpAddr, Error> {
        Ok(self.peer_addr.ip())
    }

    pub fn local_ip(&self) -> Result<IpAddr, Error> {
        Ok(self.local_addr.ip())
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) async fn write_message(&mut self, message: Message) -> Result<(), Error> {
        if message.as_binary().len() > self.web_socket_config.max_message_size.unwrap_or_default() {
            return Err(Error::MaxMessageSize);
        }

        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or_default();
        let frames = message.to_frames(max_frame_size);
        self.write_frames(frames).await
    }

    pub(crate) async fn write_frames(&mut self, frames: Vec<Frame>) -> Result<(), Error> {
        if !self.state.is_sendable() {
            return Err(Error::NotConnected);
        }

        for frame in frames {
            self.writer.lock().await.write_frame(frame).await?;
        }
        Ok(())
    }
}
