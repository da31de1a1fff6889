use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::message::Message;
use crate::split::{WSReader, WSWriter};
use crate::write::Writer;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

/// A connection's lifecycle, shared between the read task, the write handle,
/// and whichever endpoint (client call site or server accept loop) owns it.
/// Stored as a bare `u8` behind an `Arc<AtomicU8>` rather than a `Mutex`,
/// since every transition is a single independent write with no invariant
/// spanning multiple fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Handshake = 0,
    Connected = 1,
    Closed = 2,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Handshake,
            1 => ConnState::Connected,
            _ => ConnState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn new(initial: ConnState) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub(crate) fn set(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// True only in `Connected`: the gate for outbound sends, which §4.D
    /// requires to fail whenever state != CONNECTED. Distinct from the
    /// public liveness query in `WSWriter::is_connected`, which per §4.F is
    /// `state != CLOSED` (true during `Handshake` too).
    pub(crate) fn is_sendable(&self) -> bool {
        self.get() == ConnState::Connected
    }
}

/// A single, already-handshaken WebSocket connection, returned by
/// `connect_async`/`accept_async`. Consumed via [`Connection::split`] into
/// an independent read stream and write handle, so the read task and the
/// caller's send calls don't contend for the same borrow.
pub struct Connection {
    pub(crate) writer: Arc<Mutex<Writer>>,
    pub(crate) read_rx: Receiver<Result<Message, Error>>,
    pub(crate) state: SharedState,
    pub(crate) web_socket_config: WebSocketConfig,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) local_addr: SocketAddr,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Connection {
    pub(crate) fn new(
        writer: Arc<Mutex<Writer>>,
        read_rx: Receiver<Result<Message, Error>>,
        state: SharedState,
        web_socket_config: WebSocketConfig,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            writer,
            read_rx,
            state,
            web_socket_config,
            peer_addr,
            local_addr,
            user_data: None,
        }
    }

    /// Attaches application-defined, connection-scoped context, retrievable
    /// later through `WSWriter::user_data`.
    pub fn with_user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.user_data = Some(Arc::new(data));
        self
    }

    /// Splits the connection into a `Stream` of inbound messages and an
    /// independent handle for sending, so reading and writing don't need to
    /// share a borrow of `Connection` across tasks.
    pub fn split(self) -> (WSReader, WSWriter) {
        let reader = WSReader::new(ReceiverStream::new(self.read_rx));
        let writer = WSWriter::new(
            self.writer,
            self.web_socket_config,
            self.state,
            self.peer_addr,
            self.local_addr,
            self.user_data,
        );
        (reader, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_sendable_only_while_connected() {
        let state = SharedState::new(ConnState::Handshake);
        assert!(!state.is_sendable());

        state.set(ConnState::Connected);
        assert!(state.is_sendable());

        state.set(ConnState::Closed);
        assert!(!state.is_sendable());
    }

    #[test]
    fn shared_state_is_visible_across_clones() {
        let state = SharedState::new(ConnState::Connected);
        let cloned = state.clone();
        cloned.set(ConnState::Closed);
        assert_eq!(state.get(), ConnState::Closed);
    }
}
