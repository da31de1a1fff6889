use crate::config::WebSocketConfig;
use crate::error::{CloseCode, Error};
use crate::frame::{self, OpCode};
use crate::message::Message;
use crate::stream::SocketFlowStream;
use crate::utf8::{Utf8State, Utf8Validator};
use crate::write::{Writer, WriterKind};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};

/// How long a fragmented message may go without a new continuation frame
/// arriving before the connection is considered stuck and torn down.
const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-frame read timeout, guarding against a peer that completes the
/// handshake and then trickles bytes (or none at all) to tie up a read task.
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(60);

struct FragmentedMessage {
    fragments: Vec<u8>,
    op_code: OpCode,
    utf8: Utf8Validator,
    started_at: Instant,
}

pub struct ReadStream {
    buf_reader: BufReader<ReadHalf<SocketFlowStream>>,
    fragmented_message: Option<FragmentedMessage>,
    pub read_tx: Sender<Result<Message, Error>>,
    writer: Arc<Mutex<Writer>>,
    config: WebSocketConfig,
    /// The mask bit a peer is expected to set: servers expect masked
    /// frames, clients expect unmasked ones.
    expect_masked: bool,
}

impl ReadStream {
    pub fn new(
        read: BufReader<ReadHalf<SocketFlowStream>>,
        read_tx: Sender<Result<Message, Error>>,
        writer: Arc<Mutex<Writer>>,
        config: WebSocketConfig,
        writer_kind: WriterKind,
    ) -> Self {
        // The reader expects the opposite masking direction from what this
        // connection's writer produces: a server's Writer never masks what
        // it sends, but it must only accept masked frames from its client.
        let expect_masked = writer_kind == WriterKind::Server;
        Self {
            buf_reader: read,
            fragmented_message: None,
            read_tx,
            writer,
            config,
            expect_masked,
        }
    }

    pub async fn poll_messages(&mut self) -> Result<(), Error> {
        loop {
            match self.read_frame().await {
                Ok(frame) => {
                    match frame.opcode {
                        OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                            if self.fragmented_message.is_some() {
                                return Err(Error::FragmentedInProgress);
                            }

                            let mut utf8 = Utf8Validator::new();
                            if frame.opcode == OpCode::Text
                                && utf8.feed(&frame.payload) == Utf8State::Fail
                            {
                                return Err(Error::InvalidUtf8Payload);
                            }

                            self.fragmented_message = Some(FragmentedMessage {
                                op_code: frame.opcode,
                                fragments: frame.payload,
                                utf8,
                                started_at: Instant::now(),
                            });
                        }
                        OpCode::Continue => {
                            let final_fragment;
                            {
                                let fragmented_message =
                                    self.fragmented_message.as_mut().ok_or(Error::InvalidContinuationFrame)?;

                                let is_text = fragmented_message.op_code == OpCode::Text;
                                final_fragment = frame.final_fragment;

                                if is_text {
                                    let state = fragmented_message.utf8.feed(&frame.payload);
                                    if state == Utf8State::Fail
                                        || (final_fragment
                                            && fragmented_message.utf8.is_mid_sequence())
                                    {
                                        self.fragmented_message = None;
                                        return Err(Error::InvalidUtf8Payload);
                                    }
                                }

                                fragmented_message
                                    .fragments
                                    .extend_from_slice(&frame.payload);

                                if fragmented_message.fragments.len()
                                    > self.config.max_message_size.unwrap_or_default()
                                {
                                    self.fragmented_message = None;
                                    return Err(Error::MaxMessageSize);
                                }

                                fragmented_message.started_at = Instant::now();
                            }

                            if final_fragment {
                                let fragmented_message = self.fragmented_message.take().unwrap();
                                self.transmit_message(frame::Frame::new(
                                    true,
                                    fragmented_message.op_code,
                                    fragmented_message.fragments,
                                ))
                                .await?;
                            }
                        }
                        OpCode::Text | OpCode::Binary => {
                            if self.fragmented_message.is_some() {
                                return Err(Error::InvalidFrameFragmentation);
                            }

                            self.transmit_message(frame).await?;
                        }
                        OpCode::Close => {
                            self.handle_close_frame(frame.payload).await?;
                            break;
                        }
                        OpCode::Ping => {
                            self.send_pong_frame(frame.payload).await?;
                        }
                        OpCode::Pong => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    async fn send_pong_frame(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        let pong_frame = frame::Frame::new(true, OpCode::Pong, payload);
        self.writer.lock().await.write_frame(pong_frame).await
    }

    /// Validates an inbound close frame's payload and echoes a close frame
    /// back, per RFC 6455 §5.5.1/§7.4.
    async fn handle_close_frame(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        let close_code = match payload.len() {
            0 => None,
            1 => return Err(Error::InvalidCloseFramePayload),
            _ => {
                let mut code_bytes = [0u8; 2];
                code_bytes.copy_from_slice(&payload[..2]);
                let code = u16::from_be_bytes(code_bytes);
                if !CloseCode::is_valid(code) {
                    return Err(Error::InvalidCloseCode(code));
                }
                if payload.len() > 2 {
                    let _ = String::from_utf8(payload[2..].to_vec())?;
                }
                Some(CloseCode::new(code)?)
            }
        };

        self.send_close_frame(close_code.unwrap_or(CloseCode::NORMAL))
            .await
    }

    /// How long the *next* read is allowed to block: bounded by the
    /// remaining fragment-reassembly budget while a partial message is in
    /// flight (so a stalled peer is torn down at 30 s of genuine
    /// no-progress, not later), or by the generic per-frame guard otherwise.
    /// Returns the deadline together with whether it is fragment-bound, so
    /// a caller that hits it can report `FragmentTimeout` rather than a
    /// plain `Timeout`.
    fn read_deadline(&self) -> (Duration, bool) {
        match &self.fragmented_message {
            Some(fragmented) => (
                FRAGMENT_TIMEOUT.saturating_sub(fragmented.started_at.elapsed()),
                true,
            ),
            None => (FRAME_READ_TIMEOUT, false),
        }
    }

    /// `read_exact`, bounded by `read_deadline`. Every call re-checks the
    /// deadline against the current instant, so a frame that takes several
    /// reads to arrive (header, extended length, mask, payload) can't outrun
    /// the fragment-reassembly timeout by spreading its bytes across them.
    async fn read_exact_bounded(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let (deadline, is_fragment_bound) = self.read_deadline();
        match timeout(deadline, self.buf_reader.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(source.into()),
            Err(elapsed) => {
                if is_fragment_bound {
                    Err(Error::FragmentTimeout)
                } else {
                    Err(elapsed.into())
                }
            }
        }
    }

    /// Reads exactly one frame off the wire. Every header field is read with
    /// its own exact-sized `read_exact` (2-byte base header, then extended
    /// length, then mask) so a read that happens to return header-plus-
    /// payload bytes in one go — the norm on loopback and any buffered
    /// transport — never loses the extra bytes to a later, freshly sized
    /// payload read.
    pub async fn read_frame(&mut self) -> Result<frame::Frame, Error> {
        let mut header_bytes = [0u8; 2];
        self.read_exact_bounded(&mut header_bytes).await?;

        let fin = (header_bytes[0] & 0b1000_0000) != 0;
        let rsv1 = (header_bytes[0] & 0b0100_0000) != 0;
        let rsv2 = (header_bytes[0] & 0b0010_0000) != 0;
        let rsv3 = (header_bytes[0] & 0b0001_0000) != 0;
        if rsv1 || rsv2 || rsv3 {
            return Err(Error::RSVNotZero);
        }

        let opcode = OpCode::from(header_bytes[0] & 0b0000_1111)?;
        if !fin && opcode.is_control() {
            return Err(Error::ControlFramesFragmented);
        }

        let masked = (header_bytes[1] & 0b1000_0000) != 0;
        let length_field = header_bytes[1] & 0b0111_1111;

        if opcode.is_control() && length_field > frame::MAX_CONTROL_PAYLOAD as u8 {
            return Err(Error::ControlFramePayloadSize);
        }

        let payload_len: u64 = match length_field {
            0..=125 => length_field as u64,
            126 => {
                let mut extended = [0u8; 2];
                self.read_exact_bounded(&mut extended).await?;
                u16::from_be_bytes(extended) as u64
            }
            127 => {
                let mut extended = [0u8; 8];
                self.read_exact_bounded(&mut extended).await?;
                u64::from_be_bytes(extended)
            }
            _ => unreachable!("7-bit field can't exceed 127"),
        };

        if payload_len > frame::MAX_PAYLOAD_SIZE {
            return Err(Error::MaxFrameSize);
        }

        let mask = if masked {
            let mut mask = [0u8; 4];
            self.read_exact_bounded(&mut mask).await?;
            mask
        } else {
            [0u8; 4]
        };

        if masked != self.expect_masked {
            return Err(Error::InvalidMaskDirection);
        }

        // A control frame's length field is already capped at 125 above;
        // this only has to guard data frames against the caller-configured
        // limit.
        let max_frame_size = self.config.max_frame_size.unwrap_or_default() as u64;
        if !opcode.is_control() && payload_len > max_frame_size {
            return Err(Error::MaxFrameSize);
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.read_exact_bounded(&mut payload).await?;

        if masked {
            frame::apply_mask(mask, &mut payload);
        }

        Ok(frame::Frame {
            final_fragment: fin,
            opcode,
            payload,
        })
    }

    pub async fn send_close_frame(&mut self, code: CloseCode) -> Result<(), Error> {
        self.writer
            .lock()
            .await
            .write_frame(frame::Frame::new(
                true,
                OpCode::Close,
                code.to_be_bytes().to_vec(),
            ))
            .await
    }

    pub async fn transmit_message(&mut self, frame: frame::Frame) -> Result<(), Error> {
        if frame.opcode == OpCode::Text {
            let mut validator = Utf8Validator::new();
            if validator.feed(&frame.payload) != Utf8State::Ok {
                return Err(Error::InvalidUtf8Payload);
            }
        }

        self.read_tx
            .send(Ok(Message::from_frame(frame)?))
            .await
            .map_err(|_| Error::CommunicationError)
    }
}
