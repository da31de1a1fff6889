use crate::message::Message;
use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Sender / Receiver Errors
    #[error("{source}")]
    SendError {
        #[from]
        source: SendError<Result<Message, Error>>,
    },

    #[error("channel communication error")]
    CommunicationError,

    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("Text frame payload contains invalid UTF-8")]
    InvalidUtf8Payload,

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Invalid HTTP request line")]
    InvalidHTTPRequestLine,

    #[error("Missing HTTP method in request line")]
    MissingHTTPMethod,

    #[error("Missing HTTP URI in request line")]
    MissingHTTPUri,

    #[error("Missing HTTP version in request line")]
    MissingHTTPVersion,

    #[error("Invalid Content-Length header")]
    InvalidContentLength,

    // Framing Errors
    #[error("RSV bit set without a negotiated extension")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Frame masking doesn't match the expected direction for this role")]
    InvalidMaskDirection,

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("No inbound progress on a fragmented message for 30 seconds")]
    FragmentTimeout,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    // Close-frame errors
    #[error("Close frame payload must be empty, or at least 2 bytes (the close code)")]
    InvalidCloseFramePayload,

    #[error("Close code `{0}` is not a valid WebSocket close code")]
    InvalidCloseCode(u16),

    #[error("Close code `{0}` is reserved and can't be sent on the wire")]
    ReservedCloseCode(u16),

    // HTTP Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("URL has no port")]
    URLNoPort,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // Domain addr parsing error
    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("{source}")]
    TlsConfigError {
        #[from]
        source: rustls::Error,
    },

    #[error("use_tls = `{0}` argument does not match the passed URL scheme: `{1}`")]
    SchemeAgainstTlsConfig(bool, String),

    // Connection lifecycle
    #[error("Operation requires an open connection")]
    NotConnected,
}

/// A WebSocket close code, per RFC 6455 §7.4.
///
/// `CloseCode::new` rejects values that are reserved or out of range before a
/// frame is ever written; `is_valid` implements the same check for inbound
/// codes, which are reported as a [`Error::InvalidCloseCode`] rather than a
/// constructor failure since the peer sent them on the wire already.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNACCEPTABLE_OPCODE: CloseCode = CloseCode(1003);
    pub const INVALID_DATA: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MSG_TOO_BIG: CloseCode = CloseCode(1009);
    pub const CLIENT_EXTENSION_UNKNOWN: CloseCode = CloseCode(1010);
    pub const UNEXPECTED_COND: CloseCode = CloseCode(1011);

    // Reserved: never sent, only ever observed/represented.
    pub const RESERVED_NO_STATUS: CloseCode = CloseCode(1005);
    pub const RESERVED_ABNORMAL: CloseCode = CloseCode(1006);
    pub const RESERVED_TLS_HANDSHAKE: CloseCode = CloseCode(1015);

    pub fn new(code: u16) -> Result<Self, Error> {
        if Self::is_valid(code) {
            Ok(CloseCode(code))
        } else {
            Err(Error::ReservedCloseCode(code))
        }
    }

    /// Validates an inbound close code: `1000 <= c <= 4999`, excluding 1004,
    /// 1005, 1006, 1012-1014, 1016-2999, and 1015. The 1016-2999 exclusion
    /// and the separate 1015 check are redundant with each other; kept as-is
    /// since the redundancy is harmless and documents intent.
    pub fn is_valid(code: u16) -> bool {
        if !(1000..=4999).contains(&code) {
            return false;
        }
        !matches!(code, 1004 | 1005 | 1006 | 1012..=1014 | 1016..=2999 | 1015)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl Error {
    /// The close code to echo back to the peer when this error terminates a
    /// framed connection, if any. Transport failures, timeouts, and
    /// handshake errors return `None`: the transport is already assumed
    /// broken, or the connection never reached `Connected` to send on.
    pub fn outbound_close_code(&self) -> Option<CloseCode> {
        match self {
            Error::RSVNotZero
            | Error::InvalidOpcode
            | Error::InvalidMaskDirection
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::InvalidCloseFramePayload
            | Error::InvalidCloseCode(_) => Some(CloseCode::PROTOCOL_ERROR),

            Error::InvalidUtf8Payload | Error::FromUtf8Error { .. } => {
                Some(CloseCode::INVALID_DATA)
            }

            Error::MaxFrameSize
            | Error::MaxMessageSize
            | Error::CustomFragmentSizeExceeded(_, _) => Some(CloseCode::MSG_TOO_BIG),

            Error::FragmentTimeout => Some(CloseCode::UNEXPECTED_COND),

            _ => None,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_codes_accepted() {
        for code in [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 3000, 4999] {
            assert!(CloseCode::is_valid(code), "{code} should be valid");
        }
    }

    #[test]
    fn reserved_and_out_of_range_codes_rejected() {
        for code in [
            0, 999, 1004, 1005, 1006, 1012, 1013, 1014, 1015, 1016, 2999, 5000, 65535,
        ] {
            assert!(!CloseCode::is_valid(code), "{code} should be invalid");
        }
    }

    #[test]
    fn new_rejects_reserved_codes() {
        assert!(matches!(
            CloseCode::new(1005),
            Err(Error::ReservedCloseCode(1005))
        ));
        assert!(CloseCode::new(1000).is_ok());
    }

    #[test]
    fn outbound_close_code_maps_protocol_violations_to_1002() {
        assert_eq!(
            Error::RSVNotZero.outbound_close_code(),
            Some(CloseCode::PROTOCOL_ERROR)
        );
        assert_eq!(
            Error::InvalidMaskDirection.outbound_close_code(),
            Some(CloseCode::PROTOCOL_ERROR)
        );
    }

    #[test]
    fn outbound_close_code_maps_bad_data_to_1007() {
        assert_eq!(
            Error::InvalidUtf8Payload.outbound_close_code(),
            Some(CloseCode::INVALID_DATA)
        );
    }

    #[test]
    fn outbound_close_code_maps_resource_exhaustion_to_1009() {
        assert_eq!(
            Error::MaxMessageSize.outbound_close_code(),
            Some(CloseCode::MSG_TOO_BIG)
        );
    }

    #[test]
    fn outbound_close_code_is_none_for_transport_errors() {
        assert_eq!(Error::NotConnected.outbound_close_code(), None);
    }
}
