//! Incremental UTF-8 validation, so a TEXT message's payload can be checked
//! frame by frame as it arrives without buffering the whole message first
//! and without re-scanning bytes already consumed. Ported from the
//! bit-packed state machine this library's C predecessor used
//! (`utf8_validate_single`), expressed here without `unsafe`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf8State {
    /// The bytes fed so far form complete, valid code points.
    Ok,
    /// A multi-byte sequence is in progress; more bytes are needed before
    /// the current code point can be judged valid.
    Busy,
    Fail,
}

/// How many continuation bytes a multi-byte sequence still needs, and the
/// partial code point accumulated so far (used to reject overlong encodings
/// and out-of-range code points once the sequence completes).
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Validator {
    remaining: u8,
    min_code_point: u32,
    code_point: u32,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a multi-byte sequence is mid-flight (handle != 0 in the
    /// distilled spec's terms). At FIN time this must be false for the
    /// message to be considered valid UTF-8.
    pub fn is_mid_sequence(&self) -> bool {
        self.remaining != 0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feeds a chunk of bytes into the validator, continuing any sequence
    /// left in progress from a previous call.
    pub fn feed(&mut self, bytes: &[u8]) -> Utf8State {
        for &byte in bytes {
            match self.feed_one(byte) {
                Utf8State::Fail => return Utf8State::Fail,
                _ => continue,
            }
        }

        if self.is_mid_sequence() {
            Utf8State::Busy
        } else {
            Utf8State::Ok
        }
    }

    fn feed_one(&mut self, byte: u8) -> Utf8State {
        if self.remaining == 0 {
            match byte {
                0x00..=0x7F => Utf8State::Ok,
                0xC0..=0xDF => {
                    self.code_point = (byte & 0x1F) as u32;
                    self.min_code_point = 0x80;
                    self.remaining = 1;
                    Utf8State::Busy
                }
                0xE0..=0xEF => {
                    self.code_point = (byte & 0x0F) as u32;
                    self.min_code_point = 0x800;
                    self.remaining = 2;
                    Utf8State::Busy
                }
                0xF0..=0xF7 => {
                    self.code_point = (byte & 0x07) as u32;
                    self.min_code_point = 0x10000;
                    self.remaining = 3;
                    Utf8State::Busy
                }
                _ => Utf8State::Fail,
            }
        } else {
            if byte & 0xC0 != 0x80 {
                return Utf8State::Fail;
            }
            self.code_point = (self.code_point << 6) | (byte & 0x3F) as u32;
            self.remaining -= 1;

            if self.remaining == 0 {
                if self.code_point < self.min_code_point {
                    // overlong encoding, e.g. 0xC0 0xAF
                    return Utf8State::Fail;
                }
                if self.code_point > 0x10FFFF {
                    return Utf8State::Fail;
                }
                if (0xD800..=0xDFFF).contains(&self.code_point) {
                    return Utf8State::Fail;
                }
                self.code_point = 0;
                self.min_code_point = 0;
                Utf8State::Ok
            } else {
                Utf8State::Busy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_whole(bytes: &[u8]) -> Utf8State {
        let mut v = Utf8Validator::new();
        let state = v.feed(bytes);
        if state == Utf8State::Ok && v.is_mid_sequence() {
            return Utf8State::Busy;
        }
        state
    }

    #[test]
    fn accepts_ascii() {
        assert_eq!(validate_whole(b"hello world"), Utf8State::Ok);
    }

    #[test]
    fn accepts_valid_multibyte_text() {
        let s = "héllo wörld, 日本語, 💙";
        assert_eq!(validate_whole(s.as_bytes()), Utf8State::Ok);
    }

    #[test]
    fn rejects_overlong_two_byte_sequence() {
        // 0xC0 0xAF is the canonical overlong encoding of '/'
        assert_eq!(validate_whole(&[0xC0, 0xAF]), Utf8State::Fail);
    }

    #[test]
    fn rejects_surrogate_code_points() {
        // U+D800 encoded as a (structurally valid) 3-byte sequence.
        assert_eq!(validate_whole(&[0xED, 0xA0, 0x80]), Utf8State::Fail);
    }

    #[test]
    fn rejects_code_point_above_u10ffff() {
        // 0xF4 0x90 0x80 0x80 decodes to U+110000, just past the max.
        assert_eq!(validate_whole(&[0xF4, 0x90, 0x80, 0x80]), Utf8State::Fail);
    }

    #[test]
    fn accepts_four_byte_sequence_split_across_every_boundary() {
        let bytes: [u8; 4] = "💙".as_bytes().try_into().unwrap();
        for split in 1..4 {
            let mut v = Utf8Validator::new();
            let first = v.feed(&bytes[..split]);
            assert_eq!(first, Utf8State::Busy);
            let second = v.feed(&bytes[split..]);
            assert_eq!(second, Utf8State::Ok);
            assert!(!v.is_mid_sequence());
        }
    }

    #[test]
    fn mid_sequence_at_end_of_message_is_invalid() {
        let mut v = Utf8Validator::new();
        // leading byte of a 3-byte sequence, nothing else
        let state = v.feed(&[0xE0]);
        assert_eq!(state, Utf8State::Busy);
        assert!(v.is_mid_sequence());
    }

    #[test]
    fn rejects_lone_continuation_byte() {
        assert_eq!(validate_whole(&[0x80]), Utf8State::Fail);
    }
}
