//! Consume one line, reporting how it was terminated.

use memchr::memchr2;

use super::{Accumulator, CodecError, DecodingState};
use crate::buffer::GatewayBuffer;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Line terminator style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    Cr,
    /// Stream ended without a terminator.
    None,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
            LineEnding::Cr => b"\r",
            LineEnding::None => b"",
        }
    }
}

/// Yields the bytes of a line, excluding its terminator.
///
/// A CR that is the last byte of a read is consumed but the line is held
/// until the next byte shows whether it is CRLF or a lone CR.
#[derive(Debug, Default)]
pub struct ConsumeToEol {
    acc: Accumulator,
    pending_cr: bool,
    limit: Option<usize>,
}

impl ConsumeToEol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail once a line grows past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// True while a trailing CR awaits its next byte.
    pub fn is_pending_cr(&self) -> bool {
        self.pending_cr
    }

    fn check_limit(&self) -> Result<(), CodecError> {
        match self.limit {
            Some(limit) if self.acc.len() > limit => Err(CodecError::TooLarge {
                what: "line",
                limit,
            }),
            _ => Ok(()),
        }
    }
}

impl DecodingState for ConsumeToEol {
    type Output = (GatewayBuffer, LineEnding);

    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<Self::Output>, CodecError> {
        if self.pending_cr {
            let Some(&next) = input.as_slice().first() else {
                return Ok(None);
            };
            self.pending_cr = false;
            if next == LF {
                input.advance(1);
                return Ok(Some((self.acc.take(), LineEnding::CrLf)));
            }
            return Ok(Some((self.acc.take(), LineEnding::Cr)));
        }

        let Some(index) = memchr2(CR, LF, input.as_slice()) else {
            let len = input.remaining();
            if len > 0 {
                self.acc.push(input.split_to(len))?;
            }
            self.check_limit()?;
            return Ok(None);
        };

        if index > 0 || self.acc.is_empty() {
            self.acc.push(input.slice(0, index))?;
        }
        self.check_limit()?;

        let is_lf = input.as_slice()[index] == LF;
        let next = input.as_slice().get(index + 1).copied();
        let ending = if is_lf {
            input.advance(index + 1);
            LineEnding::Lf
        } else {
            match next {
                Some(LF) => {
                    input.advance(index + 2);
                    LineEnding::CrLf
                }
                Some(_) => {
                    input.advance(index + 1);
                    LineEnding::Cr
                }
                None => {
                    input.advance(index + 1);
                    self.pending_cr = true;
                    return Ok(None);
                }
            }
        };
        Ok(Some((self.acc.take(), ending)))
    }

    fn finish_decode(&mut self) -> Result<Option<Self::Output>, CodecError> {
        if self.pending_cr {
            self.pending_cr = false;
            return Ok(Some((self.acc.take(), LineEnding::Cr)));
        }
        if self.acc.is_empty() {
            return Ok(None);
        }
        Ok(Some((self.acc.take(), LineEnding::None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(chunks: &[&'static [u8]]) -> Vec<(Vec<u8>, LineEnding)> {
        let mut state = ConsumeToEol::new();
        let mut out = Vec::new();
        for chunk in chunks {
            let mut input = GatewayBuffer::from_static(chunk);
            while let Some((line, ending)) = state.decode(&mut input).unwrap() {
                out.push((line.as_slice().to_vec(), ending));
            }
            assert!(!input.has_remaining());
        }
        if let Some((line, ending)) = state.finish_decode().unwrap() {
            out.push((line.as_slice().to_vec(), ending));
        }
        out
    }

    #[test]
    fn distinguishes_line_endings() {
        let out = lines(&[b"a\nb\r\nc\rd"]);
        assert_eq!(
            out,
            vec![
                (b"a".to_vec(), LineEnding::Lf),
                (b"b".to_vec(), LineEnding::CrLf),
                (b"c".to_vec(), LineEnding::Cr),
                (b"d".to_vec(), LineEnding::None),
            ]
        );
    }

    #[test]
    fn cr_at_end_of_read_waits_for_next_byte() {
        let mut state = ConsumeToEol::new();
        let mut first = GatewayBuffer::from_static(b"line\r");
        assert!(state.decode(&mut first).unwrap().is_none());
        assert!(state.is_pending_cr());

        let mut second = GatewayBuffer::from_static(b"\nnext");
        let (line, ending) = state.decode(&mut second).unwrap().unwrap();
        assert_eq!(line.as_slice(), b"line");
        assert_eq!(ending, LineEnding::CrLf);
        assert_eq!(second.as_slice(), b"next");
    }

    #[test]
    fn lone_cr_split_from_following_text() {
        assert_eq!(
            lines(&[b"one\r", b"two\n"]),
            vec![
                (b"one".to_vec(), LineEnding::Cr),
                (b"two".to_vec(), LineEnding::Lf)
            ]
        );
    }

    #[test]
    fn pending_cr_at_end_of_stream_is_a_cr_line() {
        assert_eq!(lines(&[b"tail\r"]), vec![(b"tail".to_vec(), LineEnding::Cr)]);
    }

    #[test]
    fn byte_at_a_time_matches_whole() {
        let whole = lines(&[b"x: 1\r\ny\r\rz\n"]);
        let mut state = ConsumeToEol::new();
        let mut split = Vec::new();
        for byte in b"x: 1\r\ny\r\rz\n".iter() {
            let mut input = GatewayBuffer::copy_from_slice(std::slice::from_ref(byte));
            while let Some((line, ending)) = state.decode(&mut input).unwrap() {
                split.push((line.as_slice().to_vec(), ending));
            }
        }
        assert_eq!(whole, split);
    }

    #[test]
    fn empty_lines_are_reported() {
        assert_eq!(
            lines(&[b"\n\r\n"]),
            vec![(Vec::new(), LineEnding::Lf), (Vec::new(), LineEnding::CrLf)]
        );
    }
}
