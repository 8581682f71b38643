//! Consume bytes up to a terminator byte.

use memchr::{memchr, memchr3};

use super::{Accumulator, CodecError, DecodingState};
use crate::buffer::GatewayBuffer;

/// Why a [`ConsumeToTerminator`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// The terminator was found and consumed.
    Terminator,
    /// A CR or LF was found first; it was left in the input.
    LineEnd,
    /// The stream ended first.
    EndOfStream,
}

/// Yields the bytes before `terminator`, exclusive.
///
/// With a line guard the state also stops, without consuming, at CR or LF,
/// which lets a field-name reader hand the line ending to the value reader.
#[derive(Debug)]
pub struct ConsumeToTerminator {
    terminator: u8,
    line_guard: bool,
    acc: Accumulator,
    limit: Option<usize>,
}

impl ConsumeToTerminator {
    pub fn new(terminator: u8) -> Self {
        Self {
            terminator,
            line_guard: false,
            acc: Accumulator::default(),
            limit: None,
        }
    }

    pub fn with_line_guard(terminator: u8) -> Self {
        Self {
            line_guard: true,
            ..Self::new(terminator)
        }
    }

    /// Fail once more than `limit` bytes accumulate without a stop.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn check_limit(&self) -> Result<(), CodecError> {
        match self.limit {
            Some(limit) if self.acc.len() > limit => Err(CodecError::TooLarge {
                what: "token",
                limit,
            }),
            _ => Ok(()),
        }
    }
}

impl DecodingState for ConsumeToTerminator {
    type Output = (GatewayBuffer, Stop);

    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<Self::Output>, CodecError> {
        let found = if self.line_guard {
            memchr3(self.terminator, b'\r', b'\n', input.as_slice())
        } else {
            memchr(self.terminator, input.as_slice())
        };

        match found {
            Some(index) => {
                let stop = if input.as_slice()[index] == self.terminator {
                    Stop::Terminator
                } else {
                    Stop::LineEnd
                };
                if index > 0 || self.acc.is_empty() {
                    self.acc.push(input.slice(0, index))?;
                }
                input.advance(index);
                if stop == Stop::Terminator {
                    input.advance(1);
                }
                self.check_limit()?;
                Ok(Some((self.acc.take(), stop)))
            }
            None => {
                let len = input.remaining();
                if len > 0 {
                    self.acc.push(input.split_to(len))?;
                }
                self.check_limit()?;
                Ok(None)
            }
        }
    }

    fn finish_decode(&mut self) -> Result<Option<Self::Output>, CodecError> {
        if self.acc.is_empty() {
            return Ok(None);
        }
        Ok(Some((self.acc.take(), Stop::EndOfStream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_terminator_across_reads() {
        let mut state = ConsumeToTerminator::new(b':');
        let mut first = GatewayBuffer::from_static(b"eve");
        assert!(state.decode(&mut first).unwrap().is_none());
        assert!(!first.has_remaining());

        let mut second = GatewayBuffer::from_static(b"nt:rest");
        let (token, stop) = state.decode(&mut second).unwrap().unwrap();
        assert_eq!(token.as_slice(), b"event");
        assert_eq!(stop, Stop::Terminator);
        assert_eq!(second.as_slice(), b"rest");
    }

    #[test]
    fn terminator_at_start_of_next_read() {
        let mut state = ConsumeToTerminator::new(b':');
        let mut first = GatewayBuffer::from_static(b"data");
        assert!(state.decode(&mut first).unwrap().is_none());
        let mut second = GatewayBuffer::from_static(b":x");
        let (token, _) = state.decode(&mut second).unwrap().unwrap();
        assert_eq!(token.as_slice(), b"data");
        assert_eq!(second.as_slice(), b"x");
    }

    #[test]
    fn line_guard_leaves_line_end_in_input() {
        let mut state = ConsumeToTerminator::with_line_guard(b':');
        let mut input = GatewayBuffer::from_static(b"reconnect\r\n");
        let (token, stop) = state.decode(&mut input).unwrap().unwrap();
        assert_eq!(token.as_slice(), b"reconnect");
        assert_eq!(stop, Stop::LineEnd);
        assert_eq!(input.as_slice(), b"\r\n");
    }

    #[test]
    fn single_read_products_are_zero_copy() {
        let mut state = ConsumeToTerminator::new(b';');
        let mut input = GatewayBuffer::from_static(b"abc;");
        let base = input.storage_addr();
        let (token, _) = state.decode(&mut input).unwrap().unwrap();
        assert_eq!(token.storage_addr(), base);
    }

    #[test]
    fn limit_is_enforced() {
        let mut state = ConsumeToTerminator::new(b':').with_limit(3);
        let mut input = GatewayBuffer::from_static(b"toolong");
        assert!(matches!(
            state.decode(&mut input),
            Err(CodecError::TooLarge { limit: 3, .. })
        ));
    }

    #[test]
    fn finish_flushes_partial_token() {
        let mut state = ConsumeToTerminator::new(b':');
        let mut input = GatewayBuffer::from_static(b"partial");
        assert!(state.decode(&mut input).unwrap().is_none());
        let (token, stop) = state.finish_decode().unwrap().unwrap();
        assert_eq!(token.as_slice(), b"partial");
        assert_eq!(stop, Stop::EndOfStream);
    }
}
