//! Linear whitespace skipping.

use super::{CodecError, DecodingState};
use crate::buffer::GatewayBuffer;

/// Skips space characters (not tabs, not line ends) and reports how many
/// were skipped. An optional maximum stops skipping early; SSE uses a
/// maximum of one so that further leading spaces stay in the value.
#[derive(Debug, Default)]
pub struct LinearWhitespaceSkipping {
    max: Option<usize>,
    count: usize,
}

impl LinearWhitespaceSkipping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max(max: usize) -> Self {
        Self {
            max: Some(max),
            count: 0,
        }
    }

    fn at_max(&self) -> bool {
        self.max.is_some_and(|max| self.count >= max)
    }
}

impl DecodingState for LinearWhitespaceSkipping {
    type Output = usize;

    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<usize>, CodecError> {
        while !self.at_max() {
            match input.as_slice().first() {
                Some(b' ') => {
                    input.advance(1);
                    self.count += 1;
                }
                Some(_) => break,
                None => return Ok(None),
            }
        }
        Ok(Some(std::mem::take(&mut self.count)))
    }

    fn finish_decode(&mut self) -> Result<Option<usize>, CodecError> {
        Ok(Some(std::mem::take(&mut self.count)))
    }
}
