//! ClientHello record parser.

use super::{
    ClientHelloInfo, ProtocolVersion, RecordFormat, SniffError, SniffOutcome, RECORD_HANDSHAKE,
    SSL2_RECORD_MARKER, TLS_RSA_WITH_RC4_128_MD5, TLS_RSA_WITH_RC4_128_SHA,
};
use crate::buffer::GatewayBuffer;
use crate::codec::Accumulator;

const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const SSL2_CLIENT_HELLO: u8 = 1;
/// Largest plaintext fragment plus the allowed expansion.
const MAX_TLS_RECORD: usize = 16384 + 2048;
const TLS_HEADER: usize = 5;
const SSL2_HEADER: usize = 2;
const RANDOM_LEN: usize = 32;

const EXT_SERVER_NAME: u16 = 0;
const EXT_SUPPORTED_VERSIONS: u16 = 43;

/// Inspect the start of a connection without consuming it.
pub fn sniff(bytes: &[u8]) -> Result<SniffOutcome, SniffError> {
    match bytes.first() {
        None => Ok(SniffOutcome::NeedMore),
        Some(&RECORD_HANDSHAKE) => sniff_tls(bytes),
        Some(&first) if first & SSL2_RECORD_MARKER != 0 => sniff_ssl2(bytes),
        Some(_) => Ok(SniffOutcome::NotClientHello),
    }
}

fn sniff_tls(bytes: &[u8]) -> Result<SniffOutcome, SniffError> {
    if bytes.len() < TLS_HEADER {
        return Ok(SniffOutcome::NeedMore);
    }
    let length = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    if length > MAX_TLS_RECORD {
        return Err(SniffError::RecordTooLarge {
            length,
            limit: MAX_TLS_RECORD,
        });
    }
    if bytes.len() < TLS_HEADER + length {
        return Ok(SniffOutcome::NeedMore);
    }

    let mut record = Reader::new(&bytes[TLS_HEADER..TLS_HEADER + length]);
    if record.u8()? != HANDSHAKE_CLIENT_HELLO {
        return Ok(SniffOutcome::NotClientHello);
    }
    // A hello fragmented over several records is parsed as far as this one goes.
    let body_len = record.u24()?.min(record.remaining());
    let mut hello = Reader::new(record.take(body_len)?);

    let mut version = ProtocolVersion(hello.u16()?);
    hello.skip(RANDOM_LEN)?;
    let session_id_len = hello.u8()? as usize;
    hello.skip(session_id_len)?;
    let suites_len = hello.u16()? as usize;
    if suites_len % 2 != 0 {
        return Err(SniffError::Malformed("odd cipher suite length"));
    }
    let cipher_suites: Vec<u32> = hello
        .take(suites_len)?
        .chunks_exact(2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]) as u32)
        .collect();

    let mut server_name = None;
    if hello.remaining() > 0 {
        let compression_len = hello.u8()? as usize;
        hello.skip(compression_len)?;
    }
    if hello.remaining() >= 2 {
        let extensions_len = hello.u16()? as usize;
        let mut extensions = Reader::new(hello.take(extensions_len.min(hello.remaining()))?);
        while extensions.remaining() >= 4 {
            let kind = extensions.u16()?;
            let len = extensions.u16()? as usize;
            let data = extensions.take(len)?;
            match kind {
                EXT_SERVER_NAME => server_name = parse_server_name(data),
                EXT_SUPPORTED_VERSIONS => {
                    if let Some(highest) = highest_supported_version(data) {
                        version = version.max(highest);
                    }
                }
                _ => {}
            }
        }
    }

    Ok(SniffOutcome::ClientHello(ClientHelloInfo {
        format: RecordFormat::Tls,
        version,
        rc4_suites: count_rc4(&cipher_suites),
        cipher_suites,
        server_name,
    }))
}

fn sniff_ssl2(bytes: &[u8]) -> Result<SniffOutcome, SniffError> {
    if bytes.len() < SSL2_HEADER {
        return Ok(SniffOutcome::NeedMore);
    }
    let length = (((bytes[0] & !SSL2_RECORD_MARKER) as usize) << 8) | bytes[1] as usize;
    if bytes.len() < SSL2_HEADER + length {
        return Ok(SniffOutcome::NeedMore);
    }

    let mut hello = Reader::new(&bytes[SSL2_HEADER..SSL2_HEADER + length]);
    if hello.u8()? != SSL2_CLIENT_HELLO {
        return Ok(SniffOutcome::NotClientHello);
    }
    let version = ProtocolVersion(hello.u16()?);
    let specs_len = hello.u16()? as usize;
    let _session_id_len = hello.u16()?;
    let _challenge_len = hello.u16()?;
    if specs_len % 3 != 0 {
        return Err(SniffError::Malformed("cipher spec length not a multiple of 3"));
    }
    let cipher_suites: Vec<u32> = hello
        .take(specs_len)?
        .chunks_exact(3)
        .map(|s| u32::from_be_bytes([0, s[0], s[1], s[2]]))
        .collect();

    Ok(SniffOutcome::ClientHello(ClientHelloInfo {
        format: RecordFormat::SslV2,
        version,
        rc4_suites: count_rc4(&cipher_suites),
        cipher_suites,
        server_name: None,
    }))
}

fn count_rc4(suites: &[u32]) -> usize {
    suites
        .iter()
        .filter(|&&s| s == TLS_RSA_WITH_RC4_128_MD5 as u32 || s == TLS_RSA_WITH_RC4_128_SHA as u32)
        .count()
}

fn parse_server_name(data: &[u8]) -> Option<String> {
    let mut list = Reader::new(data);
    let list_len = list.u16().ok()? as usize;
    let mut names = Reader::new(list.take(list_len).ok()?);
    while names.remaining() >= 3 {
        let name_type = names.u8().ok()?;
        let len = names.u16().ok()? as usize;
        let name = names.take(len).ok()?;
        if name_type == 0 {
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
    }
    None
}

fn highest_supported_version(data: &[u8]) -> Option<ProtocolVersion> {
    let mut list = Reader::new(data);
    let len = list.u8().ok()? as usize;
    list.take(len)
        .ok()?
        .chunks_exact(2)
        .map(|v| u16::from_be_bytes([v[0], v[1]]))
        .filter(|&v| !is_grease(v) && v <= ProtocolVersion::TLS_1_3.0)
        .max()
        .map(ProtocolVersion)
}

/// Reserved values clients sprinkle into lists to test tolerance.
fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && (value >> 8) == (value & 0xff)
}

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniffError> {
        if n > self.remaining() {
            return Err(SniffError::Malformed("field runs past record"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), SniffError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, SniffError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniffError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, SniffError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

/// Accumulates the first reads of a connection until the ClientHello
/// record is complete, keeping the original bytes for forwarding.
#[derive(Debug, Default)]
pub struct ClientHelloSniffer {
    held: Accumulator,
}

impl ClientHelloSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next read and inspect everything received so far.
    pub fn offer(&mut self, input: GatewayBuffer) -> Result<SniffOutcome, SniffError> {
        if input.has_remaining() {
            self.held.push(input)?;
        }
        sniff(self.held.as_slice())
    }

    /// Every byte offered, unchanged.
    pub fn into_original(mut self) -> GatewayBuffer {
        self.held.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferFlags;
    use bytes::Bytes;

    fn tls_hello(version: u16, suites: &[u16], server_name: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&version.to_be_bytes());
        body.extend_from_slice(&[7u8; RANDOM_LEN]);
        body.push(4);
        body.extend_from_slice(&[1, 2, 3, 4]);
        body.extend_from_slice(&((suites.len() * 2) as u16).to_be_bytes());
        for suite in suites {
            body.extend_from_slice(&suite.to_be_bytes());
        }
        body.extend_from_slice(&[1, 0]);
        let mut extensions = Vec::new();
        if let Some(name) = server_name {
            let mut entry = vec![0u8];
            entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
            entry.extend_from_slice(name.as_bytes());
            let mut data = (entry.len() as u16).to_be_bytes().to_vec();
            data.extend_from_slice(&entry);
            extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&(data.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&data);
        }
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![RECORD_HANDSHAKE, 3, 1];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    fn ssl2_hello(specs: &[u32]) -> Vec<u8> {
        let mut body = vec![SSL2_CLIENT_HELLO, 0x03, 0x01];
        body.extend_from_slice(&((specs.len() * 3) as u16).to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&16u16.to_be_bytes());
        for spec in specs {
            body.extend_from_slice(&spec.to_be_bytes()[1..]);
        }
        body.extend_from_slice(&[9u8; 16]);
        let mut record = vec![0x80 | (body.len() >> 8) as u8, body.len() as u8];
        record.extend_from_slice(&body);
        record
    }

    #[test]
    fn counts_rc4_suites_in_tls_hello() {
        let hello = tls_hello(0x0301, &[0x002f, 0x0005, 0x0004, 0x0035], Some("feed.example.com"));
        let SniffOutcome::ClientHello(info) = sniff(&hello).unwrap() else {
            panic!("expected client hello");
        };
        assert_eq!(info.format, RecordFormat::Tls);
        assert_eq!(info.version, ProtocolVersion::TLS_1_0);
        assert_eq!(info.rc4_suites, 2);
        assert_eq!(info.cipher_suites.len(), 4);
        assert_eq!(info.server_name.as_deref(), Some("feed.example.com"));
        assert!(info.requires_legacy_rc4());
    }

    #[test]
    fn counts_rc4_suites_in_ssl2_hello() {
        let hello = ssl2_hello(&[0x010080, 0x000004, 0x00002f]);
        let SniffOutcome::ClientHello(info) = sniff(&hello).unwrap() else {
            panic!("expected client hello");
        };
        assert_eq!(info.format, RecordFormat::SslV2);
        assert_eq!(info.rc4_suites, 1);
        assert_eq!(info.cipher_suites[0], 0x010080);
    }

    #[test]
    fn partial_record_needs_more() {
        let hello = tls_hello(0x0303, &[0x1301], None);
        for cut in 0..hello.len() {
            assert_eq!(sniff(&hello[..cut]).unwrap(), SniffOutcome::NeedMore, "cut at {cut}");
        }
    }

    #[test]
    fn plain_http_is_not_a_hello() {
        assert_eq!(sniff(b"GET / HTTP/1.1\r\n").unwrap(), SniffOutcome::NotClientHello);
    }

    #[test]
    fn oversized_record_is_rejected() {
        assert!(matches!(
            sniff(&[RECORD_HANDSHAKE, 3, 1, 0xff, 0xff]),
            Err(SniffError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn sniffer_returns_original_bytes() {
        let hello = tls_hello(0x0303, &[0x0005], None);
        let (first, second) = hello.split_at(10);
        let mut sniffer = ClientHelloSniffer::new();
        let offer = |bytes: &[u8]| GatewayBuffer::wrap(Bytes::copy_from_slice(bytes), BufferFlags::SHARED);
        assert_eq!(sniffer.offer(offer(first)).unwrap(), SniffOutcome::NeedMore);
        assert!(matches!(
            sniffer.offer(offer(second)).unwrap(),
            SniffOutcome::ClientHello(info) if info.rc4_suites == 1 && !info.requires_legacy_rc4()
        ));
        assert_eq!(sniffer.into_original().as_slice(), hello.as_slice());
    }
}
