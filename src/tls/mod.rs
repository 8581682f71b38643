//! TLS ClientHello sniffing.
//!
//! # Responsibilities
//! - Recognise a TLS handshake record or an SSLv2-framed ClientHello from
//!   the first bytes of a connection
//! - Extract protocol version, cipher suites and server name without
//!   taking part in the handshake
//! - Hand back the untouched original bytes for forwarding
//!
//! # Design Decisions
//! - Parsing works on a read-only view; nothing is consumed.
//! - Too few bytes is not an error, the caller reads more and offers again.

pub mod sniffer;

pub use sniffer::{sniff, ClientHelloSniffer};

use std::fmt;

/// First byte of a TLS handshake record.
pub const RECORD_HANDSHAKE: u8 = 22;
/// High bit of the first byte of an SSLv2 record header.
pub const SSL2_RECORD_MARKER: u8 = 0x80;

pub const TLS_RSA_WITH_RC4_128_MD5: u16 = 0x0004;
pub const TLS_RSA_WITH_RC4_128_SHA: u16 = 0x0005;

#[derive(Debug, thiserror::Error)]
pub enum SniffError {
    #[error("record length {length} exceeds {limit}")]
    RecordTooLarge { length: usize, limit: usize },

    #[error("malformed client hello: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Buffer(#[from] crate::buffer::BufferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Tls,
    SslV2,
}

/// Protocol version as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const SSL_2: ProtocolVersion = ProtocolVersion(0x0002);
    pub const SSL_3: ProtocolVersion = ProtocolVersion(0x0300);
    pub const TLS_1_0: ProtocolVersion = ProtocolVersion(0x0301);
    pub const TLS_1_1: ProtocolVersion = ProtocolVersion(0x0302);
    pub const TLS_1_2: ProtocolVersion = ProtocolVersion(0x0303);
    pub const TLS_1_3: ProtocolVersion = ProtocolVersion(0x0304);
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolVersion::SSL_2 => f.write_str("SSLv2"),
            ProtocolVersion::SSL_3 => f.write_str("SSLv3"),
            ProtocolVersion::TLS_1_0 => f.write_str("TLSv1.0"),
            ProtocolVersion::TLS_1_1 => f.write_str("TLSv1.1"),
            ProtocolVersion::TLS_1_2 => f.write_str("TLSv1.2"),
            ProtocolVersion::TLS_1_3 => f.write_str("TLSv1.3"),
            ProtocolVersion(other) => write!(f, "0x{other:04x}"),
        }
    }
}

/// What a ClientHello offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub format: RecordFormat,
    /// Client version from the hello body, raised by a
    /// `supported_versions` extension when present.
    pub version: ProtocolVersion,
    /// SSLv2 cipher specs are three bytes; TLS suites fit in the low 16 bits.
    pub cipher_suites: Vec<u32>,
    /// Occurrences of the two RSA RC4 suites.
    pub rc4_suites: usize,
    pub server_name: Option<String>,
}

impl ClientHelloInfo {
    pub fn offers_rc4(&self) -> bool {
        self.rc4_suites > 0
    }

    /// A client that offers RC4 and cannot negotiate above TLS 1.0 needs the
    /// legacy RC4 suite selected for it.
    pub fn requires_legacy_rc4(&self) -> bool {
        self.offers_rc4() && self.version <= ProtocolVersion::TLS_1_0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffOutcome {
    /// The record is not complete yet.
    NeedMore,
    /// Not a ClientHello; forward the bytes as they are.
    NotClientHello,
    ClientHello(ClientHelloInfo),
}

/// True when `first` could begin a TLS or SSLv2 record.
pub fn looks_like_tls(first: u8) -> bool {
    first == RECORD_HANDSHAKE || first & SSL2_RECORD_MARKER != 0
}
