//! TFTP Wire Protocol
//!
//! This module contains the packet codec for the five RFC 1350 packet types
//! and the protocol constants they depend on.
//!
//! # Wire Format
//!
//! Every packet starts with a big-endian 16-bit opcode:
//!
//! | Packet  | Layout                                           |
//! |---------|--------------------------------------------------|
//! | RRQ/WRQ | opcode(1/2) · filename · 0 · mode · 0            |
//! | DATA    | opcode(3) · block(u16) · payload                 |
//! | ACK     | opcode(4) · block(u16)                           |
//! | ERROR   | opcode(5) · code(u16) · message · 0              |
//!
//! [`Packet::to_bytes`] is the single source of truth for this layout and
//! [`Packet::from_bytes`] accepts exactly what it produces (plus the leniencies
//! documented on each decoder).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Largest datagram the server will accept or produce.
///
/// Covers the 4-byte DATA header, the largest configurable payload
/// ([`BlockSizeConfig::MAX`]) and some margin for long request names.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Size of the fixed DATA/ACK/ERROR header (opcode + block number or error code).
pub const HEADER_SIZE: usize = 4;

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
/// Each opcode corresponds to a specific packet format as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// A payload shorter than the block size marks the last block of a transfer.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Special case: ACK with block number 0 is the server's go-ahead for a write request.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Terminates the current transfer. Never acknowledged or retransmitted.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(6), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::WriteRequest.name(), "WRQ");
    /// assert_eq!(TftpOpcode::Acknowledgment.name(), "ACK");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see error message
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Also used when a file disappears from the store in the middle of a read.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    ///
    /// Sent for unsupported transfer modes.
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    ///
    /// Write requests never overwrite an existing file.
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(6), Some(TftpErrorCode::FileAlreadyExists));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Only octet mode is served; the other RFC 1350 modes are recognised so they
/// can be rejected with a precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode, mode string "octet"
    Octet,

    /// Text mode with CR-LF line endings, mode string "netascii"
    NetAscii,

    /// Obsolete mail delivery mode, mode string "mail"
    Mail,
}

impl TransferMode {
    /// Parse a transfer mode from a string
    ///
    /// The comparison is case-insensitive.
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
    /// assert_eq!(TransferMode::from_str_opt("binary"), None);
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            "mail" => Some(Self::Mail),
            _ => None,
        }
    }

    /// Get the string representation of the transfer mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
            Self::Mail => "mail",
        }
    }

    /// Check if this transfer mode is supported by the server
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert!(TransferMode::Octet.is_supported());
    /// assert!(!TransferMode::NetAscii.is_supported());
    /// ```
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Octet)
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unknown transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Block Size Configuration
///
/// The data payload size used by a transfer. It governs both framing (the largest
/// DATA payload sent) and end-of-transfer detection (a shorter payload is the last one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizeConfig {
    /// Payload size in bytes
    pub size: usize,
}

impl BlockSizeConfig {
    /// Default TFTP block size (512 bytes)
    pub const DEFAULT: usize = 512;

    /// Maximum allowed block size (1400 bytes)
    ///
    /// Keeps DATA packets inside a standard Ethernet MTU.
    pub const MAX: usize = 1400;

    /// Create a BlockSizeConfig with the default size
    pub fn default_size() -> Self {
        Self { size: Self::DEFAULT }
    }

    /// Create a BlockSizeConfig, rejecting sizes outside `1..=MAX`
    ///
    /// # Examples
    /// ```
    /// use tftp::BlockSizeConfig;
    ///
    /// assert_eq!(BlockSizeConfig::new(1024).map(|c| c.size), Some(1024));
    /// assert!(BlockSizeConfig::new(0).is_none());
    /// assert!(BlockSizeConfig::new(2000).is_none());
    /// ```
    pub fn new(size: usize) -> Option<Self> {
        (1..=Self::MAX).contains(&size).then_some(Self { size })
    }

    /// Check whether a payload of `len` bytes ends the transfer
    pub fn is_last_block(self, len: usize) -> bool {
        len < self.size
    }
}

impl Default for BlockSizeConfig {
    fn default() -> Self {
        Self::default_size()
    }
}

impl fmt::Display for BlockSizeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.size)
    }
}

/// Direction of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// RRQ: the client downloads a file, the server sends DATA
    Read,
    /// WRQ: the client uploads a file, the server sends ACKs
    Write,
}

impl RequestKind {
    pub fn opcode(self) -> TftpOpcode {
        match self {
            Self::Read => TftpOpcode::ReadRequest,
            Self::Write => TftpOpcode::WriteRequest,
        }
    }
}

/// TFTP Request (RRQ/WRQ) representation
///
/// The mode is kept as received so unsupported modes can be reported back
/// verbatim; use [`TftpRequest::transfer_mode`] to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    pub kind: RequestKind,
    pub filename: String,
    pub mode: String,
}

impl TftpRequest {
    /// Create a new read request
    ///
    /// # Examples
    /// ```
    /// use tftp::{RequestKind, TftpRequest};
    ///
    /// let request = TftpRequest::read("boot.img", "octet");
    /// assert_eq!(request.kind, RequestKind::Read);
    /// assert_eq!(request.filename, "boot.img");
    /// ```
    pub fn read(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Read,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Create a new write request
    pub fn write(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Write,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Interpret the mode string, `None` if it names no RFC 1350 mode
    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::from_str_opt(&self.mode)
    }
}

impl fmt::Display for TftpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} mode={}", self.kind.opcode(), self.filename, self.mode)
    }
}

/// TFTP Data packet representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpData {
    /// Block number (1-indexed, wraps from 65535 to 0)
    pub block: u16,
    /// Data payload
    pub data: Vec<u8>,
}

impl TftpData {
    /// Create a new data packet
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpData;
    ///
    /// let data = TftpData::new(1, b"Hello, TFTP!");
    /// assert_eq!(data.block, 1);
    /// assert_eq!(data.data, b"Hello, TFTP!");
    /// ```
    pub fn new(block: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            block,
            data: data.into(),
        }
    }
}

/// TFTP ACK packet representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftpAck {
    /// Block number being acknowledged
    pub block: u16,
}

impl TftpAck {
    pub fn new(block: u16) -> Self {
        Self { block }
    }
}

/// TFTP Error packet representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpError {
    pub code: TftpErrorCode,
    pub message: String,
}

impl TftpError {
    /// Create a new error packet with a custom message
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpError, TftpErrorCode};
    ///
    /// let error = TftpError::new(TftpErrorCode::FileNotFound, "boot.img not found");
    /// assert_eq!(error.code, TftpErrorCode::FileNotFound);
    /// assert_eq!(error.message, "boot.img not found");
    /// ```
    pub fn new(code: TftpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a new error packet with the default message for the error code
    pub fn with_default_message(code: TftpErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}

impl fmt::Display for TftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Reasons a datagram could not be decoded
///
/// None of these are fatal: callers drop the datagram and keep waiting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet too short ({len} bytes) for {what}")]
    Truncated { what: &'static str, len: usize },

    #[error("packet of {0} bytes exceeds the maximum packet size")]
    Oversized(usize),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("{0} is not NUL-terminated")]
    Unterminated(&'static str),
}

/// A decoded TFTP packet
///
/// The variant set is closed by RFC 1350; every consumer matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(TftpRequest),
    Data(TftpData),
    Ack(TftpAck),
    Error(TftpError),
}

impl Packet {
    /// The wire opcode of this packet
    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::Request(request) => request.kind.opcode(),
            Self::Data(_) => TftpOpcode::Data,
            Self::Ack(_) => TftpOpcode::Acknowledgment,
            Self::Error(_) => TftpOpcode::Error,
        }
    }

    /// Decode a datagram
    ///
    /// Leniencies: bytes after a request's mode terminator (RFC 2347 options) are
    /// ignored, an ACK longer than four bytes is accepted, an ERROR message without
    /// its terminator runs to the end of the datagram, and an unknown error code is
    /// read as [`TftpErrorCode::NotDefined`].
    ///
    /// # Examples
    /// ```
    /// use tftp::{Packet, TftpAck};
    ///
    /// let packet = Packet::from_bytes(&[0, 4, 0, 7]).unwrap();
    /// assert_eq!(packet, Packet::Ack(TftpAck::new(7)));
    /// assert!(Packet::from_bytes(&[0, 9]).is_err());
    /// ```
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(DecodeError::Oversized(buf.len()));
        }
        if buf.len() < 2 {
            return Err(DecodeError::Truncated {
                what: "opcode",
                len: buf.len(),
            });
        }

        let raw_opcode = read_u16(buf, 0);
        let opcode = TftpOpcode::from_u16(raw_opcode).ok_or(DecodeError::UnknownOpcode(raw_opcode))?;

        match opcode {
            TftpOpcode::ReadRequest => parse_request(RequestKind::Read, buf),
            TftpOpcode::WriteRequest => parse_request(RequestKind::Write, buf),
            TftpOpcode::Data => {
                require_header(buf, "DATA")?;
                Ok(Self::Data(TftpData::new(read_u16(buf, 2), &buf[HEADER_SIZE..])))
            }
            TftpOpcode::Acknowledgment => {
                require_header(buf, "ACK")?;
                Ok(Self::Ack(TftpAck::new(read_u16(buf, 2))))
            }
            TftpOpcode::Error => {
                require_header(buf, "ERROR")?;
                let code = TftpErrorCode::from_u16(read_u16(buf, 2)).unwrap_or(TftpErrorCode::NotDefined);
                let msg_bytes = &buf[HEADER_SIZE..];
                let end = find_zero(msg_bytes, 0).unwrap_or(msg_bytes.len());
                let message = String::from_utf8_lossy(&msg_bytes[..end]).into_owned();
                Ok(Self::Error(TftpError::new(code, message)))
            }
        }
    }

    /// Encode the packet for the wire
    ///
    /// Filenames, modes and messages must not contain NUL bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Request(request) => {
                let mut v = Vec::with_capacity(2 + request.filename.len() + request.mode.len() + 2);
                v.extend_from_slice(&request.kind.opcode().as_u16().to_be_bytes());
                v.extend_from_slice(request.filename.as_bytes());
                v.push(0);
                v.extend_from_slice(request.mode.as_bytes());
                v.push(0);
                v
            }
            Self::Data(data) => {
                let mut v = Vec::with_capacity(HEADER_SIZE + data.data.len());
                v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
                v.extend_from_slice(&data.block.to_be_bytes());
                v.extend_from_slice(&data.data);
                v
            }
            Self::Ack(ack) => {
                let mut v = Vec::with_capacity(HEADER_SIZE);
                v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
                v.extend_from_slice(&ack.block.to_be_bytes());
                v
            }
            Self::Error(error) => {
                let mut v = Vec::with_capacity(HEADER_SIZE + error.message.len() + 1);
                v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
                v.extend_from_slice(&error.code.as_u16().to_be_bytes());
                v.extend_from_slice(error.message.as_bytes());
                v.push(0);
                v
            }
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(request) => write!(f, "{}", request),
            Self::Data(data) => write!(f, "DATA#{} ({}B)", data.block, data.data.len()),
            Self::Ack(ack) => write!(f, "ACK#{}", ack.block),
            Self::Error(error) => write!(f, "ERROR {}", error),
        }
    }
}

impl From<TftpError> for Packet {
    fn from(error: TftpError) -> Self {
        Self::Error(error)
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..].iter().position(|&b| b == 0).map(|pos| start + pos)
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn require_header(buf: &[u8], what: &'static str) -> Result<(), DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated { what, len: buf.len() });
    }
    Ok(())
}

fn parse_request(kind: RequestKind, buf: &[u8]) -> Result<Packet, DecodeError> {
    let fname_end = find_zero(buf, 2).ok_or(DecodeError::Unterminated("filename"))?;
    let filename = String::from_utf8_lossy(&buf[2..fname_end]).into_owned();

    let mode_start = fname_end + 1;
    if mode_start >= buf.len() {
        return Err(DecodeError::Unterminated("mode"));
    }
    let mode_end = find_zero(buf, mode_start).ok_or(DecodeError::Unterminated("mode"))?;
    let mode = String::from_utf8_lossy(&buf[mode_start..mode_end]).into_owned();

    Ok(Packet::Request(TftpRequest { kind, filename, mode }))
}
