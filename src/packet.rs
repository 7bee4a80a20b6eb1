//! The five RFC 1350 packet shapes, and their wire parsing/serialization.
//!
//! Parsing is a single free function dispatching on the 2-byte opcode; there
//! is no opcode-to-constructor registry. Each variant owns its own `read`/
//! `write` pair, called from the dispatcher's `match`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Write};
use std::result;
use std::str;

/// Maximum data bytes carried by a single `Data` packet.
pub const MAX_DATA_SIZE: usize = 512;
/// Largest well-formed datagram this codec ever produces or accepts
/// (2-byte opcode + 2-byte block number + `MAX_DATA_SIZE` data bytes).
pub const MAX_PACKET_SIZE: usize = MAX_DATA_SIZE + 4;

/// Failure parsing a raw datagram into a [`Packet`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer than 2 bytes: no opcode could be extracted.
    OpcodeExtract,
    /// The opcode is not one of the five RFC 1350 opcodes.
    InvalidOpcode(u16),
    /// The remainder of the datagram doesn't match the shape its opcode demands.
    PayloadParse(PayloadParseKind),
    /// An `Error` packet's error code is outside `0..=7`.
    InvalidErrorcode(u16),
}

/// The specific way a variant's payload failed to parse.
#[derive(Debug, PartialEq, Eq)]
pub enum PayloadParseKind {
    /// RRQ/WRQ didn't contain at least a filename and a mode field.
    MissingField,
    /// The mode field wasn't `netascii` or `octet`.
    UnsupportedMode,
    /// A Data packet carried more than [`MAX_DATA_SIZE`] bytes.
    DataSize,
    /// A block number (Data/Ack) couldn't be read as 2 bytes.
    BlockNumber,
    /// An error packet's code field couldn't be read as 2 bytes.
    ErrorCode,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::OpcodeExtract => write!(f, "datagram too short to contain an opcode"),
            ParseError::InvalidOpcode(op) => write!(f, "invalid TFTP opcode: {}", op),
            ParseError::PayloadParse(kind) => write!(f, "malformed payload: {:?}", kind),
            ParseError::InvalidErrorcode(code) => write!(f, "unknown TFTP error code: {}", code),
        }
    }
}

impl std::error::Error for ParseError {}

/// The transfer mode requested by an RRQ/WRQ.
///
/// `mail` is a well-formed RFC 1350 mode token but is never produced here:
/// it is rejected at parse time as [`PayloadParseKind::UnsupportedMode`],
/// matching this core's mail-mode non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Netascii,
    Octet,
}

impl TransferMode {
    fn parse(s: &[u8]) -> result::Result<Self, PayloadParseKind> {
        let lower = s.to_ascii_lowercase();
        match lower.as_slice() {
            b"netascii" => Ok(TransferMode::Netascii),
            b"octet" => Ok(TransferMode::Octet),
            _ => Err(PayloadParseKind::UnsupportedMode),
        }
    }

    fn as_bytes(self) -> &'static [u8] {
        match self {
            TransferMode::Netascii => b"netascii",
            TransferMode::Octet => b"octet",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(str::from_utf8(self.as_bytes()).unwrap())
    }
}

/// One of the seven RFC 1350 error codes a server may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    fn from_u16(code: u16) -> result::Result<Self, u16> {
        use ErrorCode::*;
        match code {
            0 => Ok(NotDefined),
            1 => Ok(FileNotFound),
            2 => Ok(AccessViolation),
            3 => Ok(DiskFull),
            4 => Ok(IllegalOperation),
            5 => Ok(UnknownTid),
            6 => Ok(FileExists),
            7 => Ok(NoSuchUser),
            other => Err(other),
        }
    }

    /// The default human-readable message for this error code.
    pub fn default_message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            NotDefined => "Not defined, see error message (if any)",
            FileNotFound => "File not found",
            AccessViolation => "Access violation",
            DiskFull => "Disk full or allocation exceeded",
            IllegalOperation => "Illegal TFTP operation",
            UnknownTid => "Unknown transfer ID",
            FileExists => "File already exists",
            NoSuchUser => "No such user",
        }
    }
}

impl From<ErrorCode> for Packet {
    /// Builds an `Error` packet carrying the code's default message.
    fn from(code: ErrorCode) -> Packet {
        Packet::Error {
            error_code: code,
            message: code.default_message().as_bytes().to_vec(),
        }
    }
}

/// A parsed TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest {
        filename: Vec<u8>,
        mode: TransferMode,
    },
    WriteRequest {
        filename: Vec<u8>,
        mode: TransferMode,
    },
    Data {
        block_number: u16,
        data: Vec<u8>,
    },
    Ack {
        block_number: u16,
    },
    Error {
        error_code: ErrorCode,
        message: Vec<u8>,
    },
}

impl Packet {
    /// Whether this `Data` packet is the final one in its transfer
    /// (fewer than [`MAX_DATA_SIZE`] bytes of payload).
    pub fn is_last_data(&self) -> bool {
        matches!(self, Packet::Data { data, .. } if data.len() < MAX_DATA_SIZE)
    }

    /// Parses a raw datagram into a [`Packet`].
    pub fn parse(bytes: &[u8]) -> result::Result<Packet, ParseError> {
        if bytes.len() < 2 {
            return Err(ParseError::OpcodeExtract);
        }
        let opcode = u16::from_be_bytes([bytes[0], bytes[1]]);
        let payload = &bytes[2..];
        match opcode {
            1 => parse_request(payload).map(|(filename, mode)| Packet::ReadRequest {
                filename,
                mode,
            }),
            2 => parse_request(payload).map(|(filename, mode)| Packet::WriteRequest {
                filename,
                mode,
            }),
            3 => parse_data(payload),
            4 => parse_ack(payload),
            5 => parse_error(payload),
            other => Err(ParseError::InvalidOpcode(other)),
        }
    }

    /// Serializes this packet into its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_PACKET_SIZE);
        self.write_to(&mut buf)
            .expect("writing to a Vec<u8> cannot fail");
        buf
    }

    fn write_to(&self, buf: &mut impl Write) -> io::Result<()> {
        match self {
            Packet::ReadRequest { filename, mode } => write_request(1, filename, *mode, buf),
            Packet::WriteRequest { filename, mode } => write_request(2, filename, *mode, buf),
            Packet::Data { block_number, data } => {
                buf.write_u16::<BigEndian>(3)?;
                buf.write_u16::<BigEndian>(*block_number)?;
                buf.write_all(data)
            }
            Packet::Ack { block_number } => {
                buf.write_u16::<BigEndian>(4)?;
                buf.write_u16::<BigEndian>(*block_number)
            }
            Packet::Error {
                error_code,
                message,
            } => {
                buf.write_u16::<BigEndian>(5)?;
                buf.write_u16::<BigEndian>(*error_code as u16)?;
                buf.write_all(message)?;
                buf.write_u8(0)
            }
        }
    }
}

fn write_request(
    opcode: u16,
    filename: &[u8],
    mode: TransferMode,
    buf: &mut impl Write,
) -> io::Result<()> {
    buf.write_u16::<BigEndian>(opcode)?;
    buf.write_all(filename)?;
    buf.write_u8(0)?;
    buf.write_all(mode.as_bytes())?;
    buf.write_u8(0)
}

fn parse_request(payload: &[u8]) -> result::Result<(Vec<u8>, TransferMode), ParseError> {
    let mut fields = split_on_nul(payload);
    let filename = fields
        .next()
        .filter(|f| !f.is_empty())
        .ok_or(ParseError::PayloadParse(PayloadParseKind::MissingField))?;
    let mode_bytes = fields
        .next()
        .filter(|f| !f.is_empty())
        .ok_or(ParseError::PayloadParse(PayloadParseKind::MissingField))?;
    let mode = TransferMode::parse(mode_bytes).map_err(ParseError::PayloadParse)?;
    Ok((filename.to_vec(), mode))
}

/// Splits `bytes` on NUL separators, yielding each field (never containing
/// the separator). Any trailing NUL-terminated fields (TFTP options) are
/// simply further items of this iterator and are ignored by callers that
/// only look at the first two.
fn split_on_nul(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes.split(|&b| b == 0)
}

fn parse_data(mut payload: &[u8]) -> result::Result<Packet, ParseError> {
    let block_number = payload
        .read_u16::<BigEndian>()
        .map_err(|_| ParseError::PayloadParse(PayloadParseKind::BlockNumber))?;
    if payload.len() > MAX_DATA_SIZE {
        return Err(ParseError::PayloadParse(PayloadParseKind::DataSize));
    }
    Ok(Packet::Data {
        block_number,
        data: payload.to_vec(),
    })
}

fn parse_ack(mut payload: &[u8]) -> result::Result<Packet, ParseError> {
    if payload.len() != 2 {
        return Err(ParseError::PayloadParse(PayloadParseKind::BlockNumber));
    }
    let block_number = payload
        .read_u16::<BigEndian>()
        .map_err(|_| ParseError::PayloadParse(PayloadParseKind::BlockNumber))?;
    Ok(Packet::Ack { block_number })
}

fn parse_error(mut payload: &[u8]) -> result::Result<Packet, ParseError> {
    let code = payload
        .read_u16::<BigEndian>()
        .map_err(|_| ParseError::PayloadParse(PayloadParseKind::ErrorCode))?;
    let error_code = ErrorCode::from_u16(code).map_err(ParseError::InvalidErrorcode)?;
    let message = split_on_nul(payload).next().unwrap_or(&[]).to_vec();
    Ok(Packet::Error {
        error_code,
        message,
    })
}
