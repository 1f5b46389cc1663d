// RFC 1350 - The TFTP Protocol (Revision 2), octet mode only.
//
// Wire layout (all integers big-endian):
//   RRQ/WRQ  | opcode(2) | filename | 0 | mode | 0 |
//   DATA     | opcode(2) | block(2) | payload (0-512) |
//   ACK      | opcode(2) | block(2) |
//   ERROR    | opcode(2) | code(2)  | message |
//
// Error messages are written without a trailing NUL; a trailing NUL on an
// incoming error message is tolerated.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TftpError};

/// Largest payload carried by a single DATA packet.
pub const BLOCK_SIZE: usize = 512;
/// Opcode + block number.
pub const HEADER_SIZE: usize = 4;
/// Largest datagram the protocol exchanges.
pub const MAX_PACKET_SIZE: usize = BLOCK_SIZE + HEADER_SIZE;
/// The only transfer mode the server accepts.
pub const OCTET_MODE: &str = "octet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    ReadRequest = 1,  // RRQ
    WriteRequest = 2, // WRQ
    Data = 3,         // DATA
    Acknowledge = 4,  // ACK
    Error = 5,        // ERROR
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> std::result::Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(Opcode::ReadRequest),
            2 => Ok(Opcode::WriteRequest),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Acknowledge),
            5 => Ok(Opcode::Error),
            _ => Err(TftpError::IllegalOperation(format!("Invalid opcode: {}", value))),
        }
    }
}

impl Opcode {
    /// Read the leading opcode of a datagram without decoding the rest.
    pub fn peek(packet: &[u8]) -> Option<Opcode> {
        read_u16(packet, 0).and_then(|raw| Opcode::try_from(raw).ok())
    }
}

// RFC 1350 - TFTP Error Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,         // Not defined, see error message
    NotFound = 1,          // File not found
    AccessViolation = 2,   // Access violation
    DiskFull = 3,          // Disk full or allocation exceeded
    IllegalOperation = 4,  // Illegal TFTP operation
    UnknownTransferId = 5, // Unknown transfer ID
    FileExists = 6,        // File already exists
    NoSuchUser = 7,        // No such user
}

impl TryFrom<u16> for ErrorCode {
    type Error = TftpError;

    fn try_from(value: u16) -> std::result::Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            0 => Ok(ErrorCode::Undefined),
            1 => Ok(ErrorCode::NotFound),
            2 => Ok(ErrorCode::AccessViolation),
            3 => Ok(ErrorCode::DiskFull),
            4 => Ok(ErrorCode::IllegalOperation),
            5 => Ok(ErrorCode::UnknownTransferId),
            6 => Ok(ErrorCode::FileExists),
            7 => Ok(ErrorCode::NoSuchUser),
            _ => Err(TftpError::IllegalOperation(format!(
                "Invalid error code: {}",
                value
            ))),
        }
    }
}

/// A parsed RRQ or WRQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub filename: String,
    pub mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub block: u16,
    pub payload: &'a [u8],
}

impl DataPacket<'_> {
    /// A short block ends the transfer.
    pub fn is_final(&self) -> bool {
        self.payload.len() < BLOCK_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub block: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: ErrorCode,
    pub message: String,
}

pub fn encode_ack(block: u16) -> Bytes {
    let mut packet = BytesMut::with_capacity(HEADER_SIZE);
    packet.put_u16(Opcode::Acknowledge as u16);
    packet.put_u16(block);
    packet.freeze()
}

/// Build a DATA packet. The payload length is not checked; callers slice
/// at most [`BLOCK_SIZE`] bytes.
pub fn encode_data(block: u16, payload: &[u8]) -> Bytes {
    let mut packet = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    packet.put_u16(Opcode::Data as u16);
    packet.put_u16(block);
    packet.put_slice(payload);
    packet.freeze()
}

pub fn encode_error(code: ErrorCode, message: &str) -> Bytes {
    let mut packet = BytesMut::with_capacity(HEADER_SIZE + message.len());
    packet.put_u16(Opcode::Error as u16);
    packet.put_u16(code as u16);
    packet.put_slice(message.as_bytes());
    packet.freeze()
}

/// RRQ/WRQ encoder, used by the client.
pub fn encode_request(opcode: Opcode, filename: &str, mode: &str) -> Bytes {
    let mut packet = BytesMut::with_capacity(2 + filename.len() + mode.len() + 2);
    packet.put_u16(opcode as u16);
    packet.put_slice(filename.as_bytes());
    packet.put_u8(0);
    packet.put_slice(mode.as_bytes());
    packet.put_u8(0);
    packet.freeze()
}

pub fn decode_ack(packet: &[u8]) -> Result<AckPacket> {
    expect_opcode(packet, Opcode::Acknowledge, "Expected ACK packet but received something else")?;
    let block = read_u16(packet, 2)
        .ok_or_else(|| TftpError::IllegalOperation("ACK packet too short".to_string()))?;
    Ok(AckPacket { block })
}

/// Decode the first `received` bytes of `buffer` as a DATA packet.
pub fn decode_data(buffer: &[u8], received: usize) -> Result<DataPacket<'_>> {
    if received < HEADER_SIZE || received > buffer.len() {
        return Err(TftpError::IllegalOperation(format!(
            "DATA packet has invalid length {}",
            received
        )));
    }
    let packet = &buffer[..received];
    expect_opcode(packet, Opcode::Data, "Expected data packet but received something else")?;
    let block = u16::from_be_bytes([packet[2], packet[3]]);
    Ok(DataPacket {
        block,
        payload: &packet[HEADER_SIZE..],
    })
}

pub fn decode_error(packet: &[u8]) -> Result<ErrorPacket> {
    expect_opcode(packet, Opcode::Error, "Expected ERROR packet but received something else")?;
    let raw = read_u16(packet, 2)
        .ok_or_else(|| TftpError::IllegalOperation("ERROR packet too short".to_string()))?;
    let code = ErrorCode::try_from(raw).unwrap_or(ErrorCode::Undefined);
    let message = &packet[HEADER_SIZE..];
    let message = message.strip_suffix(&[0u8]).unwrap_or(message);
    Ok(ErrorPacket {
        code,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

/// Parse an initial RRQ/WRQ datagram.
///
/// Any option pairs after the mode field are ignored.
pub fn decode_request(packet: &[u8]) -> Result<Request> {
    let raw = read_u16(packet, 0)
        .ok_or_else(|| TftpError::IllegalOperation("Packet too small".to_string()))?;
    let opcode = Opcode::try_from(raw)?;
    if !matches!(opcode, Opcode::ReadRequest | Opcode::WriteRequest) {
        return Err(TftpError::IllegalOperation(format!(
            "Expected a request packet, got {:?}",
            opcode
        )));
    }

    let (filename, rest) = take_field(&packet[2..], TftpError::InvalidFilename)?;
    let (mode, _) = take_field(rest, TftpError::InvalidMode)?;

    Ok(Request {
        opcode,
        filename,
        mode,
    })
}

/// Split a NUL-terminated, non-empty UTF-8 field off the front of `bytes`.
fn take_field(bytes: &[u8], empty: TftpError) -> Result<(String, &[u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| TftpError::IllegalOperation("Missing null terminator".to_string()))?;
    if end == 0 {
        return Err(empty);
    }
    let field = std::str::from_utf8(&bytes[..end])
        .map_err(|e| TftpError::IllegalOperation(format!("Invalid UTF-8 in request: {}", e)))?;
    Ok((field.to_string(), &bytes[end + 1..]))
}

fn expect_opcode(packet: &[u8], expected: Opcode, message: &str) -> Result<()> {
    match read_u16(packet, 0) {
        Some(raw) if raw == expected as u16 => Ok(()),
        _ => Err(TftpError::IllegalOperation(message.to_string())),
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let pair = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([pair[0], pair[1]]))
}
