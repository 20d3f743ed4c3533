//! PostgreSQL message decoder.
//!
//! [`read_frame`] pulls exactly one `(tag, payload)` frame off a byte stream;
//! [`parse_message`] walks the payload with a [`MessageReader`] cursor and
//! produces a [`BackendMessage`]. Every read is bounds-checked: a payload that
//! ends early is a protocol error, never a panic.

use std::io::{self, Read};

use pgline_core::{ConnectionError, ConnectionErrorKind, Error, ProtocolError, Result};

use super::{
    BackendMessage, ErrorFields, FieldDescription, MAX_MESSAGE_LEN, TransactionStatus, auth_code,
    backend_type,
};

/// Bounds-checked cursor over a message payload.
#[derive(Debug)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(short)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let b = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Signed 64-bit, high word first.
    pub fn read_i64(&mut self) -> Result<i64> {
        let high = self.read_i32()?;
        let low = self.read_u32()?;
        Ok((i64::from(high) << 32) | i64::from(low))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(short());
        }
        let data = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    /// Everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let data = &self.data[self.pos..];
        self.pos = self.data.len();
        data
    }

    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(short());
        };
        let s = std::str::from_utf8(&rest[..end]).map_err(|e| {
            Error::Protocol(ProtocolError {
                message: format!("invalid UTF-8 in message text: {}", e),
                raw_data: Some(rest[..end].to_vec()),
                source: None,
            })
        })?;
        self.pos += end + 1;
        Ok(s)
    }

    fn read_string(&mut self) -> Result<String> {
        self.read_cstr().map(str::to_string)
    }
}

fn short() -> Error {
    Error::protocol("short message")
}

fn read_err(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "connection closed by server".to_string(),
            source: Some(Box::new(e)),
        })
    } else {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("failed to read from server: {}", e),
            source: Some(Box::new(e)),
        })
    }
}

/// Read one tagged frame from the stream.
///
/// A declared length below 4 is a protocol error. A payload larger than
/// `max_len` is read and discarded so the stream stays aligned on the next
/// frame, then reported as a protocol error.
pub fn read_frame<R: Read + ?Sized>(r: &mut R, max_len: usize) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header).map_err(read_err)?;
    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if len < 4 {
        return Err(Error::protocol(format!(
            "invalid length {} for message '{}'",
            len,
            char::from(tag)
        )));
    }
    let body_len = (len - 4) as usize;

    if body_len > max_len.min(MAX_MESSAGE_LEN) {
        let mut rest = (&mut *r).take(body_len as u64);
        let drained = io::copy(&mut rest, &mut io::sink()).map_err(read_err)?;
        if drained < body_len as u64 {
            return Err(read_err(io::ErrorKind::UnexpectedEof.into()));
        }
        return Err(Error::protocol(format!(
            "message '{}' of {} bytes exceeds the {} byte limit",
            char::from(tag),
            body_len,
            max_len
        )));
    }

    let mut body = vec![0u8; body_len];
    r.read_exact(&mut body).map_err(read_err)?;
    Ok((tag, body))
}

/// Read and decode one backend message.
pub fn read_message<R: Read + ?Sized>(r: &mut R, max_len: usize) -> Result<BackendMessage> {
    let (tag, body) = read_frame(r, max_len)?;
    parse_message(tag, &body)
}

/// Decode the payload of a backend message with the given tag.
pub fn parse_message(tag: u8, payload: &[u8]) -> Result<BackendMessage> {
    let mut r = MessageReader::new(payload);
    let msg = match tag {
        backend_type::AUTHENTICATION => parse_auth(&mut r)?,
        backend_type::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: r.read_i32()?,
            secret_key: r.read_i32()?,
        },
        backend_type::BIND_COMPLETE => BackendMessage::BindComplete,
        backend_type::CLOSE_COMPLETE => BackendMessage::CloseComplete,
        backend_type::COMMAND_COMPLETE => BackendMessage::CommandComplete(r.read_string()?),
        backend_type::DATA_ROW => parse_data_row(&mut r)?,
        backend_type::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        backend_type::ERROR_RESPONSE => BackendMessage::ErrorResponse(parse_fields(&mut r)?),
        backend_type::NO_DATA => BackendMessage::NoData,
        backend_type::NOTICE_RESPONSE => BackendMessage::NoticeResponse(parse_fields(&mut r)?),
        backend_type::PARAMETER_DESCRIPTION => {
            let count = r.read_u16()?;
            let oids = (0..count)
                .map(|_| r.read_u32())
                .collect::<Result<Vec<_>>>()?;
            BackendMessage::ParameterDescription(oids)
        }
        backend_type::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: r.read_string()?,
            value: r.read_string()?,
        },
        backend_type::PARSE_COMPLETE => BackendMessage::ParseComplete,
        backend_type::READY_FOR_QUERY => {
            let b = r.read_u8()?;
            let status = TransactionStatus::from_byte(b).ok_or_else(|| {
                Error::protocol(format!(
                    "unknown transaction status '{}'",
                    char::from(b)
                ))
            })?;
            BackendMessage::ReadyForQuery(status)
        }
        backend_type::ROW_DESCRIPTION => parse_row_description(&mut r)?,
        _ => BackendMessage::Unknown {
            tag,
            payload: payload.to_vec(),
        },
    };
    Ok(msg)
}

fn parse_auth(r: &mut MessageReader<'_>) -> Result<BackendMessage> {
    let code = r.read_i32()?;
    Ok(match code {
        auth_code::OK => BackendMessage::AuthenticationOk,
        auth_code::KERBEROS_V5 => BackendMessage::AuthenticationKerberosV5,
        auth_code::CLEARTEXT_PASSWORD => BackendMessage::AuthenticationCleartextPassword,
        auth_code::CRYPT_PASSWORD => {
            let s = r.read_bytes(2)?;
            BackendMessage::AuthenticationCryptPassword([s[0], s[1]])
        }
        auth_code::MD5_PASSWORD => {
            let s = r.read_bytes(4)?;
            BackendMessage::AuthenticationMD5Password([s[0], s[1], s[2], s[3]])
        }
        auth_code::SCM_CREDENTIAL => BackendMessage::AuthenticationSCMCredential,
        _ => BackendMessage::AuthenticationUnknown {
            code,
            data: r.read_rest().to_vec(),
        },
    })
}

fn parse_data_row(r: &mut MessageReader<'_>) -> Result<BackendMessage> {
    let count = r.read_u16()?;
    let mut values = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let len = r.read_i32()?;
        if len < 0 {
            values.push(None);
            continue;
        }
        let len = len as usize;
        if len >= MAX_MESSAGE_LEN {
            return Err(Error::protocol(format!(
                "column value of {} bytes is too long",
                len
            )));
        }
        values.push(Some(r.read_bytes(len)?.to_vec()));
    }
    Ok(BackendMessage::DataRow(values))
}

fn parse_row_description(r: &mut MessageReader<'_>) -> Result<BackendMessage> {
    let count = r.read_u16()?;
    let mut fields = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = r.read_string()?;
        let table_oid = r.read_u32()?;
        let column_id = r.read_i16()?;
        let type_oid = r.read_u32()?;
        let type_size = r.read_i16()?;
        let type_modifier = r.read_i32()?;
        // format code; results are always requested as text
        let _format = r.read_i16()?;
        fields.push(FieldDescription {
            name,
            table_oid: (table_oid != 0).then_some(table_oid),
            column_id: (column_id != 0).then_some(column_id),
            type_oid,
            type_size,
            type_modifier,
        });
    }
    Ok(BackendMessage::RowDescription(fields))
}

fn parse_fields(r: &mut MessageReader<'_>) -> Result<ErrorFields> {
    let mut fields = Vec::new();
    loop {
        let code = r.read_u8()?;
        if code == 0 {
            break;
        }
        fields.push((code, r.read_string()?));
    }
    Ok(ErrorFields { fields })
}
