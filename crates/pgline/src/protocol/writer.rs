//! PostgreSQL message encoder.
//!
//! Messages are built with a small set of big-endian primitives between
//! [`MessageWriter::begin`] and [`MessageWriter::finish`]; `finish` patches the
//! length word once the payload is known. Invalid input (an embedded NUL, an
//! out-of-range count, an oversized field) is rejected before any byte reaches
//! the socket, and a rejected message leaves the buffer as it was.

#![allow(clippy::cast_possible_truncation)]

use std::fmt::Display;

use pgline_core::{EncodeErrorKind, Error, Result};

use super::{
    BackendMessage, DescribeKind, FieldDescription, FrontendMessage, MAX_MESSAGE_LEN,
    MAX_TEXT_LEN, auth_code, backend_type, frontend_type,
};

/// Buffer for writing PostgreSQL protocol messages.
///
/// All multi-byte integers are written in big-endian (network) byte order.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    buf: Vec<u8>,
    /// Offset of the length word of the message under construction
    len_at: Option<usize>,
    /// Buffer length before the message under construction started
    mark: usize,
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageWriter {
    /// Create a new message writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            len_at: None,
            mark: 0,
        }
    }

    /// Clear the internal buffer.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.len_at = None;
        self.mark = 0;
    }

    /// Get the current buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ==================== Primitives ====================

    /// Start a message. `None` starts the untagged startup form.
    pub fn begin(&mut self, tag: Option<u8>) {
        self.mark = self.buf.len();
        if let Some(tag) = tag {
            self.buf.push(tag);
        }
        self.len_at = Some(self.buf.len());
        self.buf.extend_from_slice(&[0; 4]);
    }

    /// Patch the length word of the message under construction.
    pub fn finish(&mut self) -> Result<()> {
        let Some(at) = self.len_at.take() else {
            return Err(Error::protocol("finish() without begin()"));
        };
        let len = self.buf.len() - at;
        if len > MAX_MESSAGE_LEN {
            self.buf.truncate(self.mark);
            return Err(Error::encode(
                EncodeErrorKind::TooLong,
                format!("message of {} bytes exceeds the 1 GiB limit", len),
            ));
        }
        self.buf[at..at + 4].copy_from_slice(&(len as i32).to_be_bytes());
        Ok(())
    }

    /// Drop the partially built message.
    fn abandon(&mut self) {
        self.buf.truncate(self.mark);
        self.len_at = None;
    }

    pub fn put_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Raw bytes, no length prefix or terminator.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Unsigned 16-bit count, range-checked.
    pub fn put_u16<T>(&mut self, value: T) -> Result<()>
    where
        T: TryInto<u16> + Copy + Display,
    {
        let Ok(v) = value.try_into() else {
            return Err(Error::encode(
                EncodeErrorKind::OutOfRange,
                format!("{} does not fit in an unsigned 16-bit field", value),
            ));
        };
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Signed 64-bit, high word first.
    pub fn put_i64(&mut self, v: i64) {
        self.put_i32((v >> 32) as i32);
        self.put_i32(v as i32);
    }

    /// NUL-terminated text.
    pub fn put_cstr(&mut self, s: &str) -> Result<()> {
        check_text(s)?;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Text without terminator.
    pub fn put_str(&mut self, s: &str) -> Result<()> {
        check_text(s)?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// A length-prefixed value; `None` is written as length -1.
    pub fn put_value(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(data) => {
                if data.len() > MAX_TEXT_LEN {
                    return Err(Error::encode(
                        EncodeErrorKind::TooLong,
                        format!("value of {} bytes is too long", data.len()),
                    ));
                }
                self.put_i32(data.len() as i32);
                self.put_bytes(data);
            }
            None => self.put_i32(-1),
        }
        Ok(())
    }

    /// A length-prefixed text-format value. Text values may not contain NUL.
    pub fn put_text_value(&mut self, value: Option<&[u8]>) -> Result<()> {
        if value.is_some_and(|data| data.contains(&0)) {
            return Err(Error::encode(
                EncodeErrorKind::EmbeddedNul,
                "text-format value contains an embedded NUL byte",
            ));
        }
        self.put_value(value)
    }

    // ==================== Frontend Messages ====================

    /// Encode a frontend message, replacing the buffer contents.
    pub fn write(&mut self, msg: &FrontendMessage<'_>) -> Result<&[u8]> {
        self.clear();
        self.append(msg)?;
        Ok(&self.buf)
    }

    /// Encode a frontend message after whatever is already buffered.
    pub fn append(&mut self, msg: &FrontendMessage<'_>) -> Result<()> {
        let result = self.encode_frontend(msg);
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn encode_frontend(&mut self, msg: &FrontendMessage<'_>) -> Result<()> {
        match msg {
            FrontendMessage::Startup { version, params } => {
                self.begin(None);
                self.put_i32(*version);
                for (key, value) in *params {
                    self.put_cstr(key)?;
                    self.put_cstr(value)?;
                }
                self.put_u8(0);
            }
            FrontendMessage::PasswordMessage(password) => {
                self.begin(Some(frontend_type::PASSWORD));
                self.put_cstr(password)?;
            }
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            } => {
                self.begin(Some(frontend_type::PARSE));
                self.put_cstr(name)?;
                self.put_cstr(query)?;
                self.put_u16(param_types.len())?;
                for &oid in *param_types {
                    self.put_i32(oid as i32);
                }
            }
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => {
                self.begin(Some(frontend_type::BIND));
                self.put_cstr(portal)?;
                self.put_cstr(statement)?;
                self.put_u16(param_formats.len())?;
                for &fmt in *param_formats {
                    self.put_i16(fmt);
                }
                self.put_u16(params.len())?;
                for (i, param) in params.iter().enumerate() {
                    if format_at(param_formats, i) == 0 {
                        self.put_text_value(param.as_deref())?;
                    } else {
                        self.put_value(param.as_deref())?;
                    }
                }
                self.put_u16(result_formats.len())?;
                for &fmt in *result_formats {
                    self.put_i16(fmt);
                }
            }
            FrontendMessage::Describe { kind, name } => {
                self.begin(Some(frontend_type::DESCRIBE));
                self.put_u8(kind.as_byte());
                self.put_cstr(name)?;
            }
            FrontendMessage::Execute { portal, max_rows } => {
                self.begin(Some(frontend_type::EXECUTE));
                self.put_cstr(portal)?;
                self.put_i32(*max_rows);
            }
            FrontendMessage::Close { kind, name } => {
                self.begin(Some(frontend_type::CLOSE));
                self.put_u8(kind.as_byte());
                self.put_cstr(name)?;
            }
            FrontendMessage::Sync => self.begin(Some(frontend_type::SYNC)),
            FrontendMessage::Flush => self.begin(Some(frontend_type::FLUSH)),
            FrontendMessage::Terminate => self.begin(Some(frontend_type::TERMINATE)),
        }
        self.finish()
    }

    // ==================== Backend Messages ====================

    /// Encode a backend message after whatever is already buffered.
    ///
    /// The client never sends these; scripted peers and tests use this to
    /// produce server traffic with the same framing rules.
    pub fn append_backend(&mut self, msg: &BackendMessage) -> Result<()> {
        let result = self.encode_backend(msg);
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn encode_backend(&mut self, msg: &BackendMessage) -> Result<()> {
        match msg {
            BackendMessage::AuthenticationOk => self.auth(auth_code::OK, &[]),
            BackendMessage::AuthenticationKerberosV5 => self.auth(auth_code::KERBEROS_V5, &[]),
            BackendMessage::AuthenticationCleartextPassword => {
                self.auth(auth_code::CLEARTEXT_PASSWORD, &[]);
            }
            BackendMessage::AuthenticationCryptPassword(salt) => {
                self.auth(auth_code::CRYPT_PASSWORD, salt);
            }
            BackendMessage::AuthenticationMD5Password(salt) => {
                self.auth(auth_code::MD5_PASSWORD, salt);
            }
            BackendMessage::AuthenticationSCMCredential => {
                self.auth(auth_code::SCM_CREDENTIAL, &[]);
            }
            BackendMessage::AuthenticationUnknown { code, data } => self.auth(*code, data),
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                self.begin(Some(backend_type::BACKEND_KEY_DATA));
                self.put_i32(*process_id);
                self.put_i32(*secret_key);
            }
            BackendMessage::BindComplete => self.begin(Some(backend_type::BIND_COMPLETE)),
            BackendMessage::CloseComplete => self.begin(Some(backend_type::CLOSE_COMPLETE)),
            BackendMessage::CommandComplete(tag) => {
                self.begin(Some(backend_type::COMMAND_COMPLETE));
                self.put_cstr(tag)?;
            }
            BackendMessage::DataRow(values) => {
                self.begin(Some(backend_type::DATA_ROW));
                self.put_u16(values.len())?;
                for value in values {
                    self.put_value(value.as_deref())?;
                }
            }
            BackendMessage::EmptyQueryResponse => {
                self.begin(Some(backend_type::EMPTY_QUERY_RESPONSE));
            }
            BackendMessage::ErrorResponse(fields) | BackendMessage::NoticeResponse(fields) => {
                let tag = if matches!(msg, BackendMessage::ErrorResponse(_)) {
                    backend_type::ERROR_RESPONSE
                } else {
                    backend_type::NOTICE_RESPONSE
                };
                self.begin(Some(tag));
                for (code, text) in &fields.fields {
                    self.put_u8(*code);
                    self.put_cstr(text)?;
                }
                self.put_u8(0);
            }
            BackendMessage::NoData => self.begin(Some(backend_type::NO_DATA)),
            BackendMessage::ParameterDescription(oids) => {
                self.begin(Some(backend_type::PARAMETER_DESCRIPTION));
                self.put_u16(oids.len())?;
                for &oid in oids {
                    self.put_i32(oid as i32);
                }
            }
            BackendMessage::ParameterStatus { name, value } => {
                self.begin(Some(backend_type::PARAMETER_STATUS));
                self.put_cstr(name)?;
                self.put_cstr(value)?;
            }
            BackendMessage::ParseComplete => self.begin(Some(backend_type::PARSE_COMPLETE)),
            BackendMessage::ReadyForQuery(status) => {
                self.begin(Some(backend_type::READY_FOR_QUERY));
                self.put_u8(status.as_byte());
            }
            BackendMessage::RowDescription(fields) => {
                self.begin(Some(backend_type::ROW_DESCRIPTION));
                self.put_u16(fields.len())?;
                for field in fields {
                    self.put_field(field)?;
                }
            }
            BackendMessage::Unknown { tag, payload } => {
                self.begin(Some(*tag));
                self.put_bytes(payload);
            }
        }
        self.finish()
    }

    fn auth(&mut self, code: i32, data: &[u8]) {
        self.begin(Some(backend_type::AUTHENTICATION));
        self.put_i32(code);
        self.put_bytes(data);
    }

    fn put_field(&mut self, field: &FieldDescription) -> Result<()> {
        self.put_cstr(&field.name)?;
        self.put_i32(field.table_oid.unwrap_or(0) as i32);
        self.put_i16(field.column_id.unwrap_or(0));
        self.put_i32(field.type_oid as i32);
        self.put_i16(field.type_size);
        self.put_i32(field.type_modifier);
        // format code: text
        self.put_i16(0);
        Ok(())
    }
}

/// Format code of parameter `i`: one code applies to all, none means text.
fn format_at(formats: &[i16], i: usize) -> i16 {
    match formats {
        [] => 0,
        [only] => *only,
        many => many.get(i).copied().unwrap_or(0),
    }
}

fn check_text(s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::encode(
            EncodeErrorKind::EmbeddedNul,
            "text contains an embedded NUL byte",
        ));
    }
    if s.len() > MAX_TEXT_LEN {
        return Err(Error::encode(
            EncodeErrorKind::TooLong,
            format!("text of {} bytes is too long", s.len()),
        ));
    }
    Ok(())
}

impl DescribeKind {
    /// Frontend message for closing the named target.
    pub fn close(self, name: &str) -> FrontendMessage<'_> {
        FrontendMessage::Close { kind: self, name }
    }

    /// Frontend message for describing the named target.
    pub fn describe(self, name: &str) -> FrontendMessage<'_> {
        FrontendMessage::Describe { kind: self, name }
    }
}
