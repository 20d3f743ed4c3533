//! PostgreSQL wire protocol framing.
//!
//! Every message after startup is a one-byte type tag, a 4-byte big-endian
//! length that counts itself plus the payload, and the payload. The startup
//! message has no tag. This module defines the closed set of messages the
//! client sends and understands, plus the writer and reader that move them
//! to and from bytes one message at a time.

pub mod reader;
pub mod writer;

pub use reader::{MessageReader, parse_message, read_frame, read_message};
pub use writer::MessageWriter;

use pgline_core::ServerError;

/// Protocol version 3.0, sent in the startup message.
pub const PROTOCOL_VERSION: i32 = 196_608;

/// Ceiling on the declared length of any message (1 GiB).
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

/// Ceiling on the byte length of any single text or value field.
pub const MAX_TEXT_LEN: usize = (1 << 30) - 1;

/// Frontend message type bytes.
pub mod frontend_type {
    pub const BIND: u8 = b'B';
    pub const CLOSE: u8 = b'C';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const FLUSH: u8 = b'H';
    pub const PARSE: u8 = b'P';
    pub const PASSWORD: u8 = b'p';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Backend message type bytes.
pub mod backend_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const DATA_ROW: u8 = b'D';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NO_DATA: u8 = b'n';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Authentication request sub-codes carried by `R` messages.
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const CRYPT_PASSWORD: i32 = 4;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
}

/// Target of a Describe or Close message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    /// A prepared statement ('S')
    Statement,
    /// A portal ('P')
    Portal,
}

impl DescribeKind {
    pub const fn as_byte(self) -> u8 {
        match self {
            DescribeKind::Statement => b'S',
            DescribeKind::Portal => b'P',
        }
    }
}

/// Transaction state reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block ('I')
    #[default]
    Idle,
    /// In a transaction block ('T')
    Transaction,
    /// In a failed transaction block ('E')
    Error,
}

impl TransactionStatus {
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::Transaction),
            b'E' => Some(TransactionStatus::Error),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::Transaction => b'T',
            TransactionStatus::Error => b'E',
        }
    }
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column label
    pub name: String,
    /// OID of the owning table, when the column comes straight from one
    pub table_oid: Option<u32>,
    /// Attribute number within that table
    pub column_id: Option<i16>,
    /// Server type OID
    pub type_oid: u32,
    /// `pg_type.typlen`; negative for variable-width types
    pub type_size: i16,
    /// Type modifier (e.g. varchar length, numeric precision)
    pub type_modifier: i32,
}

/// The `(field type, text)` pairs of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorFields {
    pub fields: Vec<(u8, String)>,
}

impl ErrorFields {
    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    /// Primary message ('M').
    pub fn message(&self) -> &str {
        self.get(b'M').unwrap_or("")
    }

    pub fn into_server_error(self) -> ServerError {
        ServerError::new(self.fields)
    }
}

/// A single data row: one nullable raw value per column.
pub type RawRow = Vec<Option<Vec<u8>>>;

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationKerberosV5,
    AuthenticationCleartextPassword,
    AuthenticationCryptPassword([u8; 2]),
    AuthenticationMD5Password([u8; 4]),
    AuthenticationSCMCredential,
    /// An authentication sub-code this client does not know
    AuthenticationUnknown {
        code: i32,
        data: Vec<u8>,
    },
    BackendKeyData {
        process_id: i32,
        secret_key: i32,
    },
    BindComplete,
    CloseComplete,
    CommandComplete(String),
    DataRow(RawRow),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    NoData,
    NoticeResponse(ErrorFields),
    ParameterDescription(Vec<u32>),
    ParameterStatus {
        name: String,
        value: String,
    },
    ParseComplete,
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescription>),
    /// Any tag outside the set above, carried opaquely
    Unknown {
        tag: u8,
        payload: Vec<u8>,
    },
}

impl BackendMessage {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            BackendMessage::AuthenticationOk => "AuthenticationOk",
            BackendMessage::AuthenticationKerberosV5 => "AuthenticationKerberosV5",
            BackendMessage::AuthenticationCleartextPassword => "AuthenticationCleartextPassword",
            BackendMessage::AuthenticationCryptPassword(_) => "AuthenticationCryptPassword",
            BackendMessage::AuthenticationMD5Password(_) => "AuthenticationMD5Password",
            BackendMessage::AuthenticationSCMCredential => "AuthenticationSCMCredential",
            BackendMessage::AuthenticationUnknown { .. } => "AuthenticationUnknown",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::BindComplete => "BindComplete",
            BackendMessage::CloseComplete => "CloseComplete",
            BackendMessage::CommandComplete(_) => "CommandComplete",
            BackendMessage::DataRow(_) => "DataRow",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ErrorResponse(_) => "ErrorResponse",
            BackendMessage::NoData => "NoData",
            BackendMessage::NoticeResponse(_) => "NoticeResponse",
            BackendMessage::ParameterDescription(_) => "ParameterDescription",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::ParseComplete => "ParseComplete",
            BackendMessage::ReadyForQuery(_) => "ReadyForQuery",
            BackendMessage::RowDescription(_) => "RowDescription",
            BackendMessage::Unknown { .. } => "Unknown",
        }
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage<'a> {
    /// Untagged startup packet
    Startup {
        version: i32,
        params: &'a [(&'a str, &'a str)],
    },
    PasswordMessage(&'a str),
    Parse {
        name: &'a str,
        query: &'a str,
        param_types: &'a [u32],
    },
    Bind {
        portal: &'a str,
        statement: &'a str,
        param_formats: &'a [i16],
        params: &'a [Option<Vec<u8>>],
        result_formats: &'a [i16],
    },
    Describe {
        kind: DescribeKind,
        name: &'a str,
    },
    Execute {
        portal: &'a str,
        max_rows: i32,
    },
    Close {
        kind: DescribeKind,
        name: &'a str,
    },
    Sync,
    Flush,
    Terminate,
}
