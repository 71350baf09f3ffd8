//! Error types for the wire protocol.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("unexpected opcode 0x{0:02X} in this context")]
    UnexpectedOpcode(u8),

    #[error("empty packet")]
    Empty,

    #[error("invalid UTF-32 code point 0x{0:X}")]
    InvalidString(u32),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
