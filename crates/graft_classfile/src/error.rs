//! Errors raised while reading, writing or validating class images.

/// Errors that can occur while decoding or validating a class image.
///
/// Every variant carries the byte offset or the offending text so a broken
/// class image can be located without a hex dump.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassFormatError {
    /// The image does not start with the `GRFT` magic number
    #[error("Bad magic number 0x{0:08x}")]
    BadMagic(u32),
    /// The image was written by an unknown format revision
    #[error("Unsupported class image version {0}")]
    UnsupportedVersion(u16),
    /// The image ended before a complete structure could be read
    #[error("Unexpected end of class image at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },
    /// Bytes remain after the last method was read
    #[error("{0} trailing bytes after class body")]
    TrailingBytes(usize),
    /// A string constant is not valid UTF-8
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
    /// An instruction opcode is not known to this reader
    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    /// A tagged value (constant, invoke kind, flag byte) is out of range
    #[error("Invalid {what} tag {tag} at offset {offset}")]
    InvalidTag { what: &'static str, tag: u8, offset: usize },
    /// A structure is too large to be represented in the image format
    #[error("{what} too large to encode ({len})")]
    TooLarge { what: &'static str, len: usize },
    /// A class name is not a valid internal name (`a/b/C`)
    #[error("Invalid class name '{0}'")]
    InvalidClassName(String),
    /// A member name is not valid
    #[error("Invalid member name '{0}'")]
    InvalidMemberName(String),
    /// A field or method descriptor could not be parsed
    #[error("Invalid descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ClassFormatError>;
