//! Authoring helpers converting between the JSON form of the class IR and
//! binary class images.

use graft_classfile::{decode, encode, ClassFile, ClassFormatError};

#[derive(Debug, thiserror::Error)]
pub enum ToolingError {
    #[error("Invalid class JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Format(#[from] ClassFormatError),
}

/// Encodes a class given as JSON into a binary image.
pub fn assemble(json: &str) -> Result<Vec<u8>, ToolingError> {
    let class: ClassFile = serde_json::from_str(json)?;
    Ok(encode(&class)?)
}

/// Decodes a binary image into pretty-printed JSON.
pub fn dump(bytes: &[u8]) -> Result<String, ToolingError> {
    let class = decode(bytes)?;
    Ok(serde_json::to_string_pretty(&class)?)
}
