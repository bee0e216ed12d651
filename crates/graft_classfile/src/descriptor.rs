//! Type descriptors and name validation.
//!
//! Descriptors use the JVM grammar: `I` int, `J` long, `Z` boolean, `B`,
//! `C`, `S`, `F`, `D`, `Lpkg/Name;` for references, `[` for arrays and
//! `(params)ret` for methods, where `V` is the void return type.
//!
//! # Examples
//!
//! ```rust
//! use graft_classfile::{FieldType, MethodDescriptor};
//!
//! let desc: MethodDescriptor = "(ILjava/lang/String;)V".parse()?;
//! assert_eq!(desc.params.len(), 2);
//! assert_eq!(desc.params[1], FieldType::Object("java/lang/String".to_string()));
//! assert!(desc.ret.is_none());
//! # Ok::<(), graft_classfile::ClassFormatError>(())
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{ClassFormatError, Result};

/// The type of a field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Reference to an instance of the named class
    Object(String),
    /// Array of the component type
    Array(Box<FieldType>),
}

impl FieldType {
    /// Whether values of this type are references (objects or arrays).
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    fn parse_at(text: &str, pos: &mut usize) -> std::result::Result<Self, String> {
        let bytes = text.as_bytes();
        let Some(&tag) = bytes.get(*pos) else {
            return Err("unexpected end of descriptor".to_string());
        };
        *pos += 1;
        Ok(match tag {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let rest = &text[*pos..];
                let end = rest
                    .find(';')
                    .ok_or_else(|| "unterminated class reference".to_string())?;
                let name = &rest[..end];
                if !is_valid_class_name(name) {
                    return Err(format!("invalid class name '{name}'"));
                }
                *pos += end + 1;
                FieldType::Object(name.to_string())
            }
            b'[' => FieldType::Array(Box::new(Self::parse_at(text, pos)?)),
            other => return Err(format!("unexpected character '{}'", other as char)),
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(component) => write!(f, "[{component}"),
        }
    }
}

impl FromStr for FieldType {
    type Err = ClassFormatError;

    fn from_str(text: &str) -> Result<Self> {
        let mut pos = 0;
        let parsed = Self::parse_at(text, &mut pos).map_err(|reason| invalid(text, reason))?;
        if pos != text.len() {
            return Err(invalid(text, "trailing characters".to_string()));
        }
        Ok(parsed)
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Whether the method returns `V`.
    pub fn is_void(&self) -> bool {
        self.ret.is_none()
    }

    /// Builds a descriptor from parts.
    pub fn new(params: Vec<FieldType>, ret: Option<FieldType>) -> Self {
        Self { params, ret }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{ret}"),
            None => f.write_str("V"),
        }
    }
}

impl FromStr for MethodDescriptor {
    type Err = ClassFormatError;

    fn from_str(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(invalid(text, "method descriptor must start with '('".to_string()));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            if pos >= bytes.len() {
                return Err(invalid(text, "unterminated parameter list".to_string()));
            }
            params.push(FieldType::parse_at(text, &mut pos).map_err(|reason| invalid(text, reason))?);
        }
        pos += 1;
        let ret = if bytes.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            Some(FieldType::parse_at(text, &mut pos).map_err(|reason| invalid(text, reason))?)
        };
        if pos != text.len() {
            return Err(invalid(text, "trailing characters".to_string()));
        }
        Ok(Self { params, ret })
    }
}

fn invalid(descriptor: &str, reason: String) -> ClassFormatError {
    ClassFormatError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason,
    }
}

/// Checks that `name` is a valid internal class name such as
/// `net/example/server/Main` or `net/example/Outer$Inner`.
pub fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| !matches!(c, '.' | ';' | '[' | '<' | '>' | '(' | ')') && !c.is_whitespace())
        })
}

/// Checks that `name` is a valid field or method name. `<init>` and
/// `<clinit>` are accepted only when `allow_special` is set.
pub fn is_valid_member_name(name: &str, allow_special: bool) -> bool {
    if allow_special && (name == "<init>" || name == "<clinit>") {
        return true;
    }
    !name.is_empty()
        && name
            .chars()
            .all(|c| !matches!(c, '.' | ';' | '[' | '/' | '<' | '>' | '(' | ')') && !c.is_whitespace())
}
