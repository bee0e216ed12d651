//! # Graft class images
//!
//! The explicit intermediate representation every layer of the Graft
//! pipeline works on, plus the binary format class images are shipped in.
//!
//! * [`ClassFile`] and friends: class name, super class, interfaces, fields
//!   and methods with their instruction sequences, all as plain data.
//! * [`decode`] / [`encode`]: the `GRFT` binary format. Encoding is
//!   deterministic, which the transformation engine relies on to produce
//!   byte-identical output for identical input.
//! * [`FieldType`] / [`MethodDescriptor`]: descriptor parsing used for
//!   structural validation before any target class has been seen.
//!
//! This crate has no notion of a runtime or class loader. Bytes in, values
//! out, and back.

pub mod access;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod ir;

pub use access::{ClassAccess, MemberAccess, Visibility};
pub use codec::{decode, encode, peek_name, FORMAT_VERSION, MAGIC};
pub use descriptor::{is_valid_class_name, is_valid_member_name, FieldType, MethodDescriptor};
pub use error::{ClassFormatError, Result};
pub use ir::{
    ClassFile, Code, Constant, Field, FieldRef, Instruction, InvokeKind, Method, MethodRef,
    Opcode, CONSTRUCTOR_NAME, OBJECT_CLASS, STATIC_INIT_NAME,
};

/// File extension of class images on disk.
pub const CLASS_EXTENSION: &str = "gclass";

/// Relative path of a class image inside a class directory:
/// `net/example/Foo` becomes `net/example/Foo.gclass`.
pub fn class_path(name: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{name}.{CLASS_EXTENSION}"))
}
