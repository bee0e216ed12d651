//! Binary reading and writing of class images.
//!
//! # Layout
//!
//! All integers are big endian. Strings are a `u16` byte length followed by
//! UTF-8 bytes.
//!
//! ```text
//! magic      u32   0x47524654 ("GRFT")
//! version    u16   1
//! access     u16
//! name       str
//! super      u8 (0 = none, 1 = present) [str]
//! interfaces u16 count, str*
//! fields     u16 count, { access u16, name str, descriptor str }*
//! methods    u16 count, { access u16, name str, descriptor str,
//!                          u8 has_code [max_locals u16, u32 count, insn*] }*
//! ```
//!
//! Encoding is a pure function of the [`ClassFile`] value: no timestamps, no
//! hash-map iteration, so equal values always produce identical bytes.

use crate::access::{ClassAccess, MemberAccess};
use crate::error::{ClassFormatError, Result};
use crate::ir::{
    ClassFile, Code, Constant, Field, FieldRef, Instruction, InvokeKind, Method, MethodRef, Opcode,
};

/// Magic number at the start of every class image.
pub const MAGIC: u32 = 0x4752_4654;
/// Current format revision.
pub const FORMAT_VERSION: u16 = 1;

/// Decodes a class image.
///
/// # Errors
///
/// Returns [`ClassFormatError`] if the data is truncated, has trailing
/// bytes, carries an unknown opcode or contains invalid UTF-8.
pub fn decode(data: &[u8]) -> Result<ClassFile> {
    let mut reader = ClassReader::new(data);
    let class = reader.read_class()?;
    if reader.remaining() > 0 {
        return Err(ClassFormatError::TrailingBytes(reader.remaining()));
    }
    Ok(class)
}

/// Encodes a class image.
///
/// # Errors
///
/// Returns [`ClassFormatError::TooLarge`] if a string or list exceeds the
/// width of its length prefix.
pub fn encode(class: &ClassFile) -> Result<Vec<u8>> {
    let mut writer = ClassWriter::default();
    writer.write_class(class)?;
    Ok(writer.into_bytes())
}

/// Reads only the class name from an image without decoding the body.
pub fn peek_name(data: &[u8]) -> Result<String> {
    let mut reader = ClassReader::new(data);
    reader.read_header()?;
    reader.read_u16()?;
    reader.read_str()
}

// ============================================================================
// Reader
// ============================================================================

/// A bounds-checked cursor over a class image.
pub struct ClassReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ClassReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ClassFormatError::Truncated {
                offset: self.position,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let offset = self.position;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ClassFormatError::InvalidUtf8(offset))
    }

    fn read_header(&mut self) -> Result<()> {
        let magic = self.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let version = self.read_u16()?;
        if version != FORMAT_VERSION {
            return Err(ClassFormatError::UnsupportedVersion(version));
        }
        Ok(())
    }

    fn read_class(&mut self) -> Result<ClassFile> {
        self.read_header()?;
        let access = ClassAccess::from_bits_retain(self.read_u16()?);
        let name = self.read_str()?;
        let super_name = match self.read_flag("super class")? {
            true => Some(self.read_str()?),
            false => None,
        };

        let interface_count = self.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(self.read_str()?);
        }

        let field_count = self.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field {
                access: MemberAccess::from_bits_retain(self.read_u16()?),
                name: self.read_str()?,
                descriptor: self.read_str()?,
            });
        }

        let method_count = self.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let access = MemberAccess::from_bits_retain(self.read_u16()?);
            let name = self.read_str()?;
            let descriptor = self.read_str()?;
            let code = match self.read_flag("code")? {
                true => Some(self.read_code()?),
                false => None,
            };
            methods.push(Method {
                access,
                name,
                descriptor,
                code,
            });
        }

        Ok(ClassFile {
            access,
            name,
            super_name,
            interfaces,
            fields,
            methods,
        })
    }

    fn read_flag(&mut self, what: &'static str) -> Result<bool> {
        let offset = self.position;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(ClassFormatError::InvalidTag { what, tag, offset }),
        }
    }

    fn read_code(&mut self) -> Result<Code> {
        let max_locals = self.read_u16()?;
        let count = self.read_u32()? as usize;
        // Every instruction takes at least one byte, so a count larger than the
        // rest of the image is already known to be truncated.
        if count > self.remaining() {
            return Err(ClassFormatError::Truncated {
                offset: self.position,
                needed: count - self.remaining(),
            });
        }
        let mut instructions = Vec::with_capacity(count);
        for _ in 0..count {
            instructions.push(self.read_instruction()?);
        }
        Ok(Code {
            max_locals,
            instructions,
        })
    }

    fn read_field_ref(&mut self) -> Result<FieldRef> {
        Ok(FieldRef {
            owner: self.read_str()?,
            name: self.read_str()?,
            descriptor: self.read_str()?,
        })
    }

    fn read_method_ref(&mut self) -> Result<MethodRef> {
        Ok(MethodRef {
            owner: self.read_str()?,
            name: self.read_str()?,
            descriptor: self.read_str()?,
        })
    }

    fn read_instruction(&mut self) -> Result<Instruction> {
        let offset = self.position;
        let byte = self.read_u8()?;
        let opcode = Opcode::from_repr(byte).ok_or(ClassFormatError::UnknownOpcode {
            opcode: byte,
            offset,
        })?;

        Ok(match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Push => {
                let tag_offset = self.position;
                match self.read_u8()? {
                    0 => Instruction::Push(Constant::Null),
                    1 => Instruction::Push(Constant::Int(self.read_i64()?)),
                    2 => Instruction::Push(Constant::Str(self.read_str()?)),
                    tag => {
                        return Err(ClassFormatError::InvalidTag {
                            what: "constant",
                            tag,
                            offset: tag_offset,
                        })
                    }
                }
            }
            Opcode::Load => Instruction::Load(self.read_u16()?),
            Opcode::Store => Instruction::Store(self.read_u16()?),
            Opcode::Dup => Instruction::Dup,
            Opcode::Pop => Instruction::Pop,
            Opcode::Swap => Instruction::Swap,
            Opcode::Add => Instruction::Add,
            Opcode::Sub => Instruction::Sub,
            Opcode::Mul => Instruction::Mul,
            Opcode::CmpEq => Instruction::CmpEq,
            Opcode::GetField => Instruction::GetField(self.read_field_ref()?),
            Opcode::PutField => Instruction::PutField(self.read_field_ref()?),
            Opcode::GetStatic => Instruction::GetStatic(self.read_field_ref()?),
            Opcode::PutStatic => Instruction::PutStatic(self.read_field_ref()?),
            Opcode::Invoke => {
                let tag_offset = self.position;
                let tag = self.read_u8()?;
                let kind = InvokeKind::from_repr(tag).ok_or(ClassFormatError::InvalidTag {
                    what: "invoke kind",
                    tag,
                    offset: tag_offset,
                })?;
                Instruction::Invoke(kind, self.read_method_ref()?)
            }
            Opcode::New => Instruction::New(self.read_str()?),
            Opcode::Label => Instruction::Label(self.read_u16()?),
            Opcode::Goto => Instruction::Goto(self.read_u16()?),
            Opcode::IfZero => Instruction::IfZero(self.read_u16()?),
            Opcode::IfNonZero => Instruction::IfNonZero(self.read_u16()?),
            Opcode::Return => Instruction::Return,
            Opcode::ReturnValue => Instruction::ReturnValue,
        })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Accumulates an encoded class image.
#[derive(Default)]
pub struct ClassWriter {
    buffer: Vec<u8>,
}

impl ClassWriter {
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_str(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| ClassFormatError::TooLarge {
            what: "string",
            len: value.len(),
        })?;
        self.write_u16(len);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn write_count(&mut self, what: &'static str, len: usize) -> Result<()> {
        let count = u16::try_from(len).map_err(|_| ClassFormatError::TooLarge { what, len })?;
        self.write_u16(count);
        Ok(())
    }

    fn write_class(&mut self, class: &ClassFile) -> Result<()> {
        self.write_u32(MAGIC);
        self.write_u16(FORMAT_VERSION);
        self.write_u16(class.access.bits());
        self.write_str(&class.name)?;
        match &class.super_name {
            Some(super_name) => {
                self.write_u8(1);
                self.write_str(super_name)?;
            }
            None => self.write_u8(0),
        }

        self.write_count("interface list", class.interfaces.len())?;
        for interface in &class.interfaces {
            self.write_str(interface)?;
        }

        self.write_count("field list", class.fields.len())?;
        for field in &class.fields {
            self.write_u16(field.access.bits());
            self.write_str(&field.name)?;
            self.write_str(&field.descriptor)?;
        }

        self.write_count("method list", class.methods.len())?;
        for method in &class.methods {
            self.write_u16(method.access.bits());
            self.write_str(&method.name)?;
            self.write_str(&method.descriptor)?;
            match &method.code {
                Some(code) => {
                    self.write_u8(1);
                    self.write_code(code)?;
                }
                None => self.write_u8(0),
            }
        }
        Ok(())
    }

    fn write_code(&mut self, code: &Code) -> Result<()> {
        self.write_u16(code.max_locals);
        let count = u32::try_from(code.instructions.len()).map_err(|_| ClassFormatError::TooLarge {
            what: "instruction list",
            len: code.instructions.len(),
        })?;
        self.write_u32(count);
        for insn in &code.instructions {
            self.write_instruction(insn)?;
        }
        Ok(())
    }

    fn write_member_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<()> {
        self.write_str(owner)?;
        self.write_str(name)?;
        self.write_str(descriptor)
    }

    fn write_instruction(&mut self, insn: &Instruction) -> Result<()> {
        self.write_u8(insn.opcode() as u8);
        match insn {
            Instruction::Push(Constant::Null) => self.write_u8(0),
            Instruction::Push(Constant::Int(value)) => {
                self.write_u8(1);
                self.write_i64(*value);
            }
            Instruction::Push(Constant::Str(value)) => {
                self.write_u8(2);
                self.write_str(value)?;
            }
            Instruction::Load(slot) | Instruction::Store(slot) => self.write_u16(*slot),
            Instruction::GetField(r)
            | Instruction::PutField(r)
            | Instruction::GetStatic(r)
            | Instruction::PutStatic(r) => self.write_member_ref(&r.owner, &r.name, &r.descriptor)?,
            Instruction::Invoke(kind, r) => {
                self.write_u8(*kind as u8);
                self.write_member_ref(&r.owner, &r.name, &r.descriptor)?;
            }
            Instruction::New(class) => self.write_str(class)?,
            Instruction::Label(id)
            | Instruction::Goto(id)
            | Instruction::IfZero(id)
            | Instruction::IfNonZero(id) => self.write_u16(*id),
            Instruction::Nop
            | Instruction::Dup
            | Instruction::Pop
            | Instruction::Swap
            | Instruction::Add
            | Instruction::Sub
            | Instruction::Mul
            | Instruction::CmpEq
            | Instruction::Return
            | Instruction::ReturnValue => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> ClassFile {
        ClassFile::new("net/example/Counter")
            .with_field(Field::new(MemberAccess::PRIVATE, "count", "I"))
            .with_method(Method::new(
                MemberAccess::PUBLIC,
                "increment",
                "()V",
                Some(Code::new(
                    1,
                    vec![
                        Instruction::Load(0),
                        Instruction::Dup,
                        Instruction::GetField(FieldRef::new("net/example/Counter", "count", "I")),
                        Instruction::Push(Constant::Int(1)),
                        Instruction::Add,
                        Instruction::PutField(FieldRef::new("net/example/Counter", "count", "I")),
                        Instruction::Push(Constant::Str("done".to_string())),
                        Instruction::Invoke(
                            InvokeKind::Static,
                            MethodRef::new("graft/Trace", "record", "(Ljava/lang/String;)V"),
                        ),
                        Instruction::Return,
                    ],
                )),
            ))
            .with_method(Method::new(MemberAccess::PUBLIC | MemberAccess::ABSTRACT, "size", "()I", None))
    }

    #[test]
    fn test_decode_reproduces_encoded_class() {
        let class = sample_class();
        let bytes = encode(&class).unwrap();
        assert_eq!(decode(&bytes).unwrap(), class);
        assert_eq!(peek_name(&bytes).unwrap(), "net/example/Counter");
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let class = sample_class();
        assert_eq!(encode(&class).unwrap(), encode(&class.clone()).unwrap());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&sample_class()).unwrap();
        bytes[0] = 0;
        assert!(matches!(decode(&bytes), Err(ClassFormatError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_image() {
        let bytes = encode(&sample_class()).unwrap();
        let result = decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(ClassFormatError::Truncated { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&sample_class()).unwrap();
        bytes.extend_from_slice(&[1, 2]);
        assert_eq!(decode(&bytes), Err(ClassFormatError::TrailingBytes(2)));
    }

    #[test]
    fn test_unknown_opcode() {
        let class = ClassFile::new("A").with_method(Method::new(
            MemberAccess::PUBLIC,
            "run",
            "()V",
            Some(Code::new(1, vec![Instruction::Return])),
        ));
        let mut bytes = encode(&class).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0xEE;
        assert!(matches!(
            decode(&bytes),
            Err(ClassFormatError::UnknownOpcode { opcode: 0xEE, .. })
        ));
    }

    #[test]
    fn test_oversized_string_rejected() {
        let class = ClassFile::new("A".repeat(70_000));
        assert!(matches!(encode(&class), Err(ClassFormatError::TooLarge { .. })));
    }
}
