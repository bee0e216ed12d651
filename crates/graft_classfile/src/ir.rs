//! The class intermediate representation.
//!
//! A [`ClassFile`] is plain data: names, member lists and instruction
//! sequences. Nothing in here refers to a live runtime, so the same value can
//! be decoded, rewritten and encoded on any thread.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

use crate::access::{ClassAccess, MemberAccess};

/// Internal name of the implicit root class.
pub const OBJECT_CLASS: &str = "java/lang/Object";
/// Name of instance constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";
/// Name of the static initializer.
pub const STATIC_INIT_NAME: &str = "<clinit>";

/// One class image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFile {
    pub access: ClassAccess,
    pub name: String,
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl ClassFile {
    /// Creates an empty public class extending the root class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            name: name.into(),
            super_name: Some(OBJECT_CLASS.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Creates an empty public interface.
    pub fn new_interface(name: impl Into<String>) -> Self {
        Self {
            access: ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT,
            name: name.into(),
            super_name: Some(OBJECT_CLASS.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccess::INTERFACE)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Index of the method with this name and descriptor.
    pub fn method_index(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// Builder-style helper used heavily by tests and tooling.
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder-style helper used heavily by tests and tooling.
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub access: MemberAccess,
    pub name: String,
    pub descriptor: String,
}

impl Field {
    pub fn new(access: MemberAccess, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }
}

/// A method declaration with an optional body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub access: MemberAccess,
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub code: Option<Code>,
}

impl Method {
    pub fn new(
        access: MemberAccess,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        code: Option<Code>,
    ) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            code,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Code {
    /// Number of local variable slots, including `this` and parameters
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
}

impl Code {
    pub fn new(max_locals: u16, instructions: Vec<Instruction>) -> Self {
        Self {
            max_locals,
            instructions,
        }
    }

    /// Largest label id used in this body, if any.
    pub fn max_label(&self) -> Option<u16> {
        self.instructions
            .iter()
            .filter_map(|insn| match insn {
                Instruction::Label(id)
                | Instruction::Goto(id)
                | Instruction::IfZero(id)
                | Instruction::IfNonZero(id) => Some(*id),
                _ => None,
            })
            .max()
    }
}

/// Symbolic reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Symbolic reference to a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// How a method call is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr)]
#[repr(u8)]
pub enum InvokeKind {
    /// Dispatch on the receiver's runtime class
    Virtual = 0,
    /// Exact target: constructors, private methods, super calls
    Special = 1,
    /// No receiver
    Static = 2,
    /// Dispatch through an interface the receiver implements
    Interface = 3,
}

/// A constant pushed by [`Instruction::Push`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i64),
    Str(String),
}

/// One instruction of the stack machine.
///
/// Branch targets are symbolic label ids rather than byte offsets, so
/// splicing instructions never requires offset fix-ups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    Push(Constant),
    Load(u16),
    Store(u16),
    Dup,
    Pop,
    Swap,
    Add,
    Sub,
    Mul,
    /// Pops two values, pushes 1 if equal, 0 otherwise
    CmpEq,
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke(InvokeKind, MethodRef),
    New(String),
    Label(u16),
    Goto(u16),
    IfZero(u16),
    IfNonZero(u16),
    Return,
    ReturnValue,
}

impl Instruction {
    /// Whether this instruction leaves the method.
    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Return | Instruction::ReturnValue)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Push(_) => Opcode::Push,
            Instruction::Load(_) => Opcode::Load,
            Instruction::Store(_) => Opcode::Store,
            Instruction::Dup => Opcode::Dup,
            Instruction::Pop => Opcode::Pop,
            Instruction::Swap => Opcode::Swap,
            Instruction::Add => Opcode::Add,
            Instruction::Sub => Opcode::Sub,
            Instruction::Mul => Opcode::Mul,
            Instruction::CmpEq => Opcode::CmpEq,
            Instruction::GetField(_) => Opcode::GetField,
            Instruction::PutField(_) => Opcode::PutField,
            Instruction::GetStatic(_) => Opcode::GetStatic,
            Instruction::PutStatic(_) => Opcode::PutStatic,
            Instruction::Invoke(..) => Opcode::Invoke,
            Instruction::New(_) => Opcode::New,
            Instruction::Label(_) => Opcode::Label,
            Instruction::Goto(_) => Opcode::Goto,
            Instruction::IfZero(_) => Opcode::IfZero,
            Instruction::IfNonZero(_) => Opcode::IfNonZero,
            Instruction::Return => Opcode::Return,
            Instruction::ReturnValue => Opcode::ReturnValue,
        }
    }
}

/// Binary opcodes of [`Instruction`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Push = 0x01,
    Load = 0x02,
    Store = 0x03,
    Dup = 0x04,
    Pop = 0x05,
    Swap = 0x06,
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    CmpEq = 0x13,
    GetField = 0x20,
    PutField = 0x21,
    GetStatic = 0x22,
    PutStatic = 0x23,
    Invoke = 0x30,
    New = 0x31,
    Label = 0x40,
    Goto = 0x41,
    IfZero = 0x42,
    IfNonZero = 0x43,
    Return = 0x50,
    ReturnValue = 0x51,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_lookup() {
        let class = ClassFile::new("net/example/Counter")
            .with_field(Field::new(MemberAccess::PRIVATE, "count", "I"))
            .with_method(Method::new(MemberAccess::PUBLIC, "bump", "()V", None))
            .with_method(Method::new(MemberAccess::PUBLIC, "bump", "(I)V", None));

        assert!(class.field("count").is_some());
        assert!(class.field("missing").is_none());
        assert_eq!(class.method_index("bump", "(I)V"), Some(1));
        assert!(class.method("bump", "()I").is_none());
    }

    #[test]
    fn test_max_label() {
        let code = Code::new(
            1,
            vec![
                Instruction::Label(3),
                Instruction::Goto(7),
                Instruction::Return,
            ],
        );
        assert_eq!(code.max_label(), Some(7));
        assert_eq!(Code::default().max_label(), None);
    }

    #[test]
    fn test_opcode_from_repr() {
        assert_eq!(Opcode::from_repr(0x30), Some(Opcode::Invoke));
        assert_eq!(Opcode::from_repr(0xff), None);
        assert_eq!(Instruction::ReturnValue.opcode(), Opcode::ReturnValue);
    }
}
