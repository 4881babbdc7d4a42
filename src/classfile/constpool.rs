//! Constant pool and constants for Java class files
//!
//! The pool is 1-indexed. `Long` and `Double` take two slots; the second slot
//! holds [`Constant::Unusable`] so that indices of later entries never shift.
//! `Utf8` entries keep their raw modified UTF-8 bytes, which lets untouched
//! constants serialize back to exactly the bytes they were read from.

use super::error::{ClassError, ClassResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
    /// Second slot of a `Long` or `Double`
    Unusable,
}

pub mod constant_tags {
    pub const CONSTANT_UTF8: u8 = 1;
    pub const CONSTANT_INTEGER: u8 = 3;
    pub const CONSTANT_FLOAT: u8 = 4;
    pub const CONSTANT_LONG: u8 = 5;
    pub const CONSTANT_DOUBLE: u8 = 6;
    pub const CONSTANT_CLASS: u8 = 7;
    pub const CONSTANT_STRING: u8 = 8;
    pub const CONSTANT_FIELDREF: u8 = 9;
    pub const CONSTANT_METHODREF: u8 = 10;
    pub const CONSTANT_INTERFACEMETHODREF: u8 = 11;
    pub const CONSTANT_NAMEANDTYPE: u8 = 12;
    pub const CONSTANT_METHODHANDLE: u8 = 15;
    pub const CONSTANT_METHODTYPE: u8 = 16;
    pub const CONSTANT_DYNAMIC: u8 = 17;
    pub const CONSTANT_INVOKEDYNAMIC: u8 = 18;
    pub const CONSTANT_MODULE: u8 = 19;
    pub const CONSTANT_PACKAGE: u8 = 20;
}

impl Constant {
    /// Whether this constant occupies two pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class(_) => "Class",
            Constant::String(_) => "String",
            Constant::FieldRef(..) => "Fieldref",
            Constant::MethodRef(..) => "Methodref",
            Constant::InterfaceMethodRef(..) => "InterfaceMethodref",
            Constant::NameAndType(..) => "NameAndType",
            Constant::MethodHandle(..) => "MethodHandle",
            Constant::MethodType(_) => "MethodType",
            Constant::Dynamic(..) => "Dynamic",
            Constant::InvokeDynamic(..) => "InvokeDynamic",
            Constant::Module(_) => "Module",
            Constant::Package(_) => "Package",
            Constant::Unusable => "Unusable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// Slot `i` of the pool lives at `constants[i - 1]`
    pub(crate) constants: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self { Self { constants: Vec::new() } }

    /// The `constant_pool_count` value written into the classfile
    pub fn count(&self) -> u16 {
        (self.constants.len() + 1) as u16
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.constants.iter().enumerate().map(|(i, c)| ((i + 1) as u16, c))
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        if index == 0 {
            return None;
        }
        self.constants.get(index as usize - 1)
    }

    /// Append a constant read from a classfile, padding wide constants
    pub(crate) fn push(&mut self, constant: Constant) {
        let wide = constant.is_wide();
        self.constants.push(constant);
        if wide {
            self.constants.push(Constant::Unusable);
        }
    }

    pub fn utf8_bytes(&self, index: u16) -> ClassResult<&[u8]> {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => Ok(bytes),
            Some(other) => Err(ClassError::malformed(format!(
                "constant #{} is {}, expected Utf8", index, other.tag_name()
            ))),
            None => Err(ClassError::malformed(format!("constant pool index #{} out of bounds", index))),
        }
    }

    /// Decode a Utf8 constant. Names and descriptors are plain UTF-8 in
    /// practice; anything else is decoded lossily for display only.
    pub fn utf8(&self, index: u16) -> ClassResult<String> {
        let bytes = self.utf8_bytes(index)?;
        Ok(decode_modified_utf8(bytes))
    }

    pub fn class_name(&self, index: u16) -> ClassResult<String> {
        match self.get(index) {
            Some(Constant::Class(name_index)) => self.utf8(*name_index),
            Some(other) => Err(ClassError::malformed(format!(
                "constant #{} is {}, expected Class", index, other.tag_name()
            ))),
            None => Err(ClassError::malformed(format!("constant pool index #{} out of bounds", index))),
        }
    }

    pub fn name_and_type(&self, index: u16) -> ClassResult<(String, String)> {
        match self.get(index) {
            Some(Constant::NameAndType(name_index, descriptor_index)) => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            Some(other) => Err(ClassError::malformed(format!(
                "constant #{} is {}, expected NameAndType", index, other.tag_name()
            ))),
            None => Err(ClassError::malformed(format!("constant pool index #{} out of bounds", index))),
        }
    }

    /// Resolve a Fieldref, Methodref or InterfaceMethodref into
    /// `(owner, name, descriptor)`
    pub fn member_ref(&self, index: u16) -> ClassResult<(String, String, String)> {
        match self.get(index) {
            Some(Constant::FieldRef(class_index, nat_index))
            | Some(Constant::MethodRef(class_index, nat_index))
            | Some(Constant::InterfaceMethodRef(class_index, nat_index)) => {
                let owner = self.class_name(*class_index)?;
                let (name, descriptor) = self.name_and_type(*nat_index)?;
                Ok((owner, name, descriptor))
            }
            Some(other) => Err(ClassError::malformed(format!(
                "constant #{} is {}, expected a member reference", index, other.tag_name()
            ))),
            None => Err(ClassError::malformed(format!("constant pool index #{} out of bounds", index))),
        }
    }

    /// Descriptor of the NameAndType referenced by an invokedynamic or
    /// dynamic constant
    pub fn dynamic_descriptor(&self, index: u16) -> ClassResult<String> {
        match self.get(index) {
            Some(Constant::InvokeDynamic(_, nat_index)) | Some(Constant::Dynamic(_, nat_index)) => {
                Ok(self.name_and_type(*nat_index)?.1)
            }
            Some(other) => Err(ClassError::malformed(format!(
                "constant #{} is {}, expected a dynamic constant", index, other.tag_name()
            ))),
            None => Err(ClassError::malformed(format!("constant pool index #{} out of bounds", index))),
        }
    }

    fn find(&self, wanted: &Constant) -> Option<u16> {
        self.iter().find(|(_, c)| *c == wanted).map(|(i, _)| i)
    }

    fn append(&mut self, constant: Constant) -> ClassResult<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.constants.len() + slots > u16::MAX as usize - 1 {
            return Err(ClassError::ConstantPoolOverflow);
        }
        self.push(constant);
        Ok((self.constants.len() + 1 - slots) as u16)
    }

    fn intern(&mut self, constant: Constant) -> ClassResult<u16> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.append(constant),
        }
    }

    pub fn intern_utf8(&mut self, value: &str) -> ClassResult<u16> {
        self.intern(Constant::Utf8(encode_modified_utf8(value)))
    }

    pub fn intern_class(&mut self, name: &str) -> ClassResult<u16> {
        let name_index = self.intern_utf8(name)?;
        self.intern(Constant::Class(name_index))
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> ClassResult<u16> {
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType(name_index, descriptor_index))
    }

    pub fn intern_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ClassResult<u16> {
        let class_index = self.intern_class(class)?;
        let nat_index = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::MethodRef(class_index, nat_index))
    }

    pub fn intern_interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ClassResult<u16> {
        let class_index = self.intern_class(class)?;
        let nat_index = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::InterfaceMethodRef(class_index, nat_index))
    }

    pub fn intern_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> ClassResult<u16> {
        let class_index = self.intern_class(class)?;
        let nat_index = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::FieldRef(class_index, nat_index))
    }

    pub fn intern_string(&mut self, value: &str) -> ClassResult<u16> {
        let utf8_index = self.intern_utf8(value)?;
        self.intern(Constant::String(utf8_index))
    }

    pub fn intern_long(&mut self, value: i64) -> ClassResult<u16> {
        self.intern(Constant::Long(value))
    }
}

/// Encode a string the way the JVM stores Utf8 constants: NUL becomes
/// `C0 80` and supplementary characters become surrogate pairs.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8. Malformed sequences become U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let a = bytes[i] as u16;
        if a & 0x80 == 0 {
            units.push(a);
            i += 1;
        } else if a & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            let b = bytes[i + 1] as u16;
            units.push(((a & 0x1F) << 6) | (b & 0x3F));
            i += 2;
        } else if a & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            let b = bytes[i + 1] as u16;
            let c = bytes[i + 2] as u16;
            units.push(((a & 0x0F) << 12) | ((b & 0x3F) << 6) | (c & 0x3F));
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}
