//! Attributes and exception table structures for Java class files
//!
//! Attributes are kept raw (`name_index` + payload) unless the patcher needs
//! to look inside them. `Code` and the offset-carrying debug tables have typed
//! forms that parse from and serialize back to the raw payload.

use super::constpool::ConstantPool;
use super::error::ClassResult;
use super::reader::{read_attributes, ByteReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn new(name_index: u16, info: Vec<u8>) -> Self {
        Self { name_index, info }
    }

    /// Whether this attribute's name resolves to `name`
    pub fn is_named(&self, constant_pool: &ConstantPool, name: &str) -> bool {
        constant_pool
            .utf8_bytes(self.name_index)
            .map(|bytes| bytes == name.as_bytes())
            .unwrap_or(false)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(6 + self.info.len());
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&(self.info.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.info);
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Parse the payload of a `Code` attribute
    pub fn parse(info: &[u8]) -> ClassResult<Self> {
        let mut r = ByteReader::new(info);
        let max_stack = r.read_u16()?;
        let max_locals = r.read_u16()?;
        let code_length = r.read_u32()? as usize;
        let code = r.read_bytes(code_length)?.to_vec();
        let exception_count = r.read_u16()?;
        let mut exception_table = Vec::with_capacity(exception_count as usize);
        for _ in 0..exception_count {
            exception_table.push(ExceptionTableEntry::new(
                r.read_u16()?,
                r.read_u16()?,
                r.read_u16()?,
                r.read_u16()?,
            ));
        }
        let attributes = read_attributes(&mut r)?;
        r.expect_end("Code attribute")?;
        Ok(Self { max_stack, max_locals, code, exception_table, attributes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.max_stack.to_be_bytes());
        bytes.extend_from_slice(&self.max_locals.to_be_bytes());
        bytes.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for entry in &self.exception_table {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        bytes.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            bytes.extend_from_slice(&attribute.to_bytes());
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    pub fn new(start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        Self { start_pc, end_pc, handler_pc, catch_type }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&self.start_pc.to_be_bytes());
        bytes.extend_from_slice(&self.end_pc.to_be_bytes());
        bytes.extend_from_slice(&self.handler_pc.to_be_bytes());
        bytes.extend_from_slice(&self.catch_type.to_be_bytes());
        bytes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineNumberTableAttribute {
    pub line_number_table: Vec<LineNumberEntry>,
}

impl LineNumberTableAttribute {
    pub fn new() -> Self { Self { line_number_table: Vec::new() } }

    pub fn add_line_number(&mut self, start_pc: u16, line_number: u16) {
        self.line_number_table.push(LineNumberEntry { start_pc, line_number });
    }

    pub fn parse(info: &[u8]) -> ClassResult<Self> {
        let mut r = ByteReader::new(info);
        let count = r.read_u16()?;
        let mut table = Self::new();
        for _ in 0..count {
            table.add_line_number(r.read_u16()?, r.read_u16()?);
        }
        r.expect_end("LineNumberTable")?;
        Ok(table)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.line_number_table.len() as u16).to_be_bytes());
        for entry in &self.line_number_table {
            bytes.extend_from_slice(&entry.start_pc.to_be_bytes());
            bytes.extend_from_slice(&entry.line_number.to_be_bytes());
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

/// Shared shape of `LocalVariableTable` and `LocalVariableTypeTable`; the
/// second carries a signature index where the first has a descriptor index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalVariableTableAttribute {
    pub entries: Vec<LocalVariableEntry>,
}

impl LocalVariableTableAttribute {
    pub fn new() -> Self { Self { entries: Vec::new() } }

    pub fn parse(info: &[u8]) -> ClassResult<Self> {
        let mut r = ByteReader::new(info);
        let count = r.read_u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(LocalVariableEntry {
                start_pc: r.read_u16()?,
                length: r.read_u16()?,
                name_index: r.read_u16()?,
                descriptor_index: r.read_u16()?,
                index: r.read_u16()?,
            });
        }
        r.expect_end("LocalVariableTable")?;
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for e in &self.entries {
            bytes.extend_from_slice(&e.to_bytes());
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

impl LocalVariableEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(10);
        bytes.extend_from_slice(&self.start_pc.to_be_bytes());
        bytes.extend_from_slice(&self.length.to_be_bytes());
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&self.descriptor_index.to_be_bytes());
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes
    }
}
