//! Field and method descriptors (JVMS 4.3)

use std::fmt;
use std::str::FromStr;

use super::error::{ClassError, ClassResult};

/// A field type as it appears in descriptors
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
    /// Internal class name, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Number of local-variable (and operand-stack) slots a value takes
    pub fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    pub fn string() -> Self {
        FieldType::Object("java/lang/String".to_string())
    }

    fn parse_at(descriptor: &str, chars: &[u8], pos: &mut usize) -> ClassResult<Self> {
        let bad = || ClassError::invalid_descriptor(descriptor);
        let c = *chars.get(*pos).ok_or_else(bad)?;
        *pos += 1;
        let ty = match c {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let start = *pos;
                let end = chars[start..].iter().position(|&b| b == b';').ok_or_else(bad)? + start;
                if end == start {
                    return Err(bad());
                }
                *pos = end + 1;
                FieldType::Object(descriptor[start..end].to_string())
            }
            b'[' => FieldType::Array(Box::new(Self::parse_at(descriptor, chars, pos)?)),
            _ => return Err(bad()),
        };
        Ok(ty)
    }
}

impl FromStr for FieldType {
    type Err = ClassError;

    fn from_str(s: &str) -> ClassResult<Self> {
        let mut pos = 0;
        let ty = Self::parse_at(s, s.as_bytes(), &mut pos)?;
        if pos != s.len() {
            return Err(ClassError::invalid_descriptor(s));
        }
        Ok(ty)
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
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Void,
    Value(FieldType),
}

impl ReturnType {
    pub fn slot_size(&self) -> u16 {
        match self {
            ReturnType::Void => 0,
            ReturnType::Value(ty) => ty.slot_size(),
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Void => f.write_str("V"),
            ReturnType::Value(ty) => ty.fmt(f),
        }
    }
}

/// Parameter and return types of a method. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: ReturnType,
}

impl MethodDescriptor {
    pub fn new(parameters: Vec<FieldType>, return_type: ReturnType) -> Self {
        Self { parameters, return_type }
    }

    /// Slots taken by the arguments on the operand stack (excluding any receiver)
    pub fn argument_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slot_size).sum()
    }
}

impl FromStr for MethodDescriptor {
    type Err = ClassError;

    fn from_str(s: &str) -> ClassResult<Self> {
        let chars = s.as_bytes();
        if chars.first() != Some(&b'(') {
            return Err(ClassError::invalid_descriptor(s));
        }
        let mut pos = 1;
        let mut parameters = Vec::new();
        loop {
            match chars.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => parameters.push(FieldType::parse_at(s, chars, &mut pos)?),
                None => return Err(ClassError::invalid_descriptor(s)),
            }
        }
        let return_type = if chars.get(pos) == Some(&b'V') {
            pos += 1;
            ReturnType::Void
        } else {
            ReturnType::Value(FieldType::parse_at(s, chars, &mut pos)?)
        };
        if pos != s.len() {
            return Err(ClassError::invalid_descriptor(s));
        }
        Ok(Self { parameters, return_type })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.parameters {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.return_type)
    }
}
