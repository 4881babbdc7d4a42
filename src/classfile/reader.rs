//! Classfile parser
//!
//! Reads a classfile into the in-memory model. Every read is bounds-checked;
//! running off the end of the buffer, unknown constant tags and trailing
//! bytes are reported as [`ClassError::MalformedClass`].

use super::attribute::AttributeInfo;
use super::class::{ClassFile, MemberInfo};
use super::constpool::{constant_tags::*, Constant, ConstantPool};
use super::defs::{MAGIC, MAX_SUPPORTED_MAJOR, MIN_SUPPORTED_MAJOR};
use super::error::{ClassError, ClassResult};

/// Big-endian cursor over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> ClassResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ClassError::malformed(format!(
                "unexpected end of data at offset {} (wanted {} bytes, {} left)",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> ClassResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ClassResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> ClassResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> ClassResult<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> ClassResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> ClassResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> ClassResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Fail unless every byte was consumed
    pub fn expect_end(&self, what: &str) -> ClassResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ClassError::malformed(format!("{} trailing bytes after {}", self.remaining(), what)))
        }
    }
}

/// Parse a classfile from raw bytes
pub fn parse_class(bytes: &[u8]) -> ClassResult<ClassFile> {
    let mut r = ByteReader::new(bytes);

    let magic = r.read_u32()?;
    if magic != MAGIC {
        return Err(ClassError::malformed(format!("bad magic 0x{:08X}", magic)));
    }
    let minor_version = r.read_u16()?;
    let major_version = r.read_u16()?;
    if !(MIN_SUPPORTED_MAJOR..=MAX_SUPPORTED_MAJOR).contains(&major_version) {
        return Err(ClassError::malformed(format!(
            "unsupported class file version {}.{}",
            major_version, minor_version
        )));
    }

    let constant_pool = read_constant_pool(&mut r)?;
    let access_flags = r.read_u16()?;
    let this_class = r.read_u16()?;
    let super_class = r.read_u16()?;

    let interfaces_count = r.read_u16()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        interfaces.push(r.read_u16()?);
    }

    let fields = read_members(&mut r)?;
    let methods = read_members(&mut r)?;
    let attributes = read_attributes(&mut r)?;
    r.expect_end("class attributes")?;

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn read_constant_pool(r: &mut ByteReader<'_>) -> ClassResult<ConstantPool> {
    let count = r.read_u16()?;
    if count == 0 {
        return Err(ClassError::malformed("constant_pool_count is zero"));
    }
    let mut pool = ConstantPool::new();
    // Slot numbers run from 1 to count - 1; wide constants consume two.
    while pool.count() < count {
        let slot = pool.count();
        let tag = r.read_u8()?;
        let constant = match tag {
            CONSTANT_UTF8 => {
                let len = r.read_u16()? as usize;
                Constant::Utf8(r.read_bytes(len)?.to_vec())
            }
            CONSTANT_INTEGER => Constant::Integer(r.read_i32()?),
            CONSTANT_FLOAT => Constant::Float(f32::from_bits(r.read_u32()?)),
            CONSTANT_LONG => Constant::Long(r.read_u64()? as i64),
            CONSTANT_DOUBLE => Constant::Double(f64::from_bits(r.read_u64()?)),
            CONSTANT_CLASS => Constant::Class(r.read_u16()?),
            CONSTANT_STRING => Constant::String(r.read_u16()?),
            CONSTANT_FIELDREF => Constant::FieldRef(r.read_u16()?, r.read_u16()?),
            CONSTANT_METHODREF => Constant::MethodRef(r.read_u16()?, r.read_u16()?),
            CONSTANT_INTERFACEMETHODREF => Constant::InterfaceMethodRef(r.read_u16()?, r.read_u16()?),
            CONSTANT_NAMEANDTYPE => Constant::NameAndType(r.read_u16()?, r.read_u16()?),
            CONSTANT_METHODHANDLE => Constant::MethodHandle(r.read_u8()?, r.read_u16()?),
            CONSTANT_METHODTYPE => Constant::MethodType(r.read_u16()?),
            CONSTANT_DYNAMIC => Constant::Dynamic(r.read_u16()?, r.read_u16()?),
            CONSTANT_INVOKEDYNAMIC => Constant::InvokeDynamic(r.read_u16()?, r.read_u16()?),
            CONSTANT_MODULE => Constant::Module(r.read_u16()?),
            CONSTANT_PACKAGE => Constant::Package(r.read_u16()?),
            other => {
                return Err(ClassError::malformed(format!(
                    "unknown constant tag {} at pool slot #{}",
                    other, slot
                )))
            }
        };
        if constant.is_wide() && slot == count - 1 {
            return Err(ClassError::malformed(format!(
                "wide constant at last pool slot #{} overflows constant_pool_count",
                slot
            )));
        }
        pool.push(constant);
    }
    Ok(pool)
}

fn read_members(r: &mut ByteReader<'_>) -> ClassResult<Vec<MemberInfo>> {
    let count = r.read_u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = r.read_u16()?;
        let name_index = r.read_u16()?;
        let descriptor_index = r.read_u16()?;
        let attributes = read_attributes(r)?;
        members.push(MemberInfo { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(members)
}

/// Read an `attributes_count` followed by that many raw attributes
pub fn read_attributes(r: &mut ByteReader<'_>) -> ClassResult<Vec<AttributeInfo>> {
    let count = r.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.read_u16()?;
        let len = r.read_u32()? as usize;
        let info = r.read_bytes(len)?.to_vec();
        attributes.push(AttributeInfo::new(name_index, info));
    }
    Ok(attributes)
}
