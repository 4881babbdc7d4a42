//! Core classfile structures: ClassFile and MemberInfo

use super::attribute::{AttributeInfo, CodeAttribute};
use super::constpool::ConstantPool;
use super::defs::{access_flags, attribute_names};
use super::error::{ClassError, ClassResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

/// A field or method: both share the same layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    pub fn new(access_flags: u16, name_index: u16, descriptor_index: u16) -> Self {
        Self { access_flags, name_index, descriptor_index, attributes: Vec::new() }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & access_flags::ACC_STATIC != 0
    }

    /// Position of the `Code` attribute in this member's attribute list
    pub fn code_attribute_index(&self, constant_pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.is_named(constant_pool, attribute_names::CODE))
    }
}

impl ClassFile {
    /// Create an empty class extending `super_name`
    pub fn new(major_version: u16, this_name: &str, super_name: Option<&str>) -> ClassResult<Self> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.intern_class(this_name)?;
        let super_class = match super_name {
            Some(name) => constant_pool.intern_class(name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version,
            constant_pool,
            access_flags: access_flags::ACC_PUBLIC | access_flags::ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Internal name of this class, e.g. `a/B`
    pub fn name(&self) -> ClassResult<String> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn member_name(&self, member: &MemberInfo) -> ClassResult<String> {
        self.constant_pool.utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &MemberInfo) -> ClassResult<String> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Parse the `Code` attribute of method `method_index`, if it has one
    pub fn method_code(&self, method_index: usize) -> ClassResult<Option<CodeAttribute>> {
        let method = self
            .methods
            .get(method_index)
            .ok_or_else(|| ClassError::malformed(format!("no method at index {}", method_index)))?;
        match method.code_attribute_index(&self.constant_pool) {
            Some(i) => CodeAttribute::parse(&method.attributes[i].info).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the `Code` attribute of method `method_index`
    pub fn set_method_code(&mut self, method_index: usize, code: &CodeAttribute) -> ClassResult<()> {
        let attr_index = self
            .methods
            .get(method_index)
            .and_then(|m| m.code_attribute_index(&self.constant_pool))
            .ok_or_else(|| ClassError::malformed(format!("method {} has no Code attribute", method_index)))?;
        self.methods[method_index].attributes[attr_index].info = code.to_bytes();
        Ok(())
    }

    /// Append a method with the given body
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<&CodeAttribute>,
    ) -> ClassResult<usize> {
        let name_index = self.constant_pool.intern_utf8(name)?;
        let descriptor_index = self.constant_pool.intern_utf8(descriptor)?;
        let mut method = MemberInfo::new(access_flags, name_index, descriptor_index);
        if let Some(code) = code {
            let code_name = self.constant_pool.intern_utf8(attribute_names::CODE)?;
            method.attributes.push(AttributeInfo::new(code_name, code.to_bytes()));
        }
        self.methods.push(method);
        Ok(self.methods.len() - 1)
    }
}
