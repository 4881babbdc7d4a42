use crate::classfile::attribute::AttributeInfo;
use crate::classfile::class::{ClassFile, MemberInfo};
use crate::classfile::constpool::Constant;
use crate::classfile::defs::access_flags;
use crate::classfile::error::{ClassError, ClassResult};

use super::constant_pool;

/// Verify the ClassFile by orchestrating all sub-verifiers.
///
/// Every failure is reported as [`ClassError::MalformedClass`]; the patcher
/// treats a structurally broken class the same way as an unparsable one.
pub fn verify(class_file: &ClassFile) -> ClassResult<()> {
    constant_pool::verify(class_file).map_err(|e| ClassError::malformed(e.to_string()))?;
    verify_this_class(class_file)?;
    verify_super_class(class_file)?;
    verify_interfaces(class_file)?;
    for field in &class_file.fields {
        verify_member(class_file, field, "field")?;
    }
    for method in &class_file.methods {
        verify_member(class_file, method, "method")?;
    }
    verify_attributes(class_file, &class_file.attributes)?;
    Ok(())
}

fn class_ref(class_file: &ClassFile, index: u16, what: &str) -> ClassResult<()> {
    match class_file.constant_pool.get(index) {
        Some(Constant::Class(_)) => Ok(()),
        None => Err(ClassError::malformed(format!("{}: InvalidConstantPoolIndex({})", what, index))),
        _ => Err(ClassError::malformed(format!("{}: InvalidConstantPoolIndexType({})", what, index))),
    }
}

fn utf8_ref(class_file: &ClassFile, index: u16, what: &str) -> ClassResult<()> {
    match class_file.constant_pool.get(index) {
        Some(Constant::Utf8(_)) => Ok(()),
        None => Err(ClassError::malformed(format!("{}: InvalidConstantPoolIndex({})", what, index))),
        _ => Err(ClassError::malformed(format!("{}: InvalidConstantPoolIndexType({})", what, index))),
    }
}

fn verify_this_class(class_file: &ClassFile) -> ClassResult<()> {
    class_ref(class_file, class_file.this_class, "this_class")
}

fn verify_super_class(class_file: &ClassFile) -> ClassResult<()> {
    let super_class = class_file.super_class;

    let class_is_interface = class_file.access_flags & access_flags::ACC_INTERFACE != 0;
    if !class_is_interface && super_class == 0 {
        // Only java/lang/Object has no superclass
        return Ok(());
    }
    class_ref(class_file, super_class, "super_class")
}

fn verify_interfaces(class_file: &ClassFile) -> ClassResult<()> {
    for &interface in &class_file.interfaces {
        class_ref(class_file, interface, "interface")?;
    }
    Ok(())
}

fn verify_member(class_file: &ClassFile, member: &MemberInfo, what: &str) -> ClassResult<()> {
    utf8_ref(class_file, member.name_index, what)?;
    utf8_ref(class_file, member.descriptor_index, what)?;
    verify_attributes(class_file, &member.attributes)
}

fn verify_attributes(class_file: &ClassFile, attributes: &[AttributeInfo]) -> ClassResult<()> {
    for attribute in attributes {
        utf8_ref(class_file, attribute.name_index, "attribute name")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_class_passes() {
        let mut class = ClassFile::new(52, "a/B", Some("java/lang/Object")).unwrap();
        class.add_method(0x0009, "m", "()V", None).unwrap();
        assert_eq!(verify(&class), Ok(()));
    }

    #[test]
    fn bad_super_class_is_malformed() {
        let mut class = ClassFile::new(52, "a/B", Some("java/lang/Object")).unwrap();
        class.super_class = 200;
        assert!(matches!(verify(&class), Err(ClassError::MalformedClass(_))));
    }

    #[test]
    fn method_name_must_be_utf8() {
        let mut class = ClassFile::new(52, "a/B", Some("java/lang/Object")).unwrap();
        let index = class.add_method(0x0009, "m", "()V", None).unwrap();
        class.methods[index].name_index = class.this_class;
        assert!(matches!(verify(&class), Err(ClassError::MalformedClass(_))));
    }

    #[test]
    fn interface_without_super_class_is_malformed() {
        let mut class = ClassFile::new(52, "a/I", None).unwrap();
        class.access_flags = access_flags::ACC_INTERFACE | access_flags::ACC_ABSTRACT;
        assert!(verify(&class).is_err());
    }
}
