use crate::classfile::class::ClassFile;
use crate::classfile::descriptor::MethodDescriptor;
use crate::classfile::error::{ClassError, ClassResult};

use super::spec::TargetMethod;

/// Find the method matching `target` by name and structural descriptor
/// equality.
///
/// Returns `Ok(None)` when nothing matches. Two matches, or a match without
/// a body (abstract or native), cannot be patched and are reported as
/// [`ClassError::MalformedClass`].
pub fn find_target_method(class: &ClassFile, target: &TargetMethod) -> ClassResult<Option<usize>> {
    let mut found = None;
    for (index, method) in class.methods.iter().enumerate() {
        if class.member_name(method)? != target.name {
            continue;
        }
        let descriptor: MethodDescriptor = class.member_descriptor(method)?.parse()?;
        if descriptor != target.descriptor {
            continue;
        }
        if found.is_some() {
            return Err(ClassError::malformed(format!(
                "method {}{} is declared more than once",
                target.name, target.descriptor
            )));
        }
        found = Some(index);
    }

    if let Some(index) = found {
        if class.methods[index].code_attribute_index(&class.constant_pool).is_none() {
            return Err(ClassError::malformed(format!(
                "method {}{} has no Code attribute",
                target.name, target.descriptor
            )));
        }
    }
    Ok(found)
}
