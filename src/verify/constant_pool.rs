use crate::classfile::class::ClassFile;
use crate::classfile::constpool::Constant;
use crate::classfile::defs::attribute_names;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConstantPoolVerifyError {
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("Invalid constant pool index type {0}")]
    InvalidConstantPoolIndexType(u16),
    #[error("BootstrapMethods attribute not defined")]
    BootstrapMethodsNotDefined,
}

pub type Result<T> = std::result::Result<T, ConstantPoolVerifyError>;

/// Verify the ClassFile ConstantPool
pub fn verify(class_file: &ClassFile) -> Result<()> {
    let has_bootstrap = class_file
        .attributes
        .iter()
        .any(|a| a.is_named(&class_file.constant_pool, attribute_names::BOOTSTRAP_METHODS));

    for (index, constant) in class_file.constant_pool.iter() {
        match constant {
            Constant::Class(name_index)
            | Constant::Module(name_index)
            | Constant::Package(name_index)
            | Constant::String(name_index)
            | Constant::MethodType(name_index) => expect(class_file, index, *name_index, is_utf8)?,
            Constant::FieldRef(class_index, nat_index)
            | Constant::MethodRef(class_index, nat_index)
            | Constant::InterfaceMethodRef(class_index, nat_index) => {
                expect(class_file, index, *class_index, |c| matches!(c, Constant::Class(_)))?;
                expect(class_file, index, *nat_index, |c| matches!(c, Constant::NameAndType(..)))?;
            }
            Constant::NameAndType(name_index, descriptor_index) => {
                expect(class_file, index, *name_index, is_utf8)?;
                expect(class_file, index, *descriptor_index, is_utf8)?;
            }
            Constant::MethodHandle(_kind, reference_index) => {
                expect(class_file, index, *reference_index, |c| {
                    matches!(c, Constant::FieldRef(..) | Constant::MethodRef(..) | Constant::InterfaceMethodRef(..))
                })?;
            }
            Constant::Dynamic(_bsm_index, nat_index) | Constant::InvokeDynamic(_bsm_index, nat_index) => {
                if !has_bootstrap {
                    return Err(ConstantPoolVerifyError::BootstrapMethodsNotDefined);
                }
                expect(class_file, index, *nat_index, |c| matches!(c, Constant::NameAndType(..)))?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_utf8(constant: &Constant) -> bool {
    matches!(constant, Constant::Utf8(_))
}

/// Check that `target`, referenced from constant `from`, exists and passes `accept`
fn expect(class_file: &ClassFile, from: u16, target: u16, accept: impl Fn(&Constant) -> bool) -> Result<()> {
    match class_file.constant_pool.get(target) {
        Some(constant) if accept(constant) => Ok(()),
        Some(_) => Err(ConstantPoolVerifyError::InvalidConstantPoolIndexType(from)),
        None => Err(ConstantPoolVerifyError::InvalidConstantPoolIndex(from)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_interned_references() {
        let mut class = ClassFile::new(52, "a/B", Some("java/lang/Object")).unwrap();
        class.constant_pool.intern_method_ref("x/Y", "m", "()V").unwrap();
        class.constant_pool.intern_string("hi").unwrap();
        assert_eq!(verify(&class), Ok(()));
    }

    #[test]
    fn rejects_dangling_and_mistyped_references() {
        let mut class = ClassFile::new(52, "a/B", None).unwrap();
        class.constant_pool.push(Constant::Class(99));
        assert!(matches!(verify(&class), Err(ConstantPoolVerifyError::InvalidConstantPoolIndex(_))));

        let mut class = ClassFile::new(52, "a/B", None).unwrap();
        let class_index = class.this_class;
        class.constant_pool.push(Constant::String(class_index));
        assert!(matches!(verify(&class), Err(ConstantPoolVerifyError::InvalidConstantPoolIndexType(_))));
    }

    #[test]
    fn invokedynamic_needs_bootstrap_methods() {
        let mut class = ClassFile::new(52, "a/B", None).unwrap();
        let nat = class.constant_pool.intern_name_and_type("run", "()Ljava/lang/Runnable;").unwrap();
        class.constant_pool.push(Constant::InvokeDynamic(0, nat));
        assert_eq!(verify(&class), Err(ConstantPoolVerifyError::BootstrapMethodsNotDefined));
    }
}
