//! Class transformer
//!
//! Runs the per-class part of the pipeline on the bytes of the target entry:
//!
//! ```text
//! parse -> verify -> match method -> inject hook -> recompute frame data -> write
//! ```
//!
//! A missing target method, and a method that already starts with the hook,
//! leave the class bytes untouched.

pub mod injector;
pub mod matcher;
pub mod spec;
pub mod stack;

use log::{debug, info};

use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::error::{ClassError, ClassResult};
use crate::classfile::instruction::decode;
use crate::classfile::reader::parse_class;
use crate::classfile::writer::class_file_to_bytes;
use crate::verify;

pub use matcher::find_target_method;
pub use spec::{HookMethod, PatchSpec, TargetMethod};

/// What happened to the target class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched {
        /// `name` + descriptor of the patched method
        method: String,
        /// Growth of the code array, switch padding included
        inserted_bytes: usize,
        max_stack: u16,
    },
    MethodNotFound,
    AlreadyPatched,
}

/// Output of [`transform_class`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTransform {
    pub bytes: Vec<u8>,
    pub outcome: PatchOutcome,
}

impl ClassTransform {
    fn unchanged(raw: &[u8], outcome: PatchOutcome) -> Self {
        Self { bytes: raw.to_vec(), outcome }
    }
}

/// Apply `spec` to the raw bytes of its target class
pub fn transform_class(raw: &[u8], spec: &PatchSpec) -> ClassResult<ClassTransform> {
    let mut class = parse_class(raw)?;
    verify::verify(&class)?;

    let class_name = class.name()?;
    if class_name != spec.target_class_name {
        return Err(ClassError::malformed(format!(
            "entry declares class {}, expected {}",
            class_name, spec.target_class_name
        )));
    }
    let hook_type = spec
        .hook
        .value_type()
        .cloned()
        .ok_or_else(|| ClassError::invalid_descriptor(spec.hook.descriptor.to_string()))?;
    let label = format!("{}.{}{}", class_name, spec.target_method.name, spec.target_method.descriptor);

    let Some(method_index) = find_target_method(&class, &spec.target_method)? else {
        info!("{}: method not found, class left unchanged", label);
        return Ok(ClassTransform::unchanged(raw, PatchOutcome::MethodNotFound));
    };
    let code = class
        .method_code(method_index)?
        .ok_or_else(|| ClassError::malformed(format!("{} has no Code attribute", label)))?;
    let decoded = decode(&code.code)?;

    if injector::is_hook_sequence(&class.constant_pool, &decoded.instructions, spec, &hook_type) {
        info!("{}: hook already present, class left unchanged", label);
        return Ok(ClassTransform::unchanged(raw, PatchOutcome::AlreadyPatched));
    }

    let locals = stack::entry_locals(
        &class_name,
        class.methods[method_index].is_static(),
        spec.target_method.name == CONSTRUCTOR_METHOD_NAME,
        &spec.target_method.descriptor,
    );
    stack::check_hook_slot(&locals, code.max_locals, spec.slot, &hook_type)?;

    let prefix = injector::hook_sequence(&mut class.constant_pool, spec, &hook_type)?;
    let patched = injector::inject(&code, decoded, prefix, &class.constant_pool, class.major_version, &label)?;
    let inserted_bytes = patched.code.len() - code.code.len();
    let max_stack = patched.max_stack;
    class.set_method_code(method_index, &patched)?;

    let bytes = class_file_to_bytes(&class);
    debug!("{}: class rewritten, {} -> {} bytes", label, raw.len(), bytes.len());
    info!("{}: hook {}.{} injected on slot {}", label, spec.hook.class, spec.hook.name, spec.slot);

    Ok(ClassTransform {
        bytes,
        outcome: PatchOutcome::Patched {
            method: format!("{}{}", spec.target_method.name, spec.target_method.descriptor),
            inserted_bytes,
            max_stack,
        },
    })
}
