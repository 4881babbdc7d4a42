//! Instruction patcher
//!
//! Prepends `load slot; invokestatic hook; store slot` to a method body and
//! moves every offset-carrying structure of the `Code` attribute along with
//! the instructions they point at.

use log::{debug, warn};

use crate::classfile::attribute::{
    AttributeInfo, CodeAttribute, LineNumberTableAttribute, LocalVariableTableAttribute,
};
use crate::classfile::constpool::ConstantPool;
use crate::classfile::defs::{attribute_names, FIRST_STACK_MAP_MAJOR};
use crate::classfile::descriptor::{FieldType, MethodDescriptor};
use crate::classfile::error::{ClassError, ClassResult};
use crate::classfile::frame::StackMapTable;
use crate::classfile::instruction::{encode, DecodedCode, Instruction};
use crate::classfile::opcodes::*;

use super::spec::PatchSpec;
use super::stack;

/// `(indexed form, _0 form)` of the load and store for a value type
fn local_forms(ty: &FieldType) -> ((u8, u8), (u8, u8)) {
    match ty {
        FieldType::Long => ((LLOAD, LLOAD_0), (LSTORE, LSTORE_0)),
        FieldType::Float => ((FLOAD, FLOAD_0), (FSTORE, FSTORE_0)),
        FieldType::Double => ((DLOAD, DLOAD_0), (DSTORE, DSTORE_0)),
        FieldType::Object(_) | FieldType::Array(_) => ((ALOAD, ALOAD_0), (ASTORE, ASTORE_0)),
        _ => ((ILOAD, ILOAD_0), (ISTORE, ISTORE_0)),
    }
}

fn load_and_store(slot: u16, ty: &FieldType) -> (Instruction, Instruction) {
    let ((load, load_0), (store, store_0)) = local_forms(ty);
    (Instruction::local(load, load_0, slot), Instruction::local(store, store_0, slot))
}

/// Build the three hook instructions, interning the hook reference
pub fn hook_sequence(cp: &mut ConstantPool, spec: &PatchSpec, hook_type: &FieldType) -> ClassResult<Vec<Instruction>> {
    let hook = &spec.hook;
    let descriptor = hook.descriptor.to_string();
    let method_ref = if hook.is_interface {
        cp.intern_interface_method_ref(&hook.class, &hook.name, &descriptor)?
    } else {
        cp.intern_method_ref(&hook.class, &hook.name, &descriptor)?
    };
    let (load, store) = load_and_store(spec.slot, hook_type);
    Ok(vec![load, Instruction::plain(INVOKESTATIC, method_ref.to_be_bytes().to_vec()), store])
}

/// Whether `instructions` already start with this spec's hook sequence
pub fn is_hook_sequence(cp: &ConstantPool, instructions: &[Instruction], spec: &PatchSpec, hook_type: &FieldType) -> bool {
    let [first, second, third, ..] = instructions else {
        return false;
    };
    let (load, store) = load_and_store(spec.slot, hook_type);
    if *first != load || *third != store || second.opcode() != INVOKESTATIC {
        return false;
    }
    let Some(index) = second.cp_index() else {
        return false;
    };
    match cp.member_ref(index) {
        Ok((owner, name, descriptor)) => {
            owner == spec.hook.class
                && name == spec.hook.name
                && descriptor.parse::<MethodDescriptor>().map_or(false, |d| d == spec.hook.descriptor)
        }
        Err(_) => false,
    }
}

/// Maps byte offsets of the original code to offsets in the patched code.
/// Instruction `i` of the original is instruction `i + shift` afterwards;
/// the code length maps to the new code length.
struct Relocation<'a> {
    old: &'a [usize],
    new: &'a [usize],
    shift: usize,
}

impl Relocation<'_> {
    fn index(&self, old_offset: usize) -> ClassResult<usize> {
        self.old.binary_search(&old_offset).map_err(|_| {
            ClassError::malformed(format!("offset {} is not an instruction boundary", old_offset))
        })
    }

    fn offset(&self, old_offset: usize) -> ClassResult<usize> {
        Ok(self.new[self.index(old_offset)? + self.shift])
    }

    fn pc(&self, old_pc: u16) -> ClassResult<u16> {
        let moved = self.offset(old_pc as usize)?;
        u16::try_from(moved).map_err(|_| ClassError::CodeTooLarge(format!("offset {} overflows", moved)))
    }
}

/// Insert `prefix` in front of `decoded` and rebuild `code` around it.
///
/// `major_version` decides whether a `StackMapTable` is relocated or, for
/// classfiles that predate it, dropped. `cp` must already hold every
/// constant the prefix references.
pub fn inject(
    code: &CodeAttribute,
    decoded: DecodedCode,
    prefix: Vec<Instruction>,
    cp: &ConstantPool,
    major_version: u16,
    method_label: &str,
) -> ClassResult<CodeAttribute> {
    let shift = prefix.len();
    let mut instructions = prefix;
    instructions.extend(decoded.instructions.into_iter().map(|mut insn| {
        insn.map_targets(|target| target + shift);
        insn
    }));
    let encoded = encode(&instructions)?;
    let relocation = Relocation { old: &decoded.offsets, new: &encoded.offsets, shift };

    let mut patched = code.clone();
    patched.code = encoded.code;

    let mut handlers = Vec::with_capacity(code.exception_table.len());
    for entry in patched.exception_table.iter_mut() {
        handlers.push(relocation.index(entry.handler_pc as usize)? + shift);
        entry.start_pc = relocation.pc(entry.start_pc)?;
        entry.end_pc = relocation.pc(entry.end_pc)?;
        entry.handler_pc = relocation.pc(entry.handler_pc)?;
    }

    let mut attributes = Vec::with_capacity(code.attributes.len());
    for attribute in &code.attributes {
        if let Some(moved) = relocate_attribute(attribute, &relocation, cp, major_version, method_label)? {
            attributes.push(moved);
        }
    }
    patched.attributes = attributes;

    let computed = stack::max_stack(&instructions, &handlers, cp)?;
    patched.max_stack = computed.max(code.max_stack);
    debug!(
        "{}: code {} -> {} bytes, max_stack {} -> {}",
        method_label,
        code.code.len(),
        patched.code.len(),
        code.max_stack,
        patched.max_stack
    );
    Ok(patched)
}

/// Relocated copy of a nested `Code` attribute, or `None` to drop it
fn relocate_attribute(
    attribute: &AttributeInfo,
    relocation: &Relocation<'_>,
    cp: &ConstantPool,
    major_version: u16,
    method_label: &str,
) -> ClassResult<Option<AttributeInfo>> {
    let info = if attribute.is_named(cp, attribute_names::LINE_NUMBER_TABLE) {
        let mut table = LineNumberTableAttribute::parse(&attribute.info)?;
        for entry in table.line_number_table.iter_mut() {
            entry.start_pc = relocation.pc(entry.start_pc)?;
        }
        table.to_bytes()
    } else if attribute.is_named(cp, attribute_names::LOCAL_VARIABLE_TABLE)
        || attribute.is_named(cp, attribute_names::LOCAL_VARIABLE_TYPE_TABLE)
    {
        let mut table = LocalVariableTableAttribute::parse(&attribute.info)?;
        for entry in table.entries.iter_mut() {
            let end = relocation.pc(entry.start_pc.checked_add(entry.length).ok_or_else(|| {
                ClassError::malformed(format!("local variable range at {} overflows", entry.start_pc))
            })?)?;
            // Variables live from entry (parameters) keep covering the hook.
            let start = if entry.start_pc == 0 { 0 } else { relocation.pc(entry.start_pc)? };
            entry.start_pc = start;
            entry.length = end - start;
        }
        table.to_bytes()
    } else if attribute.is_named(cp, attribute_names::STACK_MAP_TABLE) {
        if major_version < FIRST_STACK_MAP_MAJOR {
            warn!("{}: dropping StackMapTable from a version {} class", method_label, major_version);
            return Ok(None);
        }
        let mut table = StackMapTable::parse(&attribute.info)?;
        table.relocate(|offset| relocation.offset(offset))?;
        table.to_bytes()
    } else if attribute.is_named(cp, attribute_names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS)
        || attribute.is_named(cp, attribute_names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS)
    {
        warn!("{}: dropping code type annotations, their offsets are not relocated", method_label);
        return Ok(None);
    } else {
        attribute.info.clone()
    };
    Ok(Some(AttributeInfo::new(attribute.name_index, info)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::attribute::ExceptionTableEntry;
    use crate::classfile::frame::{StackMapFrame, VerificationType};
    use crate::classfile::instruction::decode;

    fn spec() -> PatchSpec {
        let mut spec = PatchSpec::default();
        spec.slot = 1;
        spec.hook.class = "h/Hook".to_string();
        spec.hook.name = "process".to_string();
        spec
    }

    fn string() -> FieldType {
        FieldType::string()
    }

    #[test]
    fn hook_sequence_uses_type_specific_locals() {
        let mut cp = ConstantPool::new();
        let seq = hook_sequence(&mut cp, &spec(), &string()).unwrap();
        assert_eq!(seq[0], Instruction::plain(0x2b, Vec::new())); // aload_1
        assert_eq!(seq[2], Instruction::plain(0x4c, Vec::new())); // astore_1
        let index = seq[1].cp_index().unwrap();
        assert_eq!(
            cp.member_ref(index).unwrap(),
            ("h/Hook".into(), "process".into(), "(Ljava/lang/String;)Ljava/lang/String;".into())
        );
        assert!(is_hook_sequence(&cp, &seq, &spec(), &string()));

        let (load, store) = load_and_store(300, &FieldType::Long);
        assert_eq!(load, Instruction::plain(WIDE, vec![LLOAD, 0x01, 0x2c]));
        assert_eq!(store, Instruction::plain(WIDE, vec![LSTORE, 0x01, 0x2c]));
        assert_eq!(load_and_store(5, &FieldType::Int).0, Instruction::plain(ILOAD, vec![5]));
    }

    #[test]
    fn other_prefixes_are_not_the_hook() {
        let mut cp = ConstantPool::new();
        let mut seq = hook_sequence(&mut cp, &spec(), &string()).unwrap();
        let mut other = spec();
        other.hook.name = "other".to_string();
        assert!(!is_hook_sequence(&cp, &seq, &other, &string()));
        seq.truncate(2);
        assert!(!is_hook_sequence(&cp, &seq, &spec(), &string()));
    }

    #[test]
    fn relocates_branches_tables_and_frames() {
        let mut cp = ConstantPool::new();
        let line_name = cp.intern_utf8(attribute_names::LINE_NUMBER_TABLE).unwrap();
        let lvt_name = cp.intern_utf8(attribute_names::LOCAL_VARIABLE_TABLE).unwrap();
        let smt_name = cp.intern_utf8(attribute_names::STACK_MAP_TABLE).unwrap();
        let rvta_name = cp.intern_utf8(attribute_names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS).unwrap();

        // 0 aload_1, 1 ifnull -> 6, 4 aload_1, 5 areturn, 6 aconst_null, 7 areturn, 8 athrow
        let mut code = CodeAttribute::new(1, 2, vec![0x2b, 0xc6, 0x00, 0x05, 0x2b, 0xb0, 0x01, 0xb0, 0xbf]);
        code.exception_table.push(ExceptionTableEntry::new(0, 6, 8, 0));
        let mut lines = LineNumberTableAttribute::new();
        lines.add_line_number(0, 10);
        lines.add_line_number(6, 11);
        code.attributes.push(AttributeInfo::new(line_name, lines.to_bytes()));
        let lvt = LocalVariableTableAttribute {
            entries: vec![crate::classfile::attribute::LocalVariableEntry {
                start_pc: 0,
                length: 9,
                name_index: 1,
                descriptor_index: 1,
                index: 1,
            }],
        };
        code.attributes.push(AttributeInfo::new(lvt_name, lvt.to_bytes()));
        let frames = StackMapTable {
            frames: vec![
                StackMapFrame::Same { offset_delta: 6 },
                StackMapFrame::SameLocals1StackItem {
                    offset_delta: 1,
                    stack: VerificationType::Object(1),
                },
            ],
        };
        code.attributes.push(AttributeInfo::new(smt_name, frames.to_bytes()));
        code.attributes.push(AttributeInfo::new(rvta_name, vec![0, 0]));

        let decoded = decode(&code.code).unwrap();
        let prefix = hook_sequence(&mut cp, &spec(), &string()).unwrap();
        let patched = inject(&code, decoded, prefix, &cp, 52, "a/B.m").unwrap();

        let new_decoded = decode(&patched.code).unwrap();
        assert_eq!(new_decoded.offsets, vec![0, 1, 4, 5, 6, 9, 10, 11, 12, 13, 14]);
        assert_eq!(new_decoded.instructions[4], Instruction::Jump { opcode: IFNULL, target: 7 });
        assert_eq!(patched.exception_table[0], ExceptionTableEntry::new(5, 11, 13, 0));
        assert_eq!(patched.max_stack, 1);
        assert_eq!(patched.attributes.len(), 3);

        let lines = LineNumberTableAttribute::parse(&patched.attributes[0].info).unwrap();
        assert_eq!(lines.line_number_table[0].start_pc, 5);
        assert_eq!(lines.line_number_table[1].start_pc, 11);
        let lvt = LocalVariableTableAttribute::parse(&patched.attributes[1].info).unwrap();
        assert_eq!((lvt.entries[0].start_pc, lvt.entries[0].length), (0, 14));
        let frames = StackMapTable::parse(&patched.attributes[2].info).unwrap();
        assert_eq!(frames.absolute_offsets(), vec![11, 13]);
    }

    #[test]
    fn old_classes_lose_their_stack_map() {
        let mut cp = ConstantPool::new();
        let smt_name = cp.intern_utf8(attribute_names::STACK_MAP_TABLE).unwrap();
        let mut code = CodeAttribute::new(1, 2, vec![0xb1]);
        code.attributes.push(AttributeInfo::new(smt_name, StackMapTable::new().to_bytes()));
        let decoded = decode(&code.code).unwrap();
        let mut s = spec();
        s.target_method.descriptor = "(Ljava/lang/String;)V".parse().unwrap();
        let prefix = hook_sequence(&mut cp, &s, &string()).unwrap();
        let patched = inject(&code, decoded, prefix, &cp, 49, "a/B.m").unwrap();
        assert!(patched.attributes.is_empty());
        assert_eq!(patched.code.len(), 6);
    }
}
