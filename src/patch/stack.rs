//! Frame recalculation: entry-frame typing and operand stack depth.
//!
//! The injected prefix runs before any branch target, so the verifier checks
//! it against the implicit entry frame. That frame is derived here from the
//! method's access flags and descriptor. The maximum stack depth of the
//! patched body comes from a worklist pass over the decoded instructions.

use std::collections::VecDeque;

use crate::classfile::constpool::ConstantPool;
use crate::classfile::descriptor::{FieldType, MethodDescriptor};
use crate::classfile::error::{ClassError, ClassResult};
use crate::classfile::instruction::Instruction;
use crate::classfile::opcodes::*;

/// Type of one local variable slot in the entry frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalType {
    Value(FieldType),
    /// Receiver of a constructor before `super(...)` ran
    UninitializedThis,
    /// Second half of a long or double
    Top,
}

/// Locals at method entry: the receiver (unless static) followed by the
/// parameters, long and double taking two slots.
pub fn entry_locals(
    class_name: &str,
    is_static: bool,
    is_constructor: bool,
    descriptor: &MethodDescriptor,
) -> Vec<LocalType> {
    let mut locals = Vec::new();
    if !is_static {
        if is_constructor {
            locals.push(LocalType::UninitializedThis);
        } else {
            locals.push(LocalType::Value(FieldType::Object(class_name.to_string())));
        }
    }
    for param in &descriptor.parameters {
        locals.push(LocalType::Value(param.clone()));
        if param.slot_size() == 2 {
            locals.push(LocalType::Top);
        }
    }
    locals
}

/// Check that `slot` holds a value of exactly `hook_type` at method entry
/// and that the value fits in `max_locals`.
pub fn check_hook_slot(locals: &[LocalType], max_locals: u16, slot: u16, hook_type: &FieldType) -> ClassResult<()> {
    let end = slot as u32 + hook_type.slot_size() as u32;
    if end > max_locals as u32 {
        return Err(ClassError::frame(format!(
            "slot {} of type {} does not fit in max_locals {}",
            slot, hook_type, max_locals
        )));
    }
    match locals.get(slot as usize) {
        Some(LocalType::Value(ty)) if ty == hook_type => Ok(()),
        Some(LocalType::Value(ty)) => Err(ClassError::frame(format!(
            "slot {} holds {} at method entry, hook expects {}",
            slot, ty, hook_type
        ))),
        Some(LocalType::UninitializedThis) => {
            Err(ClassError::frame(format!("slot {} holds uninitializedThis at method entry", slot)))
        }
        Some(LocalType::Top) => {
            Err(ClassError::frame(format!("slot {} is the second half of a long or double", slot)))
        }
        None => Err(ClassError::frame(format!(
            "slot {} is not a parameter, its type at method entry is unknown",
            slot
        ))),
    }
}

fn return_slots(descriptor: &str) -> ClassResult<(u16, u16)> {
    let parsed: MethodDescriptor = descriptor.parse()?;
    Ok((parsed.argument_slots(), parsed.return_type.slot_size()))
}

fn field_slots(descriptor: &str) -> ClassResult<u16> {
    let ty: FieldType = descriptor.parse()?;
    Ok(ty.slot_size())
}

fn cp_operand(insn: &Instruction) -> ClassResult<u16> {
    insn.cp_index()
        .ok_or_else(|| ClassError::malformed(format!("opcode 0x{:02x} is missing its operand", insn.opcode())))
}

/// Slots popped and pushed by `insn`
fn stack_effect(insn: &Instruction, cp: &ConstantPool) -> ClassResult<(u16, u16)> {
    let effect = match insn.effective_opcode() {
        NOP | IINC | GOTO | GOTO_W | RET => (0, 0),
        ACONST_NULL..=0x08 => (0, 1),
        LCONST_0..=0x0a => (0, 2),
        0x0b..=0x0d => (0, 1),
        0x0e..=0x0f => (0, 2),
        BIPUSH | SIPUSH | LDC | LDC_W => (0, 1),
        LDC2_W => (0, 2),
        ILOAD | FLOAD | ALOAD => (0, 1),
        LLOAD | DLOAD => (0, 2),
        op @ ILOAD_0..=ALOAD_3 => match (op - ILOAD_0) / 4 {
            1 | 3 => (0, 2),
            _ => (0, 1),
        },
        0x2f | 0x31 => (2, 2), // laload, daload
        IALOAD..=SALOAD => (2, 1),
        ISTORE | FSTORE | ASTORE => (1, 0),
        LSTORE | DSTORE => (2, 0),
        op @ ISTORE_0..=ASTORE_3 => match (op - ISTORE_0) / 4 {
            1 | 3 => (2, 0),
            _ => (1, 0),
        },
        0x50 | 0x52 => (4, 0), // lastore, dastore
        IASTORE..=SASTORE => (3, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),
        // add, sub, mul, div, rem cycle through int, long, float, double
        op @ IADD..=0x73 => match (op - IADD) % 4 {
            1 | 3 => (4, 2),
            _ => (2, 1),
        },
        0x74 | 0x76 => (1, 1), // ineg, fneg
        0x75 | 0x77 => (2, 2), // lneg, dneg
        0x78 | 0x7a | 0x7c => (2, 1), // int shifts
        0x79 | 0x7b | 0x7d => (3, 2), // long shifts
        0x7e | 0x80 | 0x82 => (2, 1), // iand, ior, ixor
        0x7f | 0x81 | 0x83 => (4, 2), // land, lor, lxor
        I2L | 0x87 | 0x8c | 0x8d => (1, 2), // i2l, i2d, f2l, f2d
        0x86 | 0x8b | 0x91..=0x93 => (1, 1), // i2f, f2i, i2b, i2c, i2s
        0x88 | 0x89 | 0x8e | 0x90 => (2, 1), // l2i, l2f, d2i, d2f
        0x8a | 0x8f => (2, 2), // l2d, d2l
        LCMP | 0x97 | DCMPG => (4, 1),
        0x95 | 0x96 => (2, 1), // fcmpl, fcmpg
        IFEQ..=0x9e | IFNULL | IFNONNULL => (1, 0),
        0x9f..=IF_ACMPNE => (2, 0),
        JSR | JSR_W => (0, 1),
        TABLESWITCH | LOOKUPSWITCH => (1, 0),
        IRETURN | FRETURN | ARETURN => (1, 0),
        LRETURN | DRETURN => (2, 0),
        RETURN => (0, 0),
        GETSTATIC => (0, field_slots(&cp.member_ref(cp_operand(insn)?)?.2)?),
        PUTSTATIC => (field_slots(&cp.member_ref(cp_operand(insn)?)?.2)?, 0),
        GETFIELD => (1, field_slots(&cp.member_ref(cp_operand(insn)?)?.2)?),
        PUTFIELD => (1 + field_slots(&cp.member_ref(cp_operand(insn)?)?.2)?, 0),
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKEINTERFACE => {
            let (args, ret) = return_slots(&cp.member_ref(cp_operand(insn)?)?.2)?;
            (1 + args, ret)
        }
        INVOKESTATIC => return_slots(&cp.member_ref(cp_operand(insn)?)?.2)?,
        INVOKEDYNAMIC => return_slots(&cp.dynamic_descriptor(cp_operand(insn)?)?)?,
        NEW => (0, 1),
        NEWARRAY | ANEWARRAY | ARRAYLENGTH | CHECKCAST | INSTANCEOF => (1, 1),
        ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        MULTIANEWARRAY => {
            let dimensions = match insn {
                Instruction::Plain { operands, .. } => operands.get(2).copied().unwrap_or(0),
                _ => 0,
            };
            (dimensions as u16, 1)
        }
        other => return Err(ClassError::frame(format!("no stack effect known for opcode 0x{:02x}", other))),
    };
    Ok(effect)
}

/// Maximum operand stack depth reached by `instructions`.
///
/// `handlers` are the instruction indices of exception handlers, entered
/// with the thrown exception as the only stack entry.
pub fn max_stack(instructions: &[Instruction], handlers: &[usize], cp: &ConstantPool) -> ClassResult<u16> {
    fn enter(depth_at: &mut [Option<u16>], worklist: &mut VecDeque<usize>, index: usize, depth: u16) -> ClassResult<()> {
        match depth_at.get(index).copied() {
            None => Err(ClassError::frame(format!("control flows past the end of the code to {}", index))),
            Some(Some(existing)) if existing == depth => Ok(()),
            Some(Some(existing)) => Err(ClassError::frame(format!(
                "inconsistent stack depth at instruction {}: {} vs {}",
                index, existing, depth
            ))),
            Some(None) => {
                depth_at[index] = Some(depth);
                worklist.push_back(index);
                Ok(())
            }
        }
    }

    let mut depth_at: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist = VecDeque::new();
    let mut max = 0u16;

    if instructions.is_empty() {
        return Ok(0);
    }
    enter(&mut depth_at, &mut worklist, 0, 0)?;
    for &handler in handlers {
        enter(&mut depth_at, &mut worklist, handler, 1)?;
        max = max.max(1);
    }

    while let Some(index) = worklist.pop_front() {
        let insn = &instructions[index];
        let depth = depth_at[index].unwrap_or(0);
        let (pop, push) = stack_effect(insn, cp)?;
        if pop > depth {
            return Err(ClassError::frame(format!(
                "stack underflow at instruction {}: pops {} from depth {}",
                index, pop, depth
            )));
        }
        let after = depth - pop + push;
        max = max.max(after);

        let opcode = insn.effective_opcode();
        if matches!(opcode, JSR | JSR_W) {
            // The subroutine sees the return address; the caller resumes without it.
            for target in insn.targets() {
                enter(&mut depth_at, &mut worklist, target, after)?;
            }
            enter(&mut depth_at, &mut worklist, index + 1, depth)?;
            continue;
        }
        for target in insn.targets() {
            enter(&mut depth_at, &mut worklist, target, after)?;
        }
        if insn.falls_through() {
            enter(&mut depth_at, &mut worklist, index + 1, after)?;
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(opcode: u8) -> Instruction {
        Instruction::plain(opcode, Vec::new())
    }

    #[test]
    fn entry_locals_follow_the_descriptor() {
        let d: MethodDescriptor = "(JLjava/lang/String;)V".parse().unwrap();
        let locals = entry_locals("a/B", false, false, &d);
        assert_eq!(
            locals,
            vec![
                LocalType::Value(FieldType::Object("a/B".into())),
                LocalType::Value(FieldType::Long),
                LocalType::Top,
                LocalType::Value(FieldType::string()),
            ]
        );
        let ctor = entry_locals("a/B", false, true, &d);
        assert_eq!(ctor[0], LocalType::UninitializedThis);
        assert_eq!(entry_locals("a/B", true, false, &d).len(), 3);
    }

    #[test]
    fn hook_slot_must_hold_the_hook_type() {
        let d: MethodDescriptor = "(ILjava/lang/String;J)V".parse().unwrap();
        let locals = entry_locals("a/B", true, false, &d);
        let s = FieldType::string();
        assert!(check_hook_slot(&locals, 4, 1, &s).is_ok());
        assert!(matches!(check_hook_slot(&locals, 4, 0, &s), Err(ClassError::FrameComputationFailed(_))));
        assert!(check_hook_slot(&locals, 4, 2, &FieldType::Long).is_ok());
        assert!(check_hook_slot(&locals, 4, 3, &FieldType::Long).is_err());
        assert!(check_hook_slot(&locals, 6, 4, &s).is_err());
        // max_locals too small for the value
        assert!(check_hook_slot(&locals, 1, 1, &s).is_err());
    }

    #[test]
    fn constructor_receiver_cannot_be_hooked() {
        let d: MethodDescriptor = "()V".parse().unwrap();
        let locals = entry_locals("a/B", false, true, &d);
        let this_type = FieldType::Object("a/B".into());
        assert!(check_hook_slot(&locals, 1, 0, &this_type).is_err());
        let locals = entry_locals("a/B", false, false, &d);
        assert!(check_hook_slot(&locals, 1, 0, &this_type).is_ok());
    }

    #[test]
    fn straight_line_depth() {
        let cp = ConstantPool::new();
        // lconst_0, lconst_0, ladd, pop2, return
        let code = vec![plain(LCONST_0), plain(LCONST_0), plain(0x61), plain(POP2), plain(RETURN)];
        assert_eq!(max_stack(&code, &[], &cp).unwrap(), 4);
    }

    #[test]
    fn invokes_use_the_descriptor() {
        let mut cp = ConstantPool::new();
        let m = cp.intern_method_ref("h/Hook", "f", "(Ljava/lang/String;J)D").unwrap();
        let [hi, lo] = m.to_be_bytes();
        let code = vec![
            plain(ACONST_NULL),
            plain(LCONST_0),
            Instruction::plain(INVOKESTATIC, vec![hi, lo]),
            plain(POP2),
            plain(RETURN),
        ];
        assert_eq!(max_stack(&code, &[], &cp).unwrap(), 3);
    }

    #[test]
    fn branches_and_handlers_are_followed() {
        let cp = ConstantPool::new();
        // 0 iconst_0, 1 ifeq -> 4, 2 iconst_1, 3 ireturn, 4 iconst_0, 5 ireturn, 6 athrow (handler)
        let code = vec![
            plain(ICONST_0),
            Instruction::Jump { opcode: IFEQ, target: 4 },
            plain(0x04),
            plain(IRETURN),
            plain(ICONST_0),
            plain(IRETURN),
            plain(ATHROW),
        ];
        assert_eq!(max_stack(&code, &[6], &cp).unwrap(), 1);
    }

    #[test]
    fn underflow_and_falling_off_the_end_fail() {
        let cp = ConstantPool::new();
        assert!(matches!(
            max_stack(&[plain(POP), plain(RETURN)], &[], &cp),
            Err(ClassError::FrameComputationFailed(_))
        ));
        assert!(max_stack(&[plain(NOP)], &[], &cp).is_err());
    }

    #[test]
    fn inconsistent_join_fails() {
        let cp = ConstantPool::new();
        // 0 iconst_0, 1 ifeq -> 3, 2 iconst_0, 3 return
        let code = vec![
            plain(ICONST_0),
            Instruction::Jump { opcode: IFEQ, target: 3 },
            plain(ICONST_0),
            plain(RETURN),
        ];
        assert!(max_stack(&code, &[], &cp).is_err());
    }
}
