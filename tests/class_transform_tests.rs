mod common;

use common::*;
use jarhook::classfile::attribute::{AttributeInfo, CodeAttribute, ExceptionTableEntry};
use jarhook::classfile::class::ClassFile;
use jarhook::classfile::constpool::Constant;
use jarhook::classfile::defs::attribute_names;
use jarhook::classfile::frame::{StackMapFrame, StackMapTable, VerificationType};
use jarhook::classfile::instruction::Instruction;
use jarhook::classfile::opcodes::*;
use jarhook::classfile::{class_file_to_bytes, ClassError};
use jarhook::patch::{transform_class, PatchOutcome, PatchSpec};

fn stack_map(class: &ClassFile, code: &CodeAttribute) -> StackMapTable {
    let attribute = code
        .attributes
        .iter()
        .find(|a| a.is_named(&class.constant_pool, attribute_names::STACK_MAP_TABLE))
        .expect("StackMapTable present");
    StackMapTable::parse(&attribute.info).expect("parse StackMapTable")
}

#[test]
fn default_spec_patches_the_chat_formatter() {
    init_logger();
    let spec = PatchSpec::default();
    let descriptor = "(Ljava/lang/String;Ljava/lang/String;)Lcom/corrodinggames/rts/gameFramework/f/n;";
    // aconst_null, areturn
    let class_bytes = class_with_method(52, &spec.target_class_name, ACC_PUBLIC, "a", descriptor, |_| {
        CodeAttribute::new(1, 3, vec![ACONST_NULL, ARETURN])
    });

    let result = transform_class(&class_bytes, &spec).expect("transform");
    assert!(matches!(result.outcome, PatchOutcome::Patched { max_stack: 1, .. }));

    let (class, _, instructions) = method_instructions(&result.bytes, "a");
    assert_eq!(instructions[0], Instruction::plain(ALOAD_0 + 2, Vec::new()));
    assert_eq!(
        class.constant_pool.member_ref(instructions[1].cp_index().unwrap()).unwrap(),
        (
            "org/example/GoogleTranslateHelper".to_string(),
            "processMessage".to_string(),
            "(Ljava/lang/String;)Ljava/lang/String;".to_string()
        )
    );
    assert_eq!(instructions[2], Instruction::plain(ASTORE_0 + 2, Vec::new()));
}

#[test]
fn tableswitch_padding_and_frames_follow_the_shift() {
    let descriptor = "(Ljava/lang/String;I)I";
    let class_bytes = class_with_method(52, "a/S", ACC_STATIC, "pick", descriptor, |cf| {
        let smt = cf.constant_pool.intern_utf8(attribute_names::STACK_MAP_TABLE).unwrap();
        // 0 iload_1, 1 tableswitch (pad 2) default 24, 0 -> 26, 1 -> 28
        let mut code = vec![ILOAD_0 + 1, TABLESWITCH, 0, 0];
        for v in [23i32, 0, 1, 25, 27] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.extend_from_slice(&[ICONST_0, IRETURN, ICONST_0 + 1, IRETURN, ICONST_0 + 2, IRETURN]);
        let mut attr = CodeAttribute::new(1, 2, code);
        let frames = StackMapTable {
            frames: vec![
                StackMapFrame::Same { offset_delta: 24 },
                StackMapFrame::Same { offset_delta: 1 },
                StackMapFrame::Same { offset_delta: 1 },
            ],
        };
        attr.attributes.push(AttributeInfo::new(smt, frames.to_bytes()));
        attr
    });
    let spec = string_hook_spec("a/S", "pick", descriptor, 0);

    let result = transform_class(&class_bytes, &spec).unwrap();
    // The hook adds 5 bytes; the switch loses one byte of padding.
    assert!(matches!(result.outcome, PatchOutcome::Patched { inserted_bytes: 4, max_stack: 1, .. }));

    let (class, code, instructions) = method_instructions(&result.bytes, "pick");
    assert_eq!(code.code.len(), 34);
    assert_eq!(
        instructions[4],
        Instruction::TableSwitch { default: 5, low: 0, high: 1, targets: vec![7, 9] }
    );
    assert_eq!(stack_map(&class, &code).absolute_offsets(), vec![28, 30, 32]);
}

#[test]
fn uninitialized_frames_and_handlers_are_relocated() {
    let descriptor = "(Ljava/lang/String;)Ljava/lang/Object;";
    let class_bytes = class_with_method(52, "a/U", ACC_PUBLIC, "build", descriptor, |cf| {
        let cp = &mut cf.constant_pool;
        let smt = cp.intern_utf8(attribute_names::STACK_MAP_TABLE).unwrap();
        let sb = cp.intern_class("java/lang/StringBuilder").unwrap();
        let init = cp.intern_method_ref("java/lang/StringBuilder", "<init>", "()V").unwrap();
        let this = cp.intern_class("a/U").unwrap();
        let string = cp.intern_class("java/lang/String").unwrap();
        let throwable = cp.intern_class("java/lang/Throwable").unwrap();
        let [sb_hi, sb_lo] = sb.to_be_bytes();
        let [init_hi, init_lo] = init.to_be_bytes();
        // 0 new, 3 dup, 4 aload_1, 5 ifnonnull -> 11, 8 aconst_null, 9 astore_1, 10 nop,
        // 11 invokespecial <init>, 14 areturn, 15 athrow
        let mut attr = CodeAttribute::new(
            3,
            2,
            vec![
                NEW, sb_hi, sb_lo, DUP, ALOAD_0 + 1, IFNONNULL, 0, 6, ACONST_NULL, ASTORE_0 + 1, NOP,
                INVOKESPECIAL, init_hi, init_lo, ARETURN, ATHROW,
            ],
        );
        attr.exception_table.push(ExceptionTableEntry::new(0, 14, 15, 0));
        let locals = vec![VerificationType::Object(this), VerificationType::Object(string)];
        let frames = StackMapTable {
            frames: vec![
                StackMapFrame::Full {
                    offset_delta: 11,
                    locals,
                    stack: vec![VerificationType::Uninitialized(0), VerificationType::Uninitialized(0)],
                },
                StackMapFrame::SameLocals1StackItem {
                    offset_delta: 3,
                    stack: VerificationType::Object(throwable),
                },
            ],
        };
        attr.attributes.push(AttributeInfo::new(smt, frames.to_bytes()));
        attr
    });
    let spec = string_hook_spec("a/U", "build", descriptor, 1);

    let result = transform_class(&class_bytes, &spec).unwrap();
    assert!(matches!(result.outcome, PatchOutcome::Patched { inserted_bytes: 5, max_stack: 3, .. }));

    let (class, code, instructions) = method_instructions(&result.bytes, "build");
    assert_eq!(instructions[6], Instruction::Jump { opcode: IFNONNULL, target: 10 });
    assert_eq!(code.exception_table, vec![ExceptionTableEntry::new(5, 19, 20, 0)]);
    assert_eq!(code.max_locals, 2);

    let frames = stack_map(&class, &code);
    assert_eq!(frames.absolute_offsets(), vec![16, 20]);
    match &frames.frames[0] {
        StackMapFrame::Full { stack, .. } => {
            assert_eq!(stack, &vec![VerificationType::Uninitialized(5), VerificationType::Uninitialized(5)]);
        }
        other => panic!("unexpected frame {:?}", other),
    }
}

#[test]
fn long_values_use_long_loads_and_stores() {
    let class_bytes = class_with_method(52, "a/L", ACC_STATIC, "twice", "(J)J", |_| {
        // lload_0, lload_0, ladd, lreturn
        CodeAttribute::new(4, 2, vec![LLOAD_0, LLOAD_0, 0x61, LRETURN])
    });
    let spec = hook_spec("a/L", "twice", "(J)J", 0, "(J)J");

    let result = transform_class(&class_bytes, &spec).unwrap();
    let (_, code, instructions) = method_instructions(&result.bytes, "twice");
    assert_eq!(instructions[0], Instruction::plain(LLOAD_0, Vec::new()));
    assert_eq!(instructions[2], Instruction::plain(LSTORE_0, Vec::new()));
    assert_eq!(code.max_stack, 4);
}

#[test]
fn interface_hooks_use_interface_method_refs() {
    let descriptor = "(Ljava/lang/String;)V";
    let class_bytes = class_with_method(52, "a/I", ACC_STATIC, "m", descriptor, |_| CodeAttribute::new(0, 1, vec![RETURN]));
    let mut spec = string_hook_spec("a/I", "m", descriptor, 0);
    spec.hook.is_interface = true;

    let result = transform_class(&class_bytes, &spec).unwrap();
    let (class, code, instructions) = method_instructions(&result.bytes, "m");
    let index = instructions[1].cp_index().unwrap();
    assert!(matches!(class.constant_pool.get(index), Some(Constant::InterfaceMethodRef(..))));
    assert_eq!(code.max_stack, 1);
}

#[test]
fn slot_type_mismatch_fails_frame_computation() {
    let descriptor = "(ILjava/lang/String;)V";
    let class_bytes = class_with_method(52, "a/T", ACC_PUBLIC, "m", descriptor, |_| CodeAttribute::new(0, 3, vec![RETURN]));

    for slot in [0, 1, 3] {
        let spec = string_hook_spec("a/T", "m", descriptor, slot);
        assert!(matches!(
            transform_class(&class_bytes, &spec),
            Err(ClassError::FrameComputationFailed(_))
        ), "slot {}", slot);
    }
    assert!(transform_class(&class_bytes, &string_hook_spec("a/T", "m", descriptor, 2)).is_ok());
}

#[test]
fn constructor_receiver_is_not_hookable() {
    let class_bytes = class_with_method(52, "a/C", ACC_PUBLIC, "<init>", "()V", |_| CodeAttribute::new(0, 1, vec![RETURN]));
    let spec = hook_spec("a/C", "<init>", "()V", 0, "(La/C;)La/C;");
    assert!(matches!(
        transform_class(&class_bytes, &spec),
        Err(ClassError::FrameComputationFailed(_))
    ));
}

#[test]
fn missing_method_returns_the_input_bytes() {
    let class_bytes = message_class(52, "a/B", "m");
    let spec = string_hook_spec("a/B", "m", "(Ljava/lang/String;)La/N;", 1);
    let result = transform_class(&class_bytes, &spec).unwrap();
    assert_eq!(result.outcome, PatchOutcome::MethodNotFound);
    assert_eq!(result.bytes, class_bytes);
}

#[test]
fn already_patched_class_is_returned_unchanged() {
    let class_bytes = message_class(52, "a/B", "m");
    let spec = string_hook_spec("a/B", "m", "(Ljava/lang/String;Ljava/lang/String;)La/N;", 2);
    let once = transform_class(&class_bytes, &spec).unwrap();
    let twice = transform_class(&once.bytes, &spec).unwrap();
    assert_eq!(twice.outcome, PatchOutcome::AlreadyPatched);
    assert_eq!(twice.bytes, once.bytes);
}

#[test]
fn class_name_must_match_the_spec() {
    let class_bytes = message_class(52, "a/B", "m");
    let spec = string_hook_spec("a/Other", "m", "(Ljava/lang/String;Ljava/lang/String;)La/N;", 2);
    assert!(matches!(transform_class(&class_bytes, &spec), Err(ClassError::MalformedClass(_))));
}

#[test]
fn supported_versions_span_java_1_1_to_25() {
    let spec = string_hook_spec("a/B", "m", "(Ljava/lang/String;Ljava/lang/String;)La/N;", 2);
    for major in [45, 50, 69] {
        let result = transform_class(&message_class(major, "a/B", "m"), &spec);
        assert!(matches!(result, Ok(ref r) if matches!(r.outcome, PatchOutcome::Patched { .. })), "major {}", major);
    }
    assert!(matches!(
        transform_class(&message_class(70, "a/B", "m"), &spec),
        Err(ClassError::MalformedClass(_))
    ));
}

#[test]
fn dangling_constant_references_are_malformed() {
    let mut class = ClassFile::new(52, "a/B", Some("java/lang/Object")).unwrap();
    class.add_method(ACC_STATIC, "m", "(Ljava/lang/String;)V", Some(&CodeAttribute::new(0, 1, vec![RETURN]))).unwrap();
    class.super_class = 999;
    let spec = string_hook_spec("a/B", "m", "(Ljava/lang/String;)V", 0);
    assert!(matches!(
        transform_class(&class_file_to_bytes(&class), &spec),
        Err(ClassError::MalformedClass(_))
    ));
}
