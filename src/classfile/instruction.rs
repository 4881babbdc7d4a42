//! Instruction stream codec
//!
//! [`decode`] turns a method's code array into a list of [`Instruction`]s in
//! which every branch operand is an instruction *index* rather than a byte
//! offset. Instructions can then be inserted freely and [`encode`] lays the
//! list out again, recomputing switch padding and relative branch offsets.

use super::defs::MAX_CODE_LENGTH;
use super::error::{ClassError, ClassResult};
use super::opcodes::*;
use super::reader::ByteReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Any instruction without a branch operand. Operand bytes are kept
    /// verbatim; for `wide` they start with the modified opcode.
    Plain { opcode: u8, operands: Vec<u8> },
    /// Conditional or unconditional jump; `goto_w`/`jsr_w` keep 32-bit offsets
    Jump { opcode: u8, target: usize },
    TableSwitch { default: usize, low: i32, high: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

/// A decoded method body together with the byte offset of every instruction.
/// `offsets` has one extra trailing element holding the code length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCode {
    pub instructions: Vec<Instruction>,
    pub offsets: Vec<usize>,
}

/// Result of laying out an instruction list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    pub code: Vec<u8>,
    pub offsets: Vec<usize>,
}

fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Operand byte count of an instruction without branch operands
fn plain_operand_len(opcode: u8) -> Option<usize> {
    let len = match opcode {
        0x00..=0x0f => 0,
        BIPUSH | LDC => 1,
        SIPUSH | LDC_W | LDC2_W => 2,
        ILOAD..=ALOAD => 1,
        ILOAD_0..=SALOAD => 0,
        ISTORE..=ASTORE => 1,
        ISTORE_0..=0x83 => 0,
        IINC => 2,
        I2L..=DCMPG => 0,
        RET => 1,
        IRETURN..=RETURN => 0,
        GETSTATIC..=INVOKESTATIC => 2,
        INVOKEINTERFACE | INVOKEDYNAMIC => 4,
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => 2,
        NEWARRAY => 1,
        ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => 0,
        MULTIANEWARRAY => 3,
        _ => return None,
    };
    Some(len)
}

fn is_jump(opcode: u8) -> bool {
    matches!(opcode, IFEQ..=JSR | IFNULL | IFNONNULL | GOTO_W | JSR_W)
}

impl Instruction {
    pub fn plain(opcode: u8, operands: Vec<u8>) -> Self {
        Instruction::Plain { opcode, operands }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Plain { opcode, .. } | Instruction::Jump { opcode, .. } => *opcode,
            Instruction::TableSwitch { .. } => TABLESWITCH,
            Instruction::LookupSwitch { .. } => LOOKUPSWITCH,
        }
    }

    /// Build a load or store of `slot`. `short_base` is the `_0` form
    /// (e.g. `ALOAD_0`), `long_form` the indexed form (e.g. `ALOAD`).
    pub fn local(long_form: u8, short_base: u8, slot: u16) -> Self {
        match slot {
            0..=3 => Instruction::plain(short_base + slot as u8, Vec::new()),
            4..=255 => Instruction::plain(long_form, vec![slot as u8]),
            _ => {
                let [hi, lo] = slot.to_be_bytes();
                Instruction::plain(WIDE, vec![long_form, hi, lo])
            }
        }
    }

    /// The opcode that actually executes, looking through `wide`
    pub fn effective_opcode(&self) -> u8 {
        match self {
            Instruction::Plain { opcode: WIDE, operands } => operands.first().copied().unwrap_or(WIDE),
            other => other.opcode(),
        }
    }

    /// Constant pool index operand, if the instruction has one
    pub fn cp_index(&self) -> Option<u16> {
        let Instruction::Plain { opcode, operands } = self else {
            return None;
        };
        match *opcode {
            LDC => operands.first().map(|&b| b as u16),
            LDC_W | LDC2_W | GETSTATIC..=INVOKEDYNAMIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF
            | MULTIANEWARRAY => Some(u16::from_be_bytes([operands[0], operands[1]])),
            _ => None,
        }
    }

    /// Instruction indices this instruction may branch to
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Instruction::Plain { .. } => Vec::new(),
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::TableSwitch { default, targets, .. } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            Instruction::LookupSwitch { default, pairs } => {
                std::iter::once(*default).chain(pairs.iter().map(|(_, t)| *t)).collect()
            }
        }
    }

    /// Rewrite every branch target through `f`
    pub fn map_targets(&mut self, f: impl Fn(usize) -> usize) {
        match self {
            Instruction::Plain { .. } => {}
            Instruction::Jump { target, .. } => *target = f(*target),
            Instruction::TableSwitch { default, targets, .. } => {
                *default = f(*default);
                for t in targets.iter_mut() {
                    *t = f(*t);
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                *default = f(*default);
                for (_, t) in pairs.iter_mut() {
                    *t = f(*t);
                }
            }
        }
    }

    /// Encoded size when placed at byte `offset`
    pub fn size_at(&self, offset: usize) -> usize {
        match self {
            Instruction::Plain { operands, .. } => 1 + operands.len(),
            Instruction::Jump { opcode, .. } => {
                if matches!(*opcode, GOTO_W | JSR_W) { 5 } else { 3 }
            }
            Instruction::TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len(),
            Instruction::LookupSwitch { pairs, .. } => 1 + switch_padding(offset) + 8 + 8 * pairs.len(),
        }
    }

    /// Whether control can continue to the next instruction
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.effective_opcode(),
            GOTO | GOTO_W | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW | RET
        )
    }
}

/// Branch operand as read from the code array: absolute byte offsets
enum RawBranch {
    None,
    Jump(usize),
    Table { default: usize, low: i32, high: i32, targets: Vec<usize> },
    Lookup { default: usize, pairs: Vec<(i32, usize)> },
}

fn branch_target(at: usize, relative: i64, code_len: usize) -> ClassResult<usize> {
    let target = at as i64 + relative;
    if target < 0 || target as usize >= code_len {
        return Err(ClassError::malformed(format!(
            "branch at offset {} targets {} outside the code array",
            at, target
        )));
    }
    Ok(target as usize)
}

/// Decode a code array into instructions with index-based branch targets
pub fn decode(code: &[u8]) -> ClassResult<DecodedCode> {
    let mut r = ByteReader::new(code);
    let mut raw: Vec<(u8, Vec<u8>, RawBranch)> = Vec::new();
    let mut offsets = Vec::new();

    while !r.is_empty() {
        let at = r.position();
        offsets.push(at);
        let opcode = r.read_u8()?;
        let entry = match opcode {
            WIDE => {
                let modified = r.read_u8()?;
                let len = match modified {
                    IINC => 4,
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => 2,
                    other => {
                        return Err(ClassError::malformed(format!(
                            "wide applied to opcode 0x{:02x} at offset {}",
                            other, at
                        )))
                    }
                };
                let mut operands = vec![modified];
                operands.extend_from_slice(r.read_bytes(len)?);
                (opcode, operands, RawBranch::None)
            }
            TABLESWITCH | LOOKUPSWITCH => {
                r.read_bytes(switch_padding(at))?;
                let default = branch_target(at, r.read_i32()? as i64, code.len())?;
                let branch = if opcode == TABLESWITCH {
                    let low = r.read_i32()?;
                    let high = r.read_i32()?;
                    if high < low {
                        return Err(ClassError::malformed(format!(
                            "tableswitch at offset {} has low {} > high {}",
                            at, low, high
                        )));
                    }
                    let count = (high as i64 - low as i64 + 1) as usize;
                    if count > r.remaining() / 4 {
                        return Err(ClassError::malformed(format!("tableswitch at offset {} is truncated", at)));
                    }
                    let mut targets = Vec::with_capacity(count);
                    for _ in 0..count {
                        targets.push(branch_target(at, r.read_i32()? as i64, code.len())?);
                    }
                    RawBranch::Table { default, low, high, targets }
                } else {
                    let npairs = r.read_i32()?;
                    if npairs < 0 || npairs as usize > r.remaining() / 8 {
                        return Err(ClassError::malformed(format!(
                            "lookupswitch at offset {} has invalid pair count {}",
                            at, npairs
                        )));
                    }
                    let mut pairs = Vec::with_capacity(npairs as usize);
                    for _ in 0..npairs {
                        let key = r.read_i32()?;
                        pairs.push((key, branch_target(at, r.read_i32()? as i64, code.len())?));
                    }
                    RawBranch::Lookup { default, pairs }
                };
                (opcode, Vec::new(), branch)
            }
            GOTO_W | JSR_W => {
                let target = branch_target(at, r.read_i32()? as i64, code.len())?;
                (opcode, Vec::new(), RawBranch::Jump(target))
            }
            op if is_jump(op) => {
                let target = branch_target(at, r.read_i16()? as i64, code.len())?;
                (opcode, Vec::new(), RawBranch::Jump(target))
            }
            op => {
                let len = plain_operand_len(op).ok_or_else(|| {
                    ClassError::malformed(format!("invalid opcode 0x{:02x} at offset {}", op, at))
                })?;
                (opcode, r.read_bytes(len)?.to_vec(), RawBranch::None)
            }
        };
        raw.push(entry);
    }
    offsets.push(code.len());

    let index_of = |offset: usize| -> ClassResult<usize> {
        offsets[..offsets.len() - 1].binary_search(&offset).map_err(|_| {
            ClassError::malformed(format!("branch target {} is not an instruction boundary", offset))
        })
    };

    let mut instructions = Vec::with_capacity(raw.len());
    for (opcode, operands, branch) in raw {
        let insn = match branch {
            RawBranch::None => Instruction::Plain { opcode, operands },
            RawBranch::Jump(target) => Instruction::Jump { opcode, target: index_of(target)? },
            RawBranch::Table { default, low, high, targets } => Instruction::TableSwitch {
                default: index_of(default)?,
                low,
                high,
                targets: targets.into_iter().map(index_of).collect::<ClassResult<_>>()?,
            },
            RawBranch::Lookup { default, pairs } => Instruction::LookupSwitch {
                default: index_of(default)?,
                pairs: pairs
                    .into_iter()
                    .map(|(key, t)| index_of(t).map(|i| (key, i)))
                    .collect::<ClassResult<_>>()?,
            },
        };
        instructions.push(insn);
    }

    Ok(DecodedCode { instructions, offsets })
}

/// Lay out an instruction list into a code array
pub fn encode(instructions: &[Instruction]) -> ClassResult<EncodedCode> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut at = 0usize;
    for insn in instructions {
        offsets.push(at);
        at += insn.size_at(at);
    }
    offsets.push(at);
    if at > MAX_CODE_LENGTH {
        return Err(ClassError::CodeTooLarge(format!("code length {} exceeds {}", at, MAX_CODE_LENGTH)));
    }

    let target_offset = |target: usize| -> ClassResult<usize> {
        if target >= instructions.len() {
            return Err(ClassError::malformed(format!("branch to missing instruction {}", target)));
        }
        Ok(offsets[target])
    };

    let mut code = Vec::with_capacity(at);
    for (i, insn) in instructions.iter().enumerate() {
        let here = offsets[i];
        match insn {
            Instruction::Plain { opcode, operands } => {
                code.push(*opcode);
                code.extend_from_slice(operands);
            }
            Instruction::Jump { opcode, target } => {
                let delta = target_offset(*target)? as i64 - here as i64;
                code.push(*opcode);
                if matches!(*opcode, GOTO_W | JSR_W) {
                    code.extend_from_slice(&(delta as i32).to_be_bytes());
                } else {
                    let delta = i16::try_from(delta).map_err(|_| {
                        ClassError::CodeTooLarge(format!("branch at offset {} needs offset {}", here, delta))
                    })?;
                    code.extend_from_slice(&delta.to_be_bytes());
                }
            }
            Instruction::TableSwitch { default, low, high, targets } => {
                code.push(TABLESWITCH);
                code.extend(std::iter::repeat(0u8).take(switch_padding(here)));
                code.extend_from_slice(&((target_offset(*default)? as i64 - here as i64) as i32).to_be_bytes());
                code.extend_from_slice(&low.to_be_bytes());
                code.extend_from_slice(&high.to_be_bytes());
                for t in targets {
                    code.extend_from_slice(&((target_offset(*t)? as i64 - here as i64) as i32).to_be_bytes());
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                code.push(LOOKUPSWITCH);
                code.extend(std::iter::repeat(0u8).take(switch_padding(here)));
                code.extend_from_slice(&((target_offset(*default)? as i64 - here as i64) as i32).to_be_bytes());
                code.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, t) in pairs {
                    code.extend_from_slice(&key.to_be_bytes());
                    code.extend_from_slice(&((target_offset(*t)? as i64 - here as i64) as i32).to_be_bytes());
                }
            }
        }
    }
    debug_assert_eq!(code.len(), at);

    Ok(EncodedCode { code, offsets })
}
