//! StackMapTable frames (JVMS 4.7.4)
//!
//! Frames are parsed into their compact variants and written back in the
//! same variant, so relocating a table only touches offsets.

use super::error::{ClassError, ClassResult};
use super::reader::ByteReader;

/// VerificationTypeInfo as defined in JVMS 4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),        // cpool index to CONSTANT_Class
    Uninitialized(u16), // offset of the `new` instruction
}

impl VerificationType {
    fn parse(r: &mut ByteReader<'_>) -> ClassResult<Self> {
        let tag = r.read_u8()?;
        let ty = match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(r.read_u16()?),
            8 => VerificationType::Uninitialized(r.read_u16()?),
            other => return Err(ClassError::malformed(format!("invalid verification type tag {}", other))),
        };
        Ok(ty)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            VerificationType::Top => bytes.push(0),
            VerificationType::Integer => bytes.push(1),
            VerificationType::Float => bytes.push(2),
            VerificationType::Double => bytes.push(3),
            VerificationType::Long => bytes.push(4),
            VerificationType::Null => bytes.push(5),
            VerificationType::UninitializedThis => bytes.push(6),
            VerificationType::Object(cp_index) => {
                bytes.push(7);
                bytes.extend_from_slice(&cp_index.to_be_bytes());
            }
            VerificationType::Uninitialized(offset) => {
                bytes.push(8);
                bytes.extend_from_slice(&offset.to_be_bytes());
            }
        }
        bytes
    }
}

/// StackMapFrame variants as defined in JVMS 4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationType },
    Chop { k: u8, offset_delta: u16 },          // k in {1,2,3}
    SameExtended { offset_delta: u16 },
    Append { k: u8, offset_delta: u16, locals: Vec<VerificationType> }, // k in {1,2,3}
    Full { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

impl StackMapFrame {
    fn parse(r: &mut ByteReader<'_>) -> ClassResult<Self> {
        let frame_type = r.read_u8()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: (frame_type - 64) as u16,
                stack: VerificationType::parse(r)?,
            },
            247 => StackMapFrame::SameLocals1StackItemExtended {
                offset_delta: r.read_u16()?,
                stack: VerificationType::parse(r)?,
            },
            248..=250 => StackMapFrame::Chop { k: 251 - frame_type, offset_delta: r.read_u16()? },
            251 => StackMapFrame::SameExtended { offset_delta: r.read_u16()? },
            252..=254 => {
                let k = frame_type - 251;
                let offset_delta = r.read_u16()?;
                let locals = (0..k).map(|_| VerificationType::parse(r)).collect::<ClassResult<_>>()?;
                StackMapFrame::Append { k, offset_delta, locals }
            }
            255 => {
                let offset_delta = r.read_u16()?;
                let nlocals = r.read_u16()?;
                let locals = (0..nlocals).map(|_| VerificationType::parse(r)).collect::<ClassResult<_>>()?;
                let nstack = r.read_u16()?;
                let stack = (0..nstack).map(|_| VerificationType::parse(r)).collect::<ClassResult<_>>()?;
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            reserved => {
                return Err(ClassError::malformed(format!("reserved stack map frame type {}", reserved)))
            }
        };
        Ok(frame)
    }

    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    fn set_offset_delta(&mut self, delta: u16) {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = delta,
        }
    }

    fn verification_types_mut(&mut self) -> Vec<&mut VerificationType> {
        match self {
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => locals.iter_mut().chain(stack.iter_mut()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            StackMapFrame::Same { offset_delta } => {
                if *offset_delta <= 63 {
                    bytes.push(*offset_delta as u8);
                } else {
                    bytes.push(251); // same_frame_extended
                    bytes.extend_from_slice(&offset_delta.to_be_bytes());
                }
            }
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                if *offset_delta <= 63 {
                    bytes.push(64 + *offset_delta as u8);
                } else {
                    bytes.push(247); // same_locals_1_stack_item_frame_extended
                    bytes.extend_from_slice(&offset_delta.to_be_bytes());
                }
                bytes.extend_from_slice(&stack.to_bytes());
            }
            StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
                bytes.push(247);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                bytes.extend_from_slice(&stack.to_bytes());
            }
            StackMapFrame::Chop { k, offset_delta } => {
                bytes.push(251 - *k);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
            }
            StackMapFrame::SameExtended { offset_delta } => {
                bytes.push(251);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
            }
            StackMapFrame::Append { k, offset_delta, locals } => {
                bytes.push(251 + *k);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                for l in locals {
                    bytes.extend_from_slice(&l.to_bytes());
                }
            }
            StackMapFrame::Full { offset_delta, locals, stack } => {
                bytes.push(255);
                bytes.extend_from_slice(&offset_delta.to_be_bytes());
                bytes.extend_from_slice(&(locals.len() as u16).to_be_bytes());
                for l in locals {
                    bytes.extend_from_slice(&l.to_bytes());
                }
                bytes.extend_from_slice(&(stack.len() as u16).to_be_bytes());
                for s in stack {
                    bytes.extend_from_slice(&s.to_bytes());
                }
            }
        }
        bytes
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StackMapTable {
    pub frames: Vec<StackMapFrame>,
}

impl StackMapTable {
    pub fn new() -> Self { Self { frames: Vec::new() } }

    pub fn parse(info: &[u8]) -> ClassResult<Self> {
        let mut r = ByteReader::new(info);
        let count = r.read_u16()?;
        let frames = (0..count).map(|_| StackMapFrame::parse(&mut r)).collect::<ClassResult<_>>()?;
        r.expect_end("StackMapTable")?;
        Ok(Self { frames })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.frames.len() as u16).to_be_bytes());
        for f in &self.frames {
            bytes.extend_from_slice(&f.to_bytes());
        }
        bytes
    }

    /// Absolute bytecode offset of every frame. The first frame sits at
    /// `offset_delta`, each later one at `previous + offset_delta + 1`.
    pub fn absolute_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.frames.len());
        let mut previous: Option<usize> = None;
        for frame in &self.frames {
            let delta = frame.offset_delta() as usize;
            let at = match previous {
                None => delta,
                Some(p) => p + delta + 1,
            };
            offsets.push(at);
            previous = Some(at);
        }
        offsets
    }

    /// Move every frame (and every `Uninitialized` operand) to the offset
    /// `relocate` maps it to, re-deriving the deltas.
    pub fn relocate(&mut self, relocate: impl Fn(usize) -> ClassResult<usize>) -> ClassResult<()> {
        let old_offsets = self.absolute_offsets();
        let mut previous: Option<usize> = None;
        for (frame, old) in self.frames.iter_mut().zip(old_offsets) {
            let new = relocate(old)?;
            let delta = match previous {
                None => new,
                Some(p) if new > p => new - p - 1,
                Some(p) => {
                    return Err(ClassError::frame(format!(
                        "stack map frames out of order after relocation ({} after {})",
                        new, p
                    )))
                }
            };
            let delta = u16::try_from(delta)
                .map_err(|_| ClassError::CodeTooLarge(format!("frame offset delta {} overflows", delta)))?;
            frame.set_offset_delta(delta);
            for ty in frame.verification_types_mut() {
                if let VerificationType::Uninitialized(offset) = ty {
                    let moved = relocate(*offset as usize)?;
                    *offset = u16::try_from(moved)
                        .map_err(|_| ClassError::CodeTooLarge(format!("new instruction at {} overflows", moved)))?;
                }
            }
            previous = Some(new);
        }
        Ok(())
    }
}
