// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Instruction decoding (C5 "Instructions"): dispatches through
//! [`OPCODE_TO_OPERAND_TYPE`] to decode each opcode's immediate, and decodes
//! the restricted constant-expression opcode subset used by global
//! initializers and segment offsets.

use crate::binary::decode::Decoder;
use crate::error::{Error, ErrorSink};
use crate::features::Features;
use crate::types::instr::{
    BulkOpcode, OperandType, Opcode, BULK_OPCODE_TO_OPERAND_TYPE, OPCODE_TO_OPERAND_TYPE,
};
use crate::types::{BlockType, ConstExpr, GlobalIdx, HeapType, Local, TypeIdx, ValType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeKind {
    Plain(Opcode),
    Bulk(BulkOpcode),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Immediate {
    None,
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128([u8; 16]),
    /// A single numeric index, e.g. `local.get`, `call`, `ref.func`. The
    /// index space it belongs to is implied by the opcode.
    Index(u32),
    Block(BlockType),
    BrTable { labels: Vec<u32>, default: u32 },
    BrOnExn { label: u32, event: u32 },
    CallIndirect { type_index: u32, table_index: u32 },
    MemArg { align_log2: u32, offset: u32 },
    RefType(HeapType),
    SelectT(Vec<ValType>),
    BulkCopy { dst: u32, src: u32 },
    BulkInit { segment: u32, dst: u32 },
    Let { block_type: BlockType, locals: Vec<Local> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: OpcodeKind,
    pub immediate: Immediate,
}

fn decode_block_type(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<BlockType> {
    let offset = dec.offset();
    let raw = dec.read_i32(sink)?;
    if raw >= 0 {
        return Some(BlockType::TypeIndex(TypeIdx::new(raw as u32)));
    }
    if raw == -0x40 {
        return Some(BlockType::Empty);
    }
    // Negative values besides -0x40 encode an inline value type: the low 7
    // bits of the negated value are the value-type byte.
    let byte = (0x80 + raw) as u8;
    match byte {
        0x7f => Some(BlockType::Result(ValType::I32)),
        0x7e => Some(BlockType::Result(ValType::I64)),
        0x7d => Some(BlockType::Result(ValType::F32)),
        0x7c => Some(BlockType::Result(ValType::F64)),
        0x7b => Some(BlockType::Result(ValType::V128)),
        0x70 => Some(BlockType::Result(ValType::funcref())),
        0x6f => Some(BlockType::Result(ValType::externref())),
        _ => {
            sink.report(offset, Error::BadValueType { byte });
            None
        }
    }
}

fn decode_ref_type_byte(byte: u8, offset: usize, sink: &mut ErrorSink) -> Option<HeapType> {
    match byte {
        0x70 => Some(HeapType::Func),
        0x6f => Some(HeapType::Extern),
        0x68 => Some(HeapType::Exn),
        _ => {
            sink.report(offset, Error::BadValueType { byte });
            None
        }
    }
}

fn decode_value_type(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<ValType> {
    let offset = dec.offset();
    let byte = dec.read_byte(sink)?;
    match byte {
        0x7f => Some(ValType::I32),
        0x7e => Some(ValType::I64),
        0x7d => Some(ValType::F32),
        0x7c => Some(ValType::F64),
        0x7b => Some(ValType::V128),
        0x70 => Some(ValType::funcref()),
        0x6f => Some(ValType::externref()),
        _ => {
            sink.report(offset, Error::BadValueType { byte });
            None
        }
    }
}

fn decode_mem_arg(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<Immediate> {
    let offset = dec.offset();
    let align_log2 = dec.read_u32(sink)?;
    if align_log2 >= 32 {
        sink.report(offset, Error::AlignOutOfRange { log2: align_log2 });
        return None;
    }
    let mem_offset = dec.read_u32(sink)?;
    Some(Immediate::MemArg {
        align_log2,
        offset: mem_offset,
    })
}

fn decode_immediate(
    operand_type: OperandType,
    dec: &mut Decoder<'_>,
    features: Features,
    sink: &mut ErrorSink,
) -> Option<Immediate> {
    match operand_type {
        OperandType::None => Some(Immediate::None),
        OperandType::U32 => Some(Immediate::Index(dec.read_u32(sink)?)),
        OperandType::I32 => Some(Immediate::I32(dec.read_i32(sink)?)),
        OperandType::I64 => Some(Immediate::I64(dec.read_i64(sink)?)),
        OperandType::F32 => Some(Immediate::F32(dec.read_f32(sink)?.to_bits())),
        OperandType::F64 => Some(Immediate::F64(dec.read_f64(sink)?.to_bits())),
        OperandType::V128 => Some(Immediate::V128(dec.read_v128(sink)?)),
        OperandType::Block => Some(Immediate::Block(decode_block_type(dec, sink)?)),
        OperandType::MemArg => decode_mem_arg(dec, sink),
        OperandType::BrTable => {
            let count = dec.read_u32(sink)? as usize;
            let mut labels = Vec::with_capacity(count);
            for _ in 0..count {
                labels.push(dec.read_u32(sink)?);
            }
            let default = dec.read_u32(sink)?;
            Some(Immediate::BrTable { labels, default })
        }
        OperandType::BrOnExn => {
            let label = dec.read_u32(sink)?;
            let event = dec.read_u32(sink)?;
            Some(Immediate::BrOnExn { label, event })
        }
        OperandType::CallIndirect => {
            let type_index = dec.read_u32(sink)?;
            // The legacy encoding's "reserved" field: a single fixed byte,
            // not a LEB128 varint (§4.5, `original_source/reader-inl.h`).
            let table_index = u32::from(dec.read_byte(sink)?);
            Some(Immediate::CallIndirect {
                type_index,
                table_index,
            })
        }
        OperandType::ReservedByte => {
            dec.read_byte(sink)?;
            Some(Immediate::None)
        }
        OperandType::Let => {
            let block_type = decode_block_type(dec, sink)?;
            let locals = super::decode_local_packs(dec, sink)?;
            Some(Immediate::Let { block_type, locals })
        }
        OperandType::RefType => {
            let offset = dec.offset();
            let byte = dec.read_byte(sink)?;
            Some(Immediate::RefType(decode_ref_type_byte(
                byte, offset, sink,
            )?))
        }
        OperandType::SelectT => {
            if !features.contains(Features::REFERENCE_TYPES) {
                sink.report(
                    dec.offset(),
                    Error::FeatureDisabled {
                        feature: "reference-types",
                    },
                );
                return None;
            }
            let count = dec.read_u32(sink)? as usize;
            let mut types = Vec::with_capacity(count);
            for _ in 0..count {
                types.push(decode_value_type(dec, sink)?);
            }
            Some(Immediate::SelectT(types))
        }
        OperandType::BulkOp => unreachable!("bulk opcodes are dispatched in decode_instruction"),
        OperandType::VectorOp => {
            unreachable!("vector opcodes are dispatched in decode_instruction")
        }
    }
}

fn decode_bulk_immediate(
    opcode: BulkOpcode,
    dec: &mut Decoder<'_>,
    sink: &mut ErrorSink,
) -> Option<Immediate> {
    use BulkOpcode::*;
    match opcode {
        MemoryCopy => {
            let dst = dec.read_byte(sink)?;
            let src = dec.read_byte(sink)?;
            Some(Immediate::BulkCopy {
                dst: u32::from(dst),
                src: u32::from(src),
            })
        }
        TableCopy => {
            let dst = dec.read_u32(sink)?;
            let src = dec.read_u32(sink)?;
            Some(Immediate::BulkCopy { dst, src })
        }
        MemoryFill => {
            dec.read_byte(sink)?;
            Some(Immediate::None)
        }
        MemoryInit => {
            let segment = dec.read_u32(sink)?;
            dec.read_byte(sink)?;
            Some(Immediate::BulkInit { segment, dst: 0 })
        }
        TableInit => {
            let segment = dec.read_u32(sink)?;
            let dst = dec.read_u32(sink)?;
            Some(Immediate::BulkInit { segment, dst })
        }
        DataDrop | ElemDrop | TableGrow | TableSize | TableFill => {
            Some(Immediate::Index(dec.read_u32(sink)?))
        }
        I32TruncSatF32S | I32TruncSatF32U | I32TruncSatF64S | I32TruncSatF64U
        | I64TruncSatF32S | I64TruncSatF32U | I64TruncSatF64S | I64TruncSatF64U => {
            Some(Immediate::None)
        }
    }
}

/// Decodes one instruction, dispatching through [`OPCODE_TO_OPERAND_TYPE`].
pub fn decode_instruction(
    dec: &mut Decoder<'_>,
    features: Features,
    sink: &mut ErrorSink,
) -> Option<Instruction> {
    let offset = dec.offset();
    let byte = dec.read_byte(sink)?;
    let Ok(opcode) = Opcode::try_from(byte) else {
        sink.report(offset, Error::UnknownOpcode { opcode: u32::from(byte) });
        return None;
    };
    if opcode == Opcode::BulkPrefix {
        let bulk_offset = dec.offset();
        let raw = dec.read_u32(sink)?;
        let Ok(bulk_opcode) = BulkOpcode::try_from(raw) else {
            sink.report(bulk_offset, Error::UnknownOpcode { opcode: raw });
            return None;
        };
        if !features.contains(Features::BULK_MEMORY)
            && !matches!(
                bulk_opcode,
                BulkOpcode::I32TruncSatF32S
                    | BulkOpcode::I32TruncSatF32U
                    | BulkOpcode::I32TruncSatF64S
                    | BulkOpcode::I32TruncSatF64U
                    | BulkOpcode::I64TruncSatF32S
                    | BulkOpcode::I64TruncSatF32U
                    | BulkOpcode::I64TruncSatF64S
                    | BulkOpcode::I64TruncSatF64U
            )
        {
            sink.report(
                bulk_offset,
                Error::FeatureDisabled {
                    feature: "bulk-memory",
                },
            );
            return None;
        }
        let _ = BULK_OPCODE_TO_OPERAND_TYPE[bulk_opcode as usize];
        let immediate = decode_bulk_immediate(bulk_opcode, dec, sink)?;
        return Some(Instruction {
            offset,
            opcode: OpcodeKind::Bulk(bulk_opcode),
            immediate,
        });
    }
    if opcode == Opcode::VectorPrefix {
        if !features.contains(Features::SIMD) {
            sink.report(offset, Error::FeatureDisabled { feature: "simd" });
            return None;
        }
        // The representative vector-opcode subset (`types::instr::VectorOpcode`)
        // does not yet decode full SIMD immediates; this is a known gap, not a
        // silent truncation: it is surfaced as `UnknownOpcode` like any other
        // unrecognised opcode.
        let vec_offset = dec.offset();
        let raw = dec.read_u32(sink)?;
        sink.report(vec_offset, Error::UnknownOpcode { opcode: raw });
        return None;
    }
    let operand_type = OPCODE_TO_OPERAND_TYPE[byte as usize];
    let immediate = decode_immediate(operand_type, dec, features, sink)?;
    Some(Instruction {
        offset,
        opcode: OpcodeKind::Plain(opcode),
        immediate,
    })
}

/// Decodes an instruction sequence terminated by the first top-level `end`,
/// e.g. a function body or the body of a `block`/`loop`/`if` arm. Does not
/// recurse into nested blocks; callers that need structure track depth.
pub fn decode_expression(
    dec: &mut Decoder<'_>,
    features: Features,
    sink: &mut ErrorSink,
) -> Option<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut depth = 0u32;
    loop {
        let instr = decode_instruction(dec, features, sink)?;
        let is_end = matches!(instr.opcode, OpcodeKind::Plain(Opcode::End));
        let opens_block = matches!(
            instr.opcode,
            OpcodeKind::Plain(Opcode::Block | Opcode::Loop | Opcode::If | Opcode::Try | Opcode::Let)
        );
        if opens_block {
            depth += 1;
        }
        if is_end {
            if depth == 0 {
                instructions.push(instr);
                return Some(instructions);
            }
            depth -= 1;
        }
        instructions.push(instr);
    }
}

/// Decodes the restricted constant-expression opcode set (§4.5 "Constant
/// expressions"), terminated by `end`.
pub fn decode_const_expr(
    dec: &mut Decoder<'_>,
    features: Features,
    sink: &mut ErrorSink,
) -> Option<ConstExpr> {
    let offset = dec.offset();
    let instr = decode_instruction(dec, features, sink)?;
    let value = match (&instr.opcode, &instr.immediate) {
        (OpcodeKind::Plain(Opcode::I32Const), Immediate::I32(v)) => ConstExpr::I32(*v),
        (OpcodeKind::Plain(Opcode::I64Const), Immediate::I64(v)) => ConstExpr::I64(*v),
        (OpcodeKind::Plain(Opcode::F32Const), Immediate::F32(bits)) => ConstExpr::F32(*bits),
        (OpcodeKind::Plain(Opcode::F64Const), Immediate::F64(bits)) => ConstExpr::F64(*bits),
        (OpcodeKind::Plain(Opcode::GlobalGet), Immediate::Index(idx)) => {
            ConstExpr::GlobalGet(GlobalIdx::new(*idx))
        }
        (OpcodeKind::Plain(Opcode::RefNull), Immediate::RefType(heap)) => {
            ConstExpr::RefNull(*heap)
        }
        (OpcodeKind::Plain(Opcode::RefFunc), Immediate::Index(idx)) => {
            ConstExpr::RefFunc(crate::types::FuncIdx::new(*idx))
        }
        _ => {
            let opcode_num = match instr.opcode {
                OpcodeKind::Plain(op) => op as u8 as u32,
                OpcodeKind::Bulk(op) => op as u32,
            };
            sink.report(
                instr.offset,
                Error::IllegalInstructionInConstExpr { opcode: opcode_num },
            );
            return None;
        }
    };
    let end_offset = dec.offset();
    let end = decode_instruction(dec, features, sink)?;
    if !matches!(end.opcode, OpcodeKind::Plain(Opcode::End)) {
        sink.report(
            end_offset,
            Error::IllegalInstructionInConstExpr { opcode: 0x0b },
        );
        return None;
    }
    let _ = offset;
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_i32_const() {
        let mut sink = ErrorSink::new();
        let mut dec = Decoder::new(&[0x41, 0x2a, 0x0b]);
        let expr = decode_const_expr(&mut dec, Features::MVP, &mut sink).unwrap();
        assert_eq!(expr, ConstExpr::I32(42));
        assert!(sink.is_empty());
    }

    #[test]
    fn non_const_opcode_is_illegal_in_const_expr() {
        let mut sink = ErrorSink::new();
        // unreachable, end
        let mut dec = Decoder::new(&[0x00, 0x0b]);
        assert_eq!(decode_const_expr(&mut dec, Features::MVP, &mut sink), None);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn local_get_decodes_a_u32_index() {
        let mut sink = ErrorSink::new();
        let mut dec = Decoder::new(&[0x20, 0x00]);
        let instr = decode_instruction(&mut dec, Features::MVP, &mut sink).unwrap();
        assert_eq!(instr.immediate, Immediate::Index(0));
    }
}
