// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The binary decoder (C3, C4, C5): magic/version validation, the lazy
//! section iterator, and the entry decoders for every section's element
//! type. Every borrowed value here is a sub-slice of the `&[u8]` the caller
//! passed to [`Module::new`].

pub mod custom;
pub mod decode;
pub mod instr;
pub mod sequence;

use crate::error::{Error, ErrorSink};
use crate::features::Features;
use crate::types::{
    DataMode, DataModeActive, DataSegment, ElementInit, ElementMode, ElementModeActive,
    ElementSegment, EventType, Export, ExportDescriptor, ExternalKind, FuncIdx, FunctionType,
    GlobalIdx, GlobalType, Import, ImportDescriptor, Limits, Local, MemIdx, MemType, RefType,
    SectionId, TableIdx, TableType, TypeIdx, ValType,
};
use decode::Decoder;
use instr::{decode_const_expr, decode_expression, Instruction};
use sequence::LazySeq;

pub const MAGIC: [u8; 4] = *b"\0asm";
pub const VERSION: [u8; 4] = [1, 0, 0, 0];

/// A decoded function body: its flattened locals list and instruction
/// stream (§4.5 "Code bodies" — the *unpacked* representation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Func {
    pub locals: Vec<Local>,
    pub body: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: crate::types::ConstExpr,
}

/// A custom section that is not one of the well-known `name`/`linking`/
/// `reloc.*` sections: just its name and raw payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomSection<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
}

/// A section as yielded by the lazy section iterator (C3): either *known*
/// (a numbered, well-defined payload grammar) or *custom* (name-prefixed,
/// opaque to the iterator itself).
#[derive(Clone, Copy, Debug)]
pub enum SectionPayload<'a> {
    Known(&'a [u8]),
    Custom { name: &'a str, data: &'a [u8] },
}

#[derive(Clone, Copy, Debug)]
pub struct Section<'a> {
    pub id: SectionId,
    pub offset: usize,
    pub payload: SectionPayload<'a>,
}

/// The lazy module: validates the header on construction and exposes a
/// forward-only, restartable section iterator (§4.3).
pub struct Module<'a> {
    data: &'a [u8],
}

impl<'a> Module<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Reads and checks the magic and version, reporting a diagnostic for
    /// either mismatch without preventing the caller from continuing to
    /// iterate sections (§4.3, §8 scenario 2).
    pub fn read_header(&self, sink: &mut ErrorSink) -> Option<Decoder<'a>> {
        let mut dec = Decoder::new(self.data);
        let magic_offset = dec.offset();
        let magic = dec.read_bytes(4, sink)?;
        if magic != MAGIC {
            let actual: [u8; 4] = magic.try_into().unwrap();
            sink.with_context("magic", magic_offset, |sink| {
                sink.report(
                    magic_offset,
                    Error::BadMagic {
                        expected: MAGIC,
                        actual,
                    },
                );
            });
        }
        let version_offset = dec.offset();
        let version = dec.read_bytes(4, sink)?;
        if version != VERSION {
            let actual: [u8; 4] = version.try_into().unwrap();
            sink.with_context("version", version_offset, |sink| {
                sink.report(
                    version_offset,
                    Error::BadVersion {
                        expected: VERSION,
                        actual,
                    },
                );
            });
        }
        Some(dec)
    }

    /// Returns a fresh, forward-only iterator over this module's sections.
    /// Independent calls yield independent iterators over the same span.
    pub fn sections(&self, sink: &mut ErrorSink) -> SectionIter<'a> {
        let dec = self.read_header(sink).unwrap_or_else(|| Decoder::new(&[]));
        SectionIter { dec }
    }
}

pub struct SectionIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> SectionIter<'a> {
    /// Decodes the next `(id, len, payload)` triple. An unrecognised id is
    /// reported and that section's bytes are skipped, but iteration
    /// continues onto the next section (§7 "the remainder of the section is
    /// skipped but subsequent sections are attempted").
    pub fn next(&mut self, sink: &mut ErrorSink) -> Option<Section<'a>> {
        loop {
            if self.dec.is_empty() {
                return None;
            }
            let offset = self.dec.offset();
            let id_raw = self.dec.read_u32(&mut *sink)?;
            let len = self.dec.read_u32(&mut *sink)? as usize;
            let Some(payload) = self.dec.split(len, sink) else {
                return None;
            };
            let Ok(id) = SectionId::try_from(id_raw) else {
                sink.report(offset, Error::BadSection { id: id_raw });
                continue;
            };
            let payload_data = payload.remaining_slice();
            if id == SectionId::Custom {
                let mut name_dec = Decoder::new(payload_data);
                let Some(name) = name_dec.read_string(sink) else {
                    continue;
                };
                let data = name_dec.remaining_slice();
                return Some(Section {
                    id,
                    offset,
                    payload: SectionPayload::Custom { name, data },
                });
            }
            return Some(Section {
                id,
                offset,
                payload: SectionPayload::Known(payload_data),
            });
        }
    }
}

// --- Entity decoders (C5) ---------------------------------------------------

fn decode_limits(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<Limits> {
    let flag = dec.read_byte(sink)?;
    let min = dec.read_u32(sink)?;
    let max = if flag == 1 {
        Some(dec.read_u32(sink)?)
    } else {
        None
    };
    Some(Limits { min, max })
}

fn decode_ref_type(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<RefType> {
    let offset = dec.offset();
    let byte = dec.read_byte(sink)?;
    let heap = match byte {
        0x70 => crate::types::HeapType::Func,
        0x6f => crate::types::HeapType::Extern,
        _ => {
            sink.report(offset, Error::BadValueType { byte });
            return None;
        }
    };
    Some(RefType {
        nullable: true,
        heap,
    })
}

fn decode_table_type(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<TableType> {
    let reftype = decode_ref_type(dec, sink)?;
    let limits = decode_limits(dec, sink)?;
    Some(TableType { reftype, limits })
}

fn decode_global_type(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<GlobalType> {
    let offset = dec.offset();
    let value = decode_value_type(dec, sink)?;
    let mutability_offset = dec.offset();
    let mutability = dec.read_byte(sink)?;
    let mutable = match mutability {
        0 => false,
        1 => true,
        other => {
            sink.report(mutability_offset, Error::BadMutability { byte: other });
            return None;
        }
    };
    let _ = offset;
    Some(GlobalType { value, mutable })
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

fn decode_function_type(dec: &mut Decoder<'_>, _features: Features, sink: &mut ErrorSink) -> Option<FunctionType> {
    let offset = dec.offset();
    let tag = dec.read_byte(sink)?;
    if tag != 0x60 {
        sink.report(offset, Error::BadSection { id: u32::from(tag) });
        return None;
    }
    let param_count = dec.read_u32(sink)? as usize;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(decode_value_type(dec, sink)?);
    }
    let result_count = dec.read_u32(sink)? as usize;
    let mut results = Vec::with_capacity(result_count);
    for _ in 0..result_count {
        results.push(decode_value_type(dec, sink)?);
    }
    Some(FunctionType { params, results })
}

fn decode_import<'a>(dec: &mut Decoder<'a>, features: Features, sink: &mut ErrorSink) -> Option<Import<'a>> {
    let module = dec.read_string(sink)?;
    let field = dec.read_string(sink)?;
    let kind_offset = dec.offset();
    let kind = dec.read_byte(sink)?;
    let descriptor = match ExternalKind::try_from(kind) {
        Ok(ExternalKind::Function) => ImportDescriptor::Function(TypeIdx::new(dec.read_u32(sink)?)),
        Ok(ExternalKind::Table) => ImportDescriptor::Table(decode_table_type(dec, sink)?),
        Ok(ExternalKind::Memory) => ImportDescriptor::Memory(MemType(decode_limits(dec, sink)?)),
        Ok(ExternalKind::Global) => ImportDescriptor::Global(decode_global_type(dec, sink)?),
        Ok(ExternalKind::Event) => {
            if !features.contains(Features::EXCEPTIONS) {
                sink.report(kind_offset, Error::FeatureDisabled { feature: "exceptions" });
                return None;
            }
            dec.read_u32(sink)?; // attribute, always 0
            ImportDescriptor::Event(EventType {
                attribute: 0,
                type_use: TypeIdx::new(dec.read_u32(sink)?),
            })
        }
        Err(_) => {
            sink.report(kind_offset, Error::BadExternalKind { byte: kind });
            return None;
        }
    };
    Some(Import {
        module,
        field,
        descriptor,
    })
}

fn decode_export<'a>(dec: &mut Decoder<'a>, _features: Features, sink: &mut ErrorSink) -> Option<Export<'a>> {
    let field = dec.read_string(sink)?;
    let kind_offset = dec.offset();
    let kind = dec.read_byte(sink)?;
    let index = dec.read_u32(sink)?;
    let descriptor = match ExternalKind::try_from(kind) {
        Ok(ExternalKind::Function) => ExportDescriptor::Function(FuncIdx::new(index)),
        Ok(ExternalKind::Table) => ExportDescriptor::Table(TableIdx::new(index)),
        Ok(ExternalKind::Memory) => ExportDescriptor::Memory(MemIdx::new(index)),
        Ok(ExternalKind::Global) => ExportDescriptor::Global(GlobalIdx::new(index)),
        Ok(ExternalKind::Event) => ExportDescriptor::Event(crate::types::EventIdx::new(index)),
        Err(_) => {
            sink.report(kind_offset, Error::BadExternalKind { byte: kind });
            return None;
        }
    };
    Some(Export { field, descriptor })
}

fn decode_global(dec: &mut Decoder<'_>, features: Features, sink: &mut ErrorSink) -> Option<Global> {
    let ty = decode_global_type(dec, sink)?;
    let init = decode_const_expr(dec, features, sink)?;
    Some(Global { ty, init })
}

fn decode_element_segment(dec: &mut Decoder<'_>, features: Features, sink: &mut ErrorSink) -> Option<ElementSegment> {
    let offset = dec.offset();
    let flags = dec.read_u32(sink)?;
    let (mode_kind, explicit_table, use_exprs) = match flags {
        0 => (0u8, false, false),
        1 => (1u8, false, false),
        2 => (0u8, true, false),
        3 => (2u8, false, false),
        4 => (0u8, false, true),
        5 => (1u8, false, true),
        6 => (0u8, true, true),
        7 => (2u8, false, true),
        _ => {
            sink.report(offset, Error::BadSection { id: flags });
            return None;
        }
    };
    let mode = match mode_kind {
        0 => {
            let table = if explicit_table {
                TableIdx::new(dec.read_u32(sink)?)
            } else {
                TableIdx::new(0)
            };
            let _offset_expr = decode_const_expr(dec, features, sink)?;
            ElementMode::Active(ElementModeActive { table })
        }
        1 => ElementMode::Passive,
        2 => ElementMode::Declarative,
        _ => unreachable!(),
    };
    // When a leading flag bit selects an explicit external-kind/ref-type
    // byte rather than implying funcref, consume it; the MVP encodings omit
    // it entirely (implicit funcref, table 0).
    let ty = if flags == 4 {
        RefType::FUNCREF
    } else if use_exprs && (flags == 5 || flags == 6 || flags == 7) {
        decode_ref_type(dec, sink)?
    } else if !use_exprs && (flags == 1 || flags == 2 || flags == 3) {
        dec.read_byte(sink)?; // element kind, always funcref (0x00)
        RefType::FUNCREF
    } else {
        RefType::FUNCREF
    };
    let init = if use_exprs {
        let count = dec.read_u32(sink)? as usize;
        let mut exprs = Vec::with_capacity(count);
        for _ in 0..count {
            exprs.push(decode_const_expr(dec, features, sink)?);
        }
        ElementInit::Expressions(exprs)
    } else {
        let count = dec.read_u32(sink)? as usize;
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(FuncIdx::new(dec.read_u32(sink)?));
        }
        ElementInit::FunctionIndices(indices)
    };
    Some(ElementSegment { ty, init, mode })
}

fn decode_local_packs(dec: &mut Decoder<'_>, sink: &mut ErrorSink) -> Option<Vec<Local>> {
    const MAX_LOCALS: u32 = 2_000_000;
    let pack_count = dec.read_u32(sink)? as usize;
    let mut locals = Vec::new();
    let mut total: u32 = 0;
    for _ in 0..pack_count {
        let count = dec.read_u32(sink)?;
        total = total.checked_add(count).unwrap_or(u32::MAX);
        if total > MAX_LOCALS {
            sink.report(
                dec.offset(),
                Error::BadSection { id: total },
            );
            return None;
        }
        let value_type = decode_value_type(dec, sink)?;
        let local = match value_type {
            ValType::I32 => Local::I32,
            ValType::I64 => Local::I64,
            ValType::F32 => Local::F32,
            ValType::F64 => Local::F64,
            ValType::V128 => Local::V128,
            ValType::Ref(r) if r.heap == crate::types::HeapType::Func => Local::FuncRef,
            ValType::Ref(_) => Local::ExternRef,
            ValType::Rtt(_) => Local::FuncRef,
        };
        for _ in 0..count {
            locals.push(local);
        }
    }
    Some(locals)
}

fn decode_func(dec: &mut Decoder<'_>, features: Features, sink: &mut ErrorSink) -> Option<Func> {
    let declared_len = dec.read_u32(sink)? as usize;
    let start = dec.offset();
    let mut body_dec = dec.split(declared_len, sink)?;
    let locals = decode_local_packs(&mut body_dec, sink)?;
    let body = decode_expression(&mut body_dec, features, sink)?;
    let consumed = body_dec.offset();
    if consumed != declared_len {
        sink.report(
            start,
            Error::CountMismatch {
                name: "function body",
                expected: declared_len as u32,
                actual: consumed as u32,
            },
        );
    }
    Some(Func { locals, body })
}

fn decode_data_segment<'a>(dec: &mut Decoder<'a>, features: Features, sink: &mut ErrorSink) -> Option<DataSegment<'a>> {
    let offset = dec.offset();
    let tag = dec.read_u32(sink)?;
    let mode = match tag {
        0 => {
            let _offset_expr = decode_const_expr(dec, features, sink)?;
            DataMode::Active(DataModeActive { memory: MemIdx::new(0) })
        }
        1 => DataMode::Passive,
        2 => {
            let memory = MemIdx::new(dec.read_u32(sink)?);
            let _offset_expr = decode_const_expr(dec, features, sink)?;
            DataMode::Active(DataModeActive { memory })
        }
        _ => {
            sink.report(offset, Error::BadSection { id: tag });
            return None;
        }
    };
    let len = dec.read_u32(sink)? as usize;
    let init = dec.read_bytes(len, sink)?;
    Some(DataSegment { init, mode })
}

fn decode_event_type(dec: &mut Decoder<'_>, _features: Features, sink: &mut ErrorSink) -> Option<EventType> {
    let attribute = dec.read_u32(sink)?;
    let type_use = TypeIdx::new(dec.read_u32(sink)?);
    Some(EventType { attribute, type_use })
}

/// Reads a vector's LEB128 count followed by a lazy sequence of its elements
/// (the shape of every known section except `start`/`datacount`).
fn vector_section<'a, T>(
    data: &'a [u8],
    features: Features,
    name: &'static str,
    decode_elem: sequence::ElementDecoder<'a, T>,
    sink: &mut ErrorSink,
) -> Vec<T> {
    let mut dec = Decoder::new(data);
    let Some(count) = dec.read_u32(sink) else {
        return Vec::new();
    };
    let seq = LazySeq::new(dec, features, name, Some(count), decode_elem);
    seq.collect(sink)
}

/// The fully decoded module (built atop the lazy C3/C4 primitives): every
/// known section collected into a typed vector, plus the well-known custom
/// sections. This is the convenience surface most callers want; the lazy
/// [`Module::sections`] iterator remains available for callers that want to
/// stop early or skip sections they do not care about.
#[derive(Clone, Debug, Default)]
pub struct DecodedModule<'a> {
    pub types: Vec<FunctionType>,
    pub imports: Vec<Import<'a>>,
    pub functions: Vec<TypeIdx>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export<'a>>,
    pub start: Option<FuncIdx>,
    pub elements: Vec<ElementSegment>,
    pub data_count: Option<u32>,
    pub code: Vec<Func>,
    pub data: Vec<DataSegment<'a>>,
    pub events: Vec<EventType>,
    pub custom: Vec<CustomSection<'a>>,
}

/// Decodes an entire module eagerly (§8 scenarios 1 and 3). Duplicate or
/// out-of-order known sections are reported but do not stop decoding of the
/// rest of the module (§7).
pub fn decode_module<'a>(data: &'a [u8], features: Features, sink: &mut ErrorSink) -> DecodedModule<'a> {
    let module = Module::new(data);
    let mut iter = module.sections(sink);
    let mut result = DecodedModule::default();
    let mut last_order: Option<u8> = None;
    let mut seen: Vec<SectionId> = Vec::new();

    while let Some(section) = iter.next(sink) {
        if section.id != SectionId::Custom {
            let order = section.id.stream_order();
            if seen.contains(&section.id) {
                sink.report(section.offset, Error::BadSection { id: order.into() });
            } else if let Some(last) = last_order {
                if order <= last {
                    sink.report(section.offset, Error::BadSection { id: order.into() });
                }
            }
            last_order = Some(order);
            seen.push(section.id);
        }

        match section.payload {
            SectionPayload::Custom { name, data } => match name {
                "name" => {
                    // Parsed on demand by callers via `custom::decode_name_section`;
                    // stored here only as the raw payload.
                    result.custom.push(CustomSection { name, data });
                }
                _ => result.custom.push(CustomSection { name, data }),
            },
            SectionPayload::Known(data) => match section.id {
                SectionId::Type => {
                    result.types = vector_section(data, features, "type", decode_function_type, sink)
                }
                SectionId::Import => {
                    result.imports = vector_section(data, features, "import", decode_import, sink)
                }
                SectionId::Function => {
                    result.functions = vector_section(
                        data,
                        features,
                        "function",
                        |dec, _f, sink| Some(TypeIdx::new(dec.read_u32(sink)?)),
                        sink,
                    )
                }
                SectionId::Table => {
                    result.tables = vector_section(
                        data,
                        features,
                        "table",
                        |dec, _f, sink| decode_table_type(dec, sink),
                        sink,
                    )
                }
                SectionId::Memory => {
                    result.memories = vector_section(
                        data,
                        features,
                        "memory",
                        |dec, _f, sink| Some(MemType(decode_limits(dec, sink)?)),
                        sink,
                    )
                }
                SectionId::Global => {
                    result.globals = vector_section(data, features, "global", decode_global, sink)
                }
                SectionId::Export => {
                    result.exports = vector_section(data, features, "export", decode_export, sink)
                }
                SectionId::Start => {
                    let mut dec = Decoder::new(data);
                    result.start = dec.read_u32(sink).map(FuncIdx::new);
                }
                SectionId::Element => {
                    result.elements =
                        vector_section(data, features, "element segment", decode_element_segment, sink)
                }
                SectionId::Code => {
                    result.code = vector_section(data, features, "function", decode_func, sink)
                }
                SectionId::Data => {
                    result.data = vector_section(data, features, "data segment", decode_data_segment, sink)
                }
                SectionId::DataCount => {
                    let mut dec = Decoder::new(data);
                    result.data_count = dec.read_u32(sink);
                }
                SectionId::Event => {
                    result.events = vector_section(data, features, "event", decode_event_type, sink)
                }
                SectionId::Custom => unreachable!(),
            },
        }
    }

    if let Some(expected) = result.data_count {
        if expected != result.data.len() as u32 {
            sink.report(
                data.len(),
                Error::CountMismatch {
                    name: "data segment",
                    expected,
                    actual: result.data.len() as u32,
                },
            );
        }
    }
    if result.functions.len() != result.code.len() {
        sink.report(
            data.len(),
            Error::CountMismatch {
                name: "code",
                expected: result.functions.len() as u32,
                actual: result.code.len() as u32,
            },
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_has_no_sections_and_no_diagnostics() {
        let mut sink = ErrorSink::new();
        let module = decode_module(&MAGIC_AND_VERSION, Features::MVP, &mut sink);
        assert!(module.types.is_empty());
        assert!(sink.is_empty());
    }

    const MAGIC_AND_VERSION: [u8; 8] = [0, b'a', b's', b'm', 1, 0, 0, 0];

    #[test]
    fn magic_mismatch_reports_exact_diagnostic() {
        let mut sink = ErrorSink::new();
        let data = *b"wasm\x01\0\0\0";
        let _ = decode_module(&data, Features::MVP, &mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.diagnostics()[0].error.to_string(),
            "Mismatch: expected \"\\00\\61\\73\\6d\", got \"\\77\\61\\73\\6d\""
        );
    }

    #[test]
    fn single_empty_function_type() {
        let mut sink = ErrorSink::new();
        // \0asm \1\0\0\0, section 1 (type), len 4, count 1, tag 0x60, 0 params, 0 results
        let data: Vec<u8> = {
            let mut v = MAGIC_AND_VERSION.to_vec();
            v.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
            v
        };
        let module = decode_module(&data, Features::MVP, &mut sink);
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.types[0].params.len(), 0);
        assert_eq!(module.types[0].results.len(), 0);
        assert!(sink.is_empty());
    }
}
