// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The well-known custom sections (§2a, §4.5 "Custom sections: name,
//! linking, relocation"): `name`, `linking`, and `reloc.<section>`. A
//! malformed subsection payload halts iteration of that custom section but
//! preserves every subsection already decoded (§9 Open Questions).

use crate::binary::decode::Decoder;
use crate::error::ErrorSink;
use crate::features::Features;
use crate::types::FuncIdx;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameMapEntry<'a> {
    pub index: u32,
    pub name: &'a str,
}

/// The decoded `name` custom section (subsection ids 0, 1, 2; §4.5).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameSection<'a> {
    pub module: Option<&'a str>,
    pub function_names: Vec<NameMapEntry<'a>>,
    pub local_names: Vec<(FuncIdx, Vec<NameMapEntry<'a>>)>,
}

fn decode_name_map<'a>(dec: &mut Decoder<'a>, sink: &mut ErrorSink) -> Option<Vec<NameMapEntry<'a>>> {
    let count = dec.read_u32(sink)? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let index = dec.read_u32(sink)?;
        let name = dec.read_string(sink)?;
        entries.push(NameMapEntry { index, name });
    }
    Some(entries)
}

/// Decodes the `name` custom section. Each subsection is length-prefixed;
/// a subsection that fails to decode stops iteration but the subsections
/// already accumulated in `result` are kept.
pub fn decode_name_section<'a>(data: &'a [u8], sink: &mut ErrorSink) -> NameSection<'a> {
    let mut dec = Decoder::new(data);
    let mut result = NameSection::default();
    while !dec.is_empty() {
        let Some(subsection_id) = dec.read_u32(sink) else {
            break;
        };
        let Some(len) = dec.read_u32(sink) else {
            break;
        };
        let Some(mut sub) = dec.split(len as usize, sink) else {
            break;
        };
        match subsection_id {
            0 => match sub.read_string(sink) {
                Some(name) => result.module = Some(name),
                None => break,
            },
            1 => match decode_name_map(&mut sub, sink) {
                Some(map) => result.function_names = map,
                None => break,
            },
            2 => {
                let Some(count) = sub.read_u32(sink) else {
                    break;
                };
                let mut locals = Vec::with_capacity(count as usize);
                let mut ok = true;
                for _ in 0..count {
                    let Some(func_index) = sub.read_u32(sink) else {
                        ok = false;
                        break;
                    };
                    let Some(map) = decode_name_map(&mut sub, sink) else {
                        ok = false;
                        break;
                    };
                    locals.push((FuncIdx::new(func_index), map));
                }
                if !ok {
                    break;
                }
                result.local_names = locals;
            }
            _ => break,
        }
    }
    result
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocationType {
    FunctionIndexLeb,
    TableIndexSleb,
    GlobalAddrLeb,
    MemoryAddrLeb,
    TypeIndexLeb,
    GlobalIndexLeb,
    FunctionOffsetI32,
    SectionOffsetI32,
}

/// A single `reloc.*` entry (§4.5 "Custom sections: name, linking,
/// relocation"). `addend` is present only for address/offset relocation
/// types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relocation {
    pub kind: RelocationType,
    pub offset: u32,
    pub index: u32,
    pub addend: Option<i32>,
}

fn relocation_type_from_byte(byte: u8) -> Option<RelocationType> {
    use RelocationType::*;
    Some(match byte {
        0 => FunctionIndexLeb,
        1 => TableIndexSleb,
        2 => GlobalAddrLeb,
        3 => MemoryAddrLeb,
        6 => TypeIndexLeb,
        7 => GlobalIndexLeb,
        8 => FunctionOffsetI32,
        9 => SectionOffsetI32,
        _ => return None,
    })
}

fn relocation_has_addend(kind: RelocationType) -> bool {
    matches!(
        kind,
        RelocationType::MemoryAddrLeb
            | RelocationType::FunctionOffsetI32
            | RelocationType::SectionOffsetI32
    )
}

/// A decoded `reloc.<section>` custom section: the target section index,
/// plus every relocation entry against it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocationSection {
    pub section_index: u32,
    pub entries: Vec<Relocation>,
}

pub fn decode_relocation_section(data: &[u8], sink: &mut ErrorSink) -> Option<RelocationSection> {
    let mut dec = Decoder::new(data);
    let section_index = dec.read_u32(sink)?;
    let count = dec.read_u32(sink)? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = dec.offset();
        let byte = dec.read_byte(sink)?;
        let Some(kind) = relocation_type_from_byte(byte) else {
            sink.report(offset, crate::error::Error::BadSection { id: u32::from(byte) });
            break;
        };
        let reloc_offset = dec.read_u32(sink)?;
        let index = dec.read_u32(sink)?;
        let addend = if relocation_has_addend(kind) {
            Some(dec.read_i32(sink)?)
        } else {
            None
        };
        entries.push(Relocation {
            kind,
            offset: reloc_offset,
            index,
            addend,
        });
    }
    Some(RelocationSection {
        section_index,
        entries,
    })
}

bitflags::bitflags! {
    /// Symbol-info flags, as used by the `linking` custom section.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SymbolFlags: u32 {
        const WEAK            = 1 << 0;
        const LOCAL            = 1 << 1;
        const HIDDEN            = 1 << 2;
        const UNDEFINED          = 1 << 4;
        const EXPORTED          = 1 << 5;
        const EXPLICIT_NAME       = 1 << 6;
        const NO_STRIP          = 1 << 7;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo<'a> {
    pub name: &'a str,
    pub alignment_log2: u32,
    pub flags: u32,
}

/// A data-symbol's definition site: absent when the symbol is undefined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataSymbolDefinition {
    pub segment_index: u32,
    pub offset: u32,
    pub size: u32,
}

/// One entry of the `linking` section's symbol table. The kind-specific
/// payload mirrors the C union `read.cc`'s `Read(..., ReadTag<SymbolInfo>)`
/// switches on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolInfo<'a> {
    Function {
        flags: SymbolFlags,
        index: u32,
        name: Option<&'a str>,
    },
    Global {
        flags: SymbolFlags,
        index: u32,
        name: Option<&'a str>,
    },
    Event {
        flags: SymbolFlags,
        index: u32,
        name: Option<&'a str>,
    },
    Table {
        flags: SymbolFlags,
        index: u32,
        name: Option<&'a str>,
    },
    Data {
        flags: SymbolFlags,
        name: &'a str,
        defined: Option<DataSymbolDefinition>,
    },
    Section {
        flags: SymbolFlags,
        section_index: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SymbolKind {
    Function,
    Data,
    Global,
    Section,
    Event,
    Table,
}

fn symbol_kind_from_byte(byte: u8) -> Option<SymbolKind> {
    use SymbolKind::*;
    Some(match byte {
        0 => Function,
        1 => Data,
        2 => Global,
        3 => Section,
        4 => Event,
        5 => Table,
        _ => return None,
    })
}

fn decode_symbol_info<'a>(dec: &mut Decoder<'a>, sink: &mut ErrorSink) -> Option<SymbolInfo<'a>> {
    let offset = dec.offset();
    let kind_byte = dec.read_byte(sink)?;
    let Some(kind) = symbol_kind_from_byte(kind_byte) else {
        sink.report(
            offset,
            crate::error::Error::BadSection {
                id: u32::from(kind_byte),
            },
        );
        return None;
    };
    let raw_flags = dec.read_u32(sink)?;
    let flags = SymbolFlags::from_bits_truncate(raw_flags);
    match kind {
        SymbolKind::Function | SymbolKind::Global | SymbolKind::Event | SymbolKind::Table => {
            let index = dec.read_u32(sink)?;
            let name = if !flags.contains(SymbolFlags::UNDEFINED)
                || flags.contains(SymbolFlags::EXPLICIT_NAME)
            {
                Some(dec.read_string(sink)?)
            } else {
                None
            };
            Some(match kind {
                SymbolKind::Function => SymbolInfo::Function { flags, index, name },
                SymbolKind::Global => SymbolInfo::Global { flags, index, name },
                SymbolKind::Event => SymbolInfo::Event { flags, index, name },
                _ => SymbolInfo::Table { flags, index, name },
            })
        }
        SymbolKind::Data => {
            let name = dec.read_string(sink)?;
            let defined = if !flags.contains(SymbolFlags::UNDEFINED) {
                let segment_index = dec.read_u32(sink)?;
                let offset = dec.read_u32(sink)?;
                let size = dec.read_u32(sink)?;
                Some(DataSymbolDefinition {
                    segment_index,
                    offset,
                    size,
                })
            } else {
                None
            };
            Some(SymbolInfo::Data { flags, name, defined })
        }
        SymbolKind::Section => {
            let section_index = dec.read_u32(sink)?;
            Some(SymbolInfo::Section {
                flags,
                section_index,
            })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComdatSymbolKind {
    Data,
    Function,
    Global,
    Event,
    Table,
    Section,
}

fn comdat_symbol_kind_from_byte(byte: u8) -> Option<ComdatSymbolKind> {
    use ComdatSymbolKind::*;
    Some(match byte {
        0 => Data,
        1 => Function,
        2 => Global,
        3 => Event,
        4 => Table,
        5 => Section,
        _ => return None,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComdatSymbol {
    pub kind: ComdatSymbolKind,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comdat<'a> {
    pub name: &'a str,
    pub flags: u32,
    pub symbols: Vec<ComdatSymbol>,
}

fn decode_comdat<'a>(dec: &mut Decoder<'a>, sink: &mut ErrorSink) -> Option<Comdat<'a>> {
    let name = dec.read_string(sink)?;
    let flags = dec.read_u32(sink)?;
    let count = dec.read_u32(sink)?;
    let mut symbols = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = dec.offset();
        let kind_byte = dec.read_byte(sink)?;
        let Some(kind) = comdat_symbol_kind_from_byte(kind_byte) else {
            sink.report(
                offset,
                crate::error::Error::BadSection {
                    id: u32::from(kind_byte),
                },
            );
            return None;
        };
        let index = dec.read_u32(sink)?;
        symbols.push(ComdatSymbol { kind, index });
    }
    Some(Comdat {
        name,
        flags,
        symbols,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkingSection<'a> {
    pub version: u32,
    pub segment_info: Vec<SegmentInfo<'a>>,
    pub init_funcs: Vec<(u32, FuncIdx)>,
    pub symbol_table: Vec<SymbolInfo<'a>>,
    pub comdats: Vec<Comdat<'a>>,
}

/// Decodes the `linking` custom section's version byte plus its
/// `segment-info`, `init-funcs`, `symbol-table`, and `comdat-info`
/// subsections. A subsection id this crate doesn't recognise is skipped —
/// not treated as the end of the section — so later, recognised
/// subsections still decode.
pub fn decode_linking_section<'a>(data: &'a [u8], sink: &mut ErrorSink) -> Option<LinkingSection<'a>> {
    let mut dec = Decoder::new(data);
    let version = dec.read_u32(sink)?;
    let mut result = LinkingSection {
        version,
        segment_info: Vec::new(),
        init_funcs: Vec::new(),
        symbol_table: Vec::new(),
        comdats: Vec::new(),
    };
    while !dec.is_empty() {
        let Some(subsection_id) = dec.read_u32(sink) else {
            break;
        };
        let Some(len) = dec.read_u32(sink) else {
            break;
        };
        let Some(mut sub) = dec.split(len as usize, sink) else {
            break;
        };
        match subsection_id {
            // WASM_SEGMENT_INFO
            5 => {
                let Some(count) = sub.read_u32(sink) else {
                    break;
                };
                let mut ok = true;
                for _ in 0..count {
                    let (Some(name), Some(alignment_log2), Some(flags)) = (
                        sub.read_string(sink),
                        sub.read_u32(sink),
                        sub.read_u32(sink),
                    ) else {
                        ok = false;
                        break;
                    };
                    result.segment_info.push(SegmentInfo {
                        name,
                        alignment_log2,
                        flags,
                    });
                }
                if !ok {
                    break;
                }
            }
            // WASM_INIT_FUNCS
            7 => {
                let Some(count) = sub.read_u32(sink) else {
                    break;
                };
                let mut ok = true;
                for _ in 0..count {
                    let (Some(priority), Some(func_index)) =
                        (sub.read_u32(sink), sub.read_u32(sink))
                    else {
                        ok = false;
                        break;
                    };
                    result.init_funcs.push((priority, FuncIdx::new(func_index)));
                }
                if !ok {
                    break;
                }
            }
            // WASM_SYMBOL_TABLE
            8 => {
                let Some(count) = sub.read_u32(sink) else {
                    break;
                };
                let mut ok = true;
                let mut symbols = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let Some(symbol) = decode_symbol_info(&mut sub, sink) else {
                        ok = false;
                        break;
                    };
                    symbols.push(symbol);
                }
                if !ok {
                    break;
                }
                result.symbol_table = symbols;
            }
            // WASM_COMDAT_INFO. The official id is 7, but this crate already
            // uses 7 for WASM_INIT_FUNCS, so comdat info is placed at the
            // next free id instead (see DESIGN.md).
            9 => {
                let Some(count) = sub.read_u32(sink) else {
                    break;
                };
                let mut ok = true;
                let mut comdats = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let Some(comdat) = decode_comdat(&mut sub, sink) else {
                        ok = false;
                        break;
                    };
                    comdats.push(comdat);
                }
                if !ok {
                    break;
                }
                result.comdats = comdats;
            }
            _ => continue,
        }
    }
    let _ = Features::MVP;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_section_module_name() {
        let mut data = vec![0u8]; // subsection id 0 = module
        let payload = {
            let mut p = vec![5u8];
            p.extend_from_slice(b"hello");
            p
        };
        data.push(payload.len() as u8); // length
        data.extend_from_slice(&payload);
        let mut sink = ErrorSink::new();
        let name_section = decode_name_section(&data, &mut sink);
        assert_eq!(name_section.module, Some("hello"));
        assert!(sink.is_empty());
    }

    #[test]
    fn relocation_memory_addr_has_addend() {
        assert!(relocation_has_addend(RelocationType::MemoryAddrLeb));
        assert!(!relocation_has_addend(RelocationType::FunctionIndexLeb));
    }

    #[test]
    fn unrecognized_subsection_is_skipped_not_fatal() {
        let mut data = vec![1u8]; // linking section version
        data.push(99); // unrecognized subsection id
        data.push(0); // zero-length payload

        let symbol_payload: Vec<u8> = vec![
            1, // one symbol
            0, // kind: function
            0, // flags: 0
            0, // index: 0
            3, b'f', b'o', b'o', // name
        ];
        data.push(8); // WASM_SYMBOL_TABLE
        data.push(symbol_payload.len() as u8);
        data.extend_from_slice(&symbol_payload);

        let mut sink = ErrorSink::new();
        let linking = decode_linking_section(&data, &mut sink).expect("decodes");
        assert!(sink.is_empty());
        assert_eq!(linking.symbol_table.len(), 1);
        match &linking.symbol_table[0] {
            SymbolInfo::Function { index, name, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(*name, Some("foo"));
            }
            other => panic!("expected a function symbol, got {other:?}"),
        }
    }
}
