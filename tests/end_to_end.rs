//! End-to-end coverage across the binary and text pipelines: the literal
//! scenarios, invariants, round-trip properties, and boundary behaviours.

use wazm::binary::decode_module;
use wazm::convert::{convert_module, TextCtx};
use wazm::text::ast::{ElementModeText, Immediate, ModuleItem};
use wazm::text::desugar::desugar_module;
use wazm::text::parser::Parser;
use wazm::text::resolve::resolve_module;
use wazm::text::parse_and_resolve;
use wazm::types::Var;
use wazm::{ErrorSink, Features};

const MAGIC_AND_VERSION: [u8; 8] = [0, b'a', b's', b'm', 1, 0, 0, 0];

// --- Literal end-to-end scenarios --------------------------------------

#[test]
fn scenario_1_empty_module_has_no_sections_and_no_diagnostics() {
    let mut sink = ErrorSink::new();
    let module = decode_module(&MAGIC_AND_VERSION, Features::MVP, &mut sink);
    assert!(sink.is_empty());
    assert!(module.types.is_empty());
    assert!(module.imports.is_empty());
    assert!(module.functions.is_empty());
    assert!(module.code.is_empty());
    assert!(module.exports.is_empty());
}

#[test]
fn scenario_2_bad_magic_reports_exact_diagnostic_at_offset_zero() {
    let mut sink = ErrorSink::new();
    let data = *b"wasm\x01\0\0\0";
    let _ = decode_module(&data, Features::MVP, &mut sink);
    assert_eq!(sink.len(), 1);
    let diagnostic = &sink.diagnostics()[0];
    assert_eq!(diagnostic.offset, 0);
    assert_eq!(
        diagnostic.error.to_string(),
        "Mismatch: expected \"\\00\\61\\73\\6d\", got \"\\77\\61\\73\\6d\""
    );
}

#[test]
fn scenario_3_single_empty_function_type() {
    let mut sink = ErrorSink::new();
    let mut data = MAGIC_AND_VERSION.to_vec();
    data.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
    let module = decode_module(&data, Features::MVP, &mut sink);
    assert!(sink.is_empty());
    assert_eq!(module.types.len(), 1);
    assert!(module.types[0].params.is_empty());
    assert!(module.types[0].results.is_empty());
}

#[test]
fn scenario_4_text_function_resolves_to_a_shared_type_and_indexed_local() {
    let mut sink = ErrorSink::new();
    let module = parse_and_resolve(
        "(module (func $f (param i32) (result i32) local.get 0))",
        &mut sink,
    );
    assert!(sink.is_empty());

    let types: Vec<_> = module
        .items
        .iter()
        .filter_map(|i| match i {
            ModuleItem::Type(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].params, vec![wazm::types::ValType::I32]);
    assert_eq!(types[0].results, vec![wazm::types::ValType::I32]);

    let functions: Vec<_> = module
        .items
        .iter()
        .filter_map(|i| match i {
            ModuleItem::Function(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(functions.len(), 1);
    assert_eq!(
        functions[0].type_use.index.as_ref().map(|at| at.value().clone()),
        Some(Var::Index(0))
    );
    assert_eq!(functions[0].body.len(), 1);
    assert_eq!(functions[0].body[0].opcode, "local.get");
    let Immediate::Var(v) = &functions[0].body[0].immediate else {
        panic!("expected a local.get var immediate");
    };
    assert_eq!(*v.value(), Var::Index(0));
}

#[test]
fn scenario_5_inline_table_elem_offset_desugars_to_an_active_segment() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new("(module (table 2 funcref) (elem (i32.const 0) 0 1))", &mut sink);
    let mut module = parser.parse_module(&mut sink);
    resolve_module(&mut module, &mut sink);
    desugar_module(&mut module);
    assert!(sink.is_empty());

    assert!(matches!(module.items[0], ModuleItem::Table(_)));
    let ModuleItem::Element(elem) = &module.items[1] else {
        panic!("expected a standalone element segment");
    };
    assert_eq!(elem.mode, ElementModeText::Active);
    assert!(elem.offset.is_some());
    let vars: Vec<_> = elem.items.iter().map(|v| v.value().clone()).collect();
    assert_eq!(vars, vec![Var::Index(0), Var::Index(1)]);
    assert_eq!(
        elem.mode.to_binary(),
        wazm::types::ElementMode::Active(wazm::types::ElementModeActive {
            table: wazm::types::TableIdx::new(0)
        })
    );
}

#[test]
fn scenario_6_duplicate_bind_reports_diagnostic_and_keeps_first_index() {
    let mut sink = ErrorSink::new();
    let module = parse_and_resolve("(module (func $a) (func $a))", &mut sink);
    assert!(!sink.is_empty());
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| d.to_string().contains("Variable $a is already bound to index 0")));
    // Both functions still appear in the module; desugaring/resolution never
    // drops an item on a diagnostic.
    let functions: Vec<_> = module
        .items
        .iter()
        .filter(|i| matches!(i, ModuleItem::Function(_)))
        .collect();
    assert_eq!(functions.len(), 2);
}

// --- Invariants ----------------------------------------------------------

#[test]
fn every_locator_range_lies_within_the_input_span() {
    let mut sink = ErrorSink::new();
    let src = "(module (func $f (param $x i32) local.get $x))";
    let mut parser = Parser::new(src, &mut sink);
    let module = parser.parse_module(&mut sink);
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    for instr in &f.body {
        if let Immediate::Var(v) = &instr.immediate {
            assert!(v.range().end <= src.len());
        }
    }
}

#[test]
fn resolved_module_has_only_index_vars() {
    let mut sink = ErrorSink::new();
    let module = parse_and_resolve(
        "(module (func $f (export \"f\") (param $x i32) local.get $x))",
        &mut sink,
    );
    assert!(sink.is_empty());
    for item in &module.items {
        if let ModuleItem::Function(f) = item {
            for instr in &f.body {
                if let Immediate::Var(v) = &instr.immediate {
                    assert!(v.value().is_index());
                }
            }
        }
        if let ModuleItem::Export(e) = item {
            assert!(e.index.value().is_index());
        }
    }
}

#[test]
fn lazy_section_of_declared_count_yields_exactly_that_many_elements() {
    let mut sink = ErrorSink::new();
    // type section: count 3, three `() -> ()` function types.
    let mut data = MAGIC_AND_VERSION.to_vec();
    data.extend_from_slice(&[1, 10, 3, 0x60, 0, 0, 0x60, 0, 0, 0x60, 0, 0]);
    let module = decode_module(&data, Features::MVP, &mut sink);
    assert!(sink.is_empty());
    assert_eq!(module.types.len(), 3);
}

// --- Round-trip / idempotence --------------------------------------------

#[test]
fn name_resolution_is_idempotent() {
    let mut sink = ErrorSink::new();
    let mut module = parse_and_resolve("(module (func $f (export \"f\") local.get 0))", &mut sink);
    assert!(sink.is_empty());
    let before = module.clone();
    let mut second_sink = ErrorSink::new();
    resolve_module(&mut module, &mut second_sink);
    assert!(second_sink.is_empty());
    assert_eq!(before, module);
}

#[test]
fn desugar_is_idempotent() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new("(module (func $f (export \"f\")))", &mut sink);
    let mut module = parser.parse_module(&mut sink);
    resolve_module(&mut module, &mut sink);
    desugar_module(&mut module);
    let before = module.clone();
    desugar_module(&mut module);
    assert_eq!(before, module);
}

#[test]
fn decoded_binary_module_converts_to_text_with_matching_item_counts() {
    let mut sink = ErrorSink::new();
    let mut data = MAGIC_AND_VERSION.to_vec();
    // type section: one `() -> ()`.
    data.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
    // function section: one function using type 0.
    data.extend_from_slice(&[3, 2, 1, 0]);
    // export section: "f" -> function 0.
    data.extend_from_slice(&[7, 5, 1, 1, b'f', 0, 0]);
    // code section: one empty body (no locals, bare `end`).
    data.extend_from_slice(&[10, 4, 1, 2, 0, 0x0b]);

    let binary_module = decode_module(&data, Features::MVP, &mut sink);
    assert!(sink.is_empty());
    let expected_items = binary_module.types.len()
        + binary_module.imports.len()
        + binary_module.code.len()
        + binary_module.tables.len()
        + binary_module.memories.len()
        + binary_module.globals.len()
        + binary_module.exports.len()
        + usize::from(binary_module.start.is_some())
        + binary_module.elements.len()
        + binary_module.data.len();

    let mut ctx = TextCtx::new();
    let mut text_module = convert_module(&binary_module, &mut ctx);
    let mut resolve_sink = ErrorSink::new();
    resolve_module(&mut text_module, &mut resolve_sink);
    desugar_module(&mut text_module);
    assert!(resolve_sink.is_empty());
    assert_eq!(text_module.items.len(), expected_items);

    let function_count = text_module
        .items
        .iter()
        .filter(|i| matches!(i, ModuleItem::Function(_)))
        .count();
    assert_eq!(function_count, binary_module.code.len());
}

// --- Boundary behaviours ---------------------------------------------------

#[test]
fn section_length_exceeding_remaining_bytes_is_rejected() {
    let mut sink = ErrorSink::new();
    let mut data = MAGIC_AND_VERSION.to_vec();
    // Claims a 10-byte payload but only one byte follows.
    data.extend_from_slice(&[1, 10, 0]);
    let _ = decode_module(&data, Features::MVP, &mut sink);
    assert!(!sink.is_empty());
}

#[test]
fn zero_length_section_yields_an_empty_sequence_without_error() {
    let mut sink = ErrorSink::new();
    let mut data = MAGIC_AND_VERSION.to_vec();
    data.extend_from_slice(&[1, 1, 0]); // type section, count 0
    let module = decode_module(&data, Features::MVP, &mut sink);
    assert!(sink.is_empty());
    assert!(module.types.is_empty());
}

#[test]
fn text_align_log2_of_32_or_more_is_rejected() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new("(module (func i32.load align=0 i32.const 0))", &mut sink);
    let _ = parser.parse_module(&mut sink);
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| matches!(d.error, wazm::Error::AlignOutOfRange { log2: 32 })));
}

#[test]
fn try_catch_catch_all_parses_into_a_linear_instruction_stream() {
    let mut sink = ErrorSink::new();
    let src = "(module (func $f \
        try \
          i32.const 1 \
        catch $e \
          drop \
        catch_all \
          nop \
        end))";
    let mut parser = Parser::new(src, &mut sink);
    let module = parser.parse_module(&mut sink);
    assert!(sink.is_empty());
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    let opcodes: Vec<&str> = f.body.iter().map(|i| i.opcode.as_str()).collect();
    assert_eq!(
        opcodes,
        vec!["try", "i32.const", "catch", "drop", "catch_all", "nop", "end"]
    );
}

#[test]
fn try_delegate_terminates_without_a_trailing_end_keyword() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new("(module (func $f try nop delegate 0))", &mut sink);
    let module = parser.parse_module(&mut sink);
    assert!(sink.is_empty());
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    let opcodes: Vec<&str> = f.body.iter().map(|i| i.opcode.as_str()).collect();
    assert_eq!(opcodes, vec!["try", "nop", "delegate"]);
}

#[test]
fn let_instruction_carries_its_locals_into_the_immediate() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new(
        "(module (func $f let (local $x i32) local.get $x end))",
        &mut sink,
    );
    let module = parser.parse_module(&mut sink);
    assert!(sink.is_empty());
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    let Immediate::Let { locals, .. } = &f.body[0].immediate else {
        panic!("expected a let immediate");
    };
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].1, wazm::types::ValType::I32);
}

#[test]
fn return_call_and_return_call_indirect_keep_their_operands() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new(
        "(module (func $f return_call $f) \
         (func $g (type 0) return_call_indirect (type 0)))",
        &mut sink,
    );
    let module = parser.parse_module(&mut sink);
    assert!(sink.is_empty());
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    assert_eq!(f.body[0].opcode, "return_call");
    assert!(matches!(f.body[0].immediate, Immediate::Var(_)));

    let ModuleItem::Function(g) = &module.items[1] else {
        panic!("expected function");
    };
    assert_eq!(g.body[0].opcode, "return_call_indirect");
    assert!(matches!(g.body[0].immediate, Immediate::CallIndirect { .. }));
}

#[test]
fn select_with_result_annotation_parses_as_select_t() {
    let mut sink = ErrorSink::new();
    let mut parser = Parser::new(
        "(module (func (result i32) i32.const 0 i32.const 1 i32.const 1 \
         select (result i32)))",
        &mut sink,
    );
    let module = parser.parse_module(&mut sink);
    assert!(sink.is_empty());
    let ModuleItem::Function(f) = &module.items[0] else {
        panic!("expected function");
    };
    let select = f
        .body
        .iter()
        .find(|i| i.opcode == "select")
        .expect("select instruction");
    assert_eq!(
        select.immediate,
        Immediate::SelectT(vec![wazm::types::ValType::I32])
    );
}

#[test]
fn select_with_declared_result_types_requires_reference_types_feature() {
    let mut sink = ErrorSink::new();
    // magic+version, type section `() -> (i32)` so select_t's feature gate
    // triggers before any type-soundness concern, code section: a select_t
    // with one declared result type, then `end`.
    let mut data = MAGIC_AND_VERSION.to_vec();
    data.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7f]);
    data.extend_from_slice(&[3, 2, 1, 0]);
    // body: no locals, `select_t` (0x1c). Decoding aborts at the feature
    // check before reading `select_t`'s own operands, so the body need not
    // be fully well-formed past the opcode byte.
    data.extend_from_slice(&[10, 4, 1, 2, 0, 0x1c]);
    let _ = decode_module(&data, Features::MVP, &mut sink);
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| matches!(&d.error, wazm::Error::FeatureDisabled { feature } if *feature == "reference-types")));
}
