//! Decoding of the WebAssembly binary format into a [`Module`].
//!
//! Decoding is a single linear pass: sections are recognized by numeric
//! id and must appear in the order the core specification mandates;
//! duplicates and out-of-order sections are rejected. Custom sections are
//! skipped, except for the name section which feeds diagnostics.

mod operators;
mod reader;

pub(crate) use operators::{read_block_type, read_operator};
pub(crate) use reader::BinaryReader;

use crate::error::{WasmError, WasmResult};
use crate::features::WasmFeatures;
use crate::indices::*;
use crate::module::{
    ConstExpr, DataSegment, ElemKind, ElemSegment, FunctionBody, Import, Module,
};
use crate::operators::Operator;
use crate::types::{
    EntityIndex, EntityType, FuncType, Global, Memory, Table, ValType,
};
use crate::{wasm_unsupported, MAX_WASM_FUNCTION_LOCALS, WASM_MAX_PAGES};
use cranelift_entity::EntityRef;

/// Decodes the given bytes into a [`Module`].
///
/// This performs structural decoding only; [`crate::validate_module`]
/// performs the type checking. Feature-gated opcodes and section contents
/// fail here with [`WasmError::Unsupported`] when the corresponding flag
/// in `features` is off.
pub fn decode_module(data: &[u8], features: &WasmFeatures) -> WasmResult<Module> {
    Decoder::new(data, features).run()
}

/// Known sections, declared in their mandated order of appearance so the
/// derived ordering doubles as the ordering check. Note that the
/// data-count section (id 12) sits between element and code.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
enum SectionId {
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    DataCount,
    Code,
    Data,
}

struct Decoder<'a> {
    data: &'a [u8],
    features: &'a WasmFeatures,
    module: Module,
    /// Signature indices from the function section, consumed by the code
    /// section.
    func_types: Vec<TypeIndex>,
    /// Expected number of data segments, from the data-count section.
    data_count: Option<u32>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], features: &'a WasmFeatures) -> Decoder<'a> {
        Decoder {
            data,
            features,
            module: Module::new(),
            func_types: Vec::new(),
            data_count: None,
        }
    }

    fn run(mut self) -> WasmResult<Module> {
        let mut r = BinaryReader::new(self.data, 0);
        let magic = r.read_bytes(4)?;
        if magic != b"\0asm" {
            return Err(WasmError::invalid("bad magic number", 0));
        }
        let version = r.read_bytes(4)?;
        if version != [1, 0, 0, 0] {
            return Err(WasmError::invalid("unsupported binary version", 4));
        }

        // Ordering state: the code section comes after data-count but
        // before data, which `SectionId`'s declaration order encodes.
        let mut last: Option<SectionId> = None;
        while !r.done() {
            let id_offset = r.offset();
            let id = r.read_u8()?;
            let size = r.read_var_u32()? as usize;
            let payload_offset = r.offset();
            let payload = r.read_bytes(size)?;
            let mut section = BinaryReader::new(payload, payload_offset);

            if id == 0 {
                self.custom_section(&mut section)?;
                continue;
            }
            let id = section_id(id, id_offset)?;
            if let Some(prev) = last {
                if id <= prev {
                    return Err(WasmError::invalid(
                        format!("section {id:?} out of order"),
                        id_offset,
                    ));
                }
            }
            last = Some(id);

            match id {
                SectionId::Type => self.type_section(&mut section)?,
                SectionId::Import => self.import_section(&mut section)?,
                SectionId::Function => self.function_section(&mut section)?,
                SectionId::Table => self.table_section(&mut section)?,
                SectionId::Memory => self.memory_section(&mut section)?,
                SectionId::Global => self.global_section(&mut section)?,
                SectionId::Export => self.export_section(&mut section)?,
                SectionId::Start => self.start_section(&mut section)?,
                SectionId::Element => self.element_section(&mut section)?,
                SectionId::DataCount => {
                    if !self.features.bulk_memory {
                        return Err(wasm_unsupported!(
                            "data-count section requires bulk memory"
                        ));
                    }
                    self.data_count = Some(section.read_var_u32()?);
                }
                SectionId::Code => self.code_section(&mut section)?,
                SectionId::Data => self.data_section(&mut section)?,
            }
            if !section.done() {
                return Err(WasmError::invalid(
                    "trailing bytes at end of section",
                    section.offset(),
                ));
            }
        }

        if self.module.code.len() != self.func_types.len() {
            return Err(WasmError::invalid(
                "function and code section lengths disagree",
                self.data.len(),
            ));
        }
        if let Some(count) = self.data_count {
            if self.module.data.len() != count as usize {
                return Err(WasmError::invalid(
                    "data count and data section disagree",
                    self.data.len(),
                ));
            }
        }
        Ok(self.module)
    }

    fn type_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let offset = r.offset();
            if r.read_u8()? != 0x60 {
                return Err(WasmError::invalid("invalid function type", offset));
            }
            let nparams = r.read_var_u32()?;
            let mut params = Vec::with_capacity(nparams.min(1024) as usize);
            for _ in 0..nparams {
                params.push(r.read_val_type()?);
            }
            let nresults = r.read_var_u32()?;
            if nresults > 1 && !self.features.multi_value {
                return Err(wasm_unsupported!(
                    "multiple return values require the multi-value feature"
                ));
            }
            let mut results = Vec::with_capacity(nresults.min(1024) as usize);
            for _ in 0..nresults {
                results.push(r.read_val_type()?);
            }
            self.module.types.push(FuncType::new(params, results));
        }
        Ok(())
    }

    fn import_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let module = r.read_name()?.to_string();
            let field = r.read_name()?.to_string();
            let offset = r.offset();
            let (ty, index) = match r.read_u8()? {
                0x00 => {
                    let sig = TypeIndex::from_u32(r.read_var_u32()?);
                    let index = self.module.functions.push(sig);
                    self.module.num_imported_funcs += 1;
                    (EntityType::Function(sig), EntityIndex::Function(index))
                }
                0x01 => {
                    let table = self.read_table_type(r)?;
                    let index = self.module.tables.push(table);
                    self.module.num_imported_tables += 1;
                    (EntityType::Table(table), EntityIndex::Table(index))
                }
                0x02 => {
                    let memory = self.read_memory_type(r)?;
                    let index = self.module.memories.push(memory);
                    self.module.num_imported_memories += 1;
                    (EntityType::Memory(memory), EntityIndex::Memory(index))
                }
                0x03 => {
                    let global = self.read_global_type(r)?;
                    let index = self.module.globals.push(global);
                    self.module.num_imported_globals += 1;
                    (EntityType::Global(global), EntityIndex::Global(index))
                }
                b => {
                    return Err(WasmError::invalid(
                        format!("invalid import kind {b:#04x}"),
                        offset,
                    ))
                }
            };
            self.module.imports.push(Import { module, field, ty, index });
        }
        Ok(())
    }

    fn function_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let sig = TypeIndex::from_u32(r.read_var_u32()?);
            self.func_types.push(sig);
            self.module.functions.push(sig);
        }
        Ok(())
    }

    fn read_table_type(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<Table> {
        let offset = r.offset();
        let element = r.read_val_type()?;
        if !element.is_ref() {
            return Err(WasmError::invalid("invalid table element type", offset));
        }
        if element == ValType::ExternRef && !self.features.reference_types {
            return Err(wasm_unsupported!("externref tables require reference types"));
        }
        let (min, max, shared) = r.read_limits()?;
        if shared {
            return Err(WasmError::invalid("tables cannot be shared", offset));
        }
        let minimum = u32::try_from(min)
            .map_err(|_| WasmError::invalid("table minimum too large", offset))?;
        let maximum = match max {
            Some(m) => Some(
                u32::try_from(m)
                    .map_err(|_| WasmError::invalid("table maximum too large", offset))?,
            ),
            None => None,
        };
        if let Some(max) = maximum {
            if minimum > max {
                return Err(WasmError::invalid(
                    "table minimum exceeds maximum",
                    offset,
                ));
            }
        }
        Ok(Table { element, minimum, maximum })
    }

    fn read_memory_type(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<Memory> {
        let offset = r.offset();
        let (minimum, maximum, shared) = r.read_limits()?;
        if shared && !self.features.threads {
            return Err(wasm_unsupported!("shared memories require the threads feature"));
        }
        if shared && maximum.is_none() {
            return Err(WasmError::invalid(
                "shared memories must declare a maximum",
                offset,
            ));
        }
        if minimum > WASM_MAX_PAGES || maximum.map_or(false, |m| m > WASM_MAX_PAGES) {
            return Err(WasmError::invalid(
                "memory size exceeds the 4GiB limit",
                offset,
            ));
        }
        if let Some(max) = maximum {
            if minimum > max {
                return Err(WasmError::invalid(
                    "memory minimum exceeds maximum",
                    offset,
                ));
            }
        }
        Ok(Memory { minimum, maximum, shared })
    }

    fn read_global_type(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<Global> {
        let ty = r.read_val_type()?;
        let offset = r.offset();
        let mutability = match r.read_u8()? {
            0x00 => false,
            0x01 => true,
            b => {
                return Err(WasmError::invalid(
                    format!("invalid global mutability {b:#04x}"),
                    offset,
                ))
            }
        };
        Ok(Global { ty, mutability })
    }

    fn table_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        if count > 1 && !self.features.reference_types {
            return Err(wasm_unsupported!("multiple tables require reference types"));
        }
        for _ in 0..count {
            let table = self.read_table_type(r)?;
            self.module.tables.push(table);
        }
        Ok(())
    }

    fn memory_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let memory = self.read_memory_type(r)?;
            self.module.memories.push(memory);
        }
        if self.module.memories.len() > 1 {
            return Err(WasmError::invalid(
                "at most one linear memory is supported",
                r.offset(),
            ));
        }
        Ok(())
    }

    fn read_const_expr(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<ConstExpr> {
        let offset = r.offset();
        let expr = match read_operator(r, self.features)? {
            Operator::I32Const { value } => ConstExpr::I32(value),
            Operator::I64Const { value } => ConstExpr::I64(value),
            Operator::F32Const { value } => ConstExpr::F32(value),
            Operator::F64Const { value } => ConstExpr::F64(value),
            Operator::V128Const { value } => ConstExpr::V128(value),
            Operator::GlobalGet { global_index } => {
                ConstExpr::GlobalGet(GlobalIndex::from_u32(global_index))
            }
            Operator::RefNull { ty } => ConstExpr::RefNull(ty),
            Operator::RefFunc { function_index } => {
                ConstExpr::RefFunc(FuncIndex::from_u32(function_index))
            }
            op => {
                return Err(WasmError::invalid(
                    format!("unsupported constant expression operator {op:?}"),
                    offset,
                ))
            }
        };
        let end_offset = r.offset();
        match read_operator(r, self.features)? {
            Operator::End => Ok(expr),
            _ => Err(WasmError::invalid(
                "constant expression must be a single operator",
                end_offset,
            )),
        }
    }

    fn global_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let global = self.read_global_type(r)?;
            let init = self.read_const_expr(r)?;
            self.module.globals.push(global);
            self.module.global_initializers.push(init);
        }
        Ok(())
    }

    fn export_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let name = r.read_name()?.to_string();
            let offset = r.offset();
            let kind = r.read_u8()?;
            let index = r.read_var_u32()?;
            let entity = match kind {
                0x00 => EntityIndex::Function(FuncIndex::from_u32(index)),
                0x01 => EntityIndex::Table(TableIndex::from_u32(index)),
                0x02 => EntityIndex::Memory(MemoryIndex::from_u32(index)),
                0x03 => EntityIndex::Global(GlobalIndex::from_u32(index)),
                b => {
                    return Err(WasmError::invalid(
                        format!("invalid export kind {b:#04x}"),
                        offset,
                    ))
                }
            };
            if self.module.exports.insert(name.clone(), entity).is_some() {
                return Err(WasmError::invalid(
                    format!("duplicate export name `{name}`"),
                    offset,
                ));
            }
        }
        Ok(())
    }

    fn start_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        self.module.start_func = Some(FuncIndex::from_u32(r.read_var_u32()?));
        Ok(())
    }

    fn element_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let offset = r.offset();
            let flags = r.read_var_u32()?;
            if flags > 7 {
                return Err(WasmError::invalid("invalid element segment flags", offset));
            }
            if flags != 0 && !self.features.bulk_memory && !self.features.reference_types {
                return Err(wasm_unsupported!(
                    "non-MVP element segments require bulk memory or reference types"
                ));
            }
            let active = flags & 0b001 == 0;
            let explicit_table = flags & 0b010 != 0 && active;
            let exprs = flags & 0b100 != 0;

            let kind = if active {
                let table_index = if explicit_table {
                    TableIndex::from_u32(r.read_var_u32()?)
                } else {
                    TableIndex::from_u32(0)
                };
                let offset = self.read_const_expr(r)?;
                ElemKind::Active { table_index, offset }
            } else if flags & 0b010 != 0 {
                ElemKind::Declared
            } else {
                ElemKind::Passive
            };

            // The element type shows up as an elemkind byte or a reftype
            // depending on the encoding, and only for non-implicit forms.
            let element = if active && !explicit_table {
                ValType::FuncRef
            } else if exprs {
                let ty = r.read_val_type()?;
                if !ty.is_ref() {
                    return Err(WasmError::invalid("invalid element type", offset));
                }
                ty
            } else {
                let o = r.offset();
                match r.read_u8()? {
                    0x00 => ValType::FuncRef,
                    b => {
                        return Err(WasmError::invalid(
                            format!("invalid elemkind {b:#04x}"),
                            o,
                        ))
                    }
                }
            };

            let item_count = r.read_var_u32()?;
            let mut items = Vec::with_capacity(item_count.min(4096) as usize);
            for _ in 0..item_count {
                if exprs {
                    items.push(self.read_const_expr(r)?);
                } else {
                    items.push(ConstExpr::RefFunc(FuncIndex::from_u32(r.read_var_u32()?)));
                }
            }
            self.module.elements.push(ElemSegment {
                kind,
                element,
                items: items.into(),
            });
        }
        Ok(())
    }

    fn code_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        if count as usize != self.func_types.len() {
            return Err(WasmError::invalid(
                "function and code section lengths disagree",
                r.offset(),
            ));
        }
        for _ in 0..count {
            let size = r.read_var_u32()? as usize;
            let body_offset = r.offset();
            let bytes = r.read_bytes(size)?;
            let mut body = BinaryReader::new(bytes, body_offset);

            let mut locals = Vec::new();
            let ngroups = body.read_var_u32()?;
            for _ in 0..ngroups {
                let n = body.read_var_u32()?;
                let ty = body.read_val_type()?;
                if locals.len() as u64 + n as u64 > MAX_WASM_FUNCTION_LOCALS as u64 {
                    return Err(WasmError::invalid("too many locals", body.offset()));
                }
                locals.extend(std::iter::repeat(ty).take(n as usize));
            }

            let mut code = Vec::new();
            let mut offsets = Vec::new();
            while !body.done() {
                offsets.push(body.offset() as u32);
                code.push(read_operator(&mut body, self.features)?);
            }
            match code.last() {
                Some(Operator::End) => {}
                _ => {
                    return Err(WasmError::invalid(
                        "function body lacks an `end`",
                        body.offset(),
                    ))
                }
            }
            self.module.code.push(FunctionBody { locals, code, offsets });
        }
        Ok(())
    }

    fn data_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let count = r.read_var_u32()?;
        for _ in 0..count {
            let offset = r.offset();
            let flags = r.read_var_u32()?;
            let active = match flags {
                0 => Some((MemoryIndex::from_u32(0), self.read_const_expr(r)?)),
                1 => {
                    if !self.features.bulk_memory {
                        return Err(wasm_unsupported!(
                            "passive data segments require bulk memory"
                        ));
                    }
                    None
                }
                2 => {
                    let memory = MemoryIndex::from_u32(r.read_var_u32()?);
                    Some((memory, self.read_const_expr(r)?))
                }
                _ => {
                    return Err(WasmError::invalid(
                        "invalid data segment flags",
                        offset,
                    ))
                }
            };
            let len = r.read_var_u32()? as usize;
            let data = r.read_bytes(len)?.to_vec().into();
            self.module.data.push(DataSegment { active, data });
        }
        Ok(())
    }

    fn custom_section(&mut self, r: &mut BinaryReader<'a>) -> WasmResult<()> {
        let name = match r.read_name() {
            Ok(name) => name,
            // Malformed custom sections are skipped, not fatal.
            Err(_) => return Ok(()),
        };
        if name != "name" {
            log::trace!("skipping custom section `{name}`");
            return Ok(());
        }
        // Name subsections: 0 = module name, 1 = function names. Errors in
        // here degrade to missing names rather than failing the module.
        while !r.done() {
            let Ok(id) = r.read_u8() else { return Ok(()) };
            let Ok(size) = r.read_var_u32() else { return Ok(()) };
            let base = r.offset();
            let Ok(payload) = r.read_bytes(size as usize) else { return Ok(()) };
            let mut sub = BinaryReader::new(payload, base);
            match id {
                0 => {
                    if let Ok(name) = sub.read_name() {
                        self.module.name = Some(name.to_string());
                    }
                }
                1 => {
                    let Ok(count) = sub.read_var_u32() else { return Ok(()) };
                    for _ in 0..count {
                        let Ok(index) = sub.read_var_u32() else { return Ok(()) };
                        let Ok(name) = sub.read_name() else { return Ok(()) };
                        self.module
                            .func_names
                            .insert(FuncIndex::from_u32(index), name.to_string());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn section_id(id: u8, offset: usize) -> WasmResult<SectionId> {
    Ok(match id {
        1 => SectionId::Type,
        2 => SectionId::Import,
        3 => SectionId::Function,
        4 => SectionId::Table,
        5 => SectionId::Memory,
        6 => SectionId::Global,
        7 => SectionId::Export,
        8 => SectionId::Start,
        9 => SectionId::Element,
        10 => SectionId::Code,
        11 => SectionId::Data,
        12 => SectionId::DataCount,
        b => {
            return Err(WasmError::invalid(
                format!("unknown section id {b}"),
                offset,
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(wat: &str) -> WasmResult<Module> {
        let bytes = wat::parse_str(wat).unwrap();
        decode_module(&bytes, &WasmFeatures::default())
    }

    #[test]
    fn empty_module() {
        let module = decode("(module)").unwrap();
        assert!(module.functions.is_empty());
        assert!(module.exports.is_empty());
    }

    #[test]
    fn add_module() {
        let module = decode(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        )
        .unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.code.len(), 1);
        let ty = module.func_type(FuncIndex::from_u32(0));
        assert_eq!(ty.params(), &[ValType::I32, ValType::I32]);
        assert_eq!(ty.results(), &[ValType::I32]);
        assert!(matches!(
            module.exports.get("add"),
            Some(EntityIndex::Function(_))
        ));
    }

    #[test]
    fn bad_magic() {
        let err = decode_module(b"\0bad\x01\0\0\0", &WasmFeatures::default()).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn out_of_order_sections() {
        // A function section (id 3) followed by a type section (id 1).
        let bytes = [
            b'\0', b'a', b's', b'm', 1, 0, 0, 0, //
            3, 1, 0, // empty function section
            1, 1, 0, // empty type section
        ];
        let err = decode_module(&bytes, &WasmFeatures::default()).unwrap_err();
        assert!(err.to_string().contains("out of order"), "{err}");
    }

    #[test]
    fn duplicate_sections_rejected() {
        let bytes = [
            b'\0', b'a', b's', b'm', 1, 0, 0, 0, //
            1, 1, 0, //
            1, 1, 0, //
        ];
        assert!(decode_module(&bytes, &WasmFeatures::default()).is_err());
    }

    #[test]
    fn feature_gating() {
        let wat = r#"(module (memory 1 1 shared))"#;
        let bytes = wat::parse_str(wat).unwrap();
        let err = decode_module(&bytes, &WasmFeatures::default()).unwrap_err();
        assert!(matches!(err, WasmError::Unsupported(_)));
        let mut features = WasmFeatures::default();
        features.threads = true;
        decode_module(&bytes, &features).unwrap();
    }

    #[test]
    fn names_preserved() {
        let module = decode(
            r#"(module $hello (func $the_answer (result i32) i32.const 42))"#,
        )
        .unwrap();
        assert_eq!(module.name.as_deref(), Some("hello"));
        assert_eq!(
            module.func_name(FuncIndex::from_u32(0)),
            Some("the_answer")
        );
    }

    #[test]
    fn data_count_mismatch() {
        // data-count of 1 with no data section.
        let bytes = [
            b'\0', b'a', b's', b'm', 1, 0, 0, 0, //
            12, 1, 1, // datacount = 1
        ];
        assert!(decode_module(&bytes, &WasmFeatures::default()).is_err());
    }
}
