use std::sync::Arc;

use wasmparser::{Operator, Parser, Payload};

use crate::error::{Error, Result};
use crate::module::instr::{heap_val_type, FuncBody};
use crate::module::types::{
    ConstExpr, ConstOp, DataSegment, ElemSegment, Export, ExternKind, FuncType, GlobalDef,
    GlobalType, Import, ImportDesc, Limits, MemoryType, SegmentMode, TableDef, TableType, TagType,
    ValType,
};
use crate::module::ModuleInner;

/// Walk the payloads of already-validated bytes and build the AST.
pub(crate) fn parse(bytes: &[u8]) -> Result<ModuleInner> {
    let mut builder = ModuleInner::default();
    for payload in Parser::new(0).parse_all(bytes) {
        dispatch_payload(&mut builder, payload?)?;
    }
    builder.check_indices()?;
    Ok(builder)
}

fn dispatch_payload(builder: &mut ModuleInner, payload: Payload<'_>) -> Result<()> {
    match payload {
        Payload::TypeSection(reader) => {
            for ty in reader.into_iter_err_on_gc_types() {
                builder.types.push(FuncType::from_parser(&ty?)?);
            }
        }
        Payload::ImportSection(reader) => {
            for import in reader {
                builder.parse_import(import?)?;
            }
        }
        Payload::FunctionSection(reader) => {
            for type_idx in reader {
                builder.funcs.push(type_idx?);
            }
        }
        Payload::TableSection(reader) => {
            for table in reader {
                let table = table?;
                let init = match table.init {
                    wasmparser::TableInit::RefNull => None,
                    wasmparser::TableInit::Expr(expr) => Some(decode_const_expr(&expr)?),
                };
                builder.tables.push(TableDef {
                    ty: table_type(&table.ty)?,
                    init,
                });
            }
        }
        Payload::MemorySection(reader) => {
            for mem in reader {
                builder.memories.push(memory_type(&mem?)?);
            }
        }
        Payload::TagSection(reader) => {
            for tag in reader {
                let tag = tag?;
                builder.tags.push(TagType {
                    type_index: tag.func_type_idx,
                });
            }
        }
        Payload::GlobalSection(reader) => {
            for global in reader {
                let global = global?;
                builder.globals.push(GlobalDef {
                    ty: global_type(&global.ty)?,
                    init: decode_const_expr(&global.init_expr)?,
                });
            }
        }
        Payload::ExportSection(reader) => {
            for export in reader {
                let export = export?;
                let kind = match export.kind {
                    wasmparser::ExternalKind::Func => ExternKind::Func,
                    wasmparser::ExternalKind::Table => ExternKind::Table,
                    wasmparser::ExternalKind::Memory => ExternKind::Memory,
                    wasmparser::ExternalKind::Global => ExternKind::Global,
                    wasmparser::ExternalKind::Tag => ExternKind::Tag,
                    #[allow(unreachable_patterns)]
                    other => return Err(Error::Unsupported(format!("export kind {other:?}"))),
                };
                builder.exports.push(Export {
                    name: export.name.to_string(),
                    kind,
                    index: export.index,
                });
            }
        }
        Payload::StartSection { func, .. } => {
            builder.start = Some(func);
        }
        Payload::ElementSection(reader) => {
            for elem in reader {
                builder.parse_element(elem?)?;
            }
        }
        Payload::DataSection(reader) => {
            for data in reader {
                let data = data?;
                let mode = match data.kind {
                    wasmparser::DataKind::Passive => SegmentMode::Passive,
                    wasmparser::DataKind::Active {
                        memory_index,
                        offset_expr,
                    } => SegmentMode::Active {
                        index: memory_index,
                        offset: decode_const_expr(&offset_expr)?,
                    },
                };
                builder.datas.push(DataSegment {
                    mode,
                    bytes: data.data.into(),
                });
            }
        }
        Payload::CodeSectionEntry(body) => {
            let body = FuncBody::decode(&body, &builder.types)?;
            builder.codes.push(Arc::new(body));
        }
        Payload::ModuleSection { .. } | Payload::ComponentSection { .. } => {
            return Err(Error::Unsupported("component binaries".into()));
        }
        _ => {}
    }
    Ok(())
}

impl ModuleInner {
    fn parse_import(&mut self, import: wasmparser::Import<'_>) -> Result<()> {
        let desc = match import.ty {
            wasmparser::TypeRef::Func(idx) => {
                self.funcs.push(idx);
                self.num_imported_funcs += 1;
                ImportDesc::Func(idx)
            }
            wasmparser::TypeRef::Table(ty) => {
                self.num_imported_tables += 1;
                ImportDesc::Table(table_type(&ty)?)
            }
            wasmparser::TypeRef::Memory(ty) => {
                self.num_imported_memories += 1;
                ImportDesc::Memory(memory_type(&ty)?)
            }
            wasmparser::TypeRef::Global(ty) => {
                self.num_imported_globals += 1;
                ImportDesc::Global(global_type(&ty)?)
            }
            wasmparser::TypeRef::Tag(ty) => {
                self.num_imported_tags += 1;
                ImportDesc::Tag(TagType {
                    type_index: ty.func_type_idx,
                })
            }
            #[allow(unreachable_patterns)]
            other => return Err(Error::Unsupported(format!("import {other:?}"))),
        };
        self.imports.push(Import {
            module: import.module.to_string(),
            name: import.name.to_string(),
            desc,
        });
        Ok(())
    }

    fn parse_element(&mut self, elem: wasmparser::Element<'_>) -> Result<()> {
        let (elem_ty, items) = match elem.items {
            wasmparser::ElementItems::Functions(reader) => {
                let mut items = Vec::new();
                for idx in reader {
                    items.push(ConstExpr(vec![ConstOp::RefFunc(idx?)]));
                }
                (ValType::FuncRef, items)
            }
            wasmparser::ElementItems::Expressions(ty, reader) => {
                let mut items = Vec::new();
                for expr in reader {
                    items.push(decode_const_expr(&expr?)?);
                }
                (ValType::from_ref_type(ty)?, items)
            }
        };
        let mode = match elem.kind {
            wasmparser::ElementKind::Passive => SegmentMode::Passive,
            wasmparser::ElementKind::Declared => SegmentMode::Declared,
            wasmparser::ElementKind::Active {
                table_index,
                offset_expr,
            } => SegmentMode::Active {
                index: table_index.unwrap_or(0),
                offset: decode_const_expr(&offset_expr)?,
            },
        };
        self.elems.push(ElemSegment {
            mode,
            elem: elem_ty,
            items,
        });
        Ok(())
    }

    /// Every cross-reference between sections must point at an existing
    /// entry. The validator already guarantees this for well-formed input;
    /// re-checking keeps the AST self-consistent for the runtime.
    fn check_indices(&self) -> Result<()> {
        let num_types = self.types.len();
        let num_funcs = self.funcs.len();
        let num_tables = self.num_imported_tables as usize + self.tables.len();
        let num_memories = self.num_imported_memories as usize + self.memories.len();
        let num_globals = self.num_imported_globals as usize + self.globals.len();
        let num_tags = self.num_imported_tags as usize + self.tags.len();

        let check = |what: &str, idx: u32, len: usize| -> Result<()> {
            if (idx as usize) < len {
                Ok(())
            } else {
                Err(Error::Load(format!("{what} index {idx} out of range ({len})")))
            }
        };

        for &ty in &self.funcs {
            check("type", ty, num_types)?;
        }
        if self.funcs.len() - self.num_imported_funcs as usize != self.codes.len() {
            return Err(Error::Load(
                "function and code section lengths differ".into(),
            ));
        }
        for tag in self.imports.iter().filter_map(|i| match i.desc {
            ImportDesc::Tag(t) => Some(t),
            _ => None,
        }).chain(self.tags.iter().copied())
        {
            check("type", tag.type_index, num_types)?;
        }
        for export in &self.exports {
            let len = match export.kind {
                ExternKind::Func => num_funcs,
                ExternKind::Table => num_tables,
                ExternKind::Memory => num_memories,
                ExternKind::Global => num_globals,
                ExternKind::Tag => num_tags,
            };
            check("export", export.index, len)?;
        }
        if let Some(start) = self.start {
            check("start function", start, num_funcs)?;
        }
        for elem in &self.elems {
            if let SegmentMode::Active { index, .. } = elem.mode {
                check("table", index, num_tables)?;
            }
            for item in &elem.items {
                for op in &item.0 {
                    if let ConstOp::RefFunc(f) = op {
                        check("function", *f, num_funcs)?;
                    }
                }
            }
        }
        for data in &self.datas {
            if let SegmentMode::Active { index, .. } = data.mode {
                check("memory", index, num_memories)?;
            }
        }
        Ok(())
    }
}

fn limits(initial: u64, maximum: Option<u64>) -> Limits {
    Limits {
        min: initial,
        max: maximum,
    }
}

fn table_type(ty: &wasmparser::TableType) -> Result<TableType> {
    Ok(TableType {
        elem: ValType::from_ref_type(ty.element_type)?,
        limits: limits(ty.initial, ty.maximum),
    })
}

fn memory_type(ty: &wasmparser::MemoryType) -> Result<MemoryType> {
    if ty.memory64 {
        return Err(Error::Unsupported("memory64".into()));
    }
    Ok(MemoryType {
        limits: limits(ty.initial, ty.maximum),
        shared: ty.shared,
    })
}

fn global_type(ty: &wasmparser::GlobalType) -> Result<GlobalType> {
    Ok(GlobalType {
        content: ValType::from_parser(ty.content_type)?,
        mutable: ty.mutable,
    })
}

fn decode_const_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<ConstExpr> {
    let mut reader = expr.get_operators_reader();
    let mut ops = Vec::new();
    loop {
        let op = match reader.read()? {
            Operator::End => break,
            Operator::I32Const { value } => ConstOp::I32Const(value),
            Operator::I64Const { value } => ConstOp::I64Const(value),
            Operator::F32Const { value } => ConstOp::F32Const(value.bits()),
            Operator::F64Const { value } => ConstOp::F64Const(value.bits()),
            Operator::RefNull { hty } => ConstOp::RefNull(heap_val_type(hty)?),
            Operator::RefFunc { function_index } => ConstOp::RefFunc(function_index),
            Operator::GlobalGet { global_index } => ConstOp::GlobalGet(global_index),
            Operator::I32Add => ConstOp::I32Add,
            Operator::I32Sub => ConstOp::I32Sub,
            Operator::I32Mul => ConstOp::I32Mul,
            Operator::I64Add => ConstOp::I64Add,
            Operator::I64Sub => ConstOp::I64Sub,
            Operator::I64Mul => ConstOp::I64Mul,
            other => {
                return Err(Error::Load(format!(
                    "unsupported constant expression operator {other:?}"
                )))
            }
        };
        ops.push(op);
    }
    Ok(ConstExpr(ops))
}
