use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{Error, Result, Trap};
use crate::host::Caller;
use crate::interpreter::numeric;
use crate::interpreter::stack::ValueStack;
use crate::module::instr::{AtomicKind, FuncBody, Instr, LoadKind, RmwOp, StoreKind, NO_ELSE};
use crate::store::{
    FuncAddr, FuncInstance, InstanceAddr, MemoryInstance, ModuleInstance, Store, TagAddr,
};
use crate::value::{check_types, Ref, Val};

struct Frame {
    body: Arc<FuncBody>,
    instance: Arc<ModuleInstance>,
    inst_addr: InstanceAddr,
    locals: Vec<Val>,
    pc: usize,
    /// Index into `labels` where this frame's labels begin.
    labels_start: usize,
    /// Operand stack height when the frame was entered.
    stack_height: usize,
    arity: usize,
}

/// A thrown exception, kept alive by the `catch` label handling it so that
/// `rethrow` can raise it again.
#[derive(Debug)]
struct Exception {
    tag: TagAddr,
    payload: Vec<Val>,
}

enum LabelKind {
    /// `block`, `loop`, `if` and the implicit function block.
    Plain,
    Try { handlers: u32 },
    Catch(Arc<Exception>),
}

struct Label {
    kind: LabelKind,
    /// Operand stack height below the block's parameters.
    height: usize,
    /// Values carried by a branch: results, or parameters for `loop`.
    arity: usize,
    target: usize,
}

pub(crate) struct Machine<'s> {
    store: &'s mut Store,
    engine: Engine,
    /// Wasm frames of the machines suspended below this one.
    base_depth: usize,
    stack: ValueStack,
    labels: Vec<Label>,
    /// Suspended callers of the current frame.
    frames: Vec<Frame>,
}

impl<'s> Machine<'s> {
    pub(crate) fn new(store: &'s mut Store) -> Self {
        let engine = store.engine().clone();
        let base_depth = store.call_depth;
        Machine {
            store,
            engine,
            base_depth,
            stack: ValueStack::with_capacity(256),
            labels: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Run the module-defined function `addr` to completion.
    pub(crate) fn run(mut self, addr: FuncAddr, args: Vec<Val>) -> Result<Vec<Val>> {
        let frame = self.enter(addr, args)?;
        let arity = frame.arity;
        self.execute(frame)?;
        self.stack.pop_n(arity)
    }

    fn enter(&mut self, addr: FuncAddr, args: Vec<Val>) -> Result<Frame> {
        let (inst_addr, body, arity) = match self.store.func(addr)? {
            FuncInstance::Wasm {
                ty,
                instance,
                module,
                def_index,
            } => {
                let body = module
                    .code(*def_index)
                    .cloned()
                    .ok_or(Error::Fault("missing function body"))?;
                (*instance, body, ty.results().len())
            }
            FuncInstance::Host(_) => return Err(Error::Fault("host function entered as wasm")),
        };
        if self.base_depth + self.frames.len() + 1 >= self.engine.max_call_depth() {
            return Err(Trap::StackExhausted.into());
        }
        let instance = self.store.defining_instance(inst_addr)?.clone();

        let mut locals = args;
        locals.extend(body.locals.iter().map(|ty| Val::zero_for(*ty)));
        if self.stack.len() + locals.len() > self.engine.max_stack_values() {
            return Err(Trap::StackExhausted.into());
        }

        let labels_start = self.labels.len();
        self.labels.push(Label {
            kind: LabelKind::Plain,
            height: self.stack.len(),
            arity,
            target: body.instrs.len().saturating_sub(1),
        });
        Ok(Frame {
            body,
            instance,
            inst_addr,
            locals,
            pc: 0,
            labels_start,
            stack_height: self.stack.len(),
            arity,
        })
    }

    fn execute(&mut self, mut frame: Frame) -> Result<()> {
        loop {
            let instr = *frame
                .body
                .instrs
                .get(frame.pc)
                .ok_or(Error::Fault("pc out of range"))?;
            frame.pc += 1;
            self.engine.statistics().add_instructions(1)?;

            match instr {
                Instr::Unreachable => return Err(Trap::Unreachable.into()),
                Instr::Nop => {}
                Instr::Block { arity, end } => {
                    self.push_label(LabelKind::Plain, arity.params, arity.results, end as usize)?;
                }
                Instr::Loop { arity } => {
                    self.push_label(LabelKind::Plain, arity.params, arity.params, frame.pc)?;
                }
                Instr::If { arity, else_pc, end } => {
                    let cond = self.stack.pop_i32()?;
                    self.push_label(LabelKind::Plain, arity.params, arity.results, end as usize)?;
                    if cond == 0 {
                        frame.pc = if else_pc == NO_ELSE {
                            end as usize
                        } else {
                            else_pc as usize + 1
                        };
                    }
                }
                // Reaching a clause boundary in normal flow ends the block.
                Instr::Else | Instr::Catch(_) | Instr::CatchAll => {
                    let label = self.labels.last().ok_or(Error::Fault("no enclosing block"))?;
                    frame.pc = label.target;
                }
                Instr::End => {
                    self.labels.pop();
                    if self.labels.len() <= frame.labels_start {
                        frame = match self.return_from(frame)? {
                            Some(caller) => caller,
                            None => return Ok(()),
                        };
                    }
                }
                Instr::Try { arity, end, handlers } => {
                    self.push_label(
                        LabelKind::Try { handlers },
                        arity.params,
                        arity.results,
                        end as usize,
                    )?;
                }
                Instr::Throw(tag_index) => {
                    let tag = frame
                        .instance
                        .tag(tag_index)
                        .ok_or(Error::Fault("tag index out of range"))?;
                    let count = self.store.tag(tag)?.ty.params().len();
                    let payload = self.stack.pop_n(count)?;
                    frame = self.throw(frame, Arc::new(Exception { tag, payload }))?;
                }
                Instr::Rethrow(depth) => {
                    let idx = self.label_index(&frame, depth)?;
                    let LabelKind::Catch(exception) = &self.labels[idx].kind else {
                        return Err(Error::Fault("rethrow outside of a catch clause"));
                    };
                    let exception = exception.clone();
                    frame = self.throw(frame, exception)?;
                }
                Instr::Br(depth) => self.branch(&mut frame, depth)?,
                Instr::BrIf(depth) => {
                    if self.stack.pop_i32()? != 0 {
                        self.branch(&mut frame, depth)?;
                    }
                }
                Instr::BrTable(table) => {
                    let index = self.stack.pop_u32()?;
                    let depth = frame
                        .body
                        .br_tables
                        .get(table as usize)
                        .ok_or(Error::Fault("br_table index out of range"))?
                        .depth(index);
                    self.branch(&mut frame, depth)?;
                }
                Instr::Return => {
                    frame = match self.return_from(frame)? {
                        Some(caller) => caller,
                        None => return Ok(()),
                    };
                }
                Instr::Call(func_index) => {
                    let addr = frame
                        .instance
                        .func(func_index)
                        .ok_or(Error::Fault("function index out of range"))?;
                    frame = self.call(frame, addr)?;
                }
                Instr::CallIndirect { type_index, table } => {
                    let table = frame
                        .instance
                        .table(table)
                        .ok_or(Error::Fault("table index out of range"))?;
                    let index = self.stack.pop_u32()?;
                    let addr = match self.store.table(table)?.get(index) {
                        Ok(Ref::Func(Some(addr))) => addr,
                        _ => return Err(Trap::UndefinedElement.into()),
                    };
                    let expected = frame
                        .instance
                        .types
                        .get(type_index as usize)
                        .ok_or(Error::Fault("type index out of range"))?;
                    if self.store.func(addr)?.ty() != expected {
                        return Err(Trap::IndirectCallTypeMismatch.into());
                    }
                    frame = self.call(frame, addr)?;
                }

                Instr::Drop => {
                    self.stack.pop()?;
                }
                Instr::Select => {
                    let cond = self.stack.pop_i32()?;
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    self.stack.push(if cond != 0 { a } else { b });
                }

                Instr::LocalGet(index) => {
                    let val = *frame
                        .locals
                        .get(index as usize)
                        .ok_or(Error::Fault("local index out of range"))?;
                    self.stack.push(val);
                }
                Instr::LocalSet(index) => {
                    let val = self.stack.pop()?;
                    set_local(&mut frame, index, val)?;
                }
                Instr::LocalTee(index) => {
                    let val = self.stack.peek()?;
                    set_local(&mut frame, index, val)?;
                }
                Instr::GlobalGet(index) => {
                    let addr = frame
                        .instance
                        .global(index)
                        .ok_or(Error::Fault("global index out of range"))?;
                    let val = self.store.global(addr)?.get();
                    self.stack.push(val);
                }
                Instr::GlobalSet(index) => {
                    let addr = frame
                        .instance
                        .global(index)
                        .ok_or(Error::Fault("global index out of range"))?;
                    let val = self.stack.pop()?;
                    self.store.global_mut(addr)?.set(val)?;
                }

                Instr::TableGet(index) => {
                    let addr = table_addr(&frame, index)?;
                    let elem = self.stack.pop_u32()?;
                    let val = self.store.table(addr)?.get(elem)?;
                    self.stack.push(Val::Ref(val));
                }
                Instr::TableSet(index) => {
                    let addr = table_addr(&frame, index)?;
                    let val = self.stack.pop_ref()?;
                    let elem = self.stack.pop_u32()?;
                    self.store.table_mut(addr)?.set(elem, val)?;
                }
                Instr::TableSize(index) => {
                    let addr = table_addr(&frame, index)?;
                    let size = self.store.table(addr)?.size();
                    self.stack.push(Val::I32(size as i32));
                }
                Instr::TableGrow(index) => {
                    let addr = table_addr(&frame, index)?;
                    let delta = self.stack.pop_u32()?;
                    let init = self.stack.pop_ref()?;
                    let old = self.store.table_mut(addr)?.grow(delta, init);
                    self.stack.push(Val::I32(old.map_or(-1, |old| old as i32)));
                }
                Instr::TableFill(index) => {
                    let addr = table_addr(&frame, index)?;
                    let len = self.stack.pop_u32()?;
                    let val = self.stack.pop_ref()?;
                    let dst = self.stack.pop_u32()?;
                    self.store.table_mut(addr)?.fill(dst, val, len)?;
                }
                Instr::TableCopy { dst, src } => {
                    let dst_addr = table_addr(&frame, dst)?;
                    let src_addr = table_addr(&frame, src)?;
                    let len = self.stack.pop_u32()?;
                    let s = self.stack.pop_u32()?;
                    let d = self.stack.pop_u32()?;
                    if dst_addr == src_addr {
                        self.store.table_mut(dst_addr)?.copy_within(d, s, len)?;
                    } else {
                        let items = self.store.table(src_addr)?.slice(s, len)?.to_vec();
                        self.store.table_mut(dst_addr)?.init(d, &items)?;
                    }
                }
                Instr::TableInit { elem, table } => {
                    let addr = table_addr(&frame, table)?;
                    let elem_addr = *frame
                        .instance
                        .elems
                        .get(elem as usize)
                        .ok_or(Error::Fault("element index out of range"))?;
                    let len = self.stack.pop_u32()?;
                    let s = self.stack.pop_u32()? as usize;
                    let d = self.stack.pop_u32()?;
                    let segment = self.store.elems.get(elem_addr)?;
                    if segment.ty != self.store.table(addr)?.ty().elem {
                        return Err(Error::Fault("element segment type differs from its table"));
                    }
                    let items = segment
                        .refs()
                        .get(s..s + len as usize)
                        .ok_or(Trap::TableOutOfBounds)?
                        .to_vec();
                    self.store.table_mut(addr)?.init(d, &items)?;
                }
                Instr::ElemDrop(elem) => {
                    let elem_addr = *frame
                        .instance
                        .elems
                        .get(elem as usize)
                        .ok_or(Error::Fault("element index out of range"))?;
                    self.store.elems.get_mut(elem_addr)?.drop_refs();
                }

                Instr::Load(kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    self.stack.push(load(mem, kind, ea)?);
                }
                Instr::Store(kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let val = self.stack.pop()?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    store(mem, kind, ea, val)?;
                }
                Instr::MemorySize(index) => {
                    let mem = memory_at(self.store, &frame.instance, index)?;
                    self.stack.push(Val::I32(mem.size_pages() as i32));
                }
                Instr::MemoryGrow(index) => {
                    let mem = memory_at(self.store, &frame.instance, index)?;
                    let delta = self.stack.pop_u32()?;
                    let old = mem.grow(delta as u64);
                    self.stack.push(Val::I32(old.map_or(-1, |old| old as i32)));
                }
                Instr::MemoryFill(index) => {
                    let mem = memory_at(self.store, &frame.instance, index)?;
                    let len = self.stack.pop_u32()?;
                    let val = self.stack.pop_i32()?;
                    let dst = self.stack.pop_u32()?;
                    mem.fill(dst as u64, val as u8, len as u64)?;
                }
                Instr::MemoryCopy { dst, src } => {
                    let dst_mem = memory_at(self.store, &frame.instance, dst)?;
                    let src_mem = memory_at(self.store, &frame.instance, src)?;
                    let len = self.stack.pop_u32()? as u64;
                    let s = self.stack.pop_u32()? as u64;
                    let d = self.stack.pop_u32()? as u64;
                    if dst_mem.same(src_mem) {
                        dst_mem.copy_within(d, s, len)?;
                    } else {
                        let bytes = src_mem.read_vec(s, len)?;
                        dst_mem.write(d, &bytes)?;
                    }
                }
                Instr::MemoryInit { data, memory } => {
                    let mem = memory_at(self.store, &frame.instance, memory)?;
                    let data_addr = *frame
                        .instance
                        .datas
                        .get(data as usize)
                        .ok_or(Error::Fault("data index out of range"))?;
                    let len = self.stack.pop_u32()? as usize;
                    let s = self.stack.pop_u32()? as usize;
                    let d = self.stack.pop_u32()?;
                    let bytes = self
                        .store
                        .datas
                        .get(data_addr)?
                        .bytes()
                        .get(s..s + len)
                        .ok_or(Trap::MemoryOutOfBounds)?;
                    mem.write(d as u64, bytes)?;
                }
                Instr::DataDrop(data) => {
                    let data_addr = *frame
                        .instance
                        .datas
                        .get(data as usize)
                        .ok_or(Error::Fault("data index out of range"))?;
                    self.store.datas.get_mut(data_addr)?.drop_bytes();
                }

                Instr::I32Const(v) => self.stack.push(Val::I32(v)),
                Instr::I64Const(v) => self.stack.push(Val::I64(v)),
                Instr::F32Const(bits) => self.stack.push(Val::F32(f32::from_bits(bits))),
                Instr::F64Const(bits) => self.stack.push(Val::F64(f64::from_bits(bits))),
                Instr::RefNull(ty) => {
                    let null = Ref::null(ty).ok_or(Error::Fault("ref.null of a value type"))?;
                    self.stack.push(Val::Ref(null));
                }
                Instr::RefIsNull => {
                    let r = self.stack.pop_ref()?;
                    self.stack.push(Val::I32(r.is_null() as i32));
                }
                Instr::RefFunc(index) => {
                    let addr = frame
                        .instance
                        .func(index)
                        .ok_or(Error::Fault("function index out of range"))?;
                    self.stack.push(Val::Ref(Ref::Func(Some(addr))));
                }

                Instr::Numeric(op) => numeric::exec(&mut self.stack, op)?,

                Instr::AtomicLoad(kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    check_atomic(mem, ea, kind.width())?;
                    let _guard = mem.lock_atomics();
                    let val = read_atomic(mem, ea, kind.width())?;
                    self.stack.push(atomic_val(kind, val));
                }
                Instr::AtomicStore(kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let val = pop_atomic(&mut self.stack, kind)?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    check_atomic(mem, ea, kind.width())?;
                    let _guard = mem.lock_atomics();
                    write_atomic(mem, ea, kind.width(), val)?;
                }
                Instr::AtomicRmw(op, kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let operand = pop_atomic(&mut self.stack, kind)?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    check_atomic(mem, ea, kind.width())?;
                    let _guard = mem.lock_atomics();
                    let old = read_atomic(mem, ea, kind.width())?;
                    let new = match op {
                        RmwOp::Add => old.wrapping_add(operand),
                        RmwOp::Sub => old.wrapping_sub(operand),
                        RmwOp::And => old & operand,
                        RmwOp::Or => old | operand,
                        RmwOp::Xor => old ^ operand,
                        RmwOp::Xchg => operand,
                    };
                    write_atomic(mem, ea, kind.width(), new & width_mask(kind.width()))?;
                    self.stack.push(atomic_val(kind, old));
                }
                Instr::AtomicCmpxchg(kind, memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let replacement = pop_atomic(&mut self.stack, kind)?;
                    let expected = pop_atomic(&mut self.stack, kind)?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    check_atomic(mem, ea, kind.width())?;
                    let _guard = mem.lock_atomics();
                    let old = read_atomic(mem, ea, kind.width())?;
                    if old == expected {
                        write_atomic(mem, ea, kind.width(), replacement)?;
                    }
                    self.stack.push(atomic_val(kind, old));
                }
                Instr::AtomicNotify(memarg) => {
                    let mem = memory_at(self.store, &frame.instance, memarg.memory)?;
                    let _count = self.stack.pop_i32()?;
                    let ea = effective_address(self.stack.pop_u32()?, memarg.offset)?;
                    check_atomic(mem, ea, 4)?;
                    // No waiters can exist without `memory.atomic.wait`.
                    self.stack.push(Val::I32(0));
                }
                Instr::AtomicFence => fence(Ordering::SeqCst),
            }
        }
    }

    fn push_label(
        &mut self,
        kind: LabelKind,
        params: u32,
        arity: u32,
        target: usize,
    ) -> Result<()> {
        let height = self
            .stack
            .len()
            .checked_sub(params as usize)
            .ok_or(Error::Fault("operand stack underflow"))?;
        self.labels.push(Label {
            kind,
            height,
            arity: arity as usize,
            target,
        });
        Ok(())
    }

    fn label_index(&self, frame: &Frame, depth: u32) -> Result<usize> {
        self.labels
            .len()
            .checked_sub(1 + depth as usize)
            .filter(|idx| *idx >= frame.labels_start)
            .ok_or(Error::Fault("branch depth out of range"))
    }

    /// Unwind to the label `depth` levels out and continue at its target.
    /// Branching to a block lands on its `end`, which pops the label.
    fn branch(&mut self, frame: &mut Frame, depth: u32) -> Result<()> {
        let idx = self.label_index(frame, depth)?;
        let label = &self.labels[idx];
        let (height, arity, target) = (label.height, label.arity, label.target);
        self.stack.unwind(height, arity)?;
        self.labels.truncate(idx + 1);
        frame.pc = target;
        Ok(())
    }

    /// Pop `frame`, leaving its results on the stack. Returns the caller to
    /// resume, or `None` when the entry frame returned.
    fn return_from(&mut self, frame: Frame) -> Result<Option<Frame>> {
        self.stack.unwind(frame.stack_height, frame.arity)?;
        self.labels.truncate(frame.labels_start);
        Ok(self.frames.pop())
    }

    fn call(&mut self, frame: Frame, addr: FuncAddr) -> Result<Frame> {
        let func = self.store.func(addr)?;
        let params = func.ty().params().len();
        let host = match func {
            FuncInstance::Host(host) => Some(host.clone()),
            FuncInstance::Wasm { .. } => None,
        };
        let args = self.stack.pop_n(params)?;

        let Some(host) = host else {
            let callee = self.enter(addr, args)?;
            self.frames.push(frame);
            return Ok(callee);
        };

        check_types(&args, host.ty().params())?;
        let outer = self.store.call_depth;
        self.store.call_depth = self.base_depth + self.frames.len() + 1;
        let mut caller = Caller::new(self.store, Some(frame.inst_addr));
        let outcome = host.call(&mut caller, &args);
        self.store.call_depth = outer;
        match outcome {
            Ok(results) => {
                self.stack.extend(results);
                Ok(frame)
            }
            // An exception escaping wasm re-entered from the host keeps
            // propagating through this machine's frames.
            Err(Error::Trap(Trap::UncaughtException { tag, payload })) => {
                let exception = Arc::new(Exception {
                    tag: TagAddr(tag),
                    payload,
                });
                self.throw(frame, exception)
            }
            Err(err) => Err(err),
        }
    }

    /// Search for a `try` whose clauses match the exception, innermost
    /// first and across frames. `catch` labels are skipped so that a
    /// handler never catches its own throws.
    fn throw(&mut self, mut frame: Frame, exception: Arc<Exception>) -> Result<Frame> {
        loop {
            while self.labels.len() > frame.labels_start {
                let Some(label) = self.labels.last_mut() else {
                    break;
                };
                if let LabelKind::Try { handlers } = label.kind {
                    let clauses = frame
                        .body
                        .handlers
                        .get(handlers as usize)
                        .ok_or(Error::Fault("handler index out of range"))?;
                    let found = clauses.iter().copied().find(|h| match h.tag {
                        None => true,
                        Some(tag) => frame.instance.tag(tag) == Some(exception.tag),
                    });
                    if let Some(handler) = found {
                        self.stack.truncate(label.height);
                        if handler.tag.is_some() {
                            self.stack.extend(exception.payload.iter().copied());
                        }
                        label.kind = LabelKind::Catch(exception);
                        frame.pc = handler.pc as usize;
                        return Ok(frame);
                    }
                }
                self.labels.pop();
            }
            frame = match self.frames.pop() {
                Some(caller) => caller,
                None => {
                    tracing::debug!(tag = %exception.tag, "uncaught exception");
                    return Err(Trap::UncaughtException {
                        tag: exception.tag.index(),
                        payload: exception.payload.clone(),
                    }
                    .into());
                }
            };
        }
    }
}

fn set_local(frame: &mut Frame, index: u32, val: Val) -> Result<()> {
    let slot = frame
        .locals
        .get_mut(index as usize)
        .ok_or(Error::Fault("local index out of range"))?;
    *slot = val;
    Ok(())
}

fn table_addr(frame: &Frame, index: u32) -> Result<crate::store::TableAddr> {
    frame
        .instance
        .table(index)
        .ok_or(Error::Fault("table index out of range"))
}

fn memory_at<'a>(
    store: &'a Store,
    instance: &ModuleInstance,
    index: u32,
) -> Result<&'a MemoryInstance> {
    let addr = instance
        .memory(index)
        .ok_or(Error::Fault("memory index out of range"))?;
    store.memory(addr)
}

fn effective_address(base: u32, offset: u64) -> Result<u64, Trap> {
    (base as u64)
        .checked_add(offset)
        .ok_or(Trap::MemoryOutOfBounds)
}

fn load(mem: &MemoryInstance, kind: LoadKind, ea: u64) -> Result<Val, Trap> {
    Ok(match kind {
        LoadKind::I32 => Val::I32(i32::from_le_bytes(mem.load(ea)?)),
        LoadKind::I64 => Val::I64(i64::from_le_bytes(mem.load(ea)?)),
        LoadKind::F32 => Val::F32(f32::from_le_bytes(mem.load(ea)?)),
        LoadKind::F64 => Val::F64(f64::from_le_bytes(mem.load(ea)?)),
        LoadKind::I32S8 => Val::I32(i8::from_le_bytes(mem.load(ea)?) as i32),
        LoadKind::I32U8 => Val::I32(u8::from_le_bytes(mem.load(ea)?) as i32),
        LoadKind::I32S16 => Val::I32(i16::from_le_bytes(mem.load(ea)?) as i32),
        LoadKind::I32U16 => Val::I32(u16::from_le_bytes(mem.load(ea)?) as i32),
        LoadKind::I64S8 => Val::I64(i8::from_le_bytes(mem.load(ea)?) as i64),
        LoadKind::I64U8 => Val::I64(u8::from_le_bytes(mem.load(ea)?) as i64),
        LoadKind::I64S16 => Val::I64(i16::from_le_bytes(mem.load(ea)?) as i64),
        LoadKind::I64U16 => Val::I64(u16::from_le_bytes(mem.load(ea)?) as i64),
        LoadKind::I64S32 => Val::I64(i32::from_le_bytes(mem.load(ea)?) as i64),
        LoadKind::I64U32 => Val::I64(u32::from_le_bytes(mem.load(ea)?) as i64),
    })
}

fn store(mem: &MemoryInstance, kind: StoreKind, ea: u64, val: Val) -> Result<()> {
    match kind {
        StoreKind::I32 => mem.store(ea, val.as_i32()?.to_le_bytes())?,
        StoreKind::I64 => mem.store(ea, val.as_i64()?.to_le_bytes())?,
        StoreKind::F32 => mem.store(ea, val.as_f32()?.to_le_bytes())?,
        StoreKind::F64 => mem.store(ea, val.as_f64()?.to_le_bytes())?,
        StoreKind::I32As8 => mem.store(ea, (val.as_i32()? as u8).to_le_bytes())?,
        StoreKind::I32As16 => mem.store(ea, (val.as_i32()? as u16).to_le_bytes())?,
        StoreKind::I64As8 => mem.store(ea, (val.as_i64()? as u8).to_le_bytes())?,
        StoreKind::I64As16 => mem.store(ea, (val.as_i64()? as u16).to_le_bytes())?,
        StoreKind::I64As32 => mem.store(ea, (val.as_i64()? as u32).to_le_bytes())?,
    }
    Ok(())
}

/// Bounds first, then natural alignment.
fn check_atomic(mem: &MemoryInstance, ea: u64, width: u64) -> Result<(), Trap> {
    let end = ea.checked_add(width).ok_or(Trap::MemoryOutOfBounds)?;
    if end > mem.size_bytes() {
        return Err(Trap::MemoryOutOfBounds);
    }
    if ea % width != 0 {
        return Err(Trap::UnalignedAtomic);
    }
    Ok(())
}

fn width_mask(width: u64) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

fn pop_atomic(stack: &mut ValueStack, kind: AtomicKind) -> Result<u64> {
    let raw = if kind.is_i64() {
        stack.pop_i64()? as u64
    } else {
        stack.pop_i32()? as u32 as u64
    };
    Ok(raw & width_mask(kind.width()))
}

fn atomic_val(kind: AtomicKind, raw: u64) -> Val {
    if kind.is_i64() {
        Val::I64(raw as i64)
    } else {
        Val::I32(raw as u32 as i32)
    }
}

fn read_atomic(mem: &MemoryInstance, ea: u64, width: u64) -> Result<u64, Trap> {
    Ok(match width {
        1 => u8::from_le_bytes(mem.load(ea)?) as u64,
        2 => u16::from_le_bytes(mem.load(ea)?) as u64,
        4 => u32::from_le_bytes(mem.load(ea)?) as u64,
        _ => u64::from_le_bytes(mem.load(ea)?),
    })
}

fn write_atomic(mem: &MemoryInstance, ea: u64, width: u64, value: u64) -> Result<(), Trap> {
    match width {
        1 => mem.store(ea, (value as u8).to_le_bytes()),
        2 => mem.store(ea, (value as u16).to_le_bytes()),
        4 => mem.store(ea, (value as u32).to_le_bytes()),
        _ => mem.store(ea, value.to_le_bytes()),
    }
}
