//! Canonical ABI: moving values and handles across component boundaries.
//!
//! Arguments are lowered in two passes. The first checks every handle and
//! marks transferred `own` handles as consumed, lends borrowed ones and
//! copies strings into the callee; nothing leaves the caller's table yet, so
//! a failure here can be rolled back. The second pass moves the handles.

use crate::error::{Error, Result};
use crate::host::{HostControl, HostFunc};
use crate::module::types::{FuncType, ValType};
use crate::store::{ComponentAddr, Store, TaskId};
use crate::value::Val;

use super::resource::ResourceHandle;
use super::{
    CanonOptions, ComponentInstance, ComponentType, ComponentVal, LiftedFunc, ResourceType,
    TaskState,
};

/// Call `callee`'s lifted export `name` from `caller`.
///
/// The call runs as a task. Borrow handles created in the callee for this
/// call must be dropped before it returns, otherwise the call fails with
/// `DanglingBorrow` and no result is lifted: an own result stays in the
/// callee's table.
pub fn call_export(
    store: &mut Store,
    caller: ComponentInstance,
    callee: ComponentInstance,
    name: &str,
    args: &[ComponentVal],
) -> Result<Vec<ComponentVal>> {
    store.components.data(caller.addr())?;
    let lifted = store
        .components
        .data(callee.addr())?
        .exports
        .get(name)
        .cloned()
        .ok_or_else(|| Error::ExportNotFound(name.to_string()))?;
    if args.len() != lifted.ty.params.len() {
        return Err(Error::Canonical(format!(
            "`{name}` expects {} arguments, got {}",
            lifted.ty.params.len(),
            args.len()
        )));
    }
    if let Some((arg, ty)) = args
        .iter()
        .zip(&lifted.ty.params)
        .find(|(arg, ty)| !arg.matches(**ty))
    {
        return Err(Error::Canonical(format!(
            "`{name}` expects {ty:?}, got {arg:?}"
        )));
    }

    let task = store
        .components
        .open_task(caller.addr(), callee.addr(), lifted.options);
    match run_task(store, caller.addr(), callee.addr(), task, &lifted, args) {
        Ok(results) => {
            store.components.complete_task(task)?;
            Ok(results)
        }
        Err(err) => {
            store.components.abort_task(task);
            Err(err)
        }
    }
}

fn run_task(
    store: &mut Store,
    caller: ComponentAddr,
    callee: ComponentAddr,
    task: TaskId,
    lifted: &LiftedFunc,
    args: &[ComponentVal],
) -> Result<Vec<ComponentVal>> {
    let core_args = lower_args(store, caller, callee, task, lifted, args)?;
    let core_results = store.invoke(lifted.func, &core_args)?;
    let state = store.components.task_mut(task)?;
    state.state = TaskState::Returned;
    if state.borrow_count != 0 {
        let count = state.borrow_count;
        tracing::warn!(%task, count, "callee returned with outstanding borrows; revoking them");
        return Err(Error::DanglingBorrow {
            task: task.index(),
            count,
        });
    }

    let results = match lifted.ty.result {
        None => Vec::new(),
        Some(ty) => {
            let options = &lifted.options;
            vec![lift_result(store, caller, callee, options, ty, &core_results)?]
        }
    };
    if let Some(post_return) = lifted.options.post_return {
        store.invoke(post_return, &core_results)?;
    }
    Ok(results)
}

fn lower_args(
    store: &mut Store,
    caller: ComponentAddr,
    callee: ComponentAddr,
    task: TaskId,
    lifted: &LiftedFunc,
    args: &[ComponentVal],
) -> Result<Vec<Val>> {
    let mut consumed = Vec::new();
    let strings = match reserve_args(store, caller, task, lifted, args, &mut consumed) {
        Ok(strings) => strings,
        Err(err) => {
            if let Ok(table) = store.components.table_mut(caller) {
                for handle in consumed {
                    if let Ok(entry) = table.get_mut(handle) {
                        entry.consumed = false;
                    }
                }
            }
            return Err(err);
        }
    };

    let mut strings = strings.into_iter();
    let mut core = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            ComponentVal::String(_) => {
                let (ptr, len) = strings
                    .next()
                    .ok_or(Error::Fault("string argument was not lowered"))?;
                core.push(Val::I32(ptr as i32));
                core.push(Val::I32(len as i32));
            }
            ComponentVal::Own(handle) => {
                let entry = store.components.table_mut(caller)?.remove(*handle)?;
                let moved = store
                    .components
                    .table_mut(callee)?
                    .insert(ResourceHandle::own(entry.rep, entry.ty))?;
                tracing::trace!(from = *handle, to = moved, "own handle transferred");
                core.push(Val::I32(moved as i32));
            }
            ComponentVal::Borrow(handle) => {
                let entry = store.components.table(caller)?.get(*handle)?;
                let (rep, ty) = (entry.rep, entry.ty);
                if store.components.resource_type(ty)?.owner == callee {
                    core.push(Val::I32(rep as i32));
                    continue;
                }
                let borrowed = store
                    .components
                    .table_mut(callee)?
                    .insert(ResourceHandle::borrow(rep, ty, Some(task)))?;
                let state = store.components.task_mut(task)?;
                state.borrow_count += 1;
                state.borrows.push(borrowed);
                core.push(Val::I32(borrowed as i32));
            }
            other => core.push(lower_flat(other)?),
        }
    }
    Ok(core)
}

/// First lowering pass. Returns the `(ptr, len)` of every string argument.
fn reserve_args(
    store: &mut Store,
    caller: ComponentAddr,
    task: TaskId,
    lifted: &LiftedFunc,
    args: &[ComponentVal],
    consumed: &mut Vec<u32>,
) -> Result<Vec<(u32, u32)>> {
    let mut strings = Vec::new();
    for (arg, ty) in args.iter().zip(&lifted.ty.params) {
        match (arg, ty) {
            (ComponentVal::Own(handle), ComponentType::Own(rt)) => {
                let entry = store.components.table_mut(caller)?.get_mut(*handle)?;
                check_handle(entry, *handle, *rt)?;
                if !entry.own {
                    return Err(Error::Canonical(format!(
                        "handle {handle} is a borrow and cannot be transferred"
                    )));
                }
                if entry.consumed {
                    return Err(Error::ResourceConsumed(*handle));
                }
                if entry.lend_count > 0 {
                    return Err(Error::ResourceBorrowed {
                        handle: *handle,
                        lend_count: entry.lend_count,
                    });
                }
                entry.consumed = true;
                consumed.push(*handle);
            }
            (ComponentVal::Borrow(handle), ComponentType::Borrow(rt)) => {
                let entry = store.components.table(caller)?.get(*handle)?;
                check_handle(entry, *handle, *rt)?;
                store.components.handle_lend(caller, *handle, task)?;
            }
            (ComponentVal::String(s), _) => {
                strings.push(store_string(store, &lifted.options, s)?);
            }
            _ => {}
        }
    }
    Ok(strings)
}

fn check_handle(entry: &ResourceHandle, handle: u32, rt: ResourceType) -> Result<()> {
    if entry.ty == rt {
        Ok(())
    } else {
        Err(Error::ResourceTypeMismatch { handle })
    }
}

/// Copy `s` into memory obtained from the callee's `realloc`.
fn store_string(store: &mut Store, options: &CanonOptions, s: &str) -> Result<(u32, u32)> {
    let (memory, realloc) = options
        .memory
        .zip(options.realloc)
        .ok_or_else(|| Error::Canonical("string arguments need memory and realloc".into()))?;
    let len = u32::try_from(s.len())
        .map_err(|_| Error::Canonical(format!("string of {} bytes is too long", s.len())))?;
    let results = store.invoke(
        realloc,
        &[Val::I32(0), Val::I32(0), Val::I32(1), Val::I32(len as i32)],
    )?;
    let ptr = match results.as_slice() {
        [Val::I32(ptr)] => *ptr as u32,
        _ => return Err(Error::Canonical("realloc must return a single i32".into())),
    };
    store.memory(memory)?.write(ptr as u64, s.as_bytes())?;
    Ok((ptr, len))
}

fn lift_result(
    store: &mut Store,
    caller: ComponentAddr,
    callee: ComponentAddr,
    options: &CanonOptions,
    ty: ComponentType,
    core: &[Val],
) -> Result<ComponentVal> {
    let [value] = core else {
        return Err(Error::Canonical(format!(
            "expected one core result, got {}",
            core.len()
        )));
    };
    match ty {
        ComponentType::String => {
            let retptr = value.as_i32()? as u32;
            if retptr % 4 != 0 {
                return Err(Error::Canonical(format!(
                    "return area {retptr:#x} is not 4-byte aligned"
                )));
            }
            let memory = options
                .memory
                .ok_or_else(|| Error::Canonical("string results need a memory".into()))?;
            let memory = store.memory(memory)?;
            let ptr = memory.read_u32(retptr as u64)?;
            let len = memory.read_u32(retptr as u64 + 4)?;
            let bytes = memory.read_vec(ptr as u64, len as u64)?;
            String::from_utf8(bytes)
                .map(ComponentVal::String)
                .map_err(|e| Error::Canonical(format!("string result is not utf-8: {e}")))
        }
        ComponentType::Own(rt) => {
            let handle = value.as_i32()? as u32;
            let entry = store.components.table(callee)?.get(handle)?;
            check_handle(entry, handle, rt)?;
            if !entry.own {
                return Err(Error::Canonical(format!(
                    "returned handle {handle} is not an own handle"
                )));
            }
            if entry.lend_count > 0 {
                return Err(Error::ResourceBorrowed {
                    handle,
                    lend_count: entry.lend_count,
                });
            }
            let entry = store.components.table_mut(callee)?.remove(handle)?;
            let moved = store
                .components
                .table_mut(caller)?
                .insert(ResourceHandle::own(entry.rep, entry.ty))?;
            Ok(ComponentVal::Own(moved))
        }
        ComponentType::Borrow(_) => Err(Error::Canonical(
            "borrow handles cannot be returned".into(),
        )),
        scalar => lift_flat(scalar, value),
    }
}

/// Lift one flat core value. Handles stay table indices.
fn lift_flat(ty: ComponentType, value: &Val) -> Result<ComponentVal> {
    Ok(match ty {
        ComponentType::Bool => ComponentVal::Bool(value.as_i32()? != 0),
        ComponentType::S8 => ComponentVal::S8(value.as_i32()? as i8),
        ComponentType::U8 => ComponentVal::U8(value.as_i32()? as u8),
        ComponentType::S16 => ComponentVal::S16(value.as_i32()? as i16),
        ComponentType::U16 => ComponentVal::U16(value.as_i32()? as u16),
        ComponentType::S32 => ComponentVal::S32(value.as_i32()?),
        ComponentType::U32 => ComponentVal::U32(value.as_i32()? as u32),
        ComponentType::S64 => ComponentVal::S64(value.as_i64()?),
        ComponentType::U64 => ComponentVal::U64(value.as_i64()? as u64),
        ComponentType::F32 => ComponentVal::F32(value.as_f32()?),
        ComponentType::F64 => ComponentVal::F64(value.as_f64()?),
        ComponentType::Char => {
            let code = value.as_i32()? as u32;
            ComponentVal::Char(char::from_u32(code).ok_or_else(|| {
                Error::Canonical(format!("{code:#x} is not a unicode scalar value"))
            })?)
        }
        ComponentType::Own(_) => ComponentVal::Own(value.as_i32()? as u32),
        ComponentType::Borrow(_) => ComponentVal::Borrow(value.as_i32()? as u32),
        ComponentType::String => {
            return Err(Error::Canonical("strings do not flatten to one value".into()))
        }
    })
}

fn lower_flat(value: &ComponentVal) -> Result<Val> {
    Ok(match value {
        ComponentVal::Bool(v) => Val::I32(*v as i32),
        ComponentVal::S8(v) => Val::I32(*v as i32),
        ComponentVal::U8(v) => Val::I32(*v as i32),
        ComponentVal::S16(v) => Val::I32(*v as i32),
        ComponentVal::U16(v) => Val::I32(*v as i32),
        ComponentVal::S32(v) => Val::I32(*v),
        ComponentVal::U32(v) => Val::I32(*v as i32),
        ComponentVal::S64(v) => Val::I64(*v),
        ComponentVal::U64(v) => Val::I64(*v as i64),
        ComponentVal::F32(v) => Val::F32(*v),
        ComponentVal::F64(v) => Val::F64(*v),
        ComponentVal::Char(c) => Val::I32(*c as u32 as i32),
        ComponentVal::Own(h) | ComponentVal::Borrow(h) => Val::I32(*h as i32),
        ComponentVal::String(_) => {
            return Err(Error::Canonical("strings do not flatten to one value".into()))
        }
    })
}

/// `canon resource.new`: `[rep: i32] -> [handle: i32]`.
pub fn resource_new(component: ComponentInstance, rt: ResourceType) -> HostFunc {
    HostFunc::new(FuncType::new([ValType::I32], [ValType::I32]), move |caller, args| {
        let rep = args[0].as_i32()? as u32;
        let handle = component.handle_new(caller.store_mut(), rep, rt, true)?;
        Ok(HostControl::Return(vec![Val::I32(handle as i32)]))
    })
}

/// `canon resource.rep`: `[handle: i32] -> [rep: i32]`.
pub fn resource_rep(component: ComponentInstance, rt: ResourceType) -> HostFunc {
    HostFunc::new(FuncType::new([ValType::I32], [ValType::I32]), move |caller, args| {
        let handle = args[0].as_i32()? as u32;
        let entry = component.handle_get(caller.store(), handle)?;
        check_handle(&entry, handle, rt)?;
        Ok(HostControl::Return(vec![Val::I32(entry.rep as i32)]))
    })
}

/// `canon resource.drop`: `[handle: i32] -> []`.
pub fn resource_drop(component: ComponentInstance, rt: ResourceType) -> HostFunc {
    HostFunc::new(FuncType::new([ValType::I32], []), move |caller, args| {
        let handle = args[0].as_i32()? as u32;
        let entry = component.handle_get(caller.store(), handle)?;
        check_handle(&entry, handle, rt)?;
        component.handle_drop(caller.store_mut(), handle)?;
        Ok(HostControl::Return(Vec::new()))
    })
}

/// Build a host function through which core code in `caller` calls the
/// lifted export `export` of `callee`. Handle arguments and results are
/// indices into `caller`'s table.
pub fn lower(
    store: &Store,
    caller: ComponentInstance,
    callee: ComponentInstance,
    export: &str,
) -> Result<HostFunc> {
    let ty = callee.export_type(store, export)?;
    if ty.params.contains(&ComponentType::String) || ty.result == Some(ComponentType::String) {
        return Err(Error::Unsupported(format!(
            "lowering `{export}` with string values"
        )));
    }
    let core = FuncType::new(
        ty.params.iter().flat_map(|t| t.flatten().iter().copied()),
        ty.result.iter().flat_map(|t| t.flatten().iter().copied()),
    );
    let export = export.to_string();
    Ok(HostFunc::new(core, move |host, args| {
        let vals = ty
            .params
            .iter()
            .zip(args)
            .map(|(t, v)| lift_flat(*t, v))
            .collect::<Result<Vec<_>>>()?;
        let results = call_export(host.store_mut(), caller, callee, &export, &vals)?;
        let core = results.iter().map(lower_flat).collect::<Result<Vec<_>>>()?;
        Ok(HostControl::Return(core))
    }))
}
