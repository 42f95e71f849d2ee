//! A WebAssembly interpreter with a component-model resource runtime.

pub mod component;
mod engine;
mod error;
mod host;
mod instance;
mod interpreter;
mod linker;
mod module;
mod store;
mod value;

pub use component::{
    call_export, CanonOptions, ComponentFuncType, ComponentInstance, ComponentType, ComponentVal,
    ResourceHandle, ResourceType, Task, TaskEvent, TaskState, TaskSummary,
};
pub use engine::{Config, Engine, Statistics};
pub use error::{Error, LinkError, Result, Trap};
pub use host::{Caller, HostControl, HostFunc};
pub use instance::Instance;
pub use linker::Linker;
pub use module::types::{
    Export, ExternKind, FuncType, GlobalType, Import, ImportDesc, Limits, MemoryType, TableType,
    TagType, ValType,
};
pub use module::Module;
pub use store::{
    ComponentAddr, DataAddr, ElemAddr, Extern, FuncAddr, FuncInstance, GlobalAddr,
    GlobalInstance, InstanceAddr, MemoryAddr, MemoryInstance, ModuleInstance, Store, StoreId,
    TableAddr, TableInstance, TagAddr, TagInstance, TaskId,
};
pub use value::{Ref, Val, WasmArgs, WasmResults, WasmVal};
