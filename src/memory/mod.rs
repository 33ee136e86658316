mod gc;
pub mod object;
mod ptr;
mod table;
mod trace;

pub use gc::GC;
pub use object::{
    BoundMethod, Class, Closure, Function, Instance, LoxStr, NativeFn, NativeFunction, Object,
    Upvalue,
};
pub use ptr::Gc;
pub use table::Table;
