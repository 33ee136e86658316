use std::fmt;

use super::Object;
use crate::memory::Gc;
use crate::vm::value::Value;

/// Type all native functions are expected to have.
pub type NativeFunction = fn(usize, &[Value]) -> Value;

/// A native function is a Rust function that can be called from within Lox.
#[derive(Clone)]
pub struct NativeFn {
    /// Name of the native function.
    pub name: Gc<Object>,

    /// The actual function to call.
    pub fun: NativeFunction,
}

impl NativeFn {
    /// Creates a new native function.
    pub fn new(name: Gc<Object>, fun: NativeFunction) -> Self {
        Self { name, fun }
    }

    pub fn function_name(&self) -> &str {
        self.name.as_string().as_str()
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.function_name())
    }
}

impl fmt::Display for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.function_name())
    }
}
