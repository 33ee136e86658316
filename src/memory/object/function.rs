use std::fmt;

use super::Object;
use crate::compiler::chunk::Chunk;
use crate::memory::Gc;

/// The static result of compiling one function body (or the top-level
/// script). The interpreter never calls these directly; a `Closure` wraps
/// one at runtime.
#[derive(Debug, Clone)]
pub struct Function {
    /// Interned name, `None` for the top-level script.
    pub name: Option<Gc<Object>>,
    pub arity: usize,
    pub chunk: Chunk,
    pub num_upvalues: usize,
}

impl Function {
    pub fn blank() -> Self {
        Self {
            name: None,
            arity: 0,
            chunk: Chunk::new(),
            num_upvalues: 0,
        }
    }

    pub fn new(name: Gc<Object>) -> Self {
        Self {
            name: Some(name),
            arity: 0,
            chunk: Chunk::new(),
            num_upvalues: 0,
        }
    }

    pub fn function_name(&self) -> &str {
        if let Some(object) = &self.name {
            object.as_string().as_str()
        } else {
            "script"
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_some() {
            write!(f, "<fn {}>", self.function_name())
        } else {
            write!(f, "<script>")
        }
    }
}
