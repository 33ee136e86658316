use std::fmt;

use super::{Gc, Object};
use crate::memory::Table;
use crate::vm::value::Value;

/// A class declaration containing the name and all its methods.
#[derive(Debug, Clone)]
pub struct Class {
    /// Name of the class, an interned string.
    pub name: Gc<Object>,

    /// Methods this class contains, keyed by interned name. A subclass
    /// starts out with a copy of its superclass's entries.
    pub methods: Table,
}

impl Class {
    /// Creates a new class with `name`. Requires the name object to be a
    /// garbage collected string.
    pub fn new(name: Gc<Object>) -> Self {
        Self {
            name,
            methods: Table::new(),
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_string())
    }
}

/// An instance of a class.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The class this instance was created from.
    pub class: Gc<Object>,

    /// Values for all the fields set on this instance.
    pub fields: Table,
}

impl Instance {
    /// Creates a new class instance, `class` must be a valid garbage
    /// collected class.
    pub fn new(class: Gc<Object>) -> Self {
        Self {
            class,
            fields: Table::new(),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.class.as_class().name.as_string())
    }
}

/// A method bound to a specific receiver, created when a property access
/// resolves to a class method.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    /// The value this method is bound to.
    pub receiver: Value,

    /// The closure to run, with the receiver placed in slot zero.
    pub method: Gc<Object>,
}

impl BoundMethod {
    pub fn new(receiver: Value, method: Gc<Object>) -> Self {
        Self { receiver, method }
    }
}

impl fmt::Display for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method.as_closure().function.as_function())
    }
}
