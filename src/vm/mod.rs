use std::borrow::Cow;
use thiserror::Error;

use crate::compiler::CompileError;

mod call_frame;
pub mod instruction;
pub mod value;
pub mod vm;

pub use call_frame::CallFrame;
pub use vm::VM;

pub type Result<T> = std::result::Result<T, VMError>;

#[derive(Debug, Error)]
pub enum VMError {
    #[error(transparent)]
    CompileError(#[from] CompileError),

    #[error("{}", .0)]
    RuntimeError(Cow<'static, str>),

    #[error("Trying to access empty stack")]
    EmptyStack,

    #[error("Trying to access empty list of call frames")]
    NoCallFrame,

    #[error("Malformed bytecode")]
    InvalidBytecode,
}
