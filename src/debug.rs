use crate::compiler::chunk::Chunk;
use crate::vm::instruction::OpCode;
use crate::vm::value::Value;

/// Run a full collection on every allocation. Slow, but surfaces rooting
/// mistakes immediately.
pub const STRESS_GC: bool = false;

/// Log the collector's phases and every mark/sweep decision.
pub const LOG_GC: bool = false;

/// Log heap object creation and destruction.
pub const LOG_OBJECT: bool = false;

/// Log the compiler's token consumption and each emitted byte.
pub const LOG_COMPILER: bool = false;

/// Disassemble every chunk when its compilation finishes.
pub const LOG_COMPILED_CODE: bool = false;

/// Print each instruction as it executes.
pub const TRACE_EXECUTION_INSTR: bool = false;

/// Print the whole value stack before each instruction.
pub const TRACE_EXECUTION_STACK: bool = false;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    let mut previous_line = None;
    while offset < chunk.code.len() {
        let current_line = chunk.lines.get(offset).copied().unwrap_or(0);
        let line = if previous_line == Some(current_line) {
            "   |".to_owned()
        } else {
            format!("{:4}", current_line)
        };
        previous_line = Some(current_line);

        let (text, bytes) = disassemble_instruction(chunk, offset);
        println!("{:04} {} {}", offset, line, text);
        offset += bytes;
    }
}

/// Renders the instruction at `offset` and returns its total size in bytes.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let op_code = OpCode::from(chunk.code[offset]);

    match op_code {
        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Print
        | OpCode::CloseUpvalue
        | OpCode::Return
        | OpCode::Inherit => (op_code.name().to_owned(), 1),

        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(chunk, op_code, offset),

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(chunk, op_code, offset),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(chunk, op_code, offset, 1),
        OpCode::Loop => jump_instruction(chunk, op_code, offset, -1),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(chunk, op_code, offset),

        OpCode::Closure => closure_instruction(chunk, offset),
    }
}

fn constant_instruction(chunk: &Chunk, op_code: OpCode, offset: usize) -> (String, usize) {
    match chunk.read_constant(offset) {
        Some(constant) => (format!("{}\t{}", op_code.name(), constant), 2),
        None => (format!("{}\t<bad constant>", op_code.name()), 2),
    }
}

fn byte_instruction(chunk: &Chunk, op_code: OpCode, offset: usize) -> (String, usize) {
    let operand = chunk.code.get(offset + 1).copied().unwrap_or(0);
    (format!("{}\t{}", op_code.name(), operand), 2)
}

fn jump_instruction(chunk: &Chunk, op_code: OpCode, offset: usize, sign: i64) -> (String, usize) {
    let b0 = chunk.code.get(offset + 1).copied().unwrap_or(0) as i64;
    let b1 = chunk.code.get(offset + 2).copied().unwrap_or(0) as i64;
    let jump = b0 << 8 | b1;
    let target = offset as i64 + 3 + sign * jump;
    (format!("{}\t{} -> {}", op_code.name(), offset, target), 3)
}

fn invoke_instruction(chunk: &Chunk, op_code: OpCode, offset: usize) -> (String, usize) {
    let name = match chunk.read_constant(offset) {
        Some(constant) => constant.to_string(),
        None => "<bad constant>".to_owned(),
    };
    let arg_count = chunk.code.get(offset + 2).copied().unwrap_or(0);
    (
        format!("{}\t({} args) {}", op_code.name(), arg_count, name),
        3,
    )
}

/// A closure instruction's size depends on the wrapped function: one
/// `(is_local, index)` byte pair per upvalue follows the constant operand.
fn closure_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let constant = match chunk.read_constant(offset) {
        Some(constant) => *constant,
        None => return ("Closure\t<bad constant>".to_owned(), 2),
    };

    let num_upvalues = match constant {
        Value::Object(object) => object.as_function().num_upvalues,
        _ => 0,
    };

    let mut text = format!("Closure\t{}", constant);
    let mut operand = offset + 2;
    for _ in 0..num_upvalues {
        let is_local = chunk.code.get(operand).copied().unwrap_or(0) == 1;
        let index = chunk.code.get(operand + 1).copied().unwrap_or(0);
        text.push_str(&format!(
            " |{} {}",
            if is_local { "local" } else { "upvalue" },
            index
        ));
        operand += 2;
    }
    (text, 2 + 2 * num_upvalues)
}
