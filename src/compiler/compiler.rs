use colored::*;
use thiserror::Error;

use super::scanner::{Scanner, ScannerError};
use super::token::{Token, TokenKind};
use crate::debug::{self, LOG_COMPILED_CODE, LOG_COMPILER};
use crate::memory::{Function, Gc, Object, GC};
use crate::vm::{instruction::OpCode, value::Value};

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("Number of compiler errors: {}", .0.len())]
    Default(Vec<CompileError>),

    #[error("Error scanning source: {}", .0)]
    ScannerError(#[from] ScannerError),

    #[error("Error parsing number: {}", .0)]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("Could not find token while parsing (should not happen)")]
    TokenNotFound,

    #[error("Parse rule could not be found (should not happen)")]
    ParseRuleNotFound,

    #[error("{}", .message)]
    ParseError { message: &'static str },

    #[error("Expect expression.")]
    ExpectedExpression,

    #[error("Invalid assignment target.")]
    InvalidAssignment,

    #[error("Too many local variables in function.")]
    LocalCount,

    #[error("Too many constants in one chunk.")]
    ConstantCount,

    #[error("Too many closure variables in function.")]
    UpvalueCount,

    #[error("Too much code to jump over.")]
    InvalidJump,

    #[error("Loop body too large.")]
    LoopTooLarge,

    #[error("Already a variable named '{}' in this scope.", .0)]
    VariableAlreadyDeclared(String),

    #[error("Cannot read local variable in its own initializer.")]
    LocalInitializer,

    #[error("Can't have more than 255 parameters.")]
    TooManyParameters,

    #[error("Can't have more than 255 arguments.")]
    TooManyArguments,

    #[error("Cannot return from top-level code.")]
    ReturnFromScript,

    #[error("Cannot return a value from an initializer.")]
    ReturnFromInitializer,

    #[error("Cannot use 'this' outside of a class.")]
    ThisOutsideClass,

    #[error("Cannot use 'super' outside of a class.")]
    SuperOutsideClass,

    #[error("Cannot use 'super' in a class with no superclass.")]
    SuperWithoutSuperclass,

    #[error("A class cannot inherit from itself.")]
    InheritFromSelf,

    // Used internally in consume to provide error messages to the user.
    #[error("Internal error")]
    InternalError,
}

type Result<T> = std::result::Result<T, CompileError>;

/// Sentinel depth of a local that has been declared but not yet defined,
/// so `var a = a;` can be diagnosed.
const UNINITIALIZED: i64 = -1;

#[derive(Debug)]
struct Local {
    name: Token,

    // The level of nesting for this local, 0 is the function's own scope and
    // it moves upwards.
    depth: i64,

    // Set when a closure captures this local, so leaving the scope hoists
    // the value into the upvalue instead of dropping it.
    is_captured: bool,
}

impl Local {
    fn new(name: Token, depth: i64) -> Self {
        Self {
            name,
            depth,
            is_captured: false,
        }
    }
}

#[derive(Debug)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

impl Upvalue {
    fn new(index: u8, is_local: bool) -> Self {
        Self { index, is_local }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,

    /// A method named `init`: implicitly returns the receiver, and explicit
    /// `return <expr>;` is rejected.
    Initializer,
}

/// Per-class compilation state. The stack of these mirrors nested class
/// declarations and gates `this`/`super`.
#[derive(Debug)]
struct ClassState {
    has_superclass: bool,
}

/// Everything needed while one function body is being emitted. These live on
/// a stack inside the GC (not the Compiler) so that a collection triggered
/// mid-compile can reach the half-built functions and their constants.
#[derive(Debug)]
pub struct FunctionState {
    pub function: Function,
    function_kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i64,
    upvalues: Vec<Upvalue>,
}

impl FunctionState {
    fn script() -> Self {
        Self {
            function: Function::blank(),
            function_kind: FunctionKind::Script,
            locals: vec![FunctionState::reserved_local(FunctionKind::Script)],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }

    fn new(name: Gc<Object>, function_kind: FunctionKind) -> Self {
        Self {
            function: Function::new(name),
            function_kind,
            locals: vec![FunctionState::reserved_local(function_kind)],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }

    /// Slot 0 of every frame holds the callee. Methods name it `this` so the
    /// receiver resolves like any other local; for plain functions the name
    /// is unspellable.
    fn reserved_local(kind: FunctionKind) -> Local {
        let name = match kind {
            FunctionKind::Method | FunctionKind::Initializer => Token::synthetic("this"),
            _ => Token::synthetic(""),
        };
        Local::new(name, 0)
    }

    fn emit_raw(&mut self, byte: u8, line: u64) -> Result<()> {
        if LOG_COMPILER {
            println!("{}\t[EMIT]\t\t[BYTE]: {}", "[COMPILER]".blue().bold(), byte);
        }
        self.function.chunk.write_byte(byte, line);
        Ok(())
    }

    fn emit_byte(&mut self, op_code: OpCode, line: u64) -> Result<()> {
        if LOG_COMPILER {
            println!("{}\t[EMIT]\t\t{}", "[COMPILER]".blue().bold(), op_code);
        }
        self.function.chunk.write(op_code, line);
        Ok(())
    }

    fn emit_bytes(&mut self, op_code: OpCode, index: u8, line: u64) -> Result<()> {
        if LOG_COMPILER {
            println!(
                "{}\t[EMIT]\t\t{} -> {}",
                "[COMPILER]".blue().bold(),
                op_code,
                index
            );
        }
        self.function.chunk.write_index(op_code, index, line);
        Ok(())
    }

    /// The implicit return at the end of a body. Initializers return the
    /// receiver in slot 0; everything else returns nil.
    fn emit_return(&mut self, line: u64) -> Result<()> {
        match self.function_kind {
            FunctionKind::Initializer => self.emit_bytes(OpCode::GetLocal, 0, line)?,
            _ => self.emit_byte(OpCode::Nil, line)?,
        }
        self.emit_byte(OpCode::Return, line)
    }

    /// Emits a jump with a placeholder 16-bit offset and returns the offset
    /// of the placeholder for `patch_jump`.
    fn emit_jump(&mut self, op_code: OpCode, line: u64) -> Result<usize> {
        if LOG_COMPILER {
            println!("{}\t[EMIT JMP]\t{}", "[COMPILER]".blue().bold(), op_code);
        }
        self.function.chunk.write(op_code, line);
        self.function.chunk.write_byte(0xff, line);
        self.function.chunk.write_byte(0xff, line);
        Ok(self.function.chunk.code.len() - 2)
    }

    /// Emits the loop instruction to jump backwards to `loop_start`. Jumps
    /// further back than a 16-bit offset are not representable.
    fn emit_loop(&mut self, loop_start: usize, line: u64) -> Result<()> {
        self.emit_byte(OpCode::Loop, line)?;

        // Skip over the two offset bytes as well.
        let offset = self.function.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            Err(CompileError::LoopTooLarge)
        } else {
            self.function
                .chunk
                .write_byte((offset >> 8) as u8 & 0xff, line);
            self.function.chunk.write_byte((offset & 0xff) as u8, line);
            Ok(())
        }
    }

    /// Back-fills a placeholder emitted by `emit_jump` with the distance to
    /// the current end of the chunk.
    fn patch_jump(&mut self, offset: usize) -> Result<()> {
        let jump_from = self.function.chunk.code.len() as i64;

        // Adjust by -2 to account for the size of the jump bytes.
        let jump = jump_from - offset as i64 - 2;
        if jump > u16::MAX as i64 {
            Err(CompileError::InvalidJump)
        } else {
            self.function.chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
            self.function.chunk.code[offset + 1] = (jump & 0xff) as u8;
            Ok(())
        }
    }

    fn resolve_local(&self, token: &Token) -> Result<Option<u8>> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if token.data == local.name.data {
                if local.depth == UNINITIALIZED {
                    return Err(CompileError::LocalInitializer);
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8> {
        // Reuse the slot if this exact capture is already registered.
        for (i, upvalue) in self.upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return Ok(i as u8);
            }
        }

        if self.upvalues.len() == u8::MAX as usize + 1 {
            return Err(CompileError::UpvalueCount);
        }
        self.upvalues.push(Upvalue::new(index, is_local));
        self.function.num_upvalues = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }
}

pub struct Compiler<'src> {
    source: &'src str,
    scanner: Scanner<'src>,
    parser: Parser,
    classes: Vec<ClassState>,

    gc: &'src mut GC,
    errors: Vec<CompileError>,
}

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str, gc: &'src mut GC) -> Self {
        Self {
            source,
            scanner: Scanner::new(source),
            parser: Parser::new(),
            classes: Vec::new(),
            gc,
            errors: Vec::new(),
        }
    }

    /// Compiles the whole source to a heap-tracked script function. The
    /// handle is not rooted anywhere when this returns; the caller must push
    /// it onto the value stack before the next allocation.
    pub fn compile(mut self) -> Result<Gc<Object>> {
        self.advance();
        self.gc.functions.push(FunctionState::script());

        while !self.match_token(TokenKind::EOF)? {
            self.decl()?;
        }

        let line = self.parser.line();
        self.gc.functions.last_mut().unwrap().emit_return(line)?;

        if !self.errors.is_empty() {
            // An error inside a function body leaves its state behind; drop
            // every state this compile pushed.
            self.gc.functions.clear();
            return Err(CompileError::Default(self.errors));
        }

        if LOG_COMPILED_CODE {
            let state = self.gc.functions.last().unwrap();
            debug::disassemble_chunk(&state.function.chunk, state.function.function_name());
        }

        // Track the finished script while its state is still a compiler
        // root, then pop the state.
        let function = self.gc.functions.last().unwrap().function.clone();
        let function = self.gc.track_function(function);
        self.gc.functions.pop();
        Ok(function)
    }

    fn state(&self) -> &FunctionState {
        self.gc.functions.last().unwrap()
    }

    fn state_mut(&mut self) -> &mut FunctionState {
        self.gc.functions.last_mut().unwrap()
    }

    fn code_len(&self) -> usize {
        self.state().function.chunk.code.len()
    }

    fn emit(&mut self, op_code: OpCode) -> Result<()> {
        let line = self.parser.line();
        self.state_mut().emit_byte(op_code, line)
    }

    fn emit_pair(&mut self, op_code: OpCode, index: u8) -> Result<()> {
        let line = self.parser.line();
        self.state_mut().emit_bytes(op_code, index, line)
    }

    fn emit_raw(&mut self, byte: u8) -> Result<()> {
        let line = self.parser.line();
        self.state_mut().emit_raw(byte, line)
    }

    fn emit_jump(&mut self, op_code: OpCode) -> Result<usize> {
        let line = self.parser.line();
        self.state_mut().emit_jump(op_code, line)
    }

    fn emit_loop(&mut self, loop_start: usize) -> Result<()> {
        let line = self.parser.line();
        self.state_mut().emit_loop(loop_start, line)
    }

    fn patch_jump(&mut self, offset: usize) -> Result<()> {
        self.state_mut().patch_jump(offset)
    }

    /// Scan for the next token. Scanning errors are reported and skipped so
    /// the parser always sees a token.
    fn advance(&mut self) {
        std::mem::swap(&mut self.parser.previous, &mut self.parser.current);

        loop {
            match self.scanner.scan_token() {
                Ok(token) => {
                    if LOG_COMPILER {
                        println!("{}\t[ADVANCE]\t{:?}", "[COMPILER]".blue(), token);
                    }
                    self.parser.current = Some(token);
                    return;
                }
                Err(err) => {
                    eprintln!("[line {}] Error: {}", self.scanner.line(), err);
                    self.errors.push(err.into());
                }
            }
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool> {
        if self.parser.check_current(kind)? {
            self.advance();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, expected_token: TokenKind, error_message: &'static str) -> Result<()> {
        if self.parser.check_current(expected_token)? {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::InternalError).map_err(self.error_msg(error_message))
        }
    }

    fn error_msg(&self, message: &'static str) -> impl FnOnce(CompileError) -> CompileError {
        move |error: CompileError| -> CompileError {
            match error {
                CompileError::InternalError => CompileError::ParseError { message },
                _ => error,
            }
        }
    }

    fn decl(&mut self) -> Result<()> {
        if let Err(err) = self.declaration() {
            self.report_error(&err);
            self.errors.push(err);
            self.synchronize()?;
        }
        Ok(())
    }

    /// Prints `[line N] Error at '<lexeme>': <message>` plus a short window
    /// of the source following the offending token. Errors raised by
    /// `consume` point at the unexpected token; everything else points at
    /// the token just parsed.
    fn report_error(&self, error: &CompileError) {
        let token = match error {
            CompileError::ParseError { .. } => self.parser.current.as_ref(),
            _ => self.parser.previous.as_ref(),
        };
        let token = match token {
            Some(token) => token,
            None => {
                eprintln!("Error: {}", error);
                return;
            }
        };

        if token.kind == TokenKind::EOF {
            eprintln!("[line {}] Error at end: {}", token.line, error);
        } else {
            eprintln!("[line {}] Error at '{}': {}", token.line, token.data, error);
            let context: String = self.source[token.offset..]
                .chars()
                .take_while(|&ch| ch != '\n')
                .take(60)
                .collect();
            eprintln!("    {}", context);
        }
    }

    /// Skip tokens until something that looks like a statement boundary, so
    /// one malformed statement does not drown the rest in follow-up errors.
    fn synchronize(&mut self) -> Result<()> {
        loop {
            if self.parser.previous()?.kind == TokenKind::Semicolon {
                return Ok(());
            }

            match self.parser.current()?.kind {
                TokenKind::EOF
                | TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return Ok(()),
                _ => {}
            }

            self.advance();
        }
    }

    fn declaration(&mut self) -> Result<()> {
        if self.match_token(TokenKind::Class)? {
            self.class_declaration()
        } else if self.match_token(TokenKind::Fun)? {
            self.fun_declaration()
        } else if self.match_token(TokenKind::Var)? {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn class_declaration(&mut self) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect class name")?;
        let class_name = self.parser.previous()?.clone();
        let name_constant = self.identifier_constant(class_name.data.clone())?;
        self.declare_variable()?;

        self.emit_pair(OpCode::Class, name_constant)?;

        // Define the binding before the body so methods can refer to the
        // class by name.
        self.define_variable(name_constant)?;

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less)? {
            self.consume(TokenKind::Identifier, "Expect superclass name")?;
            if self.parser.previous()?.data == class_name.data {
                return Err(CompileError::InheritFromSelf);
            }
            variable(self, false)?; // Load the superclass.

            // The superclass value just pushed becomes a scoped local named
            // `super`, which is how `super.m()` finds it from inside methods.
            self.scope_enter();
            self.add_local(Token::synthetic("super"))?;
            self.mark_local_initialized()?;

            self.named_variable(class_name.clone(), false)?; // Load the subclass.
            self.emit(OpCode::Inherit)?;
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false)?; // Class on the stack for the methods.
        self.consume(TokenKind::BraceLeft, "Expect '{' before class body")?;
        loop {
            let done = self.parser.check_current(TokenKind::BraceRight)?
                || self.parser.check_current(TokenKind::EOF)?;
            if done {
                break;
            }
            self.method()?;
        }
        self.consume(TokenKind::BraceRight, "Expect '}' after class body")?;
        self.emit(OpCode::Pop)?; // The class itself.

        if self.classes.last().unwrap().has_superclass {
            self.scope_leave()?;
        }
        self.classes.pop();
        Ok(())
    }

    fn method(&mut self) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect method name")?;
        let name_token = self.parser.previous()?.clone();
        let name_constant = self.identifier_constant(name_token.data.clone())?;

        let kind = if name_token.data == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind)?;
        self.emit_pair(OpCode::Method, name_constant)
    }

    fn fun_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect function name")?;
        // Initialized before the body compiles, so the function can recurse.
        self.mark_local_initialized()?;
        self.function(FunctionKind::Function)?;
        self.define_variable(global)
    }

    fn var_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect variable name")?;

        if self.match_token(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit(OpCode::Nil)?;
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration",
        )?;

        self.define_variable(global)
    }

    /// Compiles a function body in a fresh `FunctionState` and emits the
    /// closure (with its captured-upvalue payload) into the enclosing chunk.
    fn function(&mut self, kind: FunctionKind) -> Result<()> {
        let state = {
            let name = self.parser.previous()?.data.clone();
            let name = self.gc.intern(name);
            FunctionState::new(name, kind)
        };
        self.gc.functions.push(state);
        self.scope_enter();

        self.consume(TokenKind::ParenLeft, "Expect '(' after function name")?;
        if !self.parser.check_current(TokenKind::ParenRight)? {
            loop {
                self.state_mut().function.arity += 1;
                if self.state().function.arity > 255 {
                    return Err(CompileError::TooManyParameters);
                }

                let parameter_constant = self.parse_variable("Expect parameter name")?;
                self.define_variable(parameter_constant)?;

                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::ParenRight, "Expect ')' after parameters")?;

        self.consume(TokenKind::BraceLeft, "Expect '{' before function body")?;
        self.block()?;

        // No scope_leave: the frame teardown discards the slots wholesale.
        let line = self.parser.line();
        self.state_mut().emit_return(line)?;

        if LOG_COMPILED_CODE {
            let state = self.state();
            debug::disassemble_chunk(&state.function.chunk, state.function.function_name());
        }

        // Track the finished function while its state still roots the
        // constants, then pop the state and wire up the closure.
        let function = self.state().function.clone();
        let function = self.gc.track_function(function);
        let state = self.gc.functions.pop().unwrap();

        let index = self.add_constant(function.into())?;
        self.emit_pair(OpCode::Closure, index)?;
        for upvalue in state.upvalues.iter() {
            self.emit_raw(if upvalue.is_local { 1 } else { 0 })?;
            self.emit_raw(upvalue.index)?;
        }
        Ok(())
    }

    fn parse_variable(&mut self, error_msg: &'static str) -> Result<u8> {
        self.consume(TokenKind::Identifier, error_msg)?;

        self.declare_variable()?;
        if self.state().scope_depth > 0 {
            return Ok(0);
        }

        self.identifier_constant(self.parser.previous()?.data.clone())
    }

    fn declare_variable(&mut self) -> Result<()> {
        // Global variables are implicitly declared.
        if self.state().scope_depth == 0 {
            return Ok(());
        }

        let name = self.parser.previous()?;
        for local in self.state().locals.iter().rev() {
            if local.depth != UNINITIALIZED && local.depth < self.state().scope_depth {
                break;
            }
            if name.data == local.name.data {
                return Err(CompileError::VariableAlreadyDeclared(name.data.clone()));
            }
        }

        let name = name.clone();
        self.add_local(name)
    }

    fn add_local(&mut self, name: Token) -> Result<()> {
        if self.state().locals.len() == u8::MAX as usize + 1 {
            return Err(CompileError::LocalCount);
        }
        self.state_mut().locals.push(Local::new(name, UNINITIALIZED));
        Ok(())
    }

    fn add_constant(&mut self, constant: Value) -> Result<u8> {
        self.gc.stack.push(constant);
        let index = self.state_mut().function.chunk.add_constant(constant);
        self.gc.stack.pop();

        if index > u8::MAX as usize {
            return Err(CompileError::ConstantCount);
        }
        Ok(index as u8)
    }

    fn identifier_constant(&mut self, name: String) -> Result<u8> {
        let string = self.gc.intern(name);
        self.add_constant(string.into())
    }

    fn mark_local_initialized(&mut self) -> Result<()> {
        if self.state().scope_depth == 0 {
            return Ok(());
        }
        let depth = self.state().scope_depth;
        self.state_mut().locals.last_mut().unwrap().depth = depth;
        Ok(())
    }

    fn define_variable(&mut self, index: u8) -> Result<()> {
        if self.state().scope_depth > 0 {
            self.mark_local_initialized()?;
            return Ok(());
        }
        self.emit_pair(OpCode::DefineGlobal, index)
    }

    /// Resolves a name captured from an enclosing function, registering the
    /// upvalue chain through every compiler in between.
    fn resolve_upvalue(&mut self, state_index: usize, token: &Token) -> Result<Option<u8>> {
        if state_index == 0 {
            return Ok(None);
        }
        let prev_index = state_index - 1;

        if let Some(local_idx) = self.gc.functions[prev_index].resolve_local(token)? {
            self.gc.functions[prev_index].locals[local_idx as usize].is_captured = true;
            let upvalue_idx = self.gc.functions[state_index].add_upvalue(local_idx, true)?;
            return Ok(Some(upvalue_idx));
        }

        if let Some(upvalue_idx) = self.resolve_upvalue(prev_index, token)? {
            let upvalue_idx = self.gc.functions[state_index].add_upvalue(upvalue_idx, false)?;
            return Ok(Some(upvalue_idx));
        }

        Ok(None)
    }

    fn named_variable(&mut self, token: Token, can_assign: bool) -> Result<()> {
        let (arg, set_op, get_op) = if let Some(arg) = self.state().resolve_local(&token)? {
            (arg, OpCode::SetLocal, OpCode::GetLocal)
        } else if let Some(arg) = self.resolve_upvalue(self.gc.functions.len() - 1, &token)? {
            (arg, OpCode::SetUpvalue, OpCode::GetUpvalue)
        } else {
            let arg = self.identifier_constant(token.data.clone())?;
            (arg, OpCode::SetGlobal, OpCode::GetGlobal)
        };

        if LOG_COMPILER {
            println!(
                "{}\t[NAMED VARIABLE]\t{:?} | CAN_ASSIGN: {}",
                "[COMPILER]".blue(),
                token,
                can_assign
            );
        }

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit_pair(set_op, arg)
        } else {
            self.emit_pair(get_op, arg)
        }
    }

    fn statement(&mut self) -> Result<()> {
        if self.match_token(TokenKind::Print)? {
            self.print_statement()
        } else if self.match_token(TokenKind::If)? {
            self.if_statement()
        } else if self.match_token(TokenKind::Return)? {
            self.return_statement()
        } else if self.match_token(TokenKind::While)? {
            self.while_statement()
        } else if self.match_token(TokenKind::For)? {
            self.for_statement()
        } else if self.match_token(TokenKind::BraceLeft)? {
            self.scope_enter();
            self.block()?;
            self.scope_leave()
        } else {
            self.expression_statement()
        }
    }

    fn return_statement(&mut self) -> Result<()> {
        if self.state().function_kind == FunctionKind::Script {
            return Err(CompileError::ReturnFromScript);
        }

        if self.match_token(TokenKind::Semicolon)? {
            let line = self.parser.line();
            self.state_mut().emit_return(line)
        } else {
            if self.state().function_kind == FunctionKind::Initializer {
                return Err(CompileError::ReturnFromInitializer);
            }
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after return value")?;
            self.emit(OpCode::Return)
        }
    }

    /// `for` compiles in one pass: the increment is emitted before the body
    /// with a jump skipping it on the way in, and the body loops back to the
    /// increment, which loops back to the condition.
    fn for_statement(&mut self) -> Result<()> {
        self.scope_enter();
        self.consume(TokenKind::ParenLeft, "Expect '(' after 'for'")?;

        // Initializer clause.
        if self.match_token(TokenKind::Semicolon)? {
            // No initializer.
        } else if self.match_token(TokenKind::Var)? {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        // Condition clause.
        let mut loop_start = self.code_len();
        let exit_jump = if self.match_token(TokenKind::Semicolon)? {
            None
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition")?;

            // Jump out of the loop if the condition is false.
            let exit_jump = self.emit_jump(OpCode::JumpIfFalse)?;
            self.emit(OpCode::Pop)?;
            Some(exit_jump)
        };

        // Increment clause.
        if !self.match_token(TokenKind::ParenRight)? {
            let body_jump = self.emit_jump(OpCode::Jump)?;
            let increment_start = self.code_len();

            self.expression()?;
            self.emit(OpCode::Pop)?;
            self.consume(TokenKind::ParenRight, "Expect ')' after for clauses")?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit(OpCode::Pop)?;
        }
        self.scope_leave()
    }

    fn while_statement(&mut self) -> Result<()> {
        // The location to jump back to on each loop iteration.
        let loop_start = self.code_len();

        self.consume(TokenKind::ParenLeft, "Expect '(' after 'while'")?;
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after condition")?;

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse)?;
        self.emit(OpCode::Pop)?;

        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit(OpCode::Pop)
    }

    fn if_statement(&mut self) -> Result<()> {
        self.consume(TokenKind::ParenLeft, "Expect '(' after 'if'")?;
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after condition")?;

        let then_jump = self.emit_jump(OpCode::JumpIfFalse)?;
        self.emit(OpCode::Pop)?; // Pop condition when it was true.
        self.statement()?;
        let else_jump = self.emit_jump(OpCode::Jump)?;

        self.patch_jump(then_jump)?;
        self.emit(OpCode::Pop)?; // Pop condition when it was false.

        if self.match_token(TokenKind::Else)? {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn scope_enter(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn scope_leave(&mut self) -> Result<()> {
        let line = self.parser.line();
        let state = self.state_mut();
        state.scope_depth -= 1;

        loop {
            let (depth, captured) = match state.locals.last() {
                Some(local) => (local.depth, local.is_captured),
                None => break,
            };
            if depth <= state.scope_depth {
                break;
            }
            if captured {
                state.emit_byte(OpCode::CloseUpvalue, line)?;
            } else {
                state.emit_byte(OpCode::Pop, line)?;
            }
            state.locals.pop();
        }
        Ok(())
    }

    fn block(&mut self) -> Result<()> {
        loop {
            let done = self.parser.check_current(TokenKind::BraceRight)?
                || self.parser.check_current(TokenKind::EOF)?;
            if done {
                break;
            }
            self.decl()?;
        }
        self.consume(TokenKind::BraceRight, "Expect '}' after block")
    }

    fn expression_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression")?;
        self.emit(OpCode::Pop)
    }

    fn print_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after value")?;
        self.emit(OpCode::Print)
    }

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn argument_list(&mut self) -> Result<u8> {
        let mut arg_count: usize = 0;
        if !self.parser.check_current(TokenKind::ParenRight)? {
            loop {
                self.expression()?;
                arg_count += 1;
                if arg_count > 255 {
                    return Err(CompileError::TooManyArguments);
                }
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }

        self.consume(TokenKind::ParenRight, "Expect ')' after arguments")?;
        Ok(arg_count as u8)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.advance();

        let prefix_rule = get_rule(self.parser.previous()?.kind)
            .prefix
            .ok_or(CompileError::ExpectedExpression)?;

        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign)?;

        while precedence <= get_rule(self.parser.current()?.kind).precedence {
            self.advance();
            let infix_rule = get_rule(self.parser.previous()?.kind)
                .infix
                .ok_or(CompileError::ParseRuleNotFound)?;
            infix_rule(self, can_assign)?;
        }

        // Only prefix rules consume `=`; one still sitting here means the
        // left-hand side was not assignable.
        if can_assign && self.match_token(TokenKind::Equal)? {
            return Err(CompileError::InvalidAssignment);
        }

        Ok(())
    }
}

// The rule functions live outside the impl block: the table below stores
// them as fn pointers generic over every lifetime, which a method on
// `impl<'src> Compiler<'src>` cannot provide.

fn grouping(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    compiler.expression()?;
    compiler.consume(TokenKind::ParenRight, "Expect ')' after expression")
}

fn number(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let value = compiler.parser.previous()?.data.parse::<f64>()?;
    let index = compiler.add_constant(Value::Number(value))?;
    compiler.emit_pair(OpCode::Constant, index)
}

fn string(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let data = compiler.parser.previous()?.data.clone();
    // Skip the quote at the beginning and end.
    let chars = data[1..data.len() - 1].to_owned();
    let string = compiler.gc.intern(chars);
    let index = compiler.add_constant(string.into())?;
    compiler.emit_pair(OpCode::Constant, index)
}

fn variable(compiler: &mut Compiler<'_>, can_assign: bool) -> Result<()> {
    let token = compiler.parser.previous()?.clone();
    compiler.named_variable(token, can_assign)
}

fn this_(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    if compiler.classes.is_empty() {
        return Err(CompileError::ThisOutsideClass);
    }
    // `this` resolves against the receiver local in slot 0.
    variable(compiler, false)
}

fn super_(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    match compiler.classes.last() {
        None => return Err(CompileError::SuperOutsideClass),
        Some(class) if !class.has_superclass => return Err(CompileError::SuperWithoutSuperclass),
        Some(_) => {}
    }

    compiler.consume(TokenKind::Dot, "Expect '.' after 'super'")?;
    compiler.consume(TokenKind::Identifier, "Expect superclass method name")?;
    let name = compiler.identifier_constant(compiler.parser.previous()?.data.clone())?;

    compiler.named_variable(Token::synthetic("this"), false)?;
    if compiler.match_token(TokenKind::ParenLeft)? {
        let arg_count = compiler.argument_list()?;
        compiler.named_variable(Token::synthetic("super"), false)?;
        compiler.emit_pair(OpCode::SuperInvoke, name)?;
        compiler.emit_raw(arg_count)
    } else {
        compiler.named_variable(Token::synthetic("super"), false)?;
        compiler.emit_pair(OpCode::GetSuper, name)
    }
}

fn dot(compiler: &mut Compiler<'_>, can_assign: bool) -> Result<()> {
    compiler.consume(TokenKind::Identifier, "Expect property name after '.'")?;
    let name = compiler.identifier_constant(compiler.parser.previous()?.data.clone())?;

    if can_assign && compiler.match_token(TokenKind::Equal)? {
        compiler.expression()?;
        compiler.emit_pair(OpCode::SetProperty, name)
    } else if compiler.match_token(TokenKind::ParenLeft)? {
        // obj.method(args) fuses the property load and the call.
        let arg_count = compiler.argument_list()?;
        compiler.emit_pair(OpCode::Invoke, name)?;
        compiler.emit_raw(arg_count)
    } else {
        compiler.emit_pair(OpCode::GetProperty, name)
    }
}

fn unary(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let operator = compiler.parser.previous()?.kind;
    compiler.parse_precedence(Precedence::Unary)?;

    match operator {
        TokenKind::Minus => compiler.emit(OpCode::Negate),
        TokenKind::Bang => compiler.emit(OpCode::Not),
        // Unreachable: only `-` and `!` have this prefix rule.
        _ => panic!("Unexpected unary operator {}", operator),
    }
}

fn binary(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let operator = compiler.parser.previous()?.kind;

    // Compile the right operand, one level up to stay left-associative.
    let rule = get_rule(operator);
    compiler.parse_precedence(rule.precedence.higher())?;

    match operator {
        TokenKind::Plus => compiler.emit(OpCode::Add),
        TokenKind::Minus => compiler.emit(OpCode::Subtract),
        TokenKind::Star => compiler.emit(OpCode::Multiply),
        TokenKind::Slash => compiler.emit(OpCode::Divide),
        TokenKind::EqualEqual => compiler.emit(OpCode::Equal),
        TokenKind::BangEqual => {
            compiler.emit(OpCode::Equal)?;
            compiler.emit(OpCode::Not)
        }
        TokenKind::Greater => compiler.emit(OpCode::Greater),
        TokenKind::GreaterEqual => {
            compiler.emit(OpCode::Less)?;
            compiler.emit(OpCode::Not)
        }
        TokenKind::Less => compiler.emit(OpCode::Less),
        TokenKind::LessEqual => {
            compiler.emit(OpCode::Greater)?;
            compiler.emit(OpCode::Not)
        }
        _ => panic!("Unexpected binary operator {}", operator),
    }
}

fn and(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let end_jump = compiler.emit_jump(OpCode::JumpIfFalse)?;
    compiler.emit(OpCode::Pop)?;
    compiler.parse_precedence(Precedence::And)?;
    compiler.patch_jump(end_jump)
}

fn or(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let else_jump = compiler.emit_jump(OpCode::JumpIfFalse)?;
    let end_jump = compiler.emit_jump(OpCode::Jump)?;

    compiler.patch_jump(else_jump)?;
    compiler.emit(OpCode::Pop)?;

    compiler.parse_precedence(Precedence::Or)?;
    compiler.patch_jump(end_jump)
}

fn call(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    let arg_count = compiler.argument_list()?;
    compiler.emit_pair(OpCode::Call, arg_count)
}

fn literal(compiler: &mut Compiler<'_>, _can_assign: bool) -> Result<()> {
    match compiler.parser.previous()?.kind {
        TokenKind::Nil => compiler.emit(OpCode::Nil),
        TokenKind::True => compiler.emit(OpCode::True),
        TokenKind::False => compiler.emit(OpCode::False),
        _ => panic!("Unexpected literal"),
    }
}

type ParseFn = for<'r, 'src> fn(&'r mut Compiler<'src>, bool) -> Result<()>;

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn get_rule(kind: TokenKind) -> &'static ParseRule {
    &RULES_TABLE[kind as usize]
}

/// One row per `TokenKind`, in declaration order.
#[rustfmt::skip]
static RULES_TABLE: [ParseRule; 39] = [
    ParseRule { prefix: Some(grouping) , infix: Some(call)   , precedence: Precedence::Call       }, // ParenLeft
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // ParenRight
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // BraceLeft
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // BraceRight
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Comma
    ParseRule { prefix: None           , infix: Some(dot)    , precedence: Precedence::Call       }, // Dot
    ParseRule { prefix: Some(unary)    , infix: Some(binary) , precedence: Precedence::Term       }, // Minus
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Term       }, // Plus
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Semicolon
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Factor     }, // Slash
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Factor     }, // Star
    ParseRule { prefix: Some(unary)    , infix: None         , precedence: Precedence::None       }, // Bang
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Equality   }, // BangEqual
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Equal
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Equality   }, // EqualEqual
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Comparison }, // Greater
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Comparison }, // GreaterEqual
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Comparison }, // Less
    ParseRule { prefix: None           , infix: Some(binary) , precedence: Precedence::Comparison }, // LessEqual
    ParseRule { prefix: Some(variable) , infix: None         , precedence: Precedence::None       }, // Identifier
    ParseRule { prefix: Some(string)   , infix: None         , precedence: Precedence::None       }, // String
    ParseRule { prefix: Some(number)   , infix: None         , precedence: Precedence::None       }, // Number
    ParseRule { prefix: None           , infix: Some(and)    , precedence: Precedence::And        }, // And
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Class
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Else
    ParseRule { prefix: Some(literal)  , infix: None         , precedence: Precedence::None       }, // False
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // For
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Fun
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // If
    ParseRule { prefix: Some(literal)  , infix: None         , precedence: Precedence::None       }, // Nil
    ParseRule { prefix: None           , infix: Some(or)     , precedence: Precedence::Or         }, // Or
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Print
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Return
    ParseRule { prefix: Some(super_)   , infix: None         , precedence: Precedence::None       }, // Super
    ParseRule { prefix: Some(this_)    , infix: None         , precedence: Precedence::None       }, // This
    ParseRule { prefix: Some(literal)  , infix: None         , precedence: Precedence::None       }, // True
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // Var
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // While
    ParseRule { prefix: None           , infix: None         , precedence: Precedence::None       }, // EOF
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // ==, !=
    Comparison, // <, >, <=, >=
    Term,       // +, -
    Factor,     // *, /
    Unary,      // !, -
    Call,       // ., ()
    Primary,
}

impl Precedence {
    fn higher(&self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

struct Parser {
    current: Option<Token>,
    previous: Option<Token>,
}

impl Parser {
    fn new() -> Self {
        Self {
            current: None,
            previous: None,
        }
    }

    fn previous(&self) -> Result<&Token> {
        self.previous.as_ref().ok_or(CompileError::TokenNotFound)
    }

    fn current(&self) -> Result<&Token> {
        self.current.as_ref().ok_or(CompileError::TokenNotFound)
    }

    fn check_current(&self, kind: TokenKind) -> Result<bool> {
        Ok(self.current()?.kind == kind)
    }

    fn line(&self) -> u64 {
        self.previous.as_ref().map(|token| token.line).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Result<()> {
        let mut gc = GC::new();
        let compiler = Compiler::new(source, &mut gc);
        compiler.compile().map(|_| ())
    }

    #[test]
    fn compile_math() {
        assert!(compile("(-1 + 2) * 3 - -4;").is_ok());
        assert!(compile("1.5 + 1.3 * 3.5;").is_ok());
    }

    #[test]
    fn compile_print() {
        assert!(compile("print 1;").is_ok());
    }

    #[test]
    fn compile_constants() {
        let source = r#"
        var beverage = "cafe au lait";
        var breakfast = "beignets with " + beverage;
        print breakfast;
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_weird_assignments() {
        assert!(compile("a * b = c + d;").is_err());
        assert!(compile("1 = 2;").is_err());
    }

    #[test]
    fn compile_assign_to_itself() {
        let source = r#"
        var a = 1;
        {
            var a = a;
        }"#;
        assert!(compile(source).is_err());
    }

    #[test]
    fn compile_duplicate_local() {
        let source = r#"
        {
            var a = 1;
            var a = 2;
        }"#;
        assert!(compile(source).is_err());
    }

    #[test]
    fn compile_if_statement() {
        assert!(compile("if (1) {} else {}").is_ok());
    }

    #[test]
    fn compile_and_or() {
        assert!(compile("print true and false;").is_ok());
        assert!(compile("print true or false;").is_ok());
    }

    #[test]
    fn compile_while() {
        assert!(compile("while (true) {}").is_ok());
    }

    #[test]
    fn compile_for() {
        assert!(compile("for (var i = 0; i < 10; i = i + 1) {}").is_ok());
        assert!(compile("for (;;) {}").is_ok());
    }

    #[test]
    fn compile_fun_simple() {
        let source = r#"
        fun hello() {}
        fun hello2(a) {}
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_fibonacci_rec() {
        let source = r#"
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 2) + fib(n - 1);
            }
            print fib(10);
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_closure() {
        let source = r#"
            fun makeClosure() {
                var local = "local";
                fun closure() {
                    print local;
                }
                return closure;
            }
            var closure = makeClosure();
            closure();
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_class_declaration() {
        let source = r#"
            class Brioche {}
            print Brioche;
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_class_with_methods() {
        let source = r#"
            class Greeter {
                init(name) {
                    this.name = name;
                }
                hi() {
                    print "hi " + this.name;
                }
            }
            Greeter("world").hi();
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_inheritance() {
        let source = r#"
            class A { say() { print "A"; } }
            class B < A { say() { super.say(); print "B"; } }
            B().say();
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn compile_class_inherits_itself() {
        assert!(compile("class A < A {}").is_err());
    }

    #[test]
    fn compile_this_outside_class() {
        assert!(compile("print this;").is_err());
        assert!(compile("fun f() { return this; }").is_err());
    }

    #[test]
    fn compile_super_outside_class() {
        assert!(compile("super.method();").is_err());
    }

    #[test]
    fn compile_super_without_superclass() {
        assert!(compile("class A { m() { super.m(); } }").is_err());
    }

    #[test]
    fn compile_return_at_top_level() {
        assert!(compile("return 1;").is_err());
    }

    #[test]
    fn compile_return_value_from_initializer() {
        assert!(compile("class A { init() { return 1; } }").is_err());
        // A bare return is allowed.
        assert!(compile("class A { init() { return; } }").is_ok());
    }

    #[test]
    fn compile_parameter_limits() {
        let params = |n: usize| {
            (0..n)
                .map(|i| format!("p{}", i))
                .collect::<Vec<_>>()
                .join(", ")
        };
        assert!(compile(&format!("fun f({}) {{}}", params(255))).is_ok());
        assert!(compile(&format!("fun f({}) {{}}", params(256))).is_err());
    }

    #[test]
    fn compile_argument_limits() {
        // `true` arguments keep the constant pool out of the picture.
        let args = |n: usize| vec!["true"; n].join(", ");
        assert!(compile(&format!("fun f() {{}} f({});", args(255))).is_ok());
        assert!(compile(&format!("fun f() {{}} f({});", args(256))).is_err());
    }

    #[test]
    fn compile_local_limits() {
        let locals = |n: usize| {
            (0..n)
                .map(|i| format!("var l{} = {};", i, i))
                .collect::<String>()
        };
        assert!(compile(&format!("{{ {} }}", locals(255))).is_ok());
        assert!(compile(&format!("{{ {} }}", locals(256))).is_err());
    }

    #[test]
    fn compile_constant_limits() {
        // Each distinct number literal lands in the constant pool.
        let constants = |n: usize| {
            (0..n)
                .map(|i| format!("print {};", i))
                .collect::<String>()
        };
        assert!(compile(&constants(256)).is_ok());
        assert!(compile(&constants(257)).is_err());
    }

    #[test]
    fn compile_chunks_end_in_return() {
        let mut gc = GC::new();
        let compiler = Compiler::new("print 1;", &mut gc);
        let function = compiler.compile().unwrap();
        let chunk = &function.as_function().chunk;
        assert!(!chunk.code.is_empty());
        assert_eq!(*chunk.code.last().unwrap(), OpCode::Return as u8);
    }

    #[test]
    fn compile_keeps_going_after_error() {
        // Both statements are bad; panic-mode recovery reports each once.
        let result = compile("var 1 = 2; print; var x = 3;");
        match result {
            Err(CompileError::Default(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregated errors, got {:?}", other),
        }
    }

    #[test]
    fn compile_unterminated_string() {
        assert!(compile("var a = \"oops;").is_err());
    }
}
