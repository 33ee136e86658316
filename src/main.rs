#![warn(rust_2018_idioms)]

use std::io::{self, BufRead, Write};

mod compiler;
mod debug;
mod memory;
mod vm;

use memory::GC;
use vm::{VMError, VM};

const EXIT_BAD_USAGE: i32 = 64;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut gc = GC::new();
    let mut vm = VM::new(&mut gc);

    match args.len() {
        1 => repl(&mut vm),
        2 => run_file(&mut vm, &args[1]),
        _ => {
            eprintln!("Usage: lox-vm [script]");
            std::process::exit(EXIT_BAD_USAGE);
        }
    }
}

fn repl(vm: &mut VM<'_>) {
    println!("Lox REPL. 'exit' or 'quit' to stop.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(" > ");
        let _ = io::stdout().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        if line == "exit" || line == "quit" {
            break;
        }

        // Errors were already reported on stderr; the next line starts over.
        let _ = vm.interpret(&line);
    }
}

fn run_file(vm: &mut VM<'_>, path: &str) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Unable to open file '{}': {}", path, err);
            std::process::exit(EXIT_IO_ERROR);
        }
    };

    match vm.interpret(&source) {
        Ok(()) => {}
        Err(VMError::CompileError(_)) => std::process::exit(EXIT_COMPILE_ERROR),
        Err(_) => std::process::exit(EXIT_RUNTIME_ERROR),
    }
}
