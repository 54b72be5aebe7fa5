//! Command-line entry point: run a script file or start the REPL.

use std::{env, fs, process};

use laxlang::error::LaxError;
use laxlang::repl;
use laxlang::vm::Vm;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// FreeBSD sysexits, same as the reference interpreter.
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

fn main() {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    let args: Vec<String> = env::args().collect();
    match args.as_slice() {
        [_] => {
            if let Err(err) = repl::repl() {
                repl::report(&err);
                process::exit(EX_IOERR);
            }
        }
        [_, path] => run_file(path),
        _ => {
            eprintln!("Usage: lax [script]");
            process::exit(EX_USAGE);
        }
    }
}

fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read \"{}\": {}.", path, err);
            process::exit(EX_IOERR);
        }
    };

    let mut vm = Vm::new();
    if let Err(err) = vm.interpret(&source) {
        repl::report(&err);
        match err {
            LaxError::Compile(_) => process::exit(EX_DATAERR),
            LaxError::Runtime(_) => process::exit(EX_SOFTWARE),
            LaxError::Io(_) => process::exit(EX_IOERR),
        }
    }
}
