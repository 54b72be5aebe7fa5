//! The interactive prompt.

use std::io::{self, BufRead, Write};

use colored::Colorize;

use crate::error::LaxError;
use crate::vm::Vm;

/// Read-eval-print until EOF or `exit`. One `Vm` serves the whole
/// session, so globals carry over from line to line.
pub fn repl() -> Result<(), LaxError> {
    let mut vm = Vm::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!(">>> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF.
            println!();
            break;
        }
        let line = line.trim();
        if line == "exit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        if let Err(err) = vm.interpret(line) {
            report(&err);
        }
    }

    Ok(())
}

/// Print an error the way the file runner does, without exiting.
pub fn report(err: &LaxError) {
    match err {
        LaxError::Compile(errors) => {
            for error in errors {
                eprintln!("{}", error.to_string().red());
            }
        }
        other => eprintln!("{}", other.to_string().red()),
    }
}
