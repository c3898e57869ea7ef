use nealisp::environment::Frame;
use nealisp::parser::parse;
use nealisp::{Config, Evaluator, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("nealisp interactive evaluator");
    println!("Enter forms like: (+ 1 2) or (defun sq (x) (* x x))");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut evaluator = Evaluator::with_standard_bindings(Config::default());

    // Callable from user code for demonstration purposes
    evaluator.register_native::<_, ()>("help", print_help);

    // One frame for the whole session, so definitions persist between lines
    let frame = evaluator.gen_bindings();
    let mut line_number = 0usize;

    loop {
        match rl.readline("nealisp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&frame, evaluator.root());
                        continue;
                    }
                    ":modules" => {
                        for name in evaluator.module_names() {
                            let state = if evaluator.is_module_realized(&name) {
                                "realized"
                            } else {
                                "registered"
                            };
                            println!("  {name:<15} {state}");
                        }
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                line_number += 1;
                match parse(&format!("<repl:{line_number}>"), line) {
                    Ok(program) => {
                        // diagnostics are printed by the evaluator itself
                        let result = evaluator.execute_program(&frame, &program);
                        if !matches!(result, Value::Nil) {
                            println!("{result}");
                        }
                    }
                    Err(e) => println!("Parse error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("nealisp REPL commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current bindings");
    println!("  :modules   - List registered modules");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Values:");
    println!("  Numbers: 42, -5, 2.5");
    println!("  Atoms: :name (booleans are :true and :false, bound as true/false)");
    println!("  Strings: \"text\\n\"");
    println!();
    println!("Core forms:");
    println!("  def, defun, lambda, if, seq, pure, quote, import");
    println!("  +, -, *, /, less, eq, hash, hash-get, hash-merge, list");
    println!("  tostring, debuglog, reflect-type");
    println!("  not, and, or, greater, less-eq, greater-eq, neq, identity");
    println!();
    println!("Examples:");
    println!("  (+ 1 2 3)");
    println!("  (defun fact (n) (if (less n 2) 1 (* n (fact (- n 1)))))");
    println!("  (hash-get (hash :a 1) :a)");
    println!();
}

fn print_environment(session: &Frame, root: &Frame) {
    let user_defined = session.local_names();
    let builtins = root.local_names();

    if !builtins.is_empty() {
        println!("Root bindings ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if user_defined.is_empty() {
        println!("No session bindings yet.");
        return;
    }
    println!("Session bindings ({}):", user_defined.len());
    for name in user_defined {
        if let Some(value) = session.resolve(&name) {
            println!("  {name} = {value}");
        }
    }
}
