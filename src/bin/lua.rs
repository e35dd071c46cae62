//! The `lua` interpreter front-end (spec.md §6): compiles source or loads
//! a bytecode image, runs it against a fresh global state, and optionally
//! drops into a line-oriented REPL.

use std::io::{self, IsTerminal, Read, Write};
use std::process::ExitCode;
use std::rc::Rc;

use lua51::value::Value;
use lua51::vm::{LuaError, State};

const VERSION: &str = "Lua 5.1 (lua51-rs)";

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    require_modules: Vec<String>,
    show_version: bool,
    script: Option<String>,
    script_args: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-e" => {
                i += 1;
                let stat = args.get(i).ok_or("'-e' needs argument")?;
                opts.execute_strings.push(stat.clone());
            }
            "-i" => opts.interactive = true,
            "-l" => {
                i += 1;
                let name = args.get(i).ok_or("'-l' needs argument")?;
                opts.require_modules.push(name.clone());
            }
            "-v" => opts.show_version = true,
            arg if opts.script.is_none() => {
                opts.script = Some(arg.to_string());
                opts.script_args = args[i + 1..].to_vec();
                return Ok(opts);
            }
            other => return Err(format!("unrecognized option '{other}'")),
        }
        i += 1;
    }
    Ok(opts)
}

fn report(e: impl std::fmt::Display) -> ExitCode {
    eprintln!("lua: {e}");
    ExitCode::FAILURE
}

fn run_text(state: &mut State, source: &str, chunk_name: &str) -> Result<(), LuaError> {
    let proto = lua51::compile(source, chunk_name)?;
    state.run_proto(Rc::new(proto))?;
    Ok(())
}

fn run_bytecode(state: &mut State, bytes: &[u8]) -> Result<(), LuaError> {
    let proto = lua51::bytecode::read_proto(bytes).map_err(LuaError::runtime)?;
    state.run_proto(Rc::new(proto))?;
    Ok(())
}

fn run_repl(state: &mut State) {
    println!("{VERSION}");
    let stdin = io::stdin();
    let mut lock = stdin.lock();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::BufRead::read_line(&mut lock, &mut line).unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed == "exit()" || trimmed == "quit()" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        let as_expr = format!("return {trimmed}");
        let chunk = if lua51::compile(&as_expr, "stdin").is_ok() {
            as_expr
        } else {
            trimmed.to_string()
        };
        match lua51::compile(&chunk, "stdin").and_then(|proto| state.run_proto(Rc::new(proto))) {
            Ok(rets) => {
                for v in &rets {
                    if !matches!(v, Value::Nil) {
                        println!("{}", lua51::value::display_value(v));
                    }
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => return report(e),
    };

    if opts.show_version {
        println!("{VERSION}");
        if opts.execute_strings.is_empty() && opts.script.is_none() {
            return ExitCode::SUCCESS;
        }
    }

    let mut state = lua51::new_state();
    for name in &opts.require_modules {
        eprintln!("lua: warning: '-l {name}' ignored (no module system, spec.md §1 Non-goals)");
    }

    for stat in &opts.execute_strings {
        if let Err(e) = run_text(&mut state, stat, "(command line)") {
            return report(e);
        }
    }

    match &opts.script {
        Some(path) if path.ends_with(".luac") => {
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => return report(format!("cannot open {path}: {e}")),
            };
            if let Err(e) = run_bytecode(&mut state, &bytes) {
                return report(e);
            }
        }
        Some(path) => {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => return report(format!("cannot open {path}: {e}")),
            };
            if let Err(e) = run_text(&mut state, &source, path) {
                return report(e);
            }
        }
        None if opts.execute_strings.is_empty() => {
            if io::stdin().is_terminal() {
                run_repl(&mut state);
                return ExitCode::SUCCESS;
            }
            let mut source = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut source) {
                return report(e);
            }
            if let Err(e) = run_text(&mut state, &source, "stdin") {
                return report(e);
            }
        }
        None => {}
    }

    if opts.interactive {
        run_repl(&mut state);
    }

    ExitCode::SUCCESS
}
