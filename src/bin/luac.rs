//! The `luac` ahead-of-time compiler front-end (spec.md §6): parses one
//! or more source files, optionally lists their bytecode, and writes the
//! combined (well, last) prototype to an output image.

use std::process::ExitCode;

use lua51::compiler::Proto;

const VERSION: &str = "luac 5.1 (lua51-rs)";

#[derive(Default)]
struct Options {
    list: bool,
    parse_only: bool,
    strip: bool,
    show_version: bool,
    output: Option<String>,
    files: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-l" => opts.list = true,
            "-p" => opts.parse_only = true,
            "-s" => opts.strip = true,
            "-v" => opts.show_version = true,
            "-o" => {
                i += 1;
                let out = args.get(i).ok_or("'-o' needs argument")?;
                opts.output = Some(out.clone());
            }
            other => opts.files.push(other.to_string()),
        }
        i += 1;
    }
    Ok(opts)
}

fn list_proto(proto: &Proto, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}function <{}:{},{}> ({} instructions, {} params, {} upvalues)",
        proto.source,
        proto.line_defined,
        proto.last_line_defined,
        proto.code.len(),
        proto.num_params,
        proto.upvalues.len(),
    );
    for (pc, &word) in proto.code.iter().enumerate() {
        let instr = lua51::opcode::Instruction(word);
        println!(
            "{indent}\t{}\t[{}]\t{:?}",
            pc + 1,
            proto.line_at(pc),
            instr.op()
        );
    }
    for sub in &proto.sub_protos {
        list_proto(sub, depth + 1);
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("luac: {e}");
            return ExitCode::FAILURE;
        }
    };

    if opts.show_version {
        println!("{VERSION}");
        if opts.files.is_empty() {
            return ExitCode::SUCCESS;
        }
    }

    if opts.files.is_empty() {
        eprintln!("luac: no input files given");
        return ExitCode::FAILURE;
    }

    let mut last_proto = None;
    for path in &opts.files {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("luac: cannot open {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let proto = match lua51::compile(&source, path) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("luac: {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        if opts.list {
            list_proto(&proto, 0);
        }
        last_proto = Some(proto);
    }

    if opts.parse_only {
        return ExitCode::SUCCESS;
    }

    let Some(proto) = last_proto else {
        return ExitCode::SUCCESS;
    };
    let bytes = lua51::bytecode::write_proto(&proto, opts.strip);
    let out_path = opts.output.as_deref().unwrap_or("luac.out");
    if let Err(e) = std::fs::write(out_path, bytes) {
        eprintln!("luac: cannot write {out_path}: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
