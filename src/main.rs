use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use mirza::bytecode::disasm::disassemble;
use mirza::diagnostic::{ansi::AnsiRenderer, json, registry, Diagnostic};
use mirza::vm::{Vm, VmConfig};

/// mirza - compile and run a small typed language on a stack machine
#[derive(Parser, Debug)]
#[command(name = "mirza", version)]
#[command(about = "Compile and run mirza programs", long_about = None)]
struct Args {
    /// Source file to run; reads stdin when absent or "-"
    path: Option<PathBuf>,

    /// Print the disassembled bytecode before running
    #[arg(long)]
    dasm: bool,

    /// Compile only, do not execute
    #[arg(short = 'n', long)]
    no_run: bool,

    /// Print the parsed AST as JSON and exit
    #[arg(long)]
    ast: bool,

    /// Report errors as JSON lines on stderr
    #[arg(long)]
    json: bool,

    /// Abort after this many executed instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// Operand stack capacity in slots
    #[arg(long, value_name = "N", default_value_t = 2048)]
    stack_size: usize,

    /// Explain an error code (e.g. MZ-G002) and exit
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // MIRZA_LOG wins over RUST_LOG; warnings only by default
    let filter = EnvFilter::try_from_env("MIRZA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_source(path: Option<&Path>) -> Result<String, Diagnostic> {
    match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)
            .map_err(|e| Diagnostic::error(format!("cannot read {}: {e}", p.display()))),
        _ => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .map_err(|e| Diagnostic::error(format!("cannot read stdin: {e}")))?;
            Ok(source)
        }
    }
}

fn drive(args: &Args, source: &str) -> Result<(), Diagnostic> {
    let attach = |e: mirza::Error| Diagnostic::from(&e).with_source(source);

    if args.ast {
        let module = mirza::parse(source).map_err(attach)?;
        let text = serde_json::to_string_pretty(&module)
            .map_err(|e| Diagnostic::error(format!("cannot serialize AST: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    let program = mirza::compile(source).map_err(attach)?;
    debug!(code = program.code.len(), data = program.data.len(), "compiled");

    let stdout = std::io::stdout();
    if args.dasm {
        let mut out = stdout.lock();
        out.write_all(disassemble(&program).as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| Diagnostic::error(format!("cannot write disassembly: {e}")))?;
    }
    if args.no_run {
        return Ok(());
    }

    let config = VmConfig { stack_size: args.stack_size, max_steps: args.max_steps };
    let mut vm = Vm::with_config(&program, stdout.lock(), config);
    let result = vm.run();
    // Whatever was printed before a runtime error still reaches stdout.
    let flushed = vm.into_output().flush();
    result.map_err(|e| attach(e.into()))?;
    flushed.map_err(|e| Diagnostic::error(format!("cannot write output: {e}")))
}

fn report(d: &Diagnostic, as_json: bool) {
    if as_json {
        eprintln!("{}", json::render(d));
    } else {
        let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
        eprint!("{}", renderer.render(d));
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    if let Some(code) = &args.explain {
        return match registry::lookup(code) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                report(&Diagnostic::error(format!("unknown error code '{code}'")), args.json);
                ExitCode::FAILURE
            }
        };
    }

    let outcome = read_source(args.path.as_deref()).and_then(|source| drive(&args, &source));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            report(&d, args.json);
            ExitCode::FAILURE
        }
    }
}
