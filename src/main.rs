use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::Parser as ClapParser;

use cilly::bytecode::{self, compile_error::CompileError, disasm};
use cilly::frontend::token_dumper::TokenDumper;
use cilly::lang::native::Natives;
use cilly::lang::value::Value;
use cilly::runtime::vm_ast::{EvalConfig, Evaluator};
use cilly::runtime::vm_bc::{VmBc, VmBcConfig};

/// Extension of compiled bytecode files.
const BYTECODE_EXT: &str = "cbc";

#[derive(ClapParser, Debug)]
#[command(name = "cilly", version, about = "Run cilly programs")]
struct Cli {
    /// Source file, or a compiled `.cbc` file
    file: Option<PathBuf>,

    /// Run with the tree-walking evaluator instead of the bytecode VM
    #[arg(long)]
    eval: bool,

    /// Print the tokens and exit
    #[arg(long)]
    tokens: bool,

    /// Disable colors in the token listing
    #[arg(long)]
    no_color: bool,

    /// Print the AST and exit
    #[arg(long)]
    ast: bool,

    /// Print the bytecode disassembly and exit
    #[arg(long)]
    dis: bool,

    /// Write the compiled bytecode to this file instead of running
    #[arg(long, value_name = "OUT")]
    emit: Option<PathBuf>,

    /// Start an interactive evaluator session
    #[arg(long, short = 'i')]
    repl: bool,

    /// Abort after this many executed steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Maximum nesting of function calls
    #[arg(long)]
    max_call_depth: Option<usize>,
}

impl Cli {
    fn eval_config(&self) -> EvalConfig {
        let mut config = EvalConfig {
            max_steps: self.max_steps,
            ..EvalConfig::default()
        };
        if let Some(depth) = self.max_call_depth {
            config.max_call_depth = depth;
        }
        config
    }

    fn vm_config(&self) -> VmBcConfig {
        let mut config = VmBcConfig {
            max_steps: self.max_steps,
            ..VmBcConfig::default()
        };
        if let Some(depth) = self.max_call_depth {
            config.max_call_depth = depth;
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(&cli) {
        eprintln!("{:#}", e);
        if let Some(hint) = e
            .downcast_ref::<cilly::Error>()
            .and_then(|e| match e {
                cilly::Error::Compile(CompileError { kind, .. }) => kind.hint(),
                _ => None,
            })
        {
            eprintln!("  hint: {}", hint);
        }
        process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    if cli.repl {
        return repl(cli);
    }

    let Some(path) = cli.file.as_deref() else {
        bail!("no input file (try --help, or --repl for an interactive session)");
    };

    if path.extension().and_then(|e| e.to_str()) == Some(BYTECODE_EXT) {
        let bytes = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        let program = bytecode::Program::from_bytes(&bytes)
            .map_err(cilly::Error::from)
            .with_context(|| format!("'{}' is not a cilly bytecode file", path.display()))?;
        return run_bytecode(cli, &program);
    }

    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    run_source(cli, &source)
}

fn run_source(cli: &Cli, source: &str) -> Result<()> {
    let tokens = cilly::lex(source)?;
    if cli.tokens {
        let mut dumper = TokenDumper::new();
        if cli.no_color {
            dumper = dumper.no_color();
        }
        dumper.dump(&tokens);
        return Ok(());
    }

    let ast = cilly::parse(tokens)?;
    if cli.ast {
        println!("{:#?}", ast);
        return Ok(());
    }

    if cli.eval {
        let mut evaluator = Evaluator::new(&Natives::prelude()).with_config(cli.eval_config());
        evaluator
            .eval_program(&ast)
            .map_err(cilly::Error::from)?;
        return Ok(());
    }

    let program = cilly::compile(&ast)?;
    if let Some(out) = cli.emit.as_deref() {
        return emit(&program, out);
    }
    run_bytecode(cli, &program)
}

fn run_bytecode(cli: &Cli, program: &bytecode::Program) -> Result<()> {
    if cli.dis {
        disasm::print_program(program);
        return Ok(());
    }

    log::debug!(
        "running {} code word(s), {} constant(s)",
        program.main.code.len(),
        program.constants.len()
    );
    let mut vm = VmBc::new(&Natives::prelude()).with_config(cli.vm_config());
    vm.run_compiled(program).map_err(cilly::Error::from)?;
    Ok(())
}

fn emit(program: &bytecode::Program, out: &Path) -> Result<()> {
    let bytes = program.to_bytes().map_err(cilly::Error::from)?;
    fs::write(out, &bytes).with_context(|| format!("failed to write '{}'", out.display()))?;
    println!("wrote {} byte(s) to {}", bytes.len(), out.display());
    Ok(())
}

/// Reads one program per line, evaluating each in the same global scope.
fn repl(cli: &Cli) -> Result<()> {
    println!("cilly {} (empty line or Ctrl-D to exit)", env!("CARGO_PKG_VERSION"));

    let mut evaluator = Evaluator::new(&Natives::prelude()).with_config(cli.eval_config());
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("failed to write prompt")?;

        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            break;
        }

        let result = cilly::lex(&line)
            .and_then(cilly::parse)
            .and_then(|ast| evaluator.eval_program(&ast).map_err(cilly::Error::from));

        match result {
            Ok(Value::Null) => {}
            Ok(value) => println!("{}", value),
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}
