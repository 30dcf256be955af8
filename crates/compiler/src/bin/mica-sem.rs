//! Mica semantic dumper CLI
//!
//! Writes the full AST of one source file as Graphviz DOT:
//! `mica-sem <input> <output>`. Exit codes: 1 input-open failure, 2 syntax
//! error, 4 output-open failure. (Code 3, "no AST root", is reserved; the
//! parser always yields a root for accepted input.)

use clap::Parser as ClapParser;
use micac::ast;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "mica-sem")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mica semantic analyzer - dump the AST as Graphviz DOT", long_about = None)]
struct Cli {
    /// Input .mica source file
    input: PathBuf,

    /// Output .dot file
    output: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!(
                "Error: cannot open input file '{}': {}",
                cli.input.display(),
                e
            );
            process::exit(1);
        }
    };

    let root = match micac::parse_source(&source, micac::parser_trace_enabled()) {
        Ok(root) => root,
        Err(e) => {
            eprintln!(
                "Error: syntax errors found in '{}': {}",
                cli.input.display(),
                e
            );
            process::exit(2);
        }
    };

    let dot = ast::write_dot(&root);
    if let Err(e) = fs::write(&cli.output, dot) {
        eprintln!(
            "Error: cannot write to output file '{}': {}",
            cli.output.display(),
            e
        );
        process::exit(4);
    }
}
