//! Mica code generator CLI
//!
//! Compiles one Mica source file to s390x GNU-assembler text:
//! `mica-codegen <input> <output>` or `mica-codegen <input> -o <output>`.
//! Exits 0 on success, 1 on bad arguments, parse failure or I/O failure.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use micac::{CodegenConfig, TypeEnv, codegen};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "mica-codegen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mica compiler - generate s390x assembly", long_about = None)]
struct Cli {
    /// Input .mica source file
    input: Option<PathBuf>,

    /// Output assembly file
    #[arg(conflicts_with = "output_flag")]
    output: Option<PathBuf>,

    /// Output assembly file (flag form)
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output_flag: Option<PathBuf>,

    /// Extend the extern allow-list from a TOML manifest
    #[arg(long, value_name = "PATH")]
    externs_manifest: Option<PathBuf>,

    /// Generate shell completion scripts and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "mica-codegen", &mut io::stdout());
        return;
    }

    let output = cli.output.or(cli.output_flag);
    let (Some(input), Some(output)) = (cli.input, output) else {
        eprintln!("usage: mica-codegen <input-file> <output-file>");
        eprintln!("   or: mica-codegen <input-file> -o <output-file>");
        process::exit(1);
    };

    let config = match &cli.externs_manifest {
        Some(path) => {
            let content = match fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!(
                        "Error: cannot open externs manifest '{}': {}",
                        path.display(),
                        e
                    );
                    process::exit(1);
                }
            };
            match CodegenConfig::from_toml(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        None => CodegenConfig::default(),
    };

    let mut root = match micac::parse_file(&input) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let env = TypeEnv::build(&root);
    for diag in env.diagnostics() {
        eprintln!("Warning: {}", diag);
    }

    let asm = match codegen::generate(&mut root, &env, &config) {
        Ok(asm) => asm,
        Err(e) => {
            eprintln!("Error: code generation failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = fs::write(&output, asm) {
        eprintln!(
            "Error: cannot open output file '{}': {}",
            output.display(),
            e
        );
        process::exit(1);
    }
}
