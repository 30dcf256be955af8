//! Mica CFG analyzer CLI
//!
//! Builds control-flow graphs and a whole-program call graph for one or
//! more source files and writes Graphviz DOT:
//! `mica-cfg <input>... [output-dir]`. If the last argument is an existing
//! directory it is the output directory; otherwise outputs go next to each
//! input. Exits 1 if any parse, analysis or write error occurred.

use clap::Parser as ClapParser;
use micac::{AstNode, CfgProgram, dot};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "mica-cfg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mica CFG analyzer - emit per-function CFG and call-graph DOT", long_about = None)]
struct Cli {
    /// Input files, optionally followed by an output directory
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

/// `<dir>/<base>.<func>.<suffix>`, or next to the source file when no
/// output directory was given.
fn output_path(
    outdir: Option<&Path>,
    source_file: &str,
    func_name: Option<&str>,
    suffix: &str,
) -> PathBuf {
    let src = Path::new(source_file);
    let base = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let file_name = match func_name {
        Some(func) => format!("{}.{}{}", base, func, suffix),
        None => format!("{}{}", base, suffix),
    };
    match outdir {
        Some(dir) => dir.join(file_name),
        None => match src.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
            _ => PathBuf::from(file_name),
        },
    }
}

fn write_dot_file(path: &Path, content: &str) -> bool {
    match fs::write(path, content) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Error: cannot write to '{}': {}", path.display(), e);
            false
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    let mut inputs = cli.paths;
    let mut output_dir: Option<PathBuf> = None;
    if inputs.len() >= 2 && inputs.last().is_some_and(|p| p.is_dir()) {
        output_dir = inputs.pop();
    }

    let mut parse_errors = false;
    let mut asts: Vec<(String, AstNode)> = Vec::new();
    for path in &inputs {
        match micac::parse_file(path) {
            Ok(root) => asts.push((path.display().to_string(), root)),
            Err(e) => {
                eprintln!("Error: {}", e);
                parse_errors = true;
            }
        }
    }
    if parse_errors {
        process::exit(1);
    }

    let mut prog = CfgProgram::new();
    for (filename, root) in &asts {
        prog.add_file(filename, root);
    }
    prog.build();

    for err in &prog.errors {
        eprintln!("{}", err);
    }

    if let Some(dir) = &output_dir {
        if !dir.exists() && fs::create_dir_all(dir).is_err() {
            eprintln!("Error: cannot create output directory '{}'", dir.display());
            process::exit(1);
        }
    }

    let mut write_errors = false;
    for func in &prog.functions {
        let path = output_path(
            output_dir.as_deref(),
            &func.source_file,
            Some(&func.name),
            ".cfg.dot",
        );
        let content = dot::function_to_dot(func, &prog);
        if !write_dot_file(&path, &content) {
            write_errors = true;
        }
    }

    // the call graph is named after the first input file
    if let Some((first, _)) = asts.first() {
        if !prog.functions.is_empty() {
            let path = output_path(output_dir.as_deref(), first, None, ".callgraph.dot");
            let content = dot::call_graph_to_dot(&prog);
            if !write_dot_file(&path, &content) {
                write_errors = true;
            }
        }
    }

    if write_errors || !prog.errors.is_empty() {
        process::exit(1);
    }
}
