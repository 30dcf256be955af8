//! Graphviz export for CFGs and the call graph
//!
//! Basic blocks render as white squares labeled `#<id>`; operations as
//! ellipses labeled `KIND(arg)@line:column`, lightgreen except calls whose
//! callee failed to resolve, which are lightcoral. Call-graph edges to
//! unresolved callees are dashed red.

use crate::cfg::{CfgFunction, CfgProgram, OpKind, Operation};
use std::fmt::Write as _;

/// Escape `"`, `\`, newline and CR for a DOT string literal.
fn escape_dot(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out
}

fn kind_str(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Assign => "ASSIGN",
        OpKind::Binop => "BINOP",
        OpKind::Unop => "UNOP",
        OpKind::Call => "CALL",
        OpKind::Index => "INDEX",
        OpKind::Var => "READ",
        OpKind::Literal => "CONST",
        OpKind::Cond => "COND",
        OpKind::Return => "RETURN",
        OpKind::Break => "BREAK",
        OpKind::VarDecl => "VARDECL",
        OpKind::FieldAccess => "FIELD_ACCESS",
        OpKind::MethodCall => "METHOD_CALL",
        OpKind::New => "NEW",
    }
}

/// Format an operation label: `KIND(arg)@0:0`. Calls and index operations
/// show their base operand; conditions, returns and breaks show no
/// argument.
fn operation_label(op: &Operation) -> String {
    let arg = match op.kind {
        OpKind::Call | OpKind::Index => op
            .operands
            .first()
            .map(|o| o.name.as_str())
            .unwrap_or("?"),
        OpKind::Cond | OpKind::Return | OpKind::Break => "",
        _ => op.name.as_str(),
    };
    format!("{}({})@0:0", kind_str(op.kind), escape_dot(arg))
}

/// Whether a call operation's callee resolves to a defined function.
fn call_resolves(prog: &CfgProgram<'_>, op: &Operation) -> bool {
    match op.operands.first() {
        Some(name_op) => prog.find_function(&name_op.name).is_some(),
        None => false,
    }
}

/// Render one function's CFG as `digraph CFG_<name>`.
pub fn function_to_dot(func: &CfgFunction, prog: &CfgProgram<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph CFG_{} {{", func.name);
    let _ = writeln!(
        out,
        "  label=\"CFG for function: {}\";",
        escape_dot(&func.name)
    );
    out.push_str("  node [fontname=\"Helvetica\"];\n");
    out.push_str("  rankdir=TB;\n");

    for block in &func.blocks {
        let _ = writeln!(
            out,
            "  block_{} [label=\"#{}\", shape=box, style=filled, fillcolor=white];",
            block.id, block.id
        );
    }

    let mut op_counter = 0usize;
    for block in &func.blocks {
        if block.is_entry || block.is_exit {
            continue;
        }
        for op in &block.ops {
            let op_id = 10000 + op_counter;
            op_counter += 1;

            let fillcolor = if op.kind == OpKind::Call && !call_resolves(prog, op) {
                "lightcoral"
            } else {
                "lightgreen"
            };
            let _ = writeln!(
                out,
                "  op_{} [label=\"{}\", shape=ellipse, style=filled, fillcolor={}];",
                op_id,
                operation_label(op),
                fillcolor
            );
            let _ = writeln!(out, "  block_{} -> op_{} [style=solid];", block.id, op_id);
        }
    }

    for block in &func.blocks {
        if let Some(next) = block.successor {
            let _ = writeln!(
                out,
                "  block_{} -> block_{} [style=solid];",
                block.id, func.blocks[next].id
            );
        }
        if let Some(next) = block.successor_true {
            let _ = writeln!(
                out,
                "  block_{} -> block_{} [label=\"true\", style=solid];",
                block.id, func.blocks[next].id
            );
        }
        if let Some(next) = block.successor_false {
            let _ = writeln!(
                out,
                "  block_{} -> block_{} [label=\"false\", style=solid];",
                block.id, func.blocks[next].id
            );
        }
    }

    out.push_str("}\n");
    out
}

/// Render the whole-program call graph.
pub fn call_graph_to_dot(prog: &CfgProgram<'_>) -> String {
    let mut out = String::new();
    out.push_str("digraph CallGraph {\n");
    out.push_str("  label=\"Call Graph\";\n");
    out.push_str("  node [shape=box, fontname=Helvetica];\n");

    for func in &prog.functions {
        let name = escape_dot(&func.name);
        let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", name, name);
    }

    for edge in &prog.call_graph.edges {
        let caller = escape_dot(&prog.functions[edge.caller].name);
        match edge.callee {
            Some(callee) => {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\";",
                    caller,
                    escape_dot(&prog.functions[callee].name)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [style=dashed, color=red];",
                    caller,
                    escape_dot(&edge.callee_name)
                );
            }
        }
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstNode;
    use crate::cfg::CfgProgram;
    use crate::parser::Parser;

    fn parse(src: &str) -> AstNode {
        Parser::new(src).unwrap().parse().unwrap()
    }

    #[test]
    fn function_dot_has_blocks_ops_and_edges() {
        let root = parse("int f(int x) { if (x < 1) { return 1; } return 0; }");
        let mut prog = CfgProgram::new();
        prog.add_file("t.mica", &root);
        prog.build();

        let dot = function_to_dot(&prog.functions[0], &prog);
        assert!(dot.starts_with("digraph CFG_f {"));
        assert!(dot.contains("label=\"CFG for function: f\";"));
        assert!(dot.contains("shape=box, style=filled, fillcolor=white"));
        assert!(dot.contains("COND()@0:0"));
        assert!(dot.contains("RETURN()@0:0"));
        assert!(dot.contains("[label=\"true\", style=solid];"));
        assert!(dot.contains("[label=\"false\", style=solid];"));
        // operation ids start at 10000 and link from their block
        assert!(dot.contains("op_10000"));
        assert!(dot.contains("-> op_10000 [style=solid];"));
    }

    #[test]
    fn unresolved_calls_are_lightcoral_and_dashed_red() {
        let root = parse("int f() { nowhere(); return 0; }");
        let mut prog = CfgProgram::new();
        prog.add_file("t.mica", &root);
        prog.build();

        let dot = function_to_dot(&prog.functions[0], &prog);
        assert!(dot.contains("CALL(nowhere)@0:0"));
        assert!(dot.contains("fillcolor=lightcoral"));

        let cg = call_graph_to_dot(&prog);
        assert!(cg.contains("\"f\" -> \"nowhere\" [style=dashed, color=red];"));
    }

    #[test]
    fn resolved_calls_are_green_and_solid() {
        let root = parse("int g() { return 0; } int f() { return g(); }");
        let mut prog = CfgProgram::new();
        prog.add_file("t.mica", &root);
        prog.build();

        let f_idx = prog.find_function("f").unwrap();
        let dot = function_to_dot(&prog.functions[f_idx], &prog);
        assert!(dot.contains("CALL(g)@0:0"));
        assert!(!dot.contains("lightcoral"));

        let cg = call_graph_to_dot(&prog);
        assert!(cg.contains("\"f\" -> \"g\";"));
        assert!(cg.contains("\"g\" [label=\"g\"];"));
    }

    #[test]
    fn escaping_handles_quotes_and_backslashes() {
        assert_eq!(escape_dot("a\"b\\c\nd\re"), "a\\\"b\\\\c\\nd\\re");
    }

    #[test]
    fn var_and_literal_render_as_read_and_const() {
        let root = parse("int f(int x) { x; 5; int y = x + 2; return y; }");
        let mut prog = CfgProgram::new();
        prog.add_file("t.mica", &root);
        prog.build();

        let dot = function_to_dot(&prog.functions[0], &prog);
        assert!(dot.contains("READ(x)@0:0"));
        assert!(dot.contains("CONST(5)@0:0"));
        // only root operations of each block are rendered as nodes, so the
        // initializer of y shows up under its VARDECL only
        assert!(dot.contains("VARDECL(y)@0:0"));
        assert!(dot.contains("RETURN()@0:0"));
    }
}
