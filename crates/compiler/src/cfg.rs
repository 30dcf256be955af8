//! Control-flow-graph construction
//!
//! Lowers each function body into a graph of basic blocks, where every block
//! holds a sequence of decomposed operations, and builds a whole-program
//! call graph over all input files.
//!
//! The edge model is strict: a block carries either exactly one
//! unconditional `successor` or a `successor_true`/`successor_false` pair,
//! never both. `RETURN` blocks always flow to the function exit and `BREAK`
//! blocks to their loop exit; statements following such a terminator are
//! unreachable and are not materialized as blocks.
//!
//! Analysis errors are accumulated, never thrown: the build always runs to
//! completion and reports its full diagnostic list.

use crate::ast::AstNode;

/// Kinds of decomposed operations inside basic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Assign,
    Binop,
    Unop,
    Call,
    Index,
    Var,
    Literal,
    Cond,
    Return,
    Break,
    VarDecl,
    FieldAccess,
    MethodCall,
    New,
}

/// One elementary operation. Operand operations mirror the AST shape of the
/// originating expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    /// Operator lexeme, identifier, literal text or field/method name.
    pub name: String,
    pub operands: Vec<Operation>,
}

impl Operation {
    fn new(kind: OpKind, name: impl Into<String>) -> Self {
        Operation {
            kind,
            name: name.into(),
            operands: Vec::new(),
        }
    }
}

/// A basic block. `successor*` fields are indices into the owning
/// function's `blocks` arena.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Unique numeric id, monotonic across the whole program.
    pub id: u32,
    pub is_entry: bool,
    pub is_exit: bool,
    pub ops: Vec<Operation>,
    pub successor: Option<usize>,
    pub successor_true: Option<usize>,
    pub successor_false: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CfgFunction {
    pub name: String,
    pub return_type: String,
    pub parameters: Vec<(String, String)>,
    pub source_file: String,
    pub entry: usize,
    pub exit: usize,
    pub blocks: Vec<BasicBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgErrorKind {
    BreakOutsideLoop,
    UnknownFunction,
    InvalidAst,
    ParseError,
}

#[derive(Debug, Clone)]
pub struct CfgError {
    pub kind: CfgErrorKind,
    pub message: String,
    pub function_name: Option<String>,
    pub source_file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for CfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error")?;
        if let Some(file) = &self.source_file {
            write!(f, " in {}", file)?;
        }
        if let Some(func) = &self.function_name {
            write!(f, " (function {})", func)?;
        }
        if self.line > 0 {
            write!(f, ":{}", self.line)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// An edge in the call graph. `callee` is `None` when the name could not be
/// resolved to a defined function.
#[derive(Debug, Clone)]
pub struct CallEdge {
    pub caller: usize,
    pub callee: Option<usize>,
    pub callee_name: String,
}

#[derive(Debug, Default)]
pub struct CallGraph {
    pub edges: Vec<CallEdge>,
}

/// One input file and the functions discovered in it (as indices into the
/// program's function list).
#[derive(Debug)]
pub struct CfgFile<'a> {
    pub filename: String,
    pub root: &'a AstNode,
    pub functions: Vec<usize>,
}

/// Root object for CFG analysis over a collection of parsed files.
#[derive(Debug, Default)]
pub struct CfgProgram<'a> {
    pub files: Vec<CfgFile<'a>>,
    pub functions: Vec<CfgFunction>,
    pub call_graph: CallGraph,
    pub errors: Vec<CfgError>,
    next_block_id: u32,
}

impl<'a> CfgProgram<'a> {
    pub fn new() -> Self {
        CfgProgram {
            files: Vec::new(),
            functions: Vec::new(),
            call_graph: CallGraph::default(),
            errors: Vec::new(),
            next_block_id: 0,
        }
    }

    pub fn add_file(&mut self, filename: &str, root: &'a AstNode) {
        self.files.push(CfgFile {
            filename: filename.to_string(),
            root,
            functions: Vec::new(),
        });
    }

    /// Pass A: build per-function CFGs for every file. Pass B: extract the
    /// call graph from all operation trees.
    pub fn build(&mut self) {
        for f in 0..self.files.len() {
            let root = self.files[f].root;
            let filename = self.files[f].filename.clone();

            let mut func_defs = Vec::new();
            find_functions(root, &mut func_defs);

            for func_def in func_defs {
                let func = build_function(
                    &mut self.next_block_id,
                    &mut self.errors,
                    func_def,
                    &filename,
                );
                let idx = self.functions.len();
                self.functions.push(func);
                self.files[f].functions.push(idx);
            }
        }

        self.build_call_graph();
    }

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Collect `CALL` operations from every block, resolve callee names and
    /// record one edge per distinct `(caller, calleeName)` pair.
    fn build_call_graph(&mut self) {
        for caller in 0..self.functions.len() {
            let mut names = Vec::new();
            for block in &self.functions[caller].blocks {
                for op in &block.ops {
                    collect_call_names(op, &mut names);
                }
            }

            for name in names {
                let exists = self
                    .call_graph
                    .edges
                    .iter()
                    .any(|e| e.caller == caller && e.callee_name == name);
                if exists {
                    continue;
                }
                let callee = self.find_function(&name);
                if callee.is_none() {
                    self.errors.push(CfgError {
                        kind: CfgErrorKind::UnknownFunction,
                        message: "unknown function called".to_string(),
                        function_name: Some(self.functions[caller].name.clone()),
                        source_file: Some(self.functions[caller].source_file.clone()),
                        line: 0,
                        column: 0,
                    });
                }
                self.call_graph.edges.push(CallEdge {
                    caller,
                    callee,
                    callee_name: name,
                });
            }
        }
    }
}

/// Find all `funcDef` nodes, not descending into function bodies (class
/// methods are still found since classes are walked through).
fn find_functions<'n>(node: &'n AstNode, out: &mut Vec<&'n AstNode>) {
    if node.label == "funcDef" {
        out.push(node);
        return;
    }
    for child in &node.children {
        find_functions(child, out);
    }
}

fn token_value(node: &AstNode) -> String {
    node.lexeme().to_string()
}

/// Recursively collect callee names from every `CALL` operation in a tree.
/// The callee name is the first operand's name.
fn collect_call_names(op: &Operation, out: &mut Vec<String>) {
    if op.kind == OpKind::Call {
        if let Some(name_op) = op.operands.first() {
            out.push(name_op.name.clone());
        }
    }
    for operand in &op.operands {
        collect_call_names(operand, out);
    }
}

/// The `args(list(...))` children of a call-like node, or an empty slice.
fn args_exprs(args_node: Option<&AstNode>) -> &[AstNode] {
    if let Some(args) = args_node {
        if args.label == "args" {
            if let Some(list) = args.children.first() {
                if list.label == "list" {
                    return &list.children;
                }
            }
        }
    }
    &[]
}

/// Decompose an AST expression into an operation tree.
pub fn decompose_expr(expr: &AstNode) -> Operation {
    let label = expr.label.as_str();

    match label {
        "binop" if expr.children.len() >= 3 => {
            let mut op = Operation::new(OpKind::Binop, token_value(&expr.children[1]));
            op.operands.push(decompose_expr(&expr.children[0]));
            op.operands.push(decompose_expr(&expr.children[2]));
            op
        }
        "unop" if expr.children.len() >= 2 => {
            let mut op = Operation::new(OpKind::Unop, token_value(&expr.children[0]));
            op.operands.push(decompose_expr(&expr.children[1]));
            op
        }
        "address" if !expr.children.is_empty() => {
            let name = token_value(&expr.children[0]);
            Operation::new(OpKind::Var, format!("&{}", name))
        }
        "call" if expr.children.len() >= 2 => {
            let fname = token_value(&expr.children[0]);
            let mut op = Operation::new(OpKind::Call, fname.clone());
            op.operands.push(Operation::new(OpKind::Var, fname));
            for arg in args_exprs(expr.children.get(1)) {
                op.operands.push(decompose_expr(arg));
            }
            op
        }
        "index" if expr.children.len() >= 2 => {
            let mut op = Operation::new(OpKind::Index, "[]");
            op.operands.push(decompose_expr(&expr.children[0]));
            for idx in args_exprs(expr.children.get(1)) {
                op.operands.push(decompose_expr(idx));
            }
            op
        }
        "fieldAccess" if expr.children.len() >= 2 => {
            let mut op = Operation::new(OpKind::FieldAccess, token_value(&expr.children[1]));
            op.operands.push(decompose_expr(&expr.children[0]));
            op
        }
        "methodCall" if expr.children.len() >= 3 => {
            let mut op = Operation::new(OpKind::MethodCall, token_value(&expr.children[1]));
            op.operands.push(decompose_expr(&expr.children[0]));
            for arg in args_exprs(expr.children.get(2)) {
                op.operands.push(decompose_expr(arg));
            }
            op
        }
        "new" if !expr.children.is_empty() => {
            let mut op = Operation::new(OpKind::New, token_value(&expr.children[0]));
            for arg in args_exprs(expr.children.get(1)) {
                op.operands.push(decompose_expr(arg));
            }
            op
        }
        "assign" if expr.children.len() >= 2 => {
            let mut op = Operation::new(OpKind::Assign, token_value(&expr.children[0]));
            op.operands.push(decompose_expr(&expr.children[1]));
            op
        }
        "compound_assign" if expr.children.len() >= 3 => {
            let name = token_value(&expr.children[0]);
            let full_op = token_value(&expr.children[1]);
            let base_op = full_op.strip_suffix('=').unwrap_or(&full_op);
            let mut binop = Operation::new(OpKind::Binop, base_op);
            binop.operands.push(Operation::new(OpKind::Var, name.clone()));
            binop.operands.push(decompose_expr(&expr.children[2]));
            let mut op = Operation::new(OpKind::Assign, name);
            op.operands.push(binop);
            op
        }
        "assign_index" if expr.children.len() >= 3 => {
            let name = token_value(&expr.children[0]);
            let mut index = Operation::new(OpKind::Index, "[]");
            index
                .operands
                .push(Operation::new(OpKind::Var, name.clone()));
            for idx in args_exprs(expr.children.get(1)) {
                index.operands.push(decompose_expr(idx));
            }
            let mut op = Operation::new(OpKind::Assign, name);
            op.operands.push(index);
            op.operands.push(decompose_expr(&expr.children[2]));
            op
        }
        _ => {
            if expr.is_token("id") {
                Operation::new(OpKind::Var, expr.lexeme())
            } else if ["bool", "string", "char", "hex", "bits", "dec"]
                .iter()
                .any(|k| expr.is_token(k))
            {
                Operation::new(OpKind::Literal, expr.lexeme())
            } else {
                // unknown node: treat as a variable reference by label
                Operation::new(OpKind::Var, expr.label.clone())
            }
        }
    }
}

/// Where statement lowering left the graph: either an open block awaiting a
/// successor, or a terminated position (return/break, or a conditional both
/// of whose branches terminate).
#[derive(Debug, Clone, Copy)]
enum Flow {
    Open(usize),
    Terminated(usize),
}

/// Break target for the innermost loop. `doWhile` creates its exit lazily
/// so loops that never complete normally do not leave orphan blocks.
struct LoopCtx {
    exit: Option<usize>,
}

struct FunctionBuilder<'e> {
    blocks: Vec<BasicBlock>,
    exit: usize,
    next_id: &'e mut u32,
    errors: &'e mut Vec<CfgError>,
    name: String,
    source_file: String,
}

impl FunctionBuilder<'_> {
    fn new_block(&mut self, is_entry: bool, is_exit: bool) -> usize {
        let id = *self.next_id;
        *self.next_id += 1;
        self.blocks.push(BasicBlock {
            id,
            is_entry,
            is_exit,
            ops: Vec::new(),
            successor: None,
            successor_true: None,
            successor_false: None,
        });
        self.blocks.len() - 1
    }

    fn link(&mut self, from: usize, to: usize) {
        self.blocks[from].successor = Some(to);
    }

    fn error(&mut self, kind: CfgErrorKind, message: &str) {
        self.errors.push(CfgError {
            kind,
            message: message.to_string(),
            function_name: Some(self.name.clone()),
            source_file: Some(self.source_file.clone()),
            line: 0,
            column: 0,
        });
    }

    fn ensure_loop_exit(&mut self, loops: &mut [LoopCtx]) -> Option<usize> {
        let ctx = loops.last_mut()?;
        if ctx.exit.is_none() {
            ctx.exit = Some(self.new_block(false, false));
        }
        ctx.exit
    }

    fn build_stmts(&mut self, stmt_list: &AstNode, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        let mut flow = Flow::Open(current);
        if stmt_list.label != "stmts" {
            return flow;
        }
        for stmt in &stmt_list.children {
            match flow {
                Flow::Open(cur) => flow = self.build_stmt(stmt, cur, loops),
                // everything after a terminator is unreachable
                Flow::Terminated(_) => break,
            }
        }
        flow
    }

    fn build_stmt(&mut self, stmt: &AstNode, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        match stmt.label.as_str() {
            "block" => match stmt.children.first() {
                Some(stmts) => self.build_stmts(stmts, current, loops),
                None => Flow::Open(current),
            },
            "if" => self.build_if(stmt, current, loops),
            "while" => self.build_while(stmt, current, loops),
            "doWhile" => self.build_do_while(stmt, current, loops),
            "break" => self.build_break(current, loops),
            "return" => self.build_return(stmt, current),
            "vardecl" => self.build_vardecl(stmt, current),
            "exprstmt" => {
                let block = self.new_block(false, false);
                if let Some(expr) = stmt.children.first() {
                    let op = decompose_expr(expr);
                    self.blocks[block].ops.push(op);
                }
                self.link(current, block);
                Flow::Open(block)
            }
            // unknown statement: degrade gracefully
            _ => Flow::Open(current),
        }
    }

    fn build_if(&mut self, stmt: &AstNode, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        if stmt.children.len() < 2 {
            return Flow::Open(current);
        }

        let cond_block = self.new_block(false, false);
        let mut cond_op = decompose_expr(&stmt.children[0]);
        cond_op.kind = OpKind::Cond;
        self.blocks[cond_block].ops.push(cond_op);
        self.link(current, cond_block);

        // build the then branch from the condition block and steal the
        // entry edge into the true successor
        let then_flow = self.build_stmt(&stmt.children[1], cond_block, loops);
        let then_entry = self.blocks[cond_block].successor.take();

        let else_child = stmt
            .children
            .get(2)
            .filter(|n| n.label == "else")
            .and_then(|n| n.children.first());
        let else_flow = else_child.map(|else_stmt| {
            let flow = self.build_stmt(else_stmt, cond_block, loops);
            (flow, self.blocks[cond_block].successor.take())
        });

        let then_terminated = matches!(then_flow, Flow::Terminated(_));

        if let Some((flow, else_entry)) = &else_flow {
            if then_terminated && matches!(flow, Flow::Terminated(_)) {
                // both sides terminate: no merge block
                self.blocks[cond_block].successor_true =
                    Some(then_entry.unwrap_or(self.exit));
                self.blocks[cond_block].successor_false =
                    Some(else_entry.unwrap_or(self.exit));
                return Flow::Terminated(cond_block);
            }
        }

        let merge = self.new_block(false, false);
        self.blocks[cond_block].successor_true = Some(then_entry.unwrap_or(merge));
        self.blocks[cond_block].successor_false = match &else_flow {
            Some((_, else_entry)) => Some(else_entry.unwrap_or(merge)),
            None => Some(merge),
        };

        if let Flow::Open(end) = then_flow {
            if end != cond_block {
                self.link(end, merge);
            }
        }
        if let Some((Flow::Open(end), _)) = else_flow {
            if end != cond_block {
                self.link(end, merge);
            }
        }

        Flow::Open(merge)
    }

    fn build_while(&mut self, stmt: &AstNode, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        if stmt.children.len() < 2 {
            return Flow::Open(current);
        }

        let header = self.new_block(false, false);
        let mut cond_op = decompose_expr(&stmt.children[0]);
        cond_op.kind = OpKind::Cond;
        self.blocks[header].ops.push(cond_op);
        self.link(current, header);

        let loop_exit = self.new_block(false, false);

        loops.push(LoopCtx {
            exit: Some(loop_exit),
        });
        let body_flow = self.build_stmt(&stmt.children[1], header, loops);
        loops.pop();

        let body_entry = self.blocks[header].successor.take();
        self.blocks[header].successor_true = Some(body_entry.unwrap_or(header));
        self.blocks[header].successor_false = Some(loop_exit);

        if let Flow::Open(end) = body_flow {
            if end != header {
                self.link(end, header); // back edge
            }
        }

        Flow::Open(loop_exit)
    }

    fn build_do_while(&mut self, stmt: &AstNode, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        if stmt.children.len() < 2 {
            return Flow::Open(current);
        }

        loops.push(LoopCtx { exit: None });
        let body_flow = self.build_stmt(&stmt.children[0], current, loops);
        let taken_exit = loops.pop().and_then(|ctx| ctx.exit);

        match body_flow {
            Flow::Open(body_end) => {
                let cond_block = self.new_block(false, false);
                let mut cond_op = decompose_expr(&stmt.children[1]);
                cond_op.kind = OpKind::Cond;
                self.blocks[cond_block].ops.push(cond_op);

                let body_entry = if body_end == current {
                    // empty body: the condition is the whole loop
                    cond_block
                } else {
                    self.blocks[current].successor.unwrap_or(cond_block)
                };
                self.link(body_end, cond_block);

                let loop_exit = match taken_exit {
                    Some(exit) => exit,
                    None => self.new_block(false, false),
                };
                self.blocks[cond_block].successor_true = Some(body_entry);
                self.blocks[cond_block].successor_false = Some(loop_exit);
                Flow::Open(loop_exit)
            }
            Flow::Terminated(end) => match taken_exit {
                // a break gave the loop exit a predecessor, so control can
                // still continue after the loop
                Some(exit) => Flow::Open(exit),
                None => Flow::Terminated(end),
            },
        }
    }

    fn build_break(&mut self, current: usize, loops: &mut Vec<LoopCtx>) -> Flow {
        if loops.is_empty() {
            self.error(
                CfgErrorKind::BreakOutsideLoop,
                "break statement outside of loop",
            );
            return Flow::Open(current);
        }

        let block = self.new_block(false, false);
        self.blocks[block].ops.push(Operation::new(OpKind::Break, "break"));
        self.link(current, block);

        if let Some(exit) = self.ensure_loop_exit(loops) {
            self.blocks[block].successor = Some(exit);
        }
        Flow::Terminated(block)
    }

    fn build_return(&mut self, stmt: &AstNode, current: usize) -> Flow {
        let block = self.new_block(false, false);
        let mut op = Operation::new(OpKind::Return, "return");
        if let Some(value) = stmt.children.first() {
            op.operands.push(decompose_expr(value));
        }
        self.blocks[block].ops.push(op);
        self.link(current, block);
        self.blocks[block].successor = Some(self.exit);
        Flow::Terminated(block)
    }

    fn build_vardecl(&mut self, stmt: &AstNode, current: usize) -> Flow {
        let block = self.new_block(false, false);

        if let Some(vars) = stmt.children.get(1).filter(|n| n.label == "vars") {
            let mut i = 0;
            while i < vars.children.len() {
                let id_node = &vars.children[i];
                let opt_assign = vars.children.get(i + 1);
                i += 2;

                let name = id_node.lexeme();
                if name.is_empty() {
                    continue;
                }
                let mut op = Operation::new(OpKind::VarDecl, name);
                if let Some(assign) = opt_assign {
                    if assign.label == "assign" {
                        if let Some(init) = assign.children.first() {
                            op.operands.push(decompose_expr(init));
                        }
                    }
                }
                self.blocks[block].ops.push(op);
            }
        }

        self.link(current, block);
        Flow::Open(block)
    }
}

fn extract_type(node: Option<&AstNode>) -> String {
    match node {
        Some(n) => match n.label.split_once(':') {
            Some((_, lexeme)) => lexeme.to_string(),
            None => n.label.clone(),
        },
        None => "void".to_string(),
    }
}

fn extract_signature(func: &mut CfgFunction, func_def: &AstNode) -> bool {
    let Some(sig) = func_def
        .children
        .first()
        .filter(|n| n.label == "signature")
    else {
        return false;
    };

    func.return_type = extract_type(sig.children.first());

    if let Some(name_node) = sig.children.get(1) {
        func.name = name_node.lexeme().to_string();
    }

    if let Some(args) = sig.children.get(2).filter(|n| n.label == "args") {
        if let Some(arglist) = args.children.first().filter(|n| n.label == "arglist") {
            for arg in &arglist.children {
                if arg.label == "arg" && arg.children.len() >= 2 {
                    let param_type = extract_type(arg.children.first());
                    let param_name = arg.children[1].lexeme().to_string();
                    func.parameters.push((param_name, param_type));
                }
            }
        }
    }
    true
}

fn build_function(
    next_id: &mut u32,
    errors: &mut Vec<CfgError>,
    func_def: &AstNode,
    source_file: &str,
) -> CfgFunction {
    let mut func = CfgFunction {
        name: "unknown".to_string(),
        return_type: "void".to_string(),
        parameters: Vec::new(),
        source_file: source_file.to_string(),
        entry: 0,
        exit: 0,
        blocks: Vec::new(),
    };

    if !extract_signature(&mut func, func_def) {
        errors.push(CfgError {
            kind: CfgErrorKind::InvalidAst,
            message: "function definition without signature".to_string(),
            function_name: None,
            source_file: Some(source_file.to_string()),
            line: 0,
            column: 0,
        });
    }

    let mut builder = FunctionBuilder {
        blocks: Vec::new(),
        exit: 0,
        next_id,
        errors,
        name: func.name.clone(),
        source_file: source_file.to_string(),
    };

    let entry = builder.new_block(true, false);
    let exit = builder.new_block(false, true);
    builder.exit = exit;

    let stmts = func_def
        .children
        .get(1)
        .filter(|n| n.label == "block")
        .and_then(|block| block.children.first())
        .filter(|n| n.label == "stmts");

    match stmts {
        Some(stmts) => {
            let mut loops = Vec::new();
            let flow = builder.build_stmts(stmts, entry, &mut loops);
            if let Flow::Open(last) = flow {
                builder.link(last, exit);
            }
        }
        None => {
            // declaration-only or malformed body
            builder.link(entry, exit);
        }
    }

    func.entry = entry;
    func.exit = exit;
    func.blocks = builder.blocks;
    func
}
