//! Parser for Mica source
//!
//! A hand-written tokenizer and recursive-descent parser producing the
//! labeled [`AstNode`] trees the analyzers consume. The shapes are fixed:
//! `funcDef(signature, block)`, `signature(typeRef, id, args(arglist(...)))`,
//! `vardecl(typeRef, vars(id, assign|noinit, ...))`, `binop(L, op, R)` and so
//! on; see the crate docs for the full inventory.
//!
//! Setting the `PARSER_DEBUG` environment variable (any value) makes the
//! CLIs construct the parser with rule tracing to stderr.

use crate::ast::AstNode;

/// A token with source position information.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    /// Line number (0-indexed; displayed 1-indexed)
    pub line: usize,
    /// Column number (0-indexed)
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Dec,
    Hex,
    Bits,
    Str,
    Char,
    Punct,
}

impl Token {
    fn new(text: String, kind: TokenKind, line: usize, column: usize) -> Self {
        Token {
            text,
            kind,
            line,
            column,
        }
    }
}

const COMPOUND_OPS: [&str; 5] = ["+=", "-=", "*=", "/=", "%="];
const CMP_OPS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

/// Tokenize Mica source. Fails on unterminated strings, chars and block
/// comments; everything else is deferred to the parser.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 0usize;
    let mut column = 0usize;

    macro_rules! bump {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            bump!();
            continue;
        }

        // line comment
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                bump!();
            }
            continue;
        }

        // block comment
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
            let (start_line, start_col) = (line, column);
            bump!();
            bump!();
            loop {
                if i >= chars.len() {
                    return Err(format!(
                        "line {}, column {}: unterminated block comment",
                        start_line + 1,
                        start_col + 1
                    ));
                }
                if chars[i] == '*' && i + 1 < chars.len() && chars[i + 1] == '/' {
                    bump!();
                    bump!();
                    break;
                }
                bump!();
            }
            continue;
        }

        // string literal: the lexeme keeps its quotes and raw escapes, the
        // backend emits it verbatim into .asciz
        if c == '"' {
            let (start_line, start_col) = (line, column);
            let mut text = String::from('"');
            bump!();
            loop {
                if i >= chars.len() || chars[i] == '\n' {
                    return Err(format!(
                        "line {}, column {}: unterminated string literal",
                        start_line + 1,
                        start_col + 1
                    ));
                }
                let ch = chars[i];
                text.push(ch);
                bump!();
                if ch == '\\' {
                    if i >= chars.len() {
                        return Err(format!(
                            "line {}, column {}: unterminated string literal",
                            start_line + 1,
                            start_col + 1
                        ));
                    }
                    text.push(chars[i]);
                    bump!();
                    continue;
                }
                if ch == '"' {
                    break;
                }
            }
            tokens.push(Token::new(text, TokenKind::Str, start_line, start_col));
            continue;
        }

        // char literal, no escapes: 'x'
        if c == '\'' {
            let (start_line, start_col) = (line, column);
            if i + 2 >= chars.len() || chars[i + 2] != '\'' {
                return Err(format!(
                    "line {}, column {}: malformed char literal",
                    start_line + 1,
                    start_col + 1
                ));
            }
            let text = format!("'{}'", chars[i + 1]);
            bump!();
            bump!();
            bump!();
            tokens.push(Token::new(text, TokenKind::Char, start_line, start_col));
            continue;
        }

        if c.is_ascii_digit() {
            let (start_line, start_col) = (line, column);
            let mut text = String::new();
            let kind = if c == '0' && i + 1 < chars.len() && (chars[i + 1] == 'x' || chars[i + 1] == 'X')
            {
                text.push(chars[i]);
                bump!();
                text.push(chars[i]);
                bump!();
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    text.push(chars[i]);
                    bump!();
                }
                TokenKind::Hex
            } else if c == '0' && i + 1 < chars.len() && (chars[i + 1] == 'b' || chars[i + 1] == 'B')
            {
                text.push(chars[i]);
                bump!();
                text.push(chars[i]);
                bump!();
                while i < chars.len() && (chars[i] == '0' || chars[i] == '1') {
                    text.push(chars[i]);
                    bump!();
                }
                TokenKind::Bits
            } else {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    text.push(chars[i]);
                    bump!();
                }
                TokenKind::Dec
            };
            tokens.push(Token::new(text, kind, start_line, start_col));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let (start_line, start_col) = (line, column);
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                text.push(chars[i]);
                bump!();
            }
            tokens.push(Token::new(text, TokenKind::Ident, start_line, start_col));
            continue;
        }

        // punctuation, longest match first
        let (start_line, start_col) = (line, column);
        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        if COMPOUND_OPS.contains(&two.as_str())
            || ["==", "!=", "<=", ">="].contains(&two.as_str())
        {
            bump!();
            bump!();
            tokens.push(Token::new(two, TokenKind::Punct, start_line, start_col));
            continue;
        }
        if "=<>+-*/%!&.,;()[]{}".contains(c) {
            bump!();
            tokens.push(Token::new(
                c.to_string(),
                TokenKind::Punct,
                start_line,
                start_col,
            ));
            continue;
        }

        return Err(format!(
            "line {}, column {}: unexpected character '{}'",
            line + 1,
            column + 1,
            c
        ));
    }

    Ok(tokens)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    trace: bool,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        Ok(Parser {
            tokens,
            pos: 0,
            trace: false,
        })
    }

    /// Enable rule tracing to stderr (driven by `PARSER_DEBUG` in the CLIs).
    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }

    fn trace_rule(&self, rule: &str) {
        if self.trace {
            match self.peek() {
                Some(t) => eprintln!(
                    "parser: {} at line {}, column {} ('{}')",
                    rule,
                    t.line + 1,
                    t.column + 1,
                    t.text
                ),
                None => eprintln!("parser: {} at end of input", rule),
            }
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.text == text)
    }

    fn check_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&self, what: &str) -> String {
        match self.peek() {
            Some(t) => format!(
                "line {}, column {}: expected {}, found '{}'",
                t.line + 1,
                t.column + 1,
                what,
                t.text
            ),
            None => format!("unexpected end of input: expected {}", what),
        }
    }

    fn expect(&mut self, text: &str) -> Result<Token, String> {
        if self.check(text) {
            self.advance()
                .ok_or_else(|| format!("unexpected end of input: expected '{}'", text))
        } else {
            Err(self.error_here(&format!("'{}'", text)))
        }
    }

    fn expect_ident(&mut self) -> Result<Token, String> {
        if self.check_kind(TokenKind::Ident) {
            self.advance()
                .ok_or_else(|| "unexpected end of input: expected identifier".to_string())
        } else {
            Err(self.error_here("identifier"))
        }
    }

    // ---- grammar ----

    /// Parse a whole translation unit: `source(items(...))`.
    pub fn parse(&mut self) -> Result<AstNode, String> {
        let mut items = AstNode::new("items");
        while !self.at_end() {
            items.add_child(self.parse_item()?);
        }
        Ok(AstNode::new("source").with_child(items))
    }

    fn parse_item(&mut self) -> Result<AstNode, String> {
        self.trace_rule("item");
        if self.check("class") {
            self.parse_class()
        } else {
            self.parse_func_or_decl()
        }
    }

    fn parse_class(&mut self) -> Result<AstNode, String> {
        self.expect("class")?;
        let name = self.expect_ident()?;
        let mut class = AstNode::new("class").with_child(AstNode::leaf("id", &name.text));

        if self.check("extends") {
            self.advance();
            let base = self.expect_ident()?;
            class.add_child(
                AstNode::new("extends").with_child(AstNode::leaf("id", &base.text)),
            );
        }

        self.expect("{")?;
        let mut members = AstNode::new("members");
        while !self.check("}") {
            if self.at_end() {
                return Err("unexpected end of input inside class body".to_string());
            }
            members.add_child(self.parse_member()?);
        }
        self.expect("}")?;
        class.add_child(members);
        Ok(class)
    }

    /// A class member is either a field group or a method definition; both
    /// open with a type reference and a name, so the decision is made at the
    /// following token.
    fn parse_member(&mut self) -> Result<AstNode, String> {
        let type_ref = self.parse_type_ref()?;
        let name = self.expect_ident()?;

        let inner = if self.check("(") {
            self.parse_func_rest(type_ref, &name.text, false)?
        } else {
            let mut fieldlist = AstNode::new("fieldlist");
            fieldlist.add_child(AstNode::leaf("id", &name.text));
            while self.check(",") {
                self.advance();
                let next = self.expect_ident()?;
                fieldlist.add_child(AstNode::leaf("id", &next.text));
            }
            self.expect(";")?;
            AstNode::new("field").with_child(type_ref).with_child(fieldlist)
        };

        Ok(AstNode::new("member").with_child(inner))
    }

    fn parse_func_or_decl(&mut self) -> Result<AstNode, String> {
        let type_ref = self.parse_type_ref()?;
        let name = self.expect_ident()?;
        if !self.check("(") {
            return Err(self.error_here("'('"));
        }
        self.parse_func_rest(type_ref, &name.text, true)
    }

    /// Parse the `(params)` and body/semicolon of a function, assembling
    /// `funcDef(signature, block)` or `funcDecl(signature)`.
    fn parse_func_rest(
        &mut self,
        return_type: AstNode,
        name: &str,
        allow_decl: bool,
    ) -> Result<AstNode, String> {
        self.expect("(")?;
        let mut arglist = AstNode::new("arglist");
        if !self.check(")") {
            loop {
                let arg_type = self.parse_type_ref()?;
                let arg_name = self.expect_ident()?;
                arglist.add_child(
                    AstNode::new("arg")
                        .with_child(arg_type)
                        .with_child(AstNode::leaf("id", &arg_name.text)),
                );
                if self.check(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(")")?;

        let signature = AstNode::new("signature")
            .with_child(return_type)
            .with_child(AstNode::leaf("id", name))
            .with_child(AstNode::new("args").with_child(arglist));

        if allow_decl && self.check(";") {
            self.advance();
            return Ok(AstNode::new("funcDecl").with_child(signature));
        }

        let body = self.parse_block()?;
        Ok(AstNode::new("funcDef").with_child(signature).with_child(body))
    }

    /// `ID`, `ID<T>` or `ID[]`, producing a `typeRef:` leaf, `genType` or
    /// `array` node.
    fn parse_type_ref(&mut self) -> Result<AstNode, String> {
        let name = self.expect_ident()?;
        if self.check("<") {
            self.advance();
            let inner = self.parse_type_ref()?;
            self.expect(">")?;
            return Ok(AstNode::new("genType")
                .with_child(AstNode::leaf("id", &name.text))
                .with_child(inner));
        }
        if self.check("[") && self.peek_at(1).is_some_and(|t| t.text == "]") {
            self.advance();
            self.advance();
            return Ok(AstNode::new("array").with_child(AstNode::leaf("typeRef", &name.text)));
        }
        Ok(AstNode::leaf("typeRef", &name.text))
    }

    fn parse_block(&mut self) -> Result<AstNode, String> {
        self.expect("{")?;
        let mut stmts = AstNode::new("stmts");
        while !self.check("}") {
            if self.at_end() {
                return Err("unexpected end of input inside block".to_string());
            }
            stmts.add_child(self.parse_stmt()?);
        }
        self.expect("}")?;
        Ok(AstNode::new("block").with_child(stmts))
    }

    fn parse_stmt(&mut self) -> Result<AstNode, String> {
        self.trace_rule("stmt");

        if self.check("{") {
            return self.parse_block();
        }

        if self.check("if") {
            self.advance();
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            let then_stmt = self.parse_stmt()?;
            let mut node = AstNode::new("if").with_child(cond).with_child(then_stmt);
            if self.check("else") {
                self.advance();
                let else_stmt = self.parse_stmt()?;
                node.add_child(AstNode::new("else").with_child(else_stmt));
            }
            return Ok(node);
        }

        if self.check("while") {
            self.advance();
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            let body = self.parse_stmt()?;
            return Ok(AstNode::new("while").with_child(cond).with_child(body));
        }

        if self.check("do") {
            self.advance();
            let body = self.parse_block()?;
            self.expect("while")?;
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            self.expect(";")?;
            return Ok(AstNode::new("doWhile").with_child(body).with_child(cond));
        }

        if self.check("break") {
            self.advance();
            self.expect(";")?;
            return Ok(AstNode::new("break"));
        }

        if self.check("return") {
            self.advance();
            let mut node = AstNode::new("return");
            if !self.check(";") {
                node.add_child(self.parse_expr()?);
            }
            self.expect(";")?;
            return Ok(node);
        }

        if self.looks_like_vardecl() {
            let node = self.parse_vardecl()?;
            self.expect(";")?;
            return Ok(node);
        }

        let expr = self.parse_expr()?;
        self.expect(";")?;
        Ok(AstNode::new("exprstmt").with_child(expr))
    }

    /// Lookahead check for a declaration: a type reference followed by an
    /// identifier that is followed by `=`, `,` or `;`. Anything else falls
    /// back to expression-statement parsing.
    fn looks_like_vardecl(&mut self) -> bool {
        if !self.check_kind(TokenKind::Ident) {
            return false;
        }
        let saved = self.pos;
        let ok = self.parse_type_ref().is_ok()
            && self.check_kind(TokenKind::Ident)
            && self
                .peek_at(1)
                .is_some_and(|t| t.text == "=" || t.text == "," || t.text == ";");
        self.pos = saved;
        ok
    }

    fn parse_vardecl(&mut self) -> Result<AstNode, String> {
        let type_ref = self.parse_type_ref()?;
        let mut vars = AstNode::new("vars");
        loop {
            let name = self.expect_ident()?;
            vars.add_child(AstNode::leaf("id", &name.text));
            if self.check("=") {
                self.advance();
                let init = self.parse_expr()?;
                vars.add_child(AstNode::new("assign").with_child(init));
            } else {
                vars.add_child(AstNode::new("noinit"));
            }
            if self.check(",") {
                self.advance();
            } else {
                break;
            }
        }
        Ok(AstNode::new("vardecl").with_child(type_ref).with_child(vars))
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<AstNode, String> {
        self.trace_rule("expr");

        // plain and compound assignment need one token of lookahead
        if self.check_kind(TokenKind::Ident) {
            let next_text = self.peek_at(1).map(|t| t.text.clone());
            if let Some(op) = next_text {
                if op == "=" {
                    let name = self.expect_ident()?;
                    self.expect("=")?;
                    let rhs = self.parse_expr()?;
                    return Ok(AstNode::new("assign")
                        .with_child(AstNode::leaf("id", &name.text))
                        .with_child(rhs));
                }
                if COMPOUND_OPS.contains(&op.as_str()) {
                    let name = self.expect_ident()?;
                    self.expect(&op)?;
                    let rhs = self.parse_expr()?;
                    return Ok(AstNode::new("compound_assign")
                        .with_child(AstNode::leaf("id", &name.text))
                        .with_child(AstNode::leaf("op", &op))
                        .with_child(rhs));
                }
            }
        }

        let expr = self.parse_comparison()?;

        // `a[i] = v` parses the index first, then rewrites to assign_index
        if expr.label == "index" && self.check("=") {
            self.advance();
            let rhs = self.parse_expr()?;
            let mut node = AstNode::new("assign_index");
            node.children = expr.children; // [id, args]
            node.add_child(rhs);
            return Ok(node);
        }

        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.peek_op(&CMP_OPS) {
            self.advance();
            let right = self.parse_additive()?;
            left = AstNode::new("binop")
                .with_child(left)
                .with_child(AstNode::leaf("op", &op))
                .with_child(right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.advance();
            let right = self.parse_multiplicative()?;
            left = AstNode::new("binop")
                .with_child(left)
                .with_child(AstNode::leaf("op", &op))
                .with_child(right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_op(&["*", "/", "%"]) {
            self.advance();
            let right = self.parse_unary()?;
            left = AstNode::new("binop")
                .with_child(left)
                .with_child(AstNode::leaf("op", &op))
                .with_child(right);
        }
        Ok(left)
    }

    fn peek_op(&self, ops: &[&str]) -> Option<String> {
        let tok = self.peek()?;
        if tok.kind == TokenKind::Punct && ops.contains(&tok.text.as_str()) {
            Some(tok.text.clone())
        } else {
            None
        }
    }

    fn parse_unary(&mut self) -> Result<AstNode, String> {
        if let Some(op) = self.peek_op(&["-", "+", "!"]) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(AstNode::new("unop")
                .with_child(AstNode::leaf("op", &op))
                .with_child(operand));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<AstNode, String> {
        let mut node = self.parse_primary()?;
        while self.check(".") {
            self.advance();
            let name = self.expect_ident()?;
            if self.check("(") {
                let args = self.parse_call_args()?;
                node = AstNode::new("methodCall")
                    .with_child(node)
                    .with_child(AstNode::leaf("id", &name.text))
                    .with_child(args);
            } else {
                node = AstNode::new("fieldAccess")
                    .with_child(node)
                    .with_child(AstNode::leaf("id", &name.text));
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<AstNode, String> {
        if self.check("new") {
            self.advance();
            let name = self.expect_ident()?;
            let args = self.parse_call_args()?;
            return Ok(AstNode::new("new")
                .with_child(AstNode::leaf("id", &name.text))
                .with_child(args));
        }

        if self.check("&") {
            self.advance();
            let name = self.expect_ident()?;
            return Ok(AstNode::new("address").with_child(AstNode::leaf("id", &name.text)));
        }

        if self.check("(") {
            self.advance();
            let expr = self.parse_expr()?;
            self.expect(")")?;
            return Ok(expr);
        }

        let Some(tok) = self.peek().cloned() else {
            return Err(self.error_here("expression"));
        };

        match tok.kind {
            TokenKind::Ident if tok.text == "true" || tok.text == "false" => {
                self.advance();
                Ok(AstNode::leaf("bool", &tok.text))
            }
            TokenKind::Ident => {
                self.advance();
                if self.check("(") {
                    let args = self.parse_call_args()?;
                    Ok(AstNode::new("call")
                        .with_child(AstNode::leaf("id", &tok.text))
                        .with_child(args))
                } else if self.check("[") {
                    self.advance();
                    let mut list = AstNode::new("list");
                    list.add_child(self.parse_expr()?);
                    while self.check(",") {
                        self.advance();
                        list.add_child(self.parse_expr()?);
                    }
                    self.expect("]")?;
                    Ok(AstNode::new("index")
                        .with_child(AstNode::leaf("id", &tok.text))
                        .with_child(AstNode::new("args").with_child(list)))
                } else {
                    Ok(AstNode::leaf("id", &tok.text))
                }
            }
            TokenKind::Dec => {
                self.advance();
                Ok(AstNode::leaf("dec", &tok.text))
            }
            TokenKind::Hex => {
                self.advance();
                Ok(AstNode::leaf("hex", &tok.text))
            }
            TokenKind::Bits => {
                self.advance();
                Ok(AstNode::leaf("bits", &tok.text))
            }
            TokenKind::Str => {
                self.advance();
                Ok(AstNode::leaf("string", &tok.text))
            }
            TokenKind::Char => {
                self.advance();
                Ok(AstNode::leaf("char", &tok.text))
            }
            TokenKind::Punct => Err(self.error_here("expression")),
        }
    }

    /// `( expr, ... )` producing `args(list(...))`, or a bare `args` node
    /// for an empty argument list.
    fn parse_call_args(&mut self) -> Result<AstNode, String> {
        self.expect("(")?;
        let mut args = AstNode::new("args");
        if !self.check(")") {
            let mut list = AstNode::new("list");
            list.add_child(self.parse_expr()?);
            while self.check(",") {
                self.advance();
                list.add_child(self.parse_expr()?);
            }
            args.add_child(list);
        }
        self.expect(")")?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> AstNode {
        Parser::new(src).unwrap().parse().unwrap()
    }

    fn first_item(root: &AstNode) -> &AstNode {
        &root.children[0].children[0]
    }

    #[test]
    fn parses_simple_function() {
        let root = parse("int f(int x) { return x + 1; }");
        assert_eq!(root.label, "source");
        let func = first_item(&root);
        assert_eq!(func.label, "funcDef");

        let sig = &func.children[0];
        assert_eq!(sig.label, "signature");
        assert_eq!(sig.children[0].label, "typeRef:int");
        assert_eq!(sig.children[1].label, "id:f");

        let arglist = &sig.children[2].children[0];
        assert_eq!(arglist.label, "arglist");
        assert_eq!(arglist.children.len(), 1);
        assert_eq!(arglist.children[0].children[1].label, "id:x");

        let stmts = &func.children[1].children[0];
        let ret = &stmts.children[0];
        assert_eq!(ret.label, "return");
        let binop = &ret.children[0];
        assert_eq!(binop.label, "binop");
        assert_eq!(binop.children[1].label, "op:+");
    }

    #[test]
    fn parses_func_decl() {
        let root = parse("int puts(string s);");
        assert_eq!(first_item(&root).label, "funcDecl");
    }

    #[test]
    fn parses_class_with_extends_and_members() {
        let root = parse("class B extends A { int x, y; int get() { return x; } }");
        let class = first_item(&root);
        assert_eq!(class.label, "class");
        assert_eq!(class.children[0].label, "id:B");
        assert_eq!(class.children[1].label, "extends");
        assert_eq!(class.children[1].children[0].label, "id:A");

        let members = class.child_labeled("members").unwrap();
        assert_eq!(members.children.len(), 2);

        let field = &members.children[0].children[0];
        assert_eq!(field.label, "field");
        let fieldlist = &field.children[1];
        assert_eq!(fieldlist.label, "fieldlist");
        assert_eq!(fieldlist.children.len(), 2);

        let method = &members.children[1].children[0];
        assert_eq!(method.label, "funcDef");
    }

    #[test]
    fn vardecl_alternates_id_and_initializer() {
        let root = parse("int main() { int a = 1, b; return b; }");
        let func = first_item(&root);
        let stmts = &func.children[1].children[0];
        let decl = &stmts.children[0];
        assert_eq!(decl.label, "vardecl");
        let vars = &decl.children[1];
        assert_eq!(vars.children.len(), 4);
        assert_eq!(vars.children[0].label, "id:a");
        assert_eq!(vars.children[1].label, "assign");
        assert_eq!(vars.children[2].label, "id:b");
        assert_eq!(vars.children[3].label, "noinit");
    }

    #[test]
    fn precedence_multiplication_binds_tighter() {
        let root = parse("int f() { return 1 + 2 * 3; }");
        let func = first_item(&root);
        let ret = &func.children[1].children[0].children[0];
        let add = &ret.children[0];
        assert_eq!(add.children[1].label, "op:+");
        let mul = &add.children[2];
        assert_eq!(mul.label, "binop");
        assert_eq!(mul.children[1].label, "op:*");
    }

    #[test]
    fn comparison_and_compound_assign() {
        let root = parse("int f(int n) { if (n <= 10) n += 2; return n; }");
        let func = first_item(&root);
        let if_stmt = &func.children[1].children[0].children[0];
        assert_eq!(if_stmt.label, "if");
        assert_eq!(if_stmt.children[0].children[1].label, "op:<=");
        let then = &if_stmt.children[1];
        assert_eq!(then.label, "exprstmt");
        let compound = &then.children[0];
        assert_eq!(compound.label, "compound_assign");
        assert_eq!(compound.children[1].label, "op:+=");
    }

    #[test]
    fn index_read_and_write() {
        let root = parse("int f(int a) { a[0] = a[1]; return 0; }");
        let func = first_item(&root);
        let stmt = &func.children[1].children[0].children[0];
        let assign = &stmt.children[0];
        assert_eq!(assign.label, "assign_index");
        assert_eq!(assign.children[0].label, "id:a");
        assert_eq!(assign.children[1].label, "args");
        assert_eq!(assign.children[2].label, "index");
    }

    #[test]
    fn method_call_field_access_and_new() {
        let root = parse("int f() { Vec v = new Vec(); v.push(1); return v.len; }");
        let func = first_item(&root);
        let stmts = &func.children[1].children[0];

        let decl = &stmts.children[0];
        let init = &decl.children[1].children[1].children[0];
        assert_eq!(init.label, "new");
        assert_eq!(init.children[0].label, "id:Vec");

        let call = &stmts.children[1].children[0];
        assert_eq!(call.label, "methodCall");
        assert_eq!(call.children[1].label, "id:push");

        let ret = &stmts.children[2].children[0];
        assert_eq!(ret.label, "fieldAccess");
        assert_eq!(ret.children[1].label, "id:len");
    }

    #[test]
    fn generic_and_array_types() {
        let root = parse("List<int> make(int[] xs) { return xs; }");
        let func = first_item(&root);
        let sig = &func.children[0];
        let ret = &sig.children[0];
        assert_eq!(ret.label, "genType");
        assert_eq!(ret.children[0].label, "id:List");
        assert_eq!(ret.children[1].label, "typeRef:int");
        let arg_type = &sig.children[2].children[0].children[0].children[0];
        assert_eq!(arg_type.label, "array");
    }

    #[test]
    fn literal_kinds() {
        let root = parse("int f() { int a = 0x1F, b = 0b101, c = 'x'; string s = \"hi\\n\"; return true; }");
        let func = first_item(&root);
        let stmts = &func.children[1].children[0];
        let vars = &stmts.children[0].children[1];
        assert_eq!(vars.children[1].children[0].label, "hex:0x1F");
        assert_eq!(vars.children[3].children[0].label, "bits:0b101");
        assert_eq!(vars.children[5].children[0].label, "char:'x'");
        let svars = &stmts.children[1].children[1];
        assert_eq!(svars.children[1].children[0].label, "string:\"hi\\n\"");
        let ret = &stmts.children[2];
        assert_eq!(ret.children[0].label, "bool:true");
    }

    #[test]
    fn address_of_and_unary() {
        let root = parse("int f(int x) { return -x + &x; }");
        let func = first_item(&root);
        let expr = &func.children[1].children[0].children[0].children[0];
        assert_eq!(expr.children[0].label, "unop");
        assert_eq!(expr.children[2].label, "address");
    }

    #[test]
    fn break_and_loops() {
        let root = parse("int f() { while (1) { break; } do { f(); } while (0); return 0; }");
        let func = first_item(&root);
        let stmts = &func.children[1].children[0];
        assert_eq!(stmts.children[0].label, "while");
        let body = &stmts.children[0].children[1];
        assert_eq!(body.children[0].children[0].label, "break");
        assert_eq!(stmts.children[1].label, "doWhile");
        assert_eq!(stmts.children[1].children[0].label, "block");
    }

    #[test]
    fn empty_return_is_legal() {
        let root = parse("int f() { return ; }");
        let ret = &first_item(&root).children[1].children[0].children[0];
        assert_eq!(ret.label, "return");
        assert!(ret.children.is_empty());
    }

    #[test]
    fn errors_carry_position() {
        let err = Parser::new("int f() { return 1 + ; }")
            .unwrap()
            .parse()
            .unwrap_err();
        assert!(err.contains("line 1"), "got: {}", err);
        assert!(err.contains("expected expression"), "got: {}", err);

        let err = tokenize("int f() { \"oops").unwrap_err();
        assert!(err.contains("unterminated string"), "got: {}", err);
    }

    #[test]
    fn skips_comments() {
        let root = parse("// leading\nint f() { /* body */ return 0; }\n");
        assert_eq!(first_item(&root).label, "funcDef");
    }
}
