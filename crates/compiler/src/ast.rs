//! Abstract syntax tree for Mica
//!
//! The whole front end works on one uniform shape: a labeled tree. Interior
//! nodes carry a grammar-production name (`funcDef`, `block`, `binop`, ...);
//! leaves carry a token in `kind:lexeme` form (`id:main`, `dec:42`,
//! `string:"hi"`). Keeping the tree this generic lets the analyzers accept
//! trees from any producer that follows the labeling convention.
//!
//! The tree is mutable on purpose: the code generator synthesizes additional
//! top-level function definitions from class methods before emission.

use std::fmt::Write as _;

/// A node in the labeled AST.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub label: String,
    pub children: Vec<AstNode>,
}

impl AstNode {
    /// Create an interior node with the given production label.
    pub fn new(label: impl Into<String>) -> Self {
        AstNode {
            label: label.into(),
            children: Vec::new(),
        }
    }

    /// Create a leaf token node labeled `kind:lexeme`.
    pub fn leaf(kind: &str, lexeme: &str) -> Self {
        AstNode {
            label: format!("{}:{}", kind, lexeme),
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, child: AstNode) {
        self.children.push(child);
    }

    /// Builder-style child attachment, handy when assembling trees in tests
    /// and in the method-lifting pass.
    pub fn with_child(mut self, child: AstNode) -> Self {
        self.children.push(child);
        self
    }

    /// True if this node is a leaf token of the given kind (`label` starts
    /// with `kind:`).
    pub fn is_token(&self, kind: &str) -> bool {
        self.label
            .strip_prefix(kind)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    /// The token kind of a leaf (`id` for `id:main`), if any.
    pub fn token_kind(&self) -> Option<&str> {
        self.label.split_once(':').map(|(kind, _)| kind)
    }

    /// The lexeme part of a leaf label, or the whole label for interior
    /// nodes. This mirrors how every consumer reads token text.
    pub fn lexeme(&self) -> &str {
        match self.label.split_once(':') {
            Some((_, lexeme)) => lexeme,
            None => &self.label,
        }
    }

    /// Find the first direct child that is a token of `kind`.
    pub fn child_token(&self, kind: &str) -> Option<&AstNode> {
        self.children.iter().find(|c| c.is_token(kind))
    }

    /// Find the first direct child with exactly this production label.
    pub fn child_labeled(&self, label: &str) -> Option<&AstNode> {
        self.children.iter().find(|c| c.label == label)
    }
}

/// Serialize the tree as Graphviz DOT. Node ids are assigned in preorder so
/// the output is stable for a fixed tree.
pub fn write_dot(root: &AstNode) -> String {
    let mut out = String::new();
    out.push_str("digraph AST {\n");
    out.push_str("  node [shape=box, fontname=Helvetica];\n");
    let mut next_id = 0usize;
    write_dot_rec(&mut out, root, &mut next_id);
    out.push_str("}\n");
    out
}

fn write_dot_rec(out: &mut String, node: &AstNode, next_id: &mut usize) {
    let my_id = *next_id;
    *next_id += 1;
    let _ = write!(out, "  n{} [label=\"", my_id);
    for ch in node.label.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push_str("\"];\n");
    for child in &node.children {
        let child_id = *next_id;
        write_dot_rec(out, child, next_id);
        let _ = writeln!(out, "  n{} -> n{};", my_id, child_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_token_accessors() {
        let id = AstNode::leaf("id", "main");
        assert!(id.is_token("id"));
        assert!(!id.is_token("i"));
        assert_eq!(id.token_kind(), Some("id"));
        assert_eq!(id.lexeme(), "main");

        let block = AstNode::new("block");
        assert!(!block.is_token("block"));
        assert_eq!(block.token_kind(), None);
        assert_eq!(block.lexeme(), "block");
    }

    #[test]
    fn string_lexeme_keeps_quotes_and_colon() {
        // The lexeme of a string token starts after the first colon only.
        let s = AstNode::leaf("string", "\"a:b\"");
        assert_eq!(s.lexeme(), "\"a:b\"");
    }

    #[test]
    fn child_lookup() {
        let tree = AstNode::new("class")
            .with_child(AstNode::leaf("id", "C"))
            .with_child(AstNode::new("members"));
        assert_eq!(tree.child_token("id").unwrap().lexeme(), "C");
        assert!(tree.child_labeled("members").is_some());
        assert!(tree.child_labeled("extends").is_none());
    }

    #[test]
    fn dot_output_escapes_and_links() {
        let tree = AstNode::new("source").with_child(AstNode::leaf("string", "\"hi\""));
        let dot = write_dot(&tree);
        assert!(dot.starts_with("digraph AST {"));
        assert!(dot.contains("n0 [label=\"source\"]"));
        assert!(dot.contains("n1 [label=\"string:\\\"hi\\\"\"]"));
        assert!(dot.contains("n0 -> n1;"));
    }

    #[test]
    fn dot_ids_are_preorder() {
        let tree = AstNode::new("a")
            .with_child(AstNode::new("b").with_child(AstNode::new("c")))
            .with_child(AstNode::new("d"));
        let dot = write_dot(&tree);
        let pos = |needle: &str| dot.find(needle).unwrap();
        assert!(pos("n1 [label=\"b\"]") < pos("n2 [label=\"c\"]"));
        assert!(pos("n2 [label=\"c\"]") < pos("n3 [label=\"d\"]"));
    }
}
