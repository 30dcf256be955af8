//! Type environment for Mica classes
//!
//! One bottom-up pass over the AST materializes, for every class, its
//! inherited field layout, object size and virtual-method table. The layout
//! model is deliberately simple: offset 0 holds the vptr, every field is 8
//! bytes, inherited fields keep their original offsets and derived fields
//! are appended. Vtables copy inherited slots verbatim; an override keeps
//! the slot index and replaces the implementation label; new methods get a
//! fresh slot at the end.
//!
//! Missing base classes and inheritance cycles do not abort the build: the
//! base link is dropped, layout proceeds as for a root class, and a
//! diagnostic is recorded on the environment.

use crate::ast::AstNode;

/// A field with its resolved byte offset inside the object.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub offset: i64,
}

/// One vtable slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSlot {
    pub name: String,
    pub ret_type: String,
    pub slot: usize,
    pub impl_label: String,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub base_name: Option<String>,
    /// Index of the resolved base class in the environment, if any.
    pub base: Option<usize>,
    pub fields: Vec<FieldInfo>,
    pub vtable: Vec<MethodSlot>,
    pub size_bytes: i64,
}

/// Immutable class table built from an AST root.
#[derive(Debug, Default)]
pub struct TypeEnv {
    classes: Vec<ClassInfo>,
    diagnostics: Vec<String>,
}

impl TypeEnv {
    /// Walk the AST, collect every class declaration and compute layouts
    /// and vtables.
    pub fn build(root: &AstNode) -> Self {
        let mut builder = Builder::default();
        builder.find_classes(root);
        for i in 0..builder.decls.len() {
            builder.compute_layout(i);
        }
        TypeEnv {
            classes: builder.classes,
            diagnostics: builder.diagnostics,
        }
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Classes in declaration order.
    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    /// Diagnostics recorded during the build (currently: inheritance
    /// cycles).
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn field_offset(&self, class_name: &str, field_name: &str) -> Option<i64> {
        self.find_class(class_name)?
            .fields
            .iter()
            .find(|f| f.name == field_name)
            .map(|f| f.offset)
    }

    pub fn method_slot_and_label(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> Option<(usize, &str)> {
        self.find_class(class_name)?
            .vtable
            .iter()
            .find(|m| m.name == method_name)
            .map(|m| (m.slot, m.impl_label.as_str()))
    }
}

/// Declared members of one class, before inheritance is resolved.
#[derive(Debug, Default)]
struct ClassDecl {
    fields: Vec<(String, String)>,
    methods: Vec<(String, String)>, // (name, return type)
    visiting: bool,
    done: bool,
}

#[derive(Debug, Default)]
struct Builder {
    classes: Vec<ClassInfo>,
    decls: Vec<ClassDecl>,
    diagnostics: Vec<String>,
}

fn is_class_node(node: &AstNode) -> bool {
    node.label == "class" || node.label == "classDef"
}

fn is_func_node(node: &AstNode) -> bool {
    matches!(
        node.label.as_str(),
        "funcDef" | "funcDecl" | "methodDef" | "methodDecl"
    )
}

/// Extract a plain type name from a `typeRef`/`type` leaf or a wrapper node
/// whose first token child carries the name.
fn extract_type_name(node: Option<&AstNode>) -> String {
    let Some(node) = node else {
        return "void".to_string();
    };
    if node.token_kind().is_some() {
        return node.lexeme().to_string();
    }
    for child in &node.children {
        if child.token_kind().is_some() {
            return child.lexeme().to_string();
        }
    }
    node.label.clone()
}

fn id_lexeme(node: &AstNode) -> Option<&str> {
    if node.is_token("id") || node.is_token("IDENTIFIER") {
        Some(node.lexeme())
    } else {
        None
    }
}

impl Builder {
    fn find_classes(&mut self, node: &AstNode) {
        if is_class_node(node) {
            self.collect_class(node);
            return; // nested classes are not supported
        }
        for child in &node.children {
            self.find_classes(child);
        }
    }

    fn collect_class(&mut self, class_node: &AstNode) {
        let Some(name) = extract_class_name(class_node) else {
            return;
        };

        let mut decl = ClassDecl::default();
        let container = pick_members_container(class_node);
        match container {
            Some(members) => collect_members(&mut decl, members),
            // fallback: scan direct children; id/extends tokens are neither
            // fields nor methods, so they fall through harmlessly
            None => {
                for child in &class_node.children {
                    collect_members(&mut decl, child);
                }
            }
        }

        self.classes.push(ClassInfo {
            name,
            base_name: extract_base_name(class_node),
            base: None,
            fields: Vec::new(),
            vtable: Vec::new(),
            size_bytes: 0,
        });
        self.decls.push(decl);
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    /// Depth-first layout with a visiting flag. Revisiting a class that is
    /// still on the stack means an inheritance cycle: the base link is
    /// dropped, the class is laid out as a root and a diagnostic recorded.
    fn compute_layout(&mut self, idx: usize) {
        if self.decls[idx].done {
            return;
        }
        if self.decls[idx].visiting {
            self.diagnostics.push(format!(
                "inheritance cycle detected at class '{}'; base link dropped",
                self.classes[idx].name
            ));
            self.classes[idx].base = None;
            self.classes[idx].base_name = None;
            self.apply_layout(idx, None);
            self.decls[idx].done = true;
            self.decls[idx].visiting = false;
            return;
        }
        self.decls[idx].visiting = true;

        let base_idx = self.classes[idx]
            .base_name
            .clone()
            .and_then(|base| self.find_index(&base));
        let base_data = match base_idx {
            Some(b) => {
                self.compute_layout(b);
                // the cycle cut above may have completed this class already
                if self.decls[idx].done {
                    return;
                }
                self.classes[idx].base = Some(b);
                let base = &self.classes[b];
                Some((base.fields.clone(), base.vtable.clone(), base.size_bytes))
            }
            None => {
                self.classes[idx].base = None;
                None
            }
        };

        self.apply_layout(idx, base_data);
        self.decls[idx].visiting = false;
        self.decls[idx].done = true;
    }

    fn apply_layout(
        &mut self,
        idx: usize,
        base_data: Option<(Vec<FieldInfo>, Vec<MethodSlot>, i64)>,
    ) {
        let (mut fields, mut vtable, base_size) = match base_data {
            Some((f, v, s)) => (f, v, s),
            None => (Vec::new(), Vec::new(), 8),
        };

        // fields: inherited keep their offsets, declared are appended at an
        // 8-byte stride; 0..7 is the vptr
        let mut off = base_size.max(8);
        for (name, type_name) in &self.decls[idx].fields {
            fields.push(FieldInfo {
                name: name.clone(),
                type_name: type_name.clone(),
                offset: off,
            });
            off += 8;
        }

        // vtable: override keeps the slot, new methods append
        let class_name = self.classes[idx].name.clone();
        for (name, ret_type) in &self.decls[idx].methods {
            let impl_label = format!("{}__{}", class_name, name);
            match vtable.iter_mut().find(|m| m.name == *name) {
                Some(slot) => {
                    slot.ret_type = ret_type.clone();
                    slot.impl_label = impl_label;
                }
                None => {
                    let slot = vtable.len();
                    vtable.push(MethodSlot {
                        name: name.clone(),
                        ret_type: ret_type.clone(),
                        slot,
                        impl_label,
                    });
                }
            }
        }

        let class = &mut self.classes[idx];
        class.fields = fields;
        class.vtable = vtable;
        class.size_bytes = off.max(8);
    }
}

fn extract_class_name(class_node: &AstNode) -> Option<String> {
    if let Some(id) = class_node.child_token("id") {
        return Some(id.lexeme().to_string());
    }
    class_node
        .child_token("IDENTIFIER")
        .map(|id| id.lexeme().to_string())
}

/// The base class may appear as a `base:` leaf, a `base` child or an
/// `extends` child wrapping the id token.
fn extract_base_name(class_node: &AstNode) -> Option<String> {
    if let Some(tok) = class_node.child_token("base") {
        return Some(tok.lexeme().to_string());
    }
    for label in ["base", "extends"] {
        if let Some(wrapper) = class_node.child_labeled(label) {
            if let Some(id) = wrapper
                .child_token("id")
                .or_else(|| wrapper.child_token("IDENTIFIER"))
            {
                return Some(id.lexeme().to_string());
            }
        }
    }
    None
}

fn pick_members_container(class_node: &AstNode) -> Option<&AstNode> {
    ["members", "memberList", "membersList", "classMembers"]
        .iter()
        .find_map(|label| class_node.child_labeled(label))
}

/// Recursive member collection: function nodes contribute a method (their
/// bodies are not descended), field declarations contribute fields, and any
/// other wrapper node is walked through.
fn collect_members(decl: &mut ClassDecl, node: &AstNode) {
    if is_func_node(node) {
        collect_method(decl, node);
        return;
    }
    if matches!(node.label.as_str(), "vardecl" | "fieldDecl" | "field") {
        collect_fields(decl, node);
        return;
    }
    for child in &node.children {
        collect_members(decl, child);
    }
}

/// Fields come in two shapes: `vardecl [typeRef, vars(id, init, ...)]` and
/// `field [typeRef, fieldlist(id, ...)]`.
fn collect_fields(decl: &mut ClassDecl, node: &AstNode) {
    if node.children.len() < 2 {
        return;
    }
    let type_name = extract_type_name(node.children.first());
    let list = &node.children[1];
    match list.label.as_str() {
        "vars" => {
            // alternating id, optAssign
            for id_node in list.children.iter().step_by(2) {
                if let Some(name) = id_lexeme(id_node) {
                    if !name.is_empty() {
                        decl.fields.push((name.to_string(), type_name.clone()));
                    }
                }
            }
        }
        "fieldlist" => {
            for id_node in &list.children {
                if let Some(name) = id_lexeme(id_node) {
                    if !name.is_empty() {
                        decl.fields.push((name.to_string(), type_name.clone()));
                    }
                }
            }
        }
        _ => {}
    }
}

fn collect_method(decl: &mut ClassDecl, func_node: &AstNode) {
    let Some(sig) = func_node.child_labeled("signature") else {
        return;
    };
    if sig.children.len() < 2 {
        return;
    }
    let id_node = &sig.children[1];
    let name = match id_lexeme(id_node) {
        Some(n) => n,
        // tolerate other token kinds in the name position
        None if id_node.token_kind().is_some() => id_node.lexeme(),
        None => return,
    };
    if name.is_empty() {
        return;
    }
    let ret_type = extract_type_name(sig.children.first());
    decl.methods.push((name.to_string(), ret_type));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn env_of(src: &str) -> TypeEnv {
        let root = Parser::new(src).unwrap().parse().unwrap();
        TypeEnv::build(&root)
    }

    #[test]
    fn single_class_layout() {
        let env = env_of("class C { int x; int get() { return x; } }");
        let c = env.find_class("C").unwrap();
        assert_eq!(c.size_bytes, 16);
        assert_eq!(c.fields.len(), 1);
        assert_eq!(c.fields[0].name, "x");
        assert_eq!(c.fields[0].offset, 8);
        assert_eq!(env.field_offset("C", "x"), Some(8));

        let (slot, label) = env.method_slot_and_label("C", "get").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(label, "C__get");
    }

    #[test]
    fn size_counts_vptr_plus_fields() {
        let env = env_of("class P { int a, b; int c; }");
        let p = env.find_class("P").unwrap();
        assert_eq!(p.fields.len(), 3);
        assert_eq!(p.size_bytes, 8 + 3 * 8);
        assert_eq!(env.field_offset("P", "a"), Some(8));
        assert_eq!(env.field_offset("P", "b"), Some(16));
        assert_eq!(env.field_offset("P", "c"), Some(24));
    }

    #[test]
    fn inherited_fields_keep_offsets() {
        let env = env_of(
            "class A { int x; } class B extends A { int y; }",
        );
        let b = env.find_class("B").unwrap();
        assert_eq!(b.fields.len(), 2);
        assert_eq!(env.field_offset("B", "x"), Some(8));
        assert_eq!(env.field_offset("B", "y"), Some(16));
        assert_eq!(b.size_bytes, 24);
        assert_eq!(env.find_class("A").unwrap().size_bytes, 16);
    }

    #[test]
    fn override_keeps_slot_and_replaces_label() {
        let env = env_of(
            "class A { int f() { return 1; } } \
             class B extends A { int f() { return 2; } int g() { return 0; } }",
        );

        let (slot_a, label_a) = env.method_slot_and_label("A", "f").unwrap();
        assert_eq!((slot_a, label_a), (0, "A__f"));

        let (slot_f, label_f) = env.method_slot_and_label("B", "f").unwrap();
        assert_eq!((slot_f, label_f), (0, "B__f"));

        let (slot_g, label_g) = env.method_slot_and_label("B", "g").unwrap();
        assert_eq!((slot_g, label_g), (1, "B__g"));

        // no fields anywhere: both classes are vptr-only
        assert_eq!(env.find_class("A").unwrap().size_bytes, 8);
        assert_eq!(env.find_class("B").unwrap().size_bytes, 8);
    }

    #[test]
    fn inherited_method_keeps_base_label() {
        let env = env_of(
            "class A { int f() { return 1; } } class B extends A { int g() { return 0; } }",
        );
        let (slot, label) = env.method_slot_and_label("B", "f").unwrap();
        assert_eq!((slot, label), (0, "A__f"));
    }

    #[test]
    fn missing_base_is_treated_as_root() {
        let env = env_of("class B extends Nowhere { int y; }");
        let b = env.find_class("B").unwrap();
        assert!(b.base.is_none());
        assert_eq!(env.field_offset("B", "y"), Some(8));
        assert_eq!(b.size_bytes, 16);
    }

    #[test]
    fn inheritance_cycle_is_cut_with_diagnostic() {
        // the parser has no syntax for forward cycles, so build the tree
        // by hand: A extends B, B extends A
        let mut items = AstNode::new("items");
        for (name, base) in [("A", "B"), ("B", "A")] {
            let class = AstNode::new("class")
                .with_child(AstNode::leaf("id", name))
                .with_child(AstNode::new("extends").with_child(AstNode::leaf("id", base)))
                .with_child(AstNode::new("members"));
            items.add_child(class);
        }
        let root = AstNode::new("source").with_child(items);

        let env = TypeEnv::build(&root);
        assert!(!env.diagnostics().is_empty());
        // both classes end up laid out, each at the minimum size
        assert_eq!(env.find_class("A").unwrap().size_bytes, 8);
        assert_eq!(env.find_class("B").unwrap().size_bytes, 8);
        // at least one of the two lost its base link
        assert!(
            env.find_class("A").unwrap().base.is_none()
                || env.find_class("B").unwrap().base.is_none()
        );
    }

    #[test]
    fn base_leaf_token_is_accepted() {
        let mut class = AstNode::new("class");
        class.add_child(AstNode::leaf("id", "D"));
        class.add_child(AstNode::leaf("base", "C"));
        class.add_child(AstNode::new("members"));
        let root = AstNode::new("source")
            .with_child(AstNode::new("items").with_child(class));
        let env = TypeEnv::build(&root);
        assert_eq!(
            env.find_class("D").unwrap().base_name.as_deref(),
            Some("C")
        );
    }

    #[test]
    fn later_method_declaration_wins_in_vtable() {
        let env = env_of(
            "class C { int f() { return 1; } int f() { return 2; } }",
        );
        let c = env.find_class("C").unwrap();
        assert_eq!(c.vtable.len(), 1);
        assert_eq!(c.vtable[0].impl_label, "C__f");
    }
}
