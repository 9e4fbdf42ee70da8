//! The AST arena.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]; parent links and
//! symbol scopes are indices, never owning pointers, so rewriting passes can
//! splice subtrees freely without cyclic ownership. A node is
//! `(Kind, Location, text payload, children)`: the payload carries variable
//! names, literal spellings and interned indices, exactly the parts of a
//! node that are not structure.

use std::fmt::Write as _;

use strum::Display;

use crate::location::Location;

/// Node kinds, flat across all compiler stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Kind {
    // --- roots and module structure ---
    Rego,
    Query,
    Module,
    Package,
    ImportSeq,
    Import,
    Keyword,
    Policy,

    // --- rules ---
    Rule,
    DefaultRule,
    RuleRef,
    RuleHead,
    RuleHeadComp,
    RuleHeadFunc,
    RuleHeadSet,
    RuleHeadObj,
    RuleArgs,
    RuleBodySeq,
    RuleBody,
    Else,

    // --- bodies and literals ---
    UnifyBody,
    Literal,
    NotExpr,
    SomeDecl,
    VarSeq,
    WithSeq,
    With,

    // --- expressions ---
    Expr,
    ExprCall,
    ExprSeq,
    Infix,
    UnaryExpr,
    Membership,

    // infix operator markers
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessThanOrEquals,
    GreaterThanOrEquals,
    And,
    Or,
    Assign,
    Unify,
    InOp,

    // --- terms ---
    Term,
    Scalar,
    Int,
    Float,
    JSONString,
    RawString,
    True,
    False,
    Null,
    Undefined,
    Var,
    Ref,
    RefHead,
    RefArgSeq,
    RefArgDot,
    RefArgBrack,
    Array,
    Object,
    ObjectItem,
    Set,
    ArrayCompr,
    SetCompr,
    ObjectCompr,

    // --- intermediate (post-symbols) ---
    Local,
    UnifyExpr,
    LiteralEnum,
    LiteralInit,
    LiteralNot,
    LiteralWith,
    ArithInfix,
    BoolInfix,
    BinInfix,
    AssignInfix,
    /// A constant-folded term; the payload indexes the compile-time
    /// constant pool.
    DataTerm,
}

impl Kind {
    /// Kinds that open a symbol scope.
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            Self::Rego | Self::Module | Self::Query | Self::Rule | Self::UnifyBody | Self::LiteralEnum
        )
    }
}

/// Index of a node in its [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: Kind,
    loc: Location,
    text: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// The arena. Detached subtrees are left in place and simply become
/// unreachable; passes never reuse slots.
#[derive(Debug)]
pub struct Ast {
    nodes: Vec<NodeData>,
    fresh_counter: u32,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            fresh_counter: 0,
        }
    }

    /// Creates a detached node.
    pub fn node(&mut self, kind: Kind, loc: Location) -> NodeId {
        self.node_with_text(kind, loc, String::new())
    }

    /// Creates a detached node with a text payload.
    pub fn node_with_text(&mut self, kind: Kind, loc: Location, text: impl Into<String>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("ast arena exceeds u32 range"));
        self.nodes.push(NodeData {
            kind,
            loc,
            text: text.into(),
            children: Vec::new(),
            parent: None,
        });
        id
    }

    pub fn kind(&self, id: NodeId) -> Kind {
        self.nodes[id.idx()].kind
    }

    pub fn set_kind(&mut self, id: NodeId, kind: Kind) {
        self.nodes[id.idx()].kind = kind;
    }

    pub fn loc(&self, id: NodeId) -> &Location {
        &self.nodes[id.idx()].loc
    }

    pub fn text(&self, id: NodeId) -> &str {
        &self.nodes[id.idx()].text
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id.idx()].text = text.into();
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.idx()].children
    }

    pub fn size(&self, id: NodeId) -> usize {
        self.nodes[id.idx()].children.len()
    }

    pub fn child(&self, id: NodeId, index: usize) -> NodeId {
        self.nodes[id.idx()].children[index]
    }

    pub fn try_child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id.idx()].children.get(index).copied()
    }

    /// First child with the given kind.
    pub fn child_of_kind(&self, id: NodeId, kind: Kind) -> Option<NodeId> {
        self.children(id).iter().copied().find(|&c| self.kind(c) == kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.idx()].parent
    }

    /// Nearest ancestor (starting from `id` itself) with the given kind.
    pub fn ancestor_of_kind(&self, id: NodeId, kind: Kind) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.kind(node) == kind {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    pub fn push_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.idx()].parent = Some(parent);
        self.nodes[parent.idx()].children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[child.idx()].parent = Some(parent);
        self.nodes[parent.idx()].children.insert(index, child);
    }

    /// Position of `child` in `parent`'s child sequence.
    pub fn child_index(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    /// Replaces `old` (which must be attached) with `new` in place.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let parent = self.parent(old).expect("replace on detached node");
        let index = self.child_index(parent, old).expect("child not under parent");
        self.nodes[parent.idx()].children[index] = new;
        self.nodes[new.idx()].parent = Some(parent);
        self.nodes[old.idx()].parent = None;
    }

    /// Replaces `old` with an inline sequence of nodes.
    pub fn replace_with_seq(&mut self, old: NodeId, new: Vec<NodeId>) {
        let parent = self.parent(old).expect("replace on detached node");
        let index = self.child_index(parent, old).expect("child not under parent");
        self.nodes[parent.idx()].children.remove(index);
        self.nodes[old.idx()].parent = None;
        for (offset, node) in new.into_iter().enumerate() {
            self.insert_child(parent, index + offset, node);
        }
    }

    /// Detaches `child` from its parent and returns it.
    pub fn detach(&mut self, child: NodeId) -> NodeId {
        if let Some(parent) = self.parent(child) {
            if let Some(index) = self.child_index(parent, child) {
                self.nodes[parent.idx()].children.remove(index);
            }
            self.nodes[child.idx()].parent = None;
        }
        child
    }

    /// Removes all children of `id` and returns them detached.
    pub fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.nodes[id.idx()].children);
        for &child in &children {
            self.nodes[child.idx()].parent = None;
        }
        children
    }

    /// Deep-copies a subtree; the copy is detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let data = self.nodes[id.idx()].clone();
        let copy = self.node_with_text(data.kind, data.loc, data.text);
        for child in data.children {
            let child_copy = self.clone_subtree(child);
            self.push_child(copy, child_copy);
        }
        copy
    }

    /// Yields a unique name for a temporary; `$` never occurs in user
    /// identifiers, so fresh names cannot collide.
    pub fn fresh(&mut self, hint: &str) -> String {
        let n = self.fresh_counter;
        self.fresh_counter += 1;
        format!("{hint}${n}")
    }

    /// Pre-order traversal collecting every node in the subtree.
    pub fn walk(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            out.push(node);
            for &child in self.children(node).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    // --- scopes -----------------------------------------------------------

    /// Nearest enclosing scope-opening node, excluding `id` itself.
    pub fn scope_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.kind(node).is_scope() {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Resolves a variable reference upward through the enclosing scopes,
    /// returning every binding at the nearest scope that has any: `Local`
    /// declarations, rules with a matching name, imports, and keyword
    /// bindings.
    pub fn lookup(&self, var: NodeId) -> Vec<NodeId> {
        let name = self.text(var).to_owned();
        let mut scope = self.scope_of(var);
        while let Some(node) = scope {
            let found = self.lookdown(node, &name);
            if !found.is_empty() {
                return found;
            }
            scope = self.scope_of(node);
        }
        Vec::new()
    }

    /// Bindings for `name` directly within one scope.
    pub fn lookdown(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self.kind(scope) {
            Kind::UnifyBody | Kind::Query => {
                for &child in self.children(scope) {
                    if self.kind(child) == Kind::Local && self.text(child) == name {
                        out.push(child);
                    }
                }
            }
            Kind::LiteralEnum => {
                // first two children are the bound item variables
                for &child in self.children(scope).iter().take(2) {
                    if self.kind(child) == Kind::Var && self.text(child) == name {
                        out.push(child);
                    }
                }
            }
            Kind::Rule => {
                // parameters, plus body locals: rule head expressions see
                // the bindings of their bodies
                if let Some(head) = self.child_of_kind(scope, Kind::RuleHead) {
                    let inner = self.child(head, 0);
                    if let Some(args) = self.child_of_kind(inner, Kind::RuleArgs) {
                        for &param in self.children(args) {
                            if self.kind(param) == Kind::Var && self.text(param) == name {
                                out.push(param);
                            }
                        }
                    }
                }
                for node in self.walk(scope) {
                    if self.kind(node) == Kind::Local && self.text(node) == name {
                        out.push(node);
                    }
                }
            }
            Kind::Module => {
                if let Some(imports) = self.child_of_kind(scope, Kind::ImportSeq) {
                    for &import in self.children(imports) {
                        if self.text(import) == name {
                            out.push(import);
                        }
                    }
                }
                if let Some(policy) = self.child_of_kind(scope, Kind::Policy) {
                    for &rule in self.children(policy) {
                        if self.rule_name(rule).as_deref() == Some(name) {
                            out.push(rule);
                        }
                    }
                }
            }
            _ => {}
        }
        out
    }

    /// The leading name of a rule (the first segment of its ref).
    pub fn rule_name(&self, rule: NodeId) -> Option<String> {
        if !matches!(self.kind(rule), Kind::Rule | Kind::DefaultRule) {
            return None;
        }
        let rule_ref = self.child_of_kind(rule, Kind::RuleRef)?;
        let first = self.try_child(rule_ref, 0)?;
        Some(self.text(first).to_owned())
    }

    // --- debug rendering --------------------------------------------------

    /// Indented tree rendering for `-a`/debug dumps.
    pub fn pretty(&self, root: NodeId) -> String {
        let mut buf = String::new();
        self.pretty_into(root, 0, &mut buf);
        buf
    }

    fn pretty_into(&self, id: NodeId, depth: usize, buf: &mut String) {
        for _ in 0..depth {
            buf.push_str("  ");
        }
        let text = self.text(id);
        if text.is_empty() {
            let _ = writeln!(buf, "{}", self.kind(id));
        } else {
            let _ = writeln!(buf, "{} `{text}`", self.kind(id));
        }
        for &child in self.children(id) {
            self.pretty_into(child, depth + 1, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::synthetic()
    }

    #[test]
    fn build_and_replace() {
        let mut ast = Ast::new();
        let root = ast.node(Kind::Rego, loc());
        let a = ast.node_with_text(Kind::Var, loc(), "a");
        let b = ast.node_with_text(Kind::Var, loc(), "b");
        ast.push_child(root, a);
        ast.replace(a, b);
        assert_eq!(ast.children(root), &[b]);
        assert_eq!(ast.parent(b), Some(root));
        assert_eq!(ast.parent(a), None);
    }

    #[test]
    fn replace_with_seq_splices_inline() {
        let mut ast = Ast::new();
        let root = ast.node(Kind::ExprSeq, loc());
        let a = ast.node_with_text(Kind::Var, loc(), "a");
        let b = ast.node_with_text(Kind::Var, loc(), "b");
        let c = ast.node_with_text(Kind::Var, loc(), "c");
        let d = ast.node_with_text(Kind::Var, loc(), "d");
        ast.push_child(root, a);
        ast.push_child(root, b);
        ast.replace_with_seq(a, vec![c, d]);
        assert_eq!(ast.children(root), &[c, d, b]);
    }

    #[test]
    fn fresh_names_are_unique() {
        let mut ast = Ast::new();
        let a = ast.fresh("enum");
        let b = ast.fresh("enum");
        assert_ne!(a, b);
        assert!(a.contains('$'));
    }

    #[test]
    fn lookup_finds_nearest_local() {
        let mut ast = Ast::new();
        let body = ast.node(Kind::UnifyBody, loc());
        let local = ast.node_with_text(Kind::Local, loc(), "x");
        ast.push_child(body, local);
        let expr = ast.node(Kind::Expr, loc());
        ast.push_child(body, expr);
        let var = ast.node_with_text(Kind::Var, loc(), "x");
        ast.push_child(expr, var);
        assert_eq!(ast.lookup(var), vec![local]);
    }

    #[test]
    fn clone_subtree_is_deep() {
        let mut ast = Ast::new();
        let array = ast.node(Kind::Array, loc());
        let item = ast.node_with_text(Kind::Int, loc(), "1");
        ast.push_child(array, item);
        let copy = ast.clone_subtree(array);
        assert_ne!(copy, array);
        assert_eq!(ast.size(copy), 1);
        assert_eq!(ast.text(ast.child(copy, 0)), "1");
    }
}
