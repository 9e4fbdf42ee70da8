//! The compiled bundle model.
//!
//! A bundle is the self-contained output of compilation: interned strings,
//! a flat function table, plans, the merged base document, and the module
//! sources it was built from. Everything is addressed by integer index so
//! the VM decodes operands in O(1) and the wire format stays position
//! based. Once built, a bundle is immutable; it may be evaluated by any
//! number of VM states, each owning its own frame.

pub mod builder;
pub mod encoding;
pub mod statement;

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use builder::IrBuilder;
pub use statement::{Block, LocalId, Operand, Operands, Statement, Stmt, StmtLoc, StringId};

use crate::value::Value;

/// A named, directly runnable block sequence (the query plan or an
/// entrypoint plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub blocks: Vec<Block>,
}

/// A compiled rule or function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Fully qualified name, e.g. `g0.objects.sites`.
    pub name: String,
    /// Frame slots the arguments are written into; slots 0 and 1 are
    /// always `input` and `data`.
    pub parameters: Vec<LocalId>,
    pub arity: u32,
    /// Frame slot holding the return value on `ReturnLocal`.
    pub result: LocalId,
    /// Whether call results may be memoized (never inside `with`).
    pub cacheable: bool,
    pub blocks: Vec<Block>,
}

/// The compiled artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub strings: Vec<String>,
    /// Size of the VM frame.
    pub local_count: u32,
    pub functions: Vec<Function>,
    pub plans: Vec<Plan>,
    /// Index into `plans` for the ad-hoc query, if one was compiled.
    pub query_plan: Option<u32>,
    /// The merged base document.
    pub data: Value,
    /// Module name -> original source, kept for diagnostics and re-load.
    pub sources: IndexMap<String, String>,

    #[serde(skip)]
    function_index: AHashMap<String, usize>,
}

impl Bundle {
    /// Rebuilds the name -> index map; called after construction and after
    /// deserialization.
    pub(crate) fn rebuild_index(&mut self) {
        self.function_index = self
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.function_index.contains_key(name)
    }

    pub fn find_plan(&self, name: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.name == name)
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_index_lookup() {
        let mut bundle = Bundle {
            strings: vec![],
            local_count: 2,
            functions: vec![Function {
                name: "g0.p.r".into(),
                parameters: vec![0, 1],
                arity: 2,
                result: 2,
                cacheable: true,
                blocks: vec![],
            }],
            plans: vec![],
            query_plan: None,
            data: Value::Object(IndexMap::new()),
            sources: IndexMap::new(),
            function_index: AHashMap::new(),
        };
        bundle.rebuild_index();
        assert!(bundle.is_function("g0.p.r"));
        assert!(!bundle.is_function("g0.p"));
        assert_eq!(bundle.find_function("g0.p.r").unwrap().arity, 2);
    }
}
