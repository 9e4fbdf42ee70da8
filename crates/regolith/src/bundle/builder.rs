//! Builder for assembling a bundle during compilation.
//!
//! `IrBuilder` owns the string intern table, the frame-slot allocator, and
//! the growing function/plan lists. The unify and query passes emit blocks
//! through it; `finish` seals everything into an immutable [`Bundle`].

use ahash::AHashMap;
use indexmap::IndexMap;

use super::statement::{LocalId, StmtLoc, StringId};
use super::{Bundle, Function, Plan};
use crate::location::Location;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct IrBuilder {
    strings: Vec<String>,
    string_ids: AHashMap<String, StringId>,
    next_local: LocalId,
    functions: Vec<Function>,
    function_names: AHashMap<String, usize>,
    plans: Vec<Plan>,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self {
            // slots 0 and 1 are input and data
            next_local: 2,
            ..Self::default()
        }
    }

    /// Interns a string, returning its table index.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.string_ids.get(text) {
            return id;
        }
        let id = StringId::try_from(self.strings.len()).expect("string table exceeds u32 range");
        self.strings.push(text.to_owned());
        self.string_ids.insert(text.to_owned(), id);
        id
    }

    /// Allocates a fresh frame slot.
    pub fn alloc_local(&mut self) -> LocalId {
        let id = self.next_local;
        self.next_local += 1;
        id
    }

    pub fn local_count(&self) -> u32 {
        self.next_local
    }

    /// A serializable source anchor for a statement.
    pub fn stmt_loc(&mut self, loc: &Location) -> StmtLoc {
        let file = self.intern(loc.origin());
        let (row, col) = loc.row_col();
        StmtLoc {
            file,
            row: u32::try_from(row).unwrap_or(u32::MAX),
            col: u32::try_from(col).unwrap_or(u32::MAX),
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.function_names.insert(function.name.clone(), self.functions.len());
        self.functions.push(function);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.function_names.contains_key(name)
    }

    pub fn function_arity(&self, name: &str) -> Option<u32> {
        self.function_names.get(name).map(|&i| self.functions[i].arity)
    }

    /// Registers a plan and returns its index.
    pub fn add_plan(&mut self, plan: Plan) -> u32 {
        let index = u32::try_from(self.plans.len()).expect("plan table exceeds u32 range");
        self.plans.push(plan);
        index
    }

    /// Seals the builder into a bundle.
    pub fn finish(
        self,
        data: Value,
        sources: IndexMap<String, String>,
        query_plan: Option<u32>,
    ) -> Bundle {
        let mut bundle = Bundle {
            strings: self.strings,
            local_count: self.next_local,
            functions: self.functions,
            plans: self.plans,
            query_plan,
            data,
            sources,
            function_index: AHashMap::new(),
        };
        bundle.rebuild_index();
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut builder = IrBuilder::new();
        let a = builder.intern("sites");
        let b = builder.intern("name");
        let c = builder.intern("sites");
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn locals_start_after_input_and_data() {
        let mut builder = IrBuilder::new();
        assert_eq!(builder.alloc_local(), 2);
        assert_eq!(builder.alloc_local(), 3);
        assert_eq!(builder.local_count(), 4);
    }

    #[test]
    fn finish_builds_function_index() {
        let mut builder = IrBuilder::new();
        builder.add_function(Function {
            name: "g0.p.f".into(),
            parameters: vec![0, 1],
            arity: 2,
            result: 2,
            cacheable: true,
            blocks: vec![],
        });
        let bundle = builder.finish(Value::Null, IndexMap::new(), None);
        assert!(bundle.is_function("g0.p.f"));
    }
}
