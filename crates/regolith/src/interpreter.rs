//! The interpreter: the public programmatic surface.
//!
//! An `Interpreter` accumulates policy modules, data documents and an
//! input value, compiles them into a [`Bundle`], and evaluates ad-hoc
//! queries or entrypoints. The accumulators are mutable, so an instance
//! is not meant to be shared across threads; a built bundle, by contrast,
//! is immutable and freely shareable.

use std::path::{Path, PathBuf};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::builtins::Registry;
use crate::bundle::Bundle;
use crate::errors::{ErrorSeq, RegoError};
use crate::passes::{parse_data_json, parse_input_term, Compiler};
use crate::results::QueryResults;
use crate::value::Value;
use crate::vm::VirtualMachine;

#[derive(Debug)]
pub struct Interpreter {
    modules: IndexMap<String, String>,
    data_docs: Vec<Value>,
    input: Value,
    query: Option<String>,
    entrypoints: Vec<String>,
    builtins: Registry,
    wf_checks: bool,
    debug_dir: Option<PathBuf>,
    strict_builtin_errors: bool,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            modules: IndexMap::new(),
            data_docs: Vec::new(),
            input: Value::Undefined,
            query: None,
            entrypoints: Vec::new(),
            builtins: Registry::with_defaults(),
            wf_checks: false,
            debug_dir: None,
            strict_builtin_errors: false,
        }
    }

    // --- sources ----------------------------------------------------------

    pub fn add_module(&mut self, name: &str, contents: &str) -> &mut Self {
        self.modules.insert(name.to_owned(), contents.to_owned());
        self
    }

    pub fn add_module_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, RegoError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| RegoError::io(path.display().to_string(), e))?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(self.add_module(&name, &contents))
    }

    pub fn add_data_json(&mut self, json: &str) -> Result<&mut Self, RegoError> {
        let doc = parse_data_json(json).map_err(|e| RegoError::Compile(ErrorSeq::of(e)))?;
        self.data_docs.push(doc);
        Ok(self)
    }

    pub fn add_data_json_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, RegoError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| RegoError::io(path.display().to_string(), e))?;
        self.add_data_json(&contents)
    }

    pub fn add_data(&mut self, data: Value) -> &mut Self {
        self.data_docs.push(data);
        self
    }

    // --- input ------------------------------------------------------------

    pub fn set_input_json(&mut self, json: &str) -> Result<&mut Self, RegoError> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        self.input = Value::from_json(&parsed);
        Ok(self)
    }

    pub fn set_input_json_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, RegoError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| RegoError::io(path.display().to_string(), e))?;
        self.set_input_json(&contents)
    }

    /// Sets the input from a Rego term, e.g. `{"a", "b"}`.
    pub fn set_input_term(&mut self, term: &str) -> Result<&mut Self, RegoError> {
        self.input = parse_input_term(term).map_err(|e| RegoError::Compile(ErrorSeq::of(e)))?;
        Ok(self)
    }

    pub fn set_input(&mut self, input: Value) -> &mut Self {
        self.input = input;
        self
    }

    // --- compilation targets ----------------------------------------------

    pub fn set_query(&mut self, query: &str) -> &mut Self {
        self.query = Some(query.to_owned());
        self
    }

    /// Registers a precompiled entrypoint, a `pkg/rule` path.
    pub fn add_entrypoint(&mut self, path: &str) -> &mut Self {
        self.entrypoints.push(path.to_owned());
        self
    }

    // --- configuration ----------------------------------------------------

    pub fn builtins(&self) -> &Registry {
        &self.builtins
    }

    pub fn builtins_mut(&mut self) -> &mut Registry {
        &mut self.builtins
    }

    /// Enables well-formedness validation after every compiler pass.
    pub fn set_wf_checks_enabled(&mut self, enabled: bool) -> &mut Self {
        self.wf_checks = enabled;
        self
    }

    pub fn wf_checks_enabled(&self) -> bool {
        self.wf_checks
    }

    /// Directory receiving one AST dump per pass.
    pub fn set_debug_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// In strict mode, built-in failures become errors instead of
    /// undefined.
    pub fn set_strict_builtin_errors(&mut self, strict: bool) -> &mut Self {
        self.strict_builtin_errors = strict;
        self
    }

    pub fn strict_builtin_errors(&self) -> bool {
        self.strict_builtin_errors
    }

    // --- building ---------------------------------------------------------

    /// Compiles the accumulated sources, data, query and entrypoints into
    /// a bundle.
    pub fn build(&self) -> Result<Bundle, RegoError> {
        let builtin_names: AHashSet<String> = self.builtins.names().map(str::to_owned).collect();
        let mut compiler = Compiler::new(builtin_names);
        compiler.wf_checks = self.wf_checks;
        compiler.debug_dir = self.debug_dir.clone();
        compiler.entrypoints = self.entrypoints.clone();

        let mut errors = ErrorSeq::new();
        for (name, contents) in &self.modules {
            if let Err(error) = compiler.add_module(name, contents) {
                errors.push(error);
            }
        }
        if let Some(query) = &self.query {
            if let Err(error) = compiler.set_query(query) {
                errors.push(error);
            }
        }
        if !errors.is_empty() {
            return Err(RegoError::Compile(errors));
        }
        for doc in self.data_docs.clone() {
            compiler.add_data(doc);
        }

        compiler.compile().map_err(RegoError::Compile)
    }

    /// Compiles and writes the directory bundle form.
    pub fn save_bundle(&self, dir: impl AsRef<Path>) -> Result<Bundle, RegoError> {
        let bundle = self.build()?;
        bundle.save_dir(dir)?;
        Ok(bundle)
    }

    /// Reads a bundle back from its directory form.
    pub fn load_bundle(dir: impl AsRef<Path>) -> Result<Bundle, RegoError> {
        Bundle::load_dir(dir)
    }

    /// Reads a bundle back from its binary form.
    pub fn load_bundle_binary(path: impl AsRef<Path>) -> Result<Bundle, RegoError> {
        Bundle::load_binary(path)
    }

    // --- evaluation -------------------------------------------------------

    /// Compiles and evaluates `query_expr`, returning the JSON output
    /// shape as a string.
    pub fn query(&mut self, query_expr: &str) -> Result<String, RegoError> {
        let results = self.raw_query(query_expr)?;
        Ok(results.to_json().to_string())
    }

    /// Compiles and evaluates `query_expr`, returning typed results.
    pub fn raw_query(&mut self, query_expr: &str) -> Result<QueryResults, RegoError> {
        self.set_query(query_expr);
        let bundle = self.build()?;
        self.query_bundle(&bundle)
    }

    /// Evaluates a prebuilt bundle's query plan against the current input.
    pub fn query_bundle(&self, bundle: &Bundle) -> Result<QueryResults, RegoError> {
        let vm = VirtualMachine::new(bundle, &self.builtins).strict_builtin_errors(self.strict_builtin_errors);
        let frames = vm.run_query(&self.input).map_err(RegoError::Eval)?;
        QueryResults::from_query_frames(frames)
    }

    /// Evaluates a named entrypoint plan against the current input.
    pub fn query_bundle_entrypoint(&self, bundle: &Bundle, entrypoint: &str) -> Result<QueryResults, RegoError> {
        let vm = VirtualMachine::new(bundle, &self.builtins).strict_builtin_errors(self.strict_builtin_errors);
        let frames = vm.run_entrypoint(entrypoint, &self.input).map_err(RegoError::Eval)?;
        QueryResults::from_entrypoint_frames(frames)
    }
}
