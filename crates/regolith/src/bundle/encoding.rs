//! Bundle persistence.
//!
//! Directory form: `plan.json` (strings, local count, plans, functions),
//! `data.json` (the base document), and one `.rego` file per module
//! source. Binary form: a single postcard-encoded file behind a fixed
//! magic header. Load-then-save is semantically identity; the byte layout
//! itself is owned by this module alone.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Bundle, Function, Plan};
use crate::errors::RegoError;
use crate::value::Value;

const MAGIC: &[u8; 4] = b"REGB";
const FORMAT_VERSION: u8 = 1;

/// The `plan.json` document.
#[derive(Debug, Serialize, Deserialize)]
struct PlanFile {
    strings: Vec<String>,
    local_count: u32,
    plans: Vec<Plan>,
    functions: Vec<Function>,
    query_plan: Option<u32>,
}

impl Bundle {
    /// Renders `plan.json` deterministically (spec invariant: building the
    /// same sources twice yields byte-equal output).
    pub fn plan_json(&self) -> Result<String, RegoError> {
        let file = PlanFile {
            strings: self.strings.clone(),
            local_count: self.local_count,
            plans: self.plans.clone(),
            functions: self.functions.clone(),
            query_plan: self.query_plan,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Renders `data.json`.
    pub fn data_json(&self) -> Result<String, RegoError> {
        Ok(serde_json::to_string_pretty(&self.data.to_json())?)
    }

    /// Writes the directory form.
    pub fn save_dir(&self, dir: impl AsRef<Path>) -> Result<(), RegoError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| RegoError::io(dir.display().to_string(), e))?;
        let write = |name: &str, contents: &str| {
            let path = dir.join(name);
            fs::write(&path, contents).map_err(|e| RegoError::io(path.display().to_string(), e))
        };
        write("plan.json", &self.plan_json()?)?;
        write("data.json", &self.data_json()?)?;
        for (name, source) in &self.sources {
            let file = if name.ends_with(".rego") {
                name.clone()
            } else {
                format!("{name}.rego")
            };
            write(&file, source)?;
        }
        Ok(())
    }

    /// Reads the directory form.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, RegoError> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            let path = dir.join(name);
            fs::read_to_string(&path).map_err(|e| RegoError::io(path.display().to_string(), e))
        };
        let plan: PlanFile = serde_json::from_str(&read("plan.json")?)?;
        let data_doc: serde_json::Value = serde_json::from_str(&read("data.json")?)?;

        let mut sources = IndexMap::new();
        let entries = fs::read_dir(dir).map_err(|e| RegoError::io(dir.display().to_string(), e))?;
        let mut rego_files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "rego"))
            .collect();
        rego_files.sort();
        for path in rego_files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = fs::read_to_string(&path).map_err(|e| RegoError::io(path.display().to_string(), e))?;
            sources.insert(name, text);
        }

        let mut bundle = Self {
            strings: plan.strings,
            local_count: plan.local_count,
            functions: plan.functions,
            plans: plan.plans,
            query_plan: plan.query_plan,
            data: Value::from_json(&data_doc),
            sources,
            function_index: ahash::AHashMap::new(),
        };
        bundle.rebuild_index();
        Ok(bundle)
    }

    /// Encodes the binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegoError> {
        let mut bytes = Vec::with_capacity(256);
        bytes.extend_from_slice(MAGIC);
        bytes.push(FORMAT_VERSION);
        let body = postcard::to_allocvec(self).map_err(|e| RegoError::Bundle(e.to_string()))?;
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decodes the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegoError> {
        if bytes.len() < 5 || &bytes[..4] != MAGIC {
            return Err(RegoError::Bundle("missing bundle magic header".into()));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(RegoError::Bundle(format!(
                "unsupported bundle format version {}",
                bytes[4]
            )));
        }
        let mut bundle: Self =
            postcard::from_bytes(&bytes[5..]).map_err(|e| RegoError::Bundle(e.to_string()))?;
        bundle.rebuild_index();
        Ok(bundle)
    }

    /// Writes the binary form to a file.
    pub fn save_binary(&self, path: impl AsRef<Path>) -> Result<(), RegoError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()?).map_err(|e| RegoError::io(path.display().to_string(), e))
    }

    /// Reads the binary form from a file.
    pub fn load_binary(path: impl AsRef<Path>) -> Result<Self, RegoError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| RegoError::io(path.display().to_string(), e))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::super::statement::{Block, Operand, Statement, Stmt};
    use super::*;

    fn sample_bundle() -> Bundle {
        let mut block = Block::new();
        block.push(Statement::new(Stmt::MakeNumberInt { value: 42, target: 2 }));
        block.push(Statement::new(Stmt::AssignVar {
            source: Operand::Local(2),
            target: 3,
        }));
        block.push(Statement::new(Stmt::ReturnLocal { source: 3 }));
        let mut bundle = Bundle {
            strings: vec!["g0.p.r".into()],
            local_count: 4,
            functions: vec![Function {
                name: "g0.p.r".into(),
                parameters: vec![0, 1],
                arity: 2,
                result: 3,
                cacheable: true,
                blocks: vec![block],
            }],
            plans: vec![],
            query_plan: None,
            data: Value::from_json(&serde_json::json!({"a": 1})),
            sources: IndexMap::from([("p.rego".to_owned(), "package p\nr := 42\n".to_owned())]),
            function_index: ahash::AHashMap::new(),
        };
        bundle.rebuild_index();
        bundle
    }

    #[test]
    fn binary_round_trip() {
        let bundle = sample_bundle();
        let bytes = bundle.to_bytes().unwrap();
        let loaded = Bundle::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.local_count, 4);
        assert!(loaded.is_function("g0.p.r"));
        assert_eq!(loaded.data, bundle.data);
        // load-then-save is identity
        assert_eq!(loaded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(Bundle::from_bytes(b"NOPE\x01").is_err());
        assert!(Bundle::from_bytes(b"RE").is_err());
    }

    #[test]
    fn plan_json_is_deterministic() {
        let a = sample_bundle().plan_json().unwrap();
        let b = sample_bundle().plan_json().unwrap();
        assert_eq!(a, b);
    }
}
