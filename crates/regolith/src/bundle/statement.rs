//! Bundle statements and operands.
//!
//! Statements are the instruction set of the bundle VM: a tagged union
//! whose payload carries operands, target locals, and (for the
//! control-flow statements) nested blocks. Operands decode in O(1):
//! locals and strings are integer indexes into the frame and the bundle
//! string table.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::IntoStaticStr;

/// Frame slot index. Slot 0 is `input`, slot 1 is `data`.
pub type LocalId = u32;

/// Operand list for calls; almost always short.
pub type Operands = SmallVec<[Operand; 4]>;

/// Index into the bundle string table.
pub type StringId = u32;

/// A statement operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Read a frame local.
    Local(LocalId),
    /// An interned string literal.
    String(StringId),
    /// A raw index (capacities, break levels).
    Index(u32),
    /// An immediate integer.
    Value(i64),
    /// An immediate boolean.
    Bool(bool),
    /// Unset; never reaches a well-formed bundle.
    None,
}

/// Source anchor for runtime diagnostics; `file` indexes the string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StmtLoc {
    pub file: StringId,
    pub row: u32,
    pub col: u32,
}

/// A block: an ordered statement sequence executed until a statement
/// signals anything other than continue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block(pub Vec<Statement>);

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.0.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A statement plus its source anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub stmt: Stmt,
    pub loc: Option<StmtLoc>,
}

impl Statement {
    pub fn new(stmt: Stmt) -> Self {
        Self { stmt, loc: None }
    }

    pub fn at(stmt: Stmt, loc: StmtLoc) -> Self {
        Self { stmt, loc: Some(loc) }
    }
}

/// The statement kinds, exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize, IntoStaticStr)]
pub enum Stmt {
    /// target := {}
    MakeObject { target: LocalId },
    /// target := [] with a capacity hint
    MakeArray { capacity: u32, target: LocalId },
    /// target := set()
    MakeSet { target: LocalId },
    /// target := null
    MakeNull { target: LocalId },
    /// target := value (immediate integer)
    MakeNumberInt { value: i64, target: LocalId },
    /// target := number parsed from the string table (int or float)
    MakeNumberRef { index: StringId, target: LocalId },
    /// target := value (immediate integer, no number parsing)
    AssignInt { value: i64, target: LocalId },
    /// target := source; undefined source resets the slot
    AssignVar { source: Operand, target: LocalId },
    /// like AssignVar, but a defined target must agree by canonical key
    AssignVarOnce { source: Operand, target: LocalId },
    /// clear the slot back to undefined
    ResetLocal { target: LocalId },
    /// gate: undefined local aborts the block
    IsDefined { source: LocalId },
    /// gate: defined local aborts the block
    IsUndefined { source: LocalId },
    /// gate on operand type
    IsObject { source: Operand },
    IsArray { source: Operand },
    IsSet { source: Operand },
    /// negation as failure: continue iff the block is undefined
    Not { block: Block },
    /// run nested blocks; undefined aborts only the nested block
    Block { blocks: Vec<Block> },
    /// target := length of the operand collection or string
    Len { source: Operand, target: LocalId },
    /// object lookup / set membership / array index; miss is undefined
    Dot { source: Operand, key: Operand, target: LocalId },
    ObjectInsert { key: Operand, value: Operand, target: LocalId },
    /// insert that errors when the key holds a different value
    ObjectInsertOnce { key: Operand, value: Operand, target: LocalId },
    /// target := recursive merge of two locals
    ObjectMerge { a: LocalId, b: LocalId, target: LocalId },
    ArrayAppend { value: Operand, array: LocalId },
    SetAdd { value: Operand, set: LocalId },
    /// return from the current function
    ReturnLocal { source: LocalId },
    /// append the local to the result set when defined
    ResultSetAdd { source: LocalId },
    /// gate: canonical equality with mixed-numeric promotion
    Equal { a: Operand, b: Operand },
    NotEqual { a: Operand, b: Operand },
    /// call a built-in or bundle function; `func` indexes the string table
    Call {
        func: StringId,
        args: Operands,
        target: LocalId,
    },
    /// resolve `g0.<s0>.<s1>…` to the longest known function prefix,
    /// call it, then apply the remaining segments as Dot steps
    CallDynamic {
        path: Operands,
        args: Operands,
        target: LocalId,
    },
    /// deterministic iteration over the source local
    Scan {
        source: LocalId,
        key: LocalId,
        value: LocalId,
        block: Block,
    },
    /// copy-on-write override of a path under a local for the block
    With {
        target: LocalId,
        path: Vec<StringId>,
        value: Operand,
        block: Block,
    },
    /// unwind `levels` nesting levels
    Break { levels: u32 },
    Nop,
}

impl Stmt {
    /// The statement's name, for traces and dumps.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_names() {
        assert_eq!(Stmt::Nop.name(), "Nop");
        assert_eq!(Stmt::MakeObject { target: 3 }.name(), "MakeObject");
        assert_eq!(
            Stmt::Dot {
                source: Operand::Local(1),
                key: Operand::String(0),
                target: 2
            }
            .name(),
            "Dot"
        );
    }

    #[test]
    fn operands_round_trip_postcard() {
        let ops = vec![
            Operand::Local(7),
            Operand::String(3),
            Operand::Index(2),
            Operand::Value(-9),
            Operand::Bool(true),
            Operand::None,
        ];
        let bytes = postcard::to_allocvec(&ops).unwrap();
        let back: Vec<Operand> = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(ops, back);
    }
}
