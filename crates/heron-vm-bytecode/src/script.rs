//! Bytecode units

use crate::error::{BytecodeError, Result};
use crate::instruction::{IcKind, Instruction, Opcode};
use crate::operand::{NameIndex, PcOffset};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SCRIPT_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a bytecode unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ScriptId(pub u32);

impl ScriptId {
    fn next() -> Self {
        Self(NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A bytecode unit: one function body or top-level script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    id: ScriptId,
    name: String,
    arg_count: u16,
    is_function: bool,
    local_count: u16,
    instructions: Vec<Instruction>,
    names: Vec<String>,
}

impl Script {
    /// Start building a unit
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::new()
    }

    /// Unit identity
    pub fn id(&self) -> ScriptId {
        self.id
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared formal argument count
    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    /// Whether this unit is a function body (and so has `this` and arguments)
    pub fn is_function(&self) -> bool {
        self.is_function
    }

    /// Number of local slots in an interpreter frame for this unit
    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Instructions in offset order
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at `pc`
    pub fn instruction(&self, pc: PcOffset) -> Option<&Instruction> {
        self.instructions.get(pc.get() as usize)
    }

    /// Resolve a name operand
    pub fn name_at(&self, index: NameIndex) -> Result<&str> {
        self.names
            .get(index.index() as usize)
            .map(String::as_str)
            .ok_or(BytecodeError::InvalidName(index.index()))
    }

    /// Every IC-bearing instruction in offset order
    pub fn ic_sites(&self) -> impl Iterator<Item = (PcOffset, Opcode, IcKind)> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| {
                let kind = instruction.opcode.ic_kind()?;
                Some((PcOffset::new(index as u32), instruction.opcode, kind))
            })
    }

    /// Number of IC entries this unit needs, prologue entries included
    pub fn ic_entry_count(&self) -> usize {
        let prologue = if self.is_function {
            1 + self.arg_count as usize
        } else {
            0
        };
        prologue + self.ic_sites().count()
    }

    /// Offsets of every loop header
    pub fn loop_entries(&self) -> Vec<PcOffset> {
        self.ic_sites()
            .filter(|(_, _, kind)| *kind == IcKind::WarmUpCounter)
            .map(|(pc, _, _)| pc)
            .collect()
    }

    /// Serialize for the on-disk cache
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a cached unit. The unit gets a fresh identity and is re-validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut script: Script = serde_json::from_str(json)?;
        script.id = ScriptId::next();
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<()> {
        let len = self.instructions.len() as u32;
        for (at, instruction) in self.instructions.iter().enumerate() {
            match instruction.opcode {
                Opcode::GetProp(name) | Opcode::SetProp(name) => {
                    self.name_at(name)?;
                }
                Opcode::GetLocal(local) | Opcode::SetLocal(local) | Opcode::GetAliasedVar(local) => {
                    if local.index() >= self.local_count {
                        return Err(BytecodeError::InvalidLocal {
                            index: local.index(),
                            count: self.local_count,
                        });
                    }
                }
                Opcode::Jump(target) | Opcode::JumpIfFalse(target) => {
                    if target.get() >= len {
                        return Err(BytecodeError::InvalidJump {
                            at: at as u32,
                            target: target.get(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Builder for bytecode units
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    name: Option<String>,
    arg_count: u16,
    is_function: bool,
    local_count: u16,
    instructions: Vec<Instruction>,
    names: Vec<String>,
}

impl ScriptBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set unit name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark as a function body with `count` formal arguments
    pub fn function(mut self, arg_count: u16) -> Self {
        self.is_function = true;
        self.arg_count = arg_count;
        self
    }

    /// Set local slot count
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Intern a property name, returning its operand
    pub fn intern(&mut self, name: &str) -> NameIndex {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return NameIndex::new(pos as u32);
        }
        self.names.push(name.to_string());
        NameIndex::new((self.names.len() - 1) as u32)
    }

    /// Append an instruction, returning its offset
    pub fn emit(&mut self, opcode: Opcode) -> PcOffset {
        self.instructions.push(Instruction::new(opcode));
        PcOffset::new((self.instructions.len() - 1) as u32)
    }

    /// Append an instruction (chaining form)
    pub fn op(mut self, opcode: Opcode) -> Self {
        self.emit(opcode);
        self
    }

    /// Append a named-property read (chaining form)
    pub fn get_prop(mut self, name: &str) -> Self {
        let index = self.intern(name);
        self.emit(Opcode::GetProp(index));
        self
    }

    /// Append a named-property write (chaining form)
    pub fn set_prop(mut self, name: &str) -> Self {
        let index = self.intern(name);
        self.emit(Opcode::SetProp(index));
        self
    }

    /// Validate and build the unit
    pub fn build(self) -> Result<Script> {
        let script = Script {
            id: ScriptId::next(),
            name: self.name.unwrap_or_else(|| "<anonymous>".to_string()),
            arg_count: self.arg_count,
            is_function: self.is_function,
            local_count: self.local_count,
            instructions: self.instructions,
            names: self.names,
        };
        script.validate()?;
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BinaryOp;
    use crate::operand::LocalIndex;

    #[test]
    fn test_ic_sites_skip_plain_instructions() {
        let script = Script::builder()
            .name("sites")
            .local_count(1)
            .op(Opcode::GetLocal(LocalIndex::new(0)))
            .get_prop("x")
            .op(Opcode::Binary(BinaryOp::Add))
            .op(Opcode::Return)
            .build()
            .unwrap();

        let sites: Vec<_> = script.ic_sites().collect();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].0, PcOffset::new(1));
        assert_eq!(sites[0].2, IcKind::GetProp);
        assert_eq!(sites[1].0, PcOffset::new(2));
        assert_eq!(script.ic_entry_count(), 2);
    }

    #[test]
    fn test_function_prologue_entries_counted() {
        let script = Script::builder()
            .function(3)
            .op(Opcode::Call(0))
            .build()
            .unwrap();
        // this + 3 arguments + the call site
        assert_eq!(script.ic_entry_count(), 5);
    }

    #[test]
    fn test_intern_deduplicates() {
        let mut builder = Script::builder();
        let a = builder.intern("length");
        let b = builder.intern("x");
        let c = builder.intern("length");
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validation_rejects_bad_operands() {
        let err = Script::builder()
            .op(Opcode::GetLocal(LocalIndex::new(2)))
            .build()
            .unwrap_err();
        assert!(matches!(err, BytecodeError::InvalidLocal { index: 2, count: 0 }));

        let err = Script::builder()
            .op(Opcode::Jump(PcOffset::new(9)))
            .build()
            .unwrap_err();
        assert!(matches!(err, BytecodeError::InvalidJump { at: 0, target: 9 }));

        let err = Script::builder()
            .op(Opcode::GetProp(NameIndex::new(0)))
            .build()
            .unwrap_err();
        assert!(matches!(err, BytecodeError::InvalidName(0)));
    }

    #[test]
    fn test_cached_unit_gets_fresh_identity() {
        let script = Script::builder()
            .name("cached")
            .op(Opcode::LoopEntry)
            .get_prop("y")
            .build()
            .unwrap();
        let json = script.to_json().unwrap();
        let loaded = Script::from_json(&json).unwrap();

        assert_ne!(loaded.id(), script.id());
        assert_eq!(loaded.name(), "cached");
        assert_eq!(loaded.loop_entries(), vec![PcOffset::new(0)]);
        assert_eq!(loaded.name_at(NameIndex::new(0)).unwrap(), "y");
    }
}
