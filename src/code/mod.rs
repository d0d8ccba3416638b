//! Bytecode modules.
//!
//! A [`Code`] is what an external compiler hands the VM: the instruction
//! stream plus its side tables (constants, names, nested functions, exception
//! regions) and the declarations binding instantiation needs. It is plain
//! data and (de)serializes with serde. Before execution it is validated and
//! linked into an [`Executable`], which interns names and owns the inline
//! cache for its instruction sites.

mod builder;
mod disasm;
mod executable;
mod opcode;

pub use builder::{CodeBuilder, Label};
pub use executable::{Executable, FunctionBinding, LinkedConstant};
pub use opcode::{HAVE_OPERAND, Op, OperandKind};

use serde::{Deserialize, Serialize};

use crate::error::JsError;

/// Which kind of program unit a [`Code`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CodeKind {
    #[default]
    Global,
    Function,
    Eval,
}

/// Constant pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
}

/// Hoisted function declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Index into [`Code::codes`]
    pub code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    Catch,
    Finally,
    /// Marks a for-in body; never selected as a handler
    Iter,
}

/// Exception table row.
///
/// Covers `begin <= pc < end`; the handler code starts at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    pub kind: HandlerKind,
    pub begin: u16,
    pub end: u16,
    /// Operand stack height (above the frame's base) restored on entry
    pub stack_base: u16,
    /// Dynamic environment depth restored on entry
    pub env_level: u16,
}

impl Handler {
    #[inline]
    pub fn covers(&self, pc: usize) -> bool {
        (self.begin as usize) <= pc && pc < self.end as usize
    }

    fn span(&self) -> u16 {
        self.end.saturating_sub(self.begin)
    }
}

/// A compiled program unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: CodeKind,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub params: Vec<String>,
    /// Names living in frame slots rather than in an environment
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub var_decls: Vec<String>,
    #[serde(default)]
    pub function_decls: Vec<FunctionDecl>,
    #[serde(default)]
    pub uses_arguments: bool,
    /// Force a heap environment for the activation (closures capture it)
    #[serde(default)]
    pub needs_env: bool,
    /// Function expression whose own name is bound in its scope
    #[serde(default)]
    pub named_expression: bool,
    pub instructions: Vec<u8>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub codes: Vec<Code>,
    #[serde(default)]
    pub exception_table: Vec<Handler>,
    /// Operand stack high-water mark
    #[serde(default)]
    pub stack_depth: u16,
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub op: Op,
    pub operand: u16,
}

impl Instruction {
    /// Offset of the following instruction
    #[inline]
    pub fn next(&self) -> usize {
        self.offset + self.op.width()
    }

    /// Destination of a jump-kind instruction
    pub fn jump_target(&self) -> Option<usize> {
        match self.op.operand_kind() {
            OperandKind::Jump => Some(self.operand as usize),
            OperandKind::RelativeJump => {
                let target = self.offset as i64 + i64::from(self.operand as i16);
                usize::try_from(target).ok()
            }
            _ => None,
        }
    }
}

/// Decode the instruction starting at `pc`
#[inline]
pub fn decode(bytes: &[u8], pc: usize) -> Result<Instruction, JsError> {
    let byte = *bytes
        .get(pc)
        .ok_or_else(|| JsError::internal_error(format!("pc {} past end of code", pc)))?;
    let op = Op::from_u8(byte).ok_or_else(|| {
        JsError::internal_error(format!("unknown opcode 0x{:02x} at {}", byte, pc))
    })?;
    let operand = if op.has_operand() {
        match (bytes.get(pc + 1), bytes.get(pc + 2)) {
            (Some(lo), Some(hi)) => u16::from_le_bytes([*lo, *hi]),
            _ => {
                return Err(JsError::internal_error(format!(
                    "truncated operand for {} at {}",
                    op.name(),
                    pc
                )));
            }
        }
    } else {
        0
    };
    Ok(Instruction {
        offset: pc,
        op,
        operand,
    })
}

/// Iterator over the instructions of a byte stream; stops at the first
/// undecodable byte
pub struct Instructions<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        let instr = decode(self.bytes, self.pc).ok()?;
        self.pc = instr.next();
        Some(instr)
    }
}

impl Code {
    /// Empty code of the given kind
    pub fn new(kind: CodeKind) -> Self {
        Self {
            name: String::new(),
            kind,
            strict: false,
            params: Vec::new(),
            locals: Vec::new(),
            var_decls: Vec::new(),
            function_decls: Vec::new(),
            uses_arguments: false,
            needs_env: false,
            named_expression: false,
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            codes: Vec::new(),
            exception_table: Vec::new(),
            stack_depth: 0,
        }
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            bytes: &self.instructions,
            pc: 0,
        }
    }

    /// Innermost Catch/Finally row covering `pc`
    pub fn find_handler(&self, pc: usize) -> Option<&Handler> {
        self.exception_table
            .iter()
            .filter(|h| h.kind != HandlerKind::Iter && h.covers(pc))
            .min_by_key(|h| h.span())
    }

    /// Parse the JSON module format
    pub fn from_json(source: &str) -> Result<Code, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check that the code (and every nested code) is well formed: known
    /// opcodes, complete operands, in-range indices and jump targets that land
    /// on instruction boundaries.
    pub fn validate(&self) -> Result<(), JsError> {
        let len = self.instructions.len();
        let mut starts = vec![false; len + 1];
        let mut jumps = Vec::new();
        let mut pc = 0;
        while pc < len {
            let instr = decode(&self.instructions, pc)?;
            if let Some(start) = starts.get_mut(pc) {
                *start = true;
            }
            self.check_operand(&instr)?;
            if let Some(target) = instr.jump_target() {
                jumps.push((pc, target));
            } else if instr.op.operand_kind() == OperandKind::RelativeJump {
                return Err(self.invalid(pc, "jump before start of code"));
            }
            pc = instr.next();
        }

        let is_start = |offset: usize| starts.get(offset).copied().unwrap_or(false);
        for (pc, target) in jumps {
            if !is_start(target) {
                return Err(self.invalid(pc, &format!("jump target {} is not an instruction", target)));
            }
        }
        for handler in &self.exception_table {
            if handler.begin > handler.end {
                return Err(self.invalid(
                    handler.begin as usize,
                    "exception region begins after it ends",
                ));
            }
            let bounded = is_start(handler.begin as usize) || handler.begin == handler.end;
            if !bounded || !is_start(handler.end as usize) {
                return Err(self.invalid(
                    handler.begin as usize,
                    "exception region is not on instruction boundaries",
                ));
            }
        }
        for decl in &self.function_decls {
            if decl.code as usize >= self.codes.len() {
                return Err(JsError::internal_error(format!(
                    "{}: function declaration '{}' names missing code {}",
                    self.display_name(),
                    decl.name,
                    decl.code
                )));
            }
        }
        for child in &self.codes {
            child.validate()?;
        }
        Ok(())
    }

    fn check_operand(&self, instr: &Instruction) -> Result<(), JsError> {
        let index = instr.operand as usize;
        let (limit, table) = match instr.op.operand_kind() {
            OperandKind::Constant => (self.constants.len(), "constant"),
            OperandKind::Name => (self.names.len(), "name"),
            OperandKind::Local => (self.locals.len(), "local"),
            OperandKind::Code => (self.codes.len(), "code"),
            _ => return Ok(()),
        };
        if index >= limit {
            return Err(self.invalid(
                instr.offset,
                &format!("{} index {} out of range for {}", table, index, instr.op.name()),
            ));
        }
        Ok(())
    }

    fn invalid(&self, pc: usize, message: &str) -> JsError {
        JsError::internal_error(format!("{}@{}: {}", self.display_name(), pc, message))
    }

    pub(crate) fn display_name(&self) -> &str {
        if self.name.is_empty() {
            match self.kind {
                CodeKind::Global => "<global>",
                CodeKind::Function => "<anonymous>",
                CodeKind::Eval => "<eval>",
            }
        } else {
            &self.name
        }
    }
}
