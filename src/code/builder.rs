//! CodeBuilder - assembler for [`Code`] units
//!
//! Emits raw instruction bytes, deduplicates constants and names, and
//! back-patches jump operands and exception regions once labels are bound.

use rustc_hash::FxHashMap;

use super::{Code, CodeKind, Constant, FunctionDecl, Handler, HandlerKind, Op, OperandKind};
use crate::error::JsError;

/// Forward-referencable instruction offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Jump operand waiting for its label
#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Offset of the jump instruction
    instruction: usize,
    label: Label,
}

#[derive(Debug, Clone, Copy)]
struct PendingHandler {
    kind: HandlerKind,
    begin: Label,
    end: Label,
    stack_base: u16,
    env_level: u16,
}

pub struct CodeBuilder {
    code: Code,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    string_map: FxHashMap<String, u16>,
    number_map: FxHashMap<u64, u16>,
    name_map: FxHashMap<String, u16>,
}

impl CodeBuilder {
    pub fn new(kind: CodeKind) -> Self {
        Self {
            code: Code::new(kind),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            string_map: FxHashMap::default(),
            number_map: FxHashMap::default(),
            name_map: FxHashMap::default(),
        }
    }

    /// Builder for top-level program code
    pub fn global() -> Self {
        Self::new(CodeKind::Global)
    }

    /// Builder for a function body
    pub fn function(name: &str) -> Self {
        let mut builder = Self::new(CodeKind::Function);
        builder.code.name = name.to_string();
        builder
    }

    pub fn eval() -> Self {
        Self::new(CodeKind::Eval)
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    pub fn set_strict(&mut self, strict: bool) -> &mut Self {
        self.code.strict = strict;
        self
    }

    pub fn set_uses_arguments(&mut self) -> &mut Self {
        self.code.uses_arguments = true;
        self
    }

    pub fn set_needs_env(&mut self) -> &mut Self {
        self.code.needs_env = true;
        self
    }

    pub fn set_named_expression(&mut self) -> &mut Self {
        self.code.named_expression = true;
        self
    }

    pub fn set_stack_depth(&mut self, depth: u16) -> &mut Self {
        self.code.stack_depth = depth;
        self
    }

    pub fn add_param(&mut self, name: &str) -> &mut Self {
        self.code.params.push(name.to_string());
        self
    }

    /// Reserve a frame slot for `name`
    pub fn add_local(&mut self, name: &str) -> Result<u16, JsError> {
        if let Some(index) = self.code.locals.iter().position(|l| l == name) {
            return Ok(index as u16);
        }
        let index = checked_index(self.code.locals.len(), "locals")?;
        self.code.locals.push(name.to_string());
        Ok(index)
    }

    pub fn declare_var(&mut self, name: &str) -> &mut Self {
        if !self.code.var_decls.iter().any(|v| v == name) {
            self.code.var_decls.push(name.to_string());
        }
        self
    }

    /// Hoisted `function name() {...}`
    pub fn declare_function(&mut self, name: &str, code: Code) -> Result<u16, JsError> {
        let index = self.add_code(code)?;
        self.code.function_decls.push(FunctionDecl {
            name: name.to_string(),
            code: index,
        });
        Ok(index)
    }

    /// Nested code for `BUILD_FUNCTION`
    pub fn add_code(&mut self, code: Code) -> Result<u16, JsError> {
        let index = checked_index(self.code.codes.len(), "nested codes")?;
        self.code.codes.push(code);
        Ok(index)
    }

    // ------------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------------

    /// Add a name to the name table (with deduplication)
    pub fn add_name(&mut self, name: &str) -> Result<u16, JsError> {
        if let Some(&index) = self.name_map.get(name) {
            return Ok(index);
        }
        let index = checked_index(self.code.names.len(), "names")?;
        self.code.names.push(name.to_string());
        self.name_map.insert(name.to_string(), index);
        Ok(index)
    }

    /// Add a string constant to the pool (with deduplication)
    pub fn add_string(&mut self, s: &str) -> Result<u16, JsError> {
        if let Some(&index) = self.string_map.get(s) {
            return Ok(index);
        }
        let index = self.add_constant(Constant::String(s.to_string()))?;
        self.string_map.insert(s.to_string(), index);
        Ok(index)
    }

    /// Add a number constant to the pool (with deduplication)
    pub fn add_number(&mut self, n: f64) -> Result<u16, JsError> {
        let bits = n.to_bits();
        if let Some(&index) = self.number_map.get(&bits) {
            return Ok(index);
        }
        let index = self.add_constant(Constant::Number(n))?;
        self.number_map.insert(bits, index);
        Ok(index)
    }

    pub fn add_constant(&mut self, constant: Constant) -> Result<u16, JsError> {
        let index = checked_index(self.code.constants.len(), "constants")?;
        self.code.constants.push(constant);
        Ok(index)
    }

    // ------------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------------

    /// Current instruction offset
    pub fn current_offset(&self) -> usize {
        self.code.instructions.len()
    }

    /// Emit an instruction without operand and return its offset
    pub fn emit(&mut self, op: Op) -> usize {
        self.emit_with(op, 0)
    }

    /// Emit an instruction; the operand is dropped for operand-less opcodes
    pub fn emit_with(&mut self, op: Op, operand: u16) -> usize {
        let offset = self.code.instructions.len();
        self.code.instructions.push(op as u8);
        if op.has_operand() {
            self.code.instructions.extend_from_slice(&operand.to_le_bytes());
        }
        offset
    }

    /// Emit an opcode whose operand is a name-table index
    pub fn emit_name(&mut self, op: Op, name: &str) -> Result<usize, JsError> {
        let index = self.add_name(name)?;
        Ok(self.emit_with(op, index))
    }

    /// Push a number: small integers inline, everything else via the pool
    pub fn emit_number(&mut self, n: f64) -> Result<usize, JsError> {
        let small = n as i16;
        if f64::from(small) == n && !(n == 0.0 && n.is_sign_negative()) {
            return Ok(self.emit_with(Op::PUSH_INT16, small as u16));
        }
        let index = self.add_number(n)?;
        Ok(self.emit_with(Op::LOAD_CONST, index))
    }

    /// Push a number from the constant pool, never inline
    pub fn emit_number_constant(&mut self, n: f64) -> Result<usize, JsError> {
        let index = self.add_number(n)?;
        Ok(self.emit_with(Op::LOAD_CONST, index))
    }

    pub fn emit_string(&mut self, s: &str) -> Result<usize, JsError> {
        let index = self.add_string(s)?;
        Ok(self.emit_with(Op::LOAD_CONST, index))
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) {
        let offset = self.current_offset();
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(offset);
        }
    }

    /// Emit a jump-kind instruction to `label`, patched in [`CodeBuilder::finish`]
    pub fn emit_jump(&mut self, op: Op, label: Label) -> usize {
        let instruction = self.emit_with(op, 0);
        self.fixups.push(Fixup { instruction, label });
        instruction
    }

    /// Exception region `[begin, end)` whose handler code starts at `end`
    pub fn add_handler(
        &mut self,
        kind: HandlerKind,
        begin: Label,
        end: Label,
        stack_base: u16,
        env_level: u16,
    ) {
        self.handlers.push(PendingHandler {
            kind,
            begin,
            end,
            stack_base,
            env_level,
        });
    }

    fn resolve(&self, label: Label) -> Result<usize, JsError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| JsError::internal_error(format!("label {} never bound", label.0)))
    }

    /// Patch jumps, lay out the exception table and validate the result
    pub fn finish(mut self) -> Result<Code, JsError> {
        if self.code.instructions.len() > u16::MAX as usize {
            return Err(JsError::internal_error(
                "Code too large (max 65535 bytes)",
            ));
        }
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.resolve(fixup.label)?;
            let op = self
                .code
                .instructions
                .get(fixup.instruction)
                .and_then(|b| Op::from_u8(*b))
                .ok_or_else(|| JsError::internal_error("fixup on a non-instruction"))?;
            let operand = match op.operand_kind() {
                OperandKind::RelativeJump => {
                    (target as i64 - fixup.instruction as i64) as i16 as u16
                }
                _ => target as u16,
            };
            let bytes = operand.to_le_bytes();
            for (i, byte) in bytes.iter().enumerate() {
                if let Some(slot) = self.code.instructions.get_mut(fixup.instruction + 1 + i) {
                    *slot = *byte;
                }
            }
        }
        for pending in std::mem::take(&mut self.handlers) {
            let begin = self.resolve(pending.begin)? as u16;
            let end = self.resolve(pending.end)? as u16;
            self.code.exception_table.push(Handler {
                kind: pending.kind,
                begin,
                end,
                stack_base: pending.stack_base,
                env_level: pending.env_level,
            });
        }
        if self.code.stack_depth == 0 {
            // At most two values per code byte
            self.code.stack_depth = self.code.instructions.len().min(u16::MAX as usize / 2) as u16 * 2;
        }
        self.code.validate()?;
        Ok(self.code)
    }
}

fn checked_index(len: usize, table: &str) -> Result<u16, JsError> {
    u16::try_from(len)
        .map_err(|_| JsError::internal_error(format!("Too many {} (max 65535)", table)))
}
