//! Human-readable listings of bytecode

use std::fmt::{self, Write};

use super::{Code, Constant, OperandKind};

impl Code {
    /// Listing of this code and every nested code
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_listing(&mut out, 0);
        out
    }

    fn write_listing(&self, out: &mut String, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        write!(out, "{}== {} ({:?}", indent, self.display_name(), self.kind)?;
        if self.strict {
            write!(out, ", strict")?;
        }
        writeln!(out, ")")?;
        if !self.params.is_empty() {
            writeln!(out, "{}   params: {}", indent, self.params.join(", "))?;
        }
        if !self.locals.is_empty() {
            writeln!(out, "{}   locals: {}", indent, self.locals.join(", "))?;
        }

        let mut end = 0;
        for instr in self.instructions() {
            write!(out, "{}{:5} {:<30}", indent, instr.offset, instr.op.name())?;
            if instr.op.has_operand() {
                write!(out, " {:5}", instr.operand)?;
                if let Some(note) = self.annotate(instr.op.operand_kind(), instr.operand) {
                    write!(out, " ; {}", note)?;
                }
                if instr.op.operand_kind() == OperandKind::RelativeJump {
                    if let Some(target) = instr.jump_target() {
                        write!(out, " ; -> {}", target)?;
                    }
                }
            }
            writeln!(out)?;
            end = instr.next();
        }
        if end < self.instructions.len() {
            writeln!(out, "{}{:5} <undecodable>", indent, end)?;
        }

        if !self.exception_table.is_empty() {
            writeln!(out, "{}   exception table:", indent)?;
            for h in &self.exception_table {
                writeln!(
                    out,
                    "{}     {:?} [{}, {}) stack={} env={}",
                    indent, h.kind, h.begin, h.end, h.stack_base, h.env_level
                )?;
            }
        }
        for child in &self.codes {
            child.write_listing(out, depth + 1)?;
        }
        Ok(())
    }

    fn annotate(&self, kind: OperandKind, operand: u16) -> Option<String> {
        let index = operand as usize;
        match kind {
            OperandKind::Constant => self.constants.get(index).map(|c| match c {
                Constant::Number(n) => n.to_string(),
                Constant::String(s) => format!("{:?}", s),
                Constant::Boolean(b) => b.to_string(),
                Constant::Null => "null".to_string(),
                Constant::Undefined => "undefined".to_string(),
            }),
            OperandKind::Name => self.names.get(index).cloned(),
            OperandKind::Local => self.locals.get(index).cloned(),
            OperandKind::Code => self
                .codes
                .get(index)
                .map(|c| c.display_name().to_string()),
            OperandKind::Immediate => Some((operand as i16).to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}
