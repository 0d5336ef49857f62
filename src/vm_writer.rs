//! VM Emitter: a thin, sequential sink that writes well-formed VM
//! instructions, one per line, to any [`std::io::Write`].
//!
//! Generic over the sink so the compilation engine can target a real
//! output file in the driver and an in-memory buffer in tests.

use crate::symbol_table::Segment;
use std::io::{self, Write};

/// A binary or unary operator token as it appears in source, mapped to
/// its VM instruction at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Eq,
    Gt,
    Lt,
    And,
    Or,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

pub struct VmWriter<W: Write> {
    out: W,
}

impl<W: Write> VmWriter<W> {
    pub fn new(out: W) -> Self {
        VmWriter { out }
    }

    fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }

    pub fn push(&mut self, segment: Segment, index: u16) -> io::Result<()> {
        self.line(&format!("push {} {}", segment.as_str(), index))
    }

    pub fn pop(&mut self, segment: Segment, index: u16) -> io::Result<()> {
        self.line(&format!("pop {} {}", segment.as_str(), index))
    }

    pub fn arithmetic(&mut self, op: ArithOp) -> io::Result<()> {
        match op {
            ArithOp::Add => self.line("add"),
            ArithOp::Sub => self.line("sub"),
            ArithOp::Eq => self.line("eq"),
            ArithOp::Gt => self.line("gt"),
            ArithOp::Lt => self.line("lt"),
            ArithOp::And => self.line("and"),
            ArithOp::Or => self.line("or"),
            ArithOp::Mul => self.call("Math.multiply", 2),
            ArithOp::Div => self.call("Math.divide", 2),
        }
    }

    pub fn unary(&mut self, op: UnaryOp) -> io::Result<()> {
        match op {
            UnaryOp::Not => self.line("not"),
            UnaryOp::Neg => self.line("neg"),
        }
    }

    pub fn label(&mut self, name: &str) -> io::Result<()> {
        self.line(&format!("label {}", name))
    }

    pub fn goto(&mut self, name: &str) -> io::Result<()> {
        self.line(&format!("goto {}", name))
    }

    pub fn if_goto(&mut self, name: &str) -> io::Result<()> {
        self.line(&format!("if-goto {}", name))
    }

    pub fn call(&mut self, name: &str, nargs: u16) -> io::Result<()> {
        self.line(&format!("call {} {}", name, nargs))
    }

    pub fn function(&mut self, name: &str, nlocals: u16) -> io::Result<()> {
        self.line(&format!("function {} {}", name, nlocals))
    }

    pub fn vm_return(&mut self) -> io::Result<()> {
        self.line("return")
    }
}

/// Try to map a source operator symbol to an [`ArithOp`].
pub fn arith_op_for(symbol: &str) -> Option<ArithOp> {
    Some(match symbol {
        "+" => ArithOp::Add,
        "-" => ArithOp::Sub,
        "=" => ArithOp::Eq,
        ">" => ArithOp::Gt,
        "<" => ArithOp::Lt,
        "&" => ArithOp::And,
        "|" => ArithOp::Or,
        "*" => ArithOp::Mul,
        "/" => ArithOp::Div,
        _ => return None,
    })
}

/// Try to map a source unary operator symbol to a [`UnaryOp`].
pub fn unary_op_for(symbol: &str) -> Option<UnaryOp> {
    Some(match symbol {
        "~" => UnaryOp::Not,
        "-" => UnaryOp::Neg,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<F: FnOnce(&mut VmWriter<&mut Vec<u8>>) -> io::Result<()>>(f: F) -> String {
        let mut buf = Vec::new();
        let mut w = VmWriter::new(&mut buf);
        f(&mut w).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn push_pop_emit_segment_and_index() {
        let out = render(|w| {
            w.push(Segment::Local, 0)?;
            w.pop(Segment::Argument, 2)
        });
        assert_eq!(out, "push local 0\npop argument 2\n");
    }

    #[test]
    fn multiply_and_divide_lower_to_calls() {
        let out = render(|w| {
            w.arithmetic(ArithOp::Mul)?;
            w.arithmetic(ArithOp::Div)
        });
        assert_eq!(out, "call Math.multiply 2\ncall Math.divide 2\n");
    }

    #[test]
    fn control_flow_instructions() {
        let out = render(|w| {
            w.label("L0")?;
            w.if_goto("L1")?;
            w.goto("L0")
        });
        assert_eq!(out, "label L0\nif-goto L1\ngoto L0\n");
    }

    #[test]
    fn no_blank_lines_and_trailing_newline_per_instruction() {
        let out = render(|w| w.vm_return());
        assert_eq!(out, "return\n");
        assert!(!out.contains("\n\n"));
    }
}
