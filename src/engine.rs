//! Recursive-descent grammar recognizer that drives the tokenizer,
//! updates the two symbol-table scopes, and emits VM code inline. There
//! is no intermediate AST: each grammar production is compiled the
//! moment it is recognized.

use crate::error::{CompileError, Result};
use crate::symbol_table::{Kind, Segment, SymbolTable};
use crate::token::{Token, TokenKind};
use crate::tokenizer::Tokenizer;
use crate::vm_writer::{arith_op_for, unary_op_for, ArithOp, UnaryOp, VmWriter};
use std::io::Write;

/// Transient per-subroutine state, reset at the start of every
/// `compile_subroutine_dec`.
#[derive(Default)]
struct SubroutineContext {
    func_name: String,
    is_void: bool,
    is_method: bool,
    is_ctor: bool,
    label_counter: u32,
}

/// Resolution of a subroutine call's callee, decided before any argument
/// is parsed: either an implicit call on the current object, a method
/// call on a declared variable, or a call qualified by a class name.
enum CallTarget {
    /// Unqualified call: implicit receiver is the current `this`.
    SelfMethod,
    /// `var.name(...)` where `var` is a declared variable.
    VarMethod { class_type: String, segment: Segment, index: u16 },
    /// `Cls.name(...)` where `Cls` is not a declared variable.
    Static(String),
}

pub struct CompilationEngine<W: Write> {
    tokenizer: Tokenizer,
    writer: VmWriter<W>,
    class_scope: SymbolTable,
    sub_scope: SymbolTable,
    class_name: String,
    ctx: SubroutineContext,
    last_line: usize,
}

impl<W: Write> CompilationEngine<W> {
    pub fn new(tokenizer: Tokenizer, writer: VmWriter<W>) -> Self {
        CompilationEngine {
            tokenizer,
            writer,
            class_scope: SymbolTable::new(),
            sub_scope: SymbolTable::new(),
            class_name: String::new(),
            ctx: SubroutineContext::default(),
            last_line: 0,
        }
    }

    /// Compile exactly one class declaration, consuming the whole token
    /// stream.
    pub fn compile_class(&mut self) -> Result<()> {
        self.expect_keyword("class")?;
        let name = self.expect_identifier()?;
        self.class_name = name.text;
        self.class_scope.reset();
        self.expect_symbol("{")?;

        while self.peek_is_keyword("static") || self.peek_is_keyword("field") {
            self.compile_class_var_dec()?;
        }
        while self.peek_is_keyword("constructor")
            || self.peek_is_keyword("function")
            || self.peek_is_keyword("method")
        {
            self.compile_subroutine_dec()?;
        }
        self.expect_symbol("}")?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Declarations
    // ----------------------------------------------------------------

    fn compile_class_var_dec(&mut self) -> Result<()> {
        let kind_tok = self.advance()?;
        let kind = if kind_tok.text == "static" {
            Kind::Static
        } else {
            Kind::Field
        };
        let type_name = self.compile_type()?;
        loop {
            let name = self.expect_identifier()?;
            self.class_scope.define(&name.text, &type_name, kind);
            if self.peek_is_symbol(",") {
                self.advance()?;
                continue;
            }
            break;
        }
        self.expect_symbol(";")?;
        Ok(())
    }

    fn compile_subroutine_dec(&mut self) -> Result<()> {
        let kind_tok = self.advance()?;
        self.sub_scope.reset();
        let is_ctor = kind_tok.text == "constructor";
        let is_method = kind_tok.text == "method";

        let return_type = self.compile_type()?;
        let is_void = return_type == "void";
        let name = self.expect_identifier()?;

        self.ctx = SubroutineContext {
            func_name: name.text,
            is_void,
            is_method,
            is_ctor,
            label_counter: 0,
        };

        if is_method {
            let class_name = self.class_name.clone();
            self.sub_scope.define("this", &class_name, Kind::Argument);
        }

        self.expect_symbol("(")?;
        self.compile_parameter_list()?;
        self.expect_symbol(")")?;

        self.expect_symbol("{")?;
        while self.peek_is_keyword("var") {
            self.compile_var_dec()?;
        }

        let nlocals = self.sub_scope.count(Kind::Local);
        let qname = format!("{}.{}", self.class_name, self.ctx.func_name);
        self.writer.function(&qname, nlocals)?;

        if self.ctx.is_method {
            self.writer.push(Segment::Argument, 0)?;
            self.writer.pop(Segment::Pointer, 0)?;
        } else if self.ctx.is_ctor {
            let nfields = self.class_scope.count(Kind::Field);
            self.writer.push(Segment::Constant, nfields)?;
            self.writer.call("Memory.alloc", 1)?;
            self.writer.pop(Segment::Pointer, 0)?;
        }

        self.compile_statements()?;
        self.expect_symbol("}")?;
        Ok(())
    }

    fn compile_parameter_list(&mut self) -> Result<()> {
        if self.peek_is_symbol(")") {
            return Ok(());
        }
        loop {
            let type_name = self.compile_type()?;
            let name = self.expect_identifier()?;
            self.sub_scope.define(&name.text, &type_name, Kind::Argument);
            if self.peek_is_symbol(",") {
                self.advance()?;
                continue;
            }
            break;
        }
        Ok(())
    }

    fn compile_var_dec(&mut self) -> Result<()> {
        self.expect_keyword("var")?;
        let type_name = self.compile_type()?;
        loop {
            let name = self.expect_identifier()?;
            self.sub_scope.define(&name.text, &type_name, Kind::Local);
            if self.peek_is_symbol(",") {
                self.advance()?;
                continue;
            }
            break;
        }
        self.expect_symbol(";")?;
        Ok(())
    }

    /// `int | char | boolean | void | ClassName`, all lexed as a single
    /// keyword or identifier token.
    fn compile_type(&mut self) -> Result<String> {
        let tok = self.advance()?;
        Ok(tok.text)
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    fn compile_statements(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(tok) if tok.is_keyword("let") => self.compile_let()?,
                Some(tok) if tok.is_keyword("if") => self.compile_if()?,
                Some(tok) if tok.is_keyword("while") => self.compile_while()?,
                Some(tok) if tok.is_keyword("do") => self.compile_do()?,
                Some(tok) if tok.is_keyword("return") => self.compile_return()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn compile_let(&mut self) -> Result<()> {
        self.expect_keyword("let")?;
        let name = self.expect_identifier()?;

        if self.peek_is_symbol("[") {
            self.advance()?;
            let (seg, idx) = self.resolve(&name)?;
            self.writer.push(seg, idx)?;
            self.compile_expression()?;
            self.expect_symbol("]")?;
            self.writer.arithmetic(ArithOp::Add)?;

            self.expect_symbol("=")?;
            self.compile_expression()?;
            self.expect_symbol(";")?;

            // This ordering keeps correctness when the RHS itself contains
            // an array access, which would otherwise clobber `pointer 1`.
            self.writer.pop(Segment::Temp, 0)?;
            self.writer.pop(Segment::Pointer, 1)?;
            self.writer.push(Segment::Temp, 0)?;
            self.writer.pop(Segment::That, 0)?;
        } else {
            self.expect_symbol("=")?;
            self.compile_expression()?;
            self.expect_symbol(";")?;
            let (seg, idx) = self.resolve(&name)?;
            self.writer.pop(seg, idx)?;
        }
        Ok(())
    }

    fn compile_if(&mut self) -> Result<()> {
        self.expect_keyword("if")?;
        self.expect_symbol("(")?;
        self.compile_expression()?;
        self.expect_symbol(")")?;

        let (else_label, end_label) = self.fresh_label_pair();
        self.writer.unary(UnaryOp::Not)?;
        self.writer.if_goto(&else_label)?;

        self.expect_symbol("{")?;
        self.compile_statements()?;
        self.expect_symbol("}")?;
        self.writer.goto(&end_label)?;

        self.writer.label(&else_label)?;
        if self.peek_is_keyword("else") {
            self.advance()?;
            self.expect_symbol("{")?;
            self.compile_statements()?;
            self.expect_symbol("}")?;
        }
        self.writer.label(&end_label)?;
        Ok(())
    }

    fn compile_while(&mut self) -> Result<()> {
        self.expect_keyword("while")?;
        let (top_label, end_label) = self.fresh_label_pair();

        self.writer.label(&top_label)?;
        self.expect_symbol("(")?;
        self.compile_expression()?;
        self.expect_symbol(")")?;
        self.writer.unary(UnaryOp::Not)?;
        self.writer.if_goto(&end_label)?;

        self.expect_symbol("{")?;
        self.compile_statements()?;
        self.expect_symbol("}")?;
        self.writer.goto(&top_label)?;
        self.writer.label(&end_label)?;
        Ok(())
    }

    fn compile_do(&mut self) -> Result<()> {
        self.expect_keyword("do")?;
        let name = self.expect_identifier()?;
        self.compile_subroutine_call(name)?;
        self.expect_symbol(";")?;
        self.writer.pop(Segment::Temp, 0)?;
        Ok(())
    }

    fn compile_return(&mut self) -> Result<()> {
        self.expect_keyword("return")?;
        if self.peek_is_symbol(";") {
            if self.ctx.is_void {
                self.writer.push(Segment::Constant, 0)?;
            }
            self.advance()?;
        } else {
            // A constructor's only well-formed return is `return this;`,
            // whose `this` term already emits `push pointer 0` below.
            self.compile_expression()?;
            self.expect_symbol(";")?;
        }
        self.writer.vm_return()?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Expressions
    // ----------------------------------------------------------------

    fn compile_expression(&mut self) -> Result<()> {
        self.compile_term()?;
        loop {
            let op = match self.peek() {
                Some(tok) if tok.kind == TokenKind::Symbol => arith_op_for(&tok.text),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.advance()?;
                    self.compile_term()?;
                    self.writer.arithmetic(op)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn compile_expression_list(&mut self) -> Result<u16> {
        let mut argc = 0u16;
        if self.peek_is_symbol(")") {
            return Ok(argc);
        }
        self.compile_expression()?;
        argc += 1;
        while self.peek_is_symbol(",") {
            self.advance()?;
            self.compile_expression()?;
            argc += 1;
        }
        Ok(argc)
    }

    fn compile_term(&mut self) -> Result<()> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::IntConst => {
                let n: u16 = tok.text.parse().map_err(|_| CompileError::Lexical {
                    line: tok.line,
                    message: format!("malformed integer constant '{}'", tok.text),
                })?;
                self.writer.push(Segment::Constant, n)?;
            }
            TokenKind::StrConst => self.compile_string_const(&tok.text)?,
            TokenKind::Keyword => match tok.text.as_str() {
                "true" => {
                    self.writer.push(Segment::Constant, 0)?;
                    self.writer.unary(UnaryOp::Not)?;
                }
                "false" | "null" => self.writer.push(Segment::Constant, 0)?,
                "this" => self.writer.push(Segment::Pointer, 0)?,
                other => {
                    return Err(CompileError::Structural {
                        line: tok.line,
                        expected: "term".to_string(),
                        found: other.to_string(),
                    })
                }
            },
            TokenKind::Identifier => {
                if self.peek_is_symbol("[") {
                    self.advance()?;
                    let (seg, idx) = self.resolve(&tok)?;
                    self.writer.push(seg, idx)?;
                    self.compile_expression()?;
                    self.expect_symbol("]")?;
                    self.writer.arithmetic(ArithOp::Add)?;
                    self.writer.pop(Segment::Pointer, 1)?;
                    self.writer.push(Segment::That, 0)?;
                } else if self.peek_is_symbol("(") || self.peek_is_symbol(".") {
                    self.compile_subroutine_call(tok)?;
                } else {
                    let (seg, idx) = self.resolve(&tok)?;
                    self.writer.push(seg, idx)?;
                }
            }
            TokenKind::Symbol if tok.text == "(" => {
                self.compile_expression()?;
                self.expect_symbol(")")?;
            }
            TokenKind::Symbol if tok.text == "~" || tok.text == "-" => {
                self.compile_term()?;
                self.writer.unary(unary_op_for(&tok.text).unwrap())?;
            }
            _ => {
                return Err(CompileError::Structural {
                    line: tok.line,
                    expected: "term".to_string(),
                    found: tok.text,
                })
            }
        }
        Ok(())
    }

    fn compile_string_const(&mut self, text: &str) -> Result<()> {
        self.writer
            .push(Segment::Constant, text.chars().count() as u16)?;
        self.writer.call("String.new", 1)?;
        for c in text.chars() {
            self.writer.push(Segment::Constant, c as u16)?;
            self.writer.call("String.appendChar", 2)?;
        }
        Ok(())
    }

    /// Compile the remainder of a subroutine call, given the already
    /// consumed leading identifier (either the callee name itself, for an
    /// unqualified call, or the qualifier, for `qualifier.name(...)`).
    fn compile_subroutine_call(&mut self, first: Token) -> Result<()> {
        if self.peek_is_symbol(".") {
            self.advance()?;
            let method = self.expect_identifier()?;
            let target = self.resolve_call_target(&first.text);

            if let CallTarget::VarMethod { segment, index, .. } = &target {
                self.writer.push(*segment, *index)?;
            }

            self.expect_symbol("(")?;
            let argc = self.compile_expression_list()?;
            self.expect_symbol(")")?;

            let (qname, nargs) = match target {
                CallTarget::VarMethod { class_type, .. } => {
                    (format!("{}.{}", class_type, method.text), argc + 1)
                }
                CallTarget::Static(class_name) => {
                    (format!("{}.{}", class_name, method.text), argc)
                }
                CallTarget::SelfMethod => unreachable!("dotted call cannot resolve to self"),
            };
            self.writer.call(&qname, nargs)?;
        } else {
            self.writer.push(Segment::Pointer, 0)?;
            self.expect_symbol("(")?;
            let argc = self.compile_expression_list()?;
            self.expect_symbol(")")?;
            let qname = format!("{}.{}", self.class_name, first.text);
            self.writer.call(&qname, argc + 1)?;
        }
        Ok(())
    }

    /// A qualifier that resolves to a declared variable is a method call
    /// on that variable; otherwise it names a class (by convention
    /// capitalized) for a static call.
    fn resolve_call_target(&self, qualifier: &str) -> CallTarget {
        match self.lookup(qualifier) {
            Some((segment, index, class_type)) => CallTarget::VarMethod {
                class_type,
                segment,
                index,
            },
            None => CallTarget::Static(qualifier.to_string()),
        }
    }

    // ----------------------------------------------------------------
    // Shared lookup / token plumbing
    // ----------------------------------------------------------------

    fn lookup(&self, name: &str) -> Option<(Segment, u16, String)> {
        if let Some(kind) = self.sub_scope.kind_of(name) {
            return Some((
                kind.segment(),
                self.sub_scope.index_of(name).unwrap(),
                self.sub_scope.type_of(name).unwrap().to_string(),
            ));
        }
        if let Some(kind) = self.class_scope.kind_of(name) {
            return Some((
                kind.segment(),
                self.class_scope.index_of(name).unwrap(),
                self.class_scope.type_of(name).unwrap().to_string(),
            ));
        }
        None
    }

    fn resolve(&self, tok: &Token) -> Result<(Segment, u16)> {
        self.lookup(&tok.text)
            .map(|(seg, idx, _)| (seg, idx))
            .ok_or_else(|| CompileError::Semantic {
                line: tok.line,
                name: tok.text.clone(),
            })
    }

    fn fresh_label_pair(&mut self) -> (String, String) {
        let k = self.ctx.label_counter;
        self.ctx.label_counter += 2;
        (format!("L{}", k), format!("L{}", k + 1))
    }

    fn advance(&mut self) -> Result<Token> {
        match self.tokenizer.next() {
            Some(tok) => {
                let tok = tok.clone();
                self.last_line = tok.line;
                Ok(tok)
            }
            None => Err(CompileError::Structural {
                line: self.last_line,
                expected: "more input".to_string(),
                found: "end of file".to_string(),
            }),
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokenizer.peek().cloned()
    }

    fn peek_is_symbol(&self, s: &str) -> bool {
        matches!(self.peek(), Some(tok) if tok.is_symbol(s))
    }

    fn peek_is_keyword(&self, s: &str) -> bool {
        matches!(self.peek(), Some(tok) if tok.is_keyword(s))
    }

    fn expect_symbol(&mut self, s: &str) -> Result<Token> {
        let tok = self.advance()?;
        if tok.is_symbol(s) {
            Ok(tok)
        } else {
            Err(CompileError::Structural {
                line: tok.line,
                expected: format!("'{}'", s),
                found: tok.text,
            })
        }
    }

    fn expect_keyword(&mut self, s: &str) -> Result<Token> {
        let tok = self.advance()?;
        if tok.is_keyword(s) {
            Ok(tok)
        } else {
            Err(CompileError::Structural {
                line: tok.line,
                expected: format!("keyword '{}'", s),
                found: tok.text,
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind == TokenKind::Identifier {
            Ok(tok)
        } else {
            Err(CompileError::Structural {
                line: tok.line,
                expected: "identifier".to_string(),
                found: tok.text,
            })
        }
    }
}

/// Compile one class's source text to VM instruction text, for tests and
/// other in-memory callers. The driver (`crate::driver`) wraps this for
/// real file I/O.
pub fn compile_to_string(source: &str) -> Result<String> {
    let tokenizer = Tokenizer::new(source)?;
    let mut buf = Vec::new();
    {
        let writer = VmWriter::new(&mut buf);
        let mut engine = CompilationEngine::new(tokenizer, writer);
        engine.compile_class()?;
    }
    Ok(String::from_utf8(buf).expect("emitted VM text is always valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_void_method() {
        let src = "class A { method void f() { return; } }";
        let out = compile_to_string(src).unwrap();
        assert_eq!(
            out,
            "function A.f 0\n\
             push argument 0\n\
             pop pointer 0\n\
             push constant 0\n\
             return\n"
        );
    }

    #[test]
    fn constructor_allocation() {
        let src = "class P { field int x, y; constructor P new() { return this; } }";
        let out = compile_to_string(src).unwrap();
        assert_eq!(
            out,
            "function P.new 0\n\
             push constant 2\n\
             call Memory.alloc 1\n\
             pop pointer 0\n\
             push pointer 0\n\
             return\n"
        );
    }

    #[test]
    fn array_write_with_array_read_on_rhs() {
        let src = "class A { \
                     function void f() { \
                       var Array a; var int i, j; \
                       let a[i] = a[j]; \
                       return; \
                     } }";
        let out = compile_to_string(src).unwrap();
        let body: Vec<&str> = out.lines().collect();
        let expected = [
            "function A.f 3",
            "push local 0",
            "push local 1",
            "add",
            "push local 0",
            "push local 2",
            "add",
            "pop pointer 1",
            "push that 0",
            "pop temp 0",
            "pop pointer 1",
            "push temp 0",
            "pop that 0",
            "push constant 0",
            "return",
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn while_loop_labels_are_balanced_and_unique() {
        let src = "class A { \
                     function void f() { \
                       var int x; \
                       while (x < 10) { let x = x + 1; } \
                       return; \
                     } }";
        let out = compile_to_string(src).unwrap();
        let body: Vec<&str> = out.lines().collect();
        let expected = [
            "function A.f 1",
            "label L0",
            "push local 0",
            "push constant 10",
            "lt",
            "not",
            "if-goto L1",
            "push local 0",
            "push constant 1",
            "add",
            "pop local 0",
            "goto L0",
            "label L1",
            "push constant 0",
            "return",
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn string_literal_builds_char_by_char() {
        let src = r#"class A { function void f() { do Output.printString("Hi"); return; } }"#;
        let out = compile_to_string(src).unwrap();
        let body: Vec<&str> = out.lines().collect();
        let expected = [
            "function A.f 0",
            "push constant 2",
            "call String.new 1",
            "push constant 72",
            "call String.appendChar 2",
            "push constant 105",
            "call String.appendChar 2",
            "call Output.printString 1",
            "pop temp 0",
            "push constant 0",
            "return",
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn unqualified_call_inside_method_pushes_this() {
        let src = "class C { \
                     method void g(int n) { return; } \
                     method void f() { do g(1); return; } }";
        let out = compile_to_string(src).unwrap();
        let body: Vec<&str> = out.lines().collect();
        // second function in the file is `f`
        let f_start = body.iter().position(|l| *l == "function C.f 0").unwrap();
        let f_body = &body[f_start..];
        let expected = [
            "function C.f 0",
            "push argument 0",
            "pop pointer 0",
            "push pointer 0",
            "push constant 1",
            "call C.g 2",
            "pop temp 0",
            "push constant 0",
            "return",
        ];
        assert_eq!(f_body, expected);
    }

    #[test]
    fn static_call_on_class_name_has_no_implicit_receiver() {
        let src = "class A { function void f() { do Output.moveCursor(1, 2); return; } }";
        let out = compile_to_string(src).unwrap();
        assert!(out.contains("push constant 1\npush constant 2\ncall Output.moveCursor 2\n"));
    }

    #[test]
    fn method_call_on_declared_variable_pushes_receiver_and_adds_one_arg() {
        let src = "class A { \
                     function void f() { \
                       var String s; \
                       do s.appendChar(65); \
                       return; \
                     } }";
        let out = compile_to_string(src).unwrap();
        let body: Vec<&str> = out.lines().collect();
        let expected = [
            "function A.f 1",
            "push local 0",
            "push constant 65",
            "call String.appendChar 2",
            "pop temp 0",
            "push constant 0",
            "return",
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn unresolved_identifier_is_a_semantic_error() {
        let src = "class A { function void f() { let x = 1; return; } }";
        let err = compile_to_string(src).unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
    }

    #[test]
    fn missing_terminator_is_a_structural_error() {
        let src = "class A { function void f() { return }"; // missing ';' and closing '}'
        let err = compile_to_string(src).unwrap_err();
        assert!(matches!(err, CompileError::Structural { .. }));
    }

    #[test]
    fn left_to_right_no_precedence_evaluation() {
        let src = "class A { function int f() { return 2 + 3 * 4; } }";
        let out = compile_to_string(src).unwrap();
        let expected = "function A.f 0\n\
                         push constant 2\n\
                         push constant 3\n\
                         add\n\
                         push constant 4\n\
                         call Math.multiply 2\n\
                         return\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn static_vs_field_indices_are_independent_counters() {
        let src = "class A { \
                     static int a; \
                     field int b; \
                     static int c; \
                     function void f() { return; } }";
        compile_to_string(src).unwrap();
        // exercised indirectly: if counters were shared, emission of a
        // later `function` arity or field alloc count would be wrong in
        // a constructor test; the counter independence itself is covered
        // at the symbol_table unit level.
    }
}
