//! Compiles the ruff AST into [`Code`] objects.
//!
//! The compiler is a single recursive pass per scope. Symbol analysis runs
//! up front (see [`SymbolTable`]) so every variable access can pick its
//! addressing mode while emitting.

use std::sync::Arc;

use indexmap::IndexSet;
use ruff_python_ast::{self as ast, BoolOp, CmpOp, Expr, Number, Operator, Parameters, Stmt, UnaryOp};
use ruff_text_size::{Ranged, TextRange};

use super::{
    builder::{CodeBuilder, CodeLayout, JumpLabel},
    code::{Code, CodeFlags},
    op::{Access, Addressing, Opcode},
    symbols::{ScopeKey, SymbolTable, parameter_names, scope_key},
};
use crate::{
    parse::{LineIndex, ParseError, parse},
    value::Value,
};

/// Compiles module source into a code object named `name`.
///
/// If the last top-level statement is an expression, the module code
/// returns its value; otherwise it returns `None`.
pub fn compile(source: &str, name: &str) -> Result<Code, ParseError> {
    let lines = LineIndex::new(source);
    let body = parse(source, &lines)?;
    let symbols = SymbolTable::analyze(&body);
    let mut compiler = Compiler::new(&symbols, &lines, None);

    match body.split_last() {
        Some((Stmt::Expr(ast::StmtExpr { value, range, .. }), init)) => {
            compiler.compile_body(init)?;
            compiler.mark_line(*range);
            compiler.compile_expr(value)?;
            compiler.builder.emit(Opcode::ReturnValue);
        }
        _ => {
            compiler.compile_body(&body)?;
            compiler.emit_return_none()?;
        }
    }

    log::debug!("compiled module {name} ({} bytes)", compiler.builder.current_offset());
    Ok(compiler.builder.build(CodeLayout {
        name: name.to_owned(),
        ..CodeLayout::default()
    }))
}

/// Variable layout of a function scope.
#[derive(Debug)]
struct FunctionScope {
    varnames: IndexSet<String>,
    /// `cellvars ++ freevars`, the index space of cell operands.
    cells: IndexSet<String>,
}

/// Enclosing statement that `break`, `continue` and `return` must unwind.
#[derive(Debug)]
enum Construct {
    Loop {
        is_for: bool,
        start: usize,
        breaks: Vec<JumpLabel>,
    },
    With,
    Try,
}

/// Body of a function being compiled.
enum FunctionBody<'b> {
    Block(&'b [Stmt]),
    Lambda(&'b Expr),
}

struct Compiler<'a> {
    builder: CodeBuilder,
    symbols: &'a SymbolTable,
    lines: &'a LineIndex,
    /// `None` at module scope.
    function: Option<FunctionScope>,
    constructs: Vec<Construct>,
    /// Line of the statement being compiled, for error reporting.
    line: u32,
}

impl<'a> Compiler<'a> {
    fn new(symbols: &'a SymbolTable, lines: &'a LineIndex, function: Option<FunctionScope>) -> Self {
        Self {
            builder: CodeBuilder::new(),
            symbols,
            lines,
            function,
            constructs: Vec::new(),
            line: 1,
        }
    }

    fn mark_line(&mut self, range: TextRange) {
        self.line = self.lines.line_of_range(range);
        self.builder.mark_line(self.line);
    }

    fn not_implemented(&self, what: &'static str) -> ParseError {
        ParseError::not_implemented(what, self.line)
    }

    fn operand(&self, index: usize) -> Result<u16, ParseError> {
        u16::try_from(index).map_err(|_| self.not_implemented("more than 65535 operands in one code object"))
    }

    fn count(&self, count: usize) -> Result<u8, ParseError> {
        u8::try_from(count).map_err(|_| self.not_implemented("more than 255 arguments in one call"))
    }

    fn add_name(&mut self, name: &str) -> Result<u16, ParseError> {
        self.builder
            .add_name(name)
            .ok_or_else(|| self.not_implemented("more than 65535 names in one code object"))
    }

    fn emit_const(&mut self, value: Value) -> Result<(), ParseError> {
        let idx = self
            .builder
            .add_const(value)
            .ok_or_else(|| self.not_implemented("more than 65535 constants in one code object"))?;
        self.builder.emit_u16(Opcode::LoadConst, idx);
        Ok(())
    }

    fn emit_return_none(&mut self) -> Result<(), ParseError> {
        self.emit_const(Value::None)?;
        self.builder.emit(Opcode::ReturnValue);
        Ok(())
    }

    // === Variables ===

    fn addressing(&mut self, name: &str) -> Result<(Addressing, u16), ParseError> {
        let slot = match &self.function {
            None => None,
            Some(scope) => {
                if let Some(idx) = scope.cells.get_index_of(name) {
                    Some((Addressing::Deref, idx))
                } else {
                    scope.varnames.get_index_of(name).map(|idx| (Addressing::Fast, idx))
                }
            }
        };
        match slot {
            Some((addressing, idx)) => Ok((addressing, self.operand(idx)?)),
            None => {
                let addressing = if self.function.is_some() {
                    Addressing::Global
                } else {
                    Addressing::Name
                };
                Ok((addressing, self.add_name(name)?))
            }
        }
    }

    fn emit_variable(&mut self, access: Access, name: &str) -> Result<(), ParseError> {
        let (addressing, idx) = self.addressing(name)?;
        self.builder.emit_u16(Opcode::for_variable(access, addressing), idx);
        Ok(())
    }

    // === Statements ===

    fn compile_body(&mut self, body: &[Stmt]) -> Result<(), ParseError> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), ParseError> {
        self.mark_line(stmt.range());
        match stmt {
            Stmt::Expr(ast::StmtExpr { value, .. }) => {
                self.compile_expr(value)?;
                self.builder.emit(Opcode::Pop);
            }
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.compile_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.builder.emit(Opcode::Dup);
                    }
                    self.compile_store(target)?;
                }
            }
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => {
                if let Some(value) = value {
                    self.compile_expr(value)?;
                    self.compile_store(target)?;
                }
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => {
                self.compile_aug_assign(target, *op, value)?;
            }
            Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                for target in targets {
                    self.compile_delete(target)?;
                }
            }
            Stmt::Pass(_) => self.builder.emit(Opcode::Nop),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => self.compile_if(test, body, elif_else_clauses)?,
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => self.compile_while(test, body, orelse)?,
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                if *is_async {
                    return Err(self.not_implemented("async for loops"));
                }
                self.compile_for(stmt.range(), target, iter, body, orelse)?;
            }
            Stmt::Break(_) => {
                let idx = self.unwind_to_loop("'break' outside loop")?;
                if let Some(Construct::Loop { is_for: true, .. }) = self.constructs.get(idx) {
                    self.builder.emit(Opcode::Pop);
                }
                let jump = self.builder.emit_jump(Opcode::Jump);
                if let Some(Construct::Loop { breaks, .. }) = self.constructs.get_mut(idx) {
                    breaks.push(jump);
                }
            }
            Stmt::Continue(_) => {
                let idx = self.unwind_to_loop("'continue' not properly in loop")?;
                if let Some(Construct::Loop { start, .. }) = self.constructs.get(idx) {
                    let start = *start;
                    self.builder.emit_jump_to(Opcode::Jump, start);
                }
            }
            Stmt::FunctionDef(ast::StmtFunctionDef {
                is_async,
                decorator_list,
                name,
                parameters,
                body,
                range,
                ..
            }) => {
                if *is_async {
                    return Err(self.not_implemented("async functions"));
                }
                if !decorator_list.is_empty() {
                    return Err(self.not_implemented("decorators"));
                }
                self.compile_function(name.id.as_str(), scope_key(*range), Some(&**parameters), FunctionBody::Block(body))?;
                self.emit_variable(Access::Store, name.id.as_str())?;
            }
            Stmt::Return(ast::StmtReturn { value, .. }) => {
                if self.function.is_none() {
                    return Err(ParseError::syntax("'return' outside function", self.line));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_const(Value::None)?,
                }
                self.unwind_for_return();
                self.builder.emit(Opcode::ReturnValue);
            }
            Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                if cause.is_some() {
                    return Err(self.not_implemented("'raise ... from ...'"));
                }
                let Some(exc) = exc else {
                    return Err(self.not_implemented("bare 'raise'"));
                };
                self.compile_expr(exc)?;
                self.builder.emit(Opcode::Raise);
            }
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                ..
            }) => {
                if *is_star {
                    return Err(self.not_implemented("'except*' handlers"));
                }
                if !finalbody.is_empty() {
                    return Err(self.not_implemented("'finally' clauses"));
                }
                self.compile_try(body, handlers, orelse)?;
            }
            Stmt::With(ast::StmtWith {
                is_async, items, body, ..
            }) => {
                if *is_async {
                    return Err(self.not_implemented("async with statements"));
                }
                self.compile_with(items, body)?;
            }
            Stmt::ClassDef(_) => return Err(self.not_implemented("class definitions")),
            Stmt::Import(_) | Stmt::ImportFrom(_) => return Err(self.not_implemented("imports")),
            Stmt::Assert(_) => return Err(self.not_implemented("assert statements")),
            Stmt::Match(_) => return Err(self.not_implemented("match statements")),
            _ => return Err(self.not_implemented("this statement")),
        }
        Ok(())
    }

    fn compile_aug_assign(&mut self, target: &Expr, op: Operator, value: &Expr) -> Result<(), ParseError> {
        let opcode = self.binary_opcode(op)?;
        match target {
            Expr::Name(ast::ExprName { id, .. }) => {
                self.emit_variable(Access::Load, id.as_str())?;
                self.compile_expr(value)?;
                self.builder.emit(opcode);
                self.emit_variable(Access::Store, id.as_str())?;
            }
            Expr::Attribute(ast::ExprAttribute { value: object, attr, .. }) => {
                let name = self.add_name(attr.id())?;
                self.compile_expr(object)?;
                self.builder.emit(Opcode::Dup);
                self.builder.emit_u16(Opcode::LoadAttr, name);
                self.compile_expr(value)?;
                self.builder.emit(opcode);
                self.builder.emit(Opcode::Rot2);
                self.builder.emit_u16(Opcode::StoreAttr, name);
            }
            Expr::Subscript(ast::ExprSubscript {
                value: object, slice, ..
            }) => {
                // [obj, key] -> [obj, key, obj[key] op value] -> obj[key] = result
                self.compile_expr(object)?;
                self.builder.emit(Opcode::Dup);
                self.compile_expr(slice)?;
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::Rot3);
                self.builder.emit(Opcode::LoadSubscr);
                self.compile_expr(value)?;
                self.builder.emit(opcode);
                self.builder.emit(Opcode::Rot3);
                self.builder.emit(Opcode::StoreSubscr);
            }
            _ => return Err(ParseError::syntax("illegal expression for augmented assignment", self.line)),
        }
        Ok(())
    }

    fn compile_if(&mut self, test: &Expr, body: &[Stmt], clauses: &[ast::ElifElseClause]) -> Result<(), ParseError> {
        self.compile_expr(test)?;
        let skip = self.builder.emit_jump(Opcode::PopJumpIfFalse);
        self.compile_body(body)?;
        let Some((clause, rest)) = clauses.split_first() else {
            self.builder.patch_jump(skip);
            return Ok(());
        };
        let end = self.builder.emit_jump(Opcode::Jump);
        self.builder.patch_jump(skip);
        match &clause.test {
            Some(test) => {
                self.mark_line(clause.range());
                self.compile_if(test, &clause.body, rest)?;
            }
            None => self.compile_body(&clause.body)?,
        }
        self.builder.patch_jump(end);
        Ok(())
    }

    fn compile_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), ParseError> {
        // the statement's line start sits at the test, so every iteration re-fires it
        let start = self.builder.current_offset();
        self.compile_expr(test)?;
        let exit = self.builder.emit_jump(Opcode::PopJumpIfFalse);
        self.constructs.push(Construct::Loop {
            is_for: false,
            start,
            breaks: Vec::new(),
        });
        self.compile_body(body)?;
        let breaks = self.pop_loop();
        self.builder.emit_jump_to(Opcode::Jump, start);
        self.builder.patch_jump(exit);
        self.compile_body(orelse)?;
        for jump in breaks {
            self.builder.patch_jump(jump);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        range: TextRange,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), ParseError> {
        self.compile_expr(iter)?;
        self.builder.emit(Opcode::GetIter);
        let start = self.builder.current_offset();
        self.mark_line(range);
        let exit = self.builder.emit_jump(Opcode::ForIter);
        self.compile_store(target)?;
        self.constructs.push(Construct::Loop {
            is_for: true,
            start,
            breaks: Vec::new(),
        });
        self.compile_body(body)?;
        let breaks = self.pop_loop();
        self.builder.emit_jump_to(Opcode::Jump, start);
        self.builder.patch_jump(exit);
        self.compile_body(orelse)?;
        for jump in breaks {
            self.builder.patch_jump(jump);
        }
        Ok(())
    }

    fn pop_loop(&mut self) -> Vec<JumpLabel> {
        match self.constructs.pop() {
            Some(Construct::Loop { breaks, .. }) => breaks,
            _ => Vec::new(),
        }
    }

    /// Emits the teardown of every construct inside the innermost loop.
    ///
    /// Returns the index of that loop in the construct stack.
    fn unwind_to_loop(&mut self, error: &'static str) -> Result<usize, ParseError> {
        let idx = self
            .constructs
            .iter()
            .rposition(|c| matches!(c, Construct::Loop { .. }))
            .ok_or_else(|| ParseError::syntax(error, self.line))?;
        for construct in self.constructs[idx + 1..].iter().rev() {
            match construct {
                Construct::With => {
                    self.builder.emit(Opcode::PopBlock);
                    self.builder.emit(Opcode::ExitWith);
                }
                Construct::Try => self.builder.emit(Opcode::PopBlock),
                Construct::Loop { .. } => {}
            }
        }
        Ok(idx)
    }

    /// Emits the teardown of every enclosing construct, keeping the return value on top.
    fn unwind_for_return(&mut self) {
        for construct in self.constructs.iter().rev() {
            match construct {
                Construct::Loop { is_for: true, .. } => {
                    self.builder.emit(Opcode::Rot2);
                    self.builder.emit(Opcode::Pop);
                }
                Construct::Loop { is_for: false, .. } => {}
                Construct::With => {
                    self.builder.emit(Opcode::Rot2);
                    self.builder.emit(Opcode::PopBlock);
                    self.builder.emit(Opcode::ExitWith);
                }
                Construct::Try => self.builder.emit(Opcode::PopBlock),
            }
        }
    }

    fn compile_try(&mut self, body: &[Stmt], handlers: &[ast::ExceptHandler], orelse: &[Stmt]) -> Result<(), ParseError> {
        let setup = self.builder.emit_jump(Opcode::SetupExcept);
        self.constructs.push(Construct::Try);
        self.compile_body(body)?;
        self.constructs.pop();
        self.builder.emit(Opcode::PopBlock);
        self.compile_body(orelse)?;
        let mut ends = vec![self.builder.emit_jump(Opcode::Jump)];

        self.builder.patch_jump(setup);
        let mut caught_all = false;
        for handler in handlers {
            let ast::ExceptHandler::ExceptHandler(h) = handler;
            self.mark_line(h.range);
            let next = match &h.type_ {
                Some(exc_type) => {
                    self.builder.emit(Opcode::Dup);
                    self.compile_expr(exc_type)?;
                    self.builder.emit(Opcode::CompareExcMatch);
                    Some(self.builder.emit_jump(Opcode::PopJumpIfFalse))
                }
                None => None,
            };
            match &h.name {
                Some(name) => self.emit_variable(Access::Store, name.id.as_str())?,
                None => self.builder.emit(Opcode::Pop),
            }
            self.compile_body(&h.body)?;
            ends.push(self.builder.emit_jump(Opcode::Jump));
            match next {
                Some(next) => self.builder.patch_jump(next),
                None => {
                    caught_all = true;
                    break;
                }
            }
        }
        if !caught_all {
            self.builder.emit(Opcode::Reraise);
        }
        for end in ends {
            self.builder.patch_jump(end);
        }
        Ok(())
    }

    /// Compiles a with-statement; multiple items nest left to right.
    fn compile_with(&mut self, items: &[ast::WithItem], body: &[Stmt]) -> Result<(), ParseError> {
        let Some((item, rest)) = items.split_first() else {
            return self.compile_body(body);
        };
        self.compile_expr(&item.context_expr)?;
        let handler = self.builder.emit_jump(Opcode::SetupWith);
        match &item.optional_vars {
            Some(target) => self.compile_store(target)?,
            None => self.builder.emit(Opcode::Pop),
        }
        self.constructs.push(Construct::With);
        self.compile_with(rest, body)?;
        self.constructs.pop();
        self.builder.emit(Opcode::PopBlock);
        self.builder.emit(Opcode::ExitWith);
        let end = self.builder.emit_jump(Opcode::Jump);
        self.builder.patch_jump(handler);
        self.builder.emit(Opcode::WithExcept);
        self.builder.patch_jump(end);
        Ok(())
    }

    // === Assignment targets ===

    fn compile_store(&mut self, target: &Expr) -> Result<(), ParseError> {
        match target {
            Expr::Name(ast::ExprName { id, .. }) => self.emit_variable(Access::Store, id.as_str())?,
            Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.compile_expr(value)?;
                let name = self.add_name(attr.id())?;
                self.builder.emit_u16(Opcode::StoreAttr, name);
            }
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.compile_expr(value)?;
                self.compile_subscript_key(slice)?;
                self.builder.emit(Opcode::StoreSubscr);
            }
            Expr::Tuple(ast::ExprTuple { elts, .. }) | Expr::List(ast::ExprList { elts, .. }) => {
                if elts.iter().any(Expr::is_starred_expr) {
                    return Err(self.not_implemented("starred assignment targets"));
                }
                let count = self.operand(elts.len())?;
                self.builder.emit_u16(Opcode::UnpackSequence, count);
                for elt in elts {
                    self.compile_store(elt)?;
                }
            }
            Expr::Starred(_) => return Err(self.not_implemented("starred assignment targets")),
            _ => return Err(ParseError::syntax("cannot assign to expression", self.line)),
        }
        Ok(())
    }

    fn compile_delete(&mut self, target: &Expr) -> Result<(), ParseError> {
        match target {
            Expr::Name(ast::ExprName { id, .. }) => self.emit_variable(Access::Delete, id.as_str())?,
            Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.compile_expr(value)?;
                let name = self.add_name(attr.id())?;
                self.builder.emit_u16(Opcode::DeleteAttr, name);
            }
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.compile_expr(value)?;
                self.compile_subscript_key(slice)?;
                self.builder.emit(Opcode::DeleteSubscr);
            }
            Expr::Tuple(ast::ExprTuple { elts, .. }) | Expr::List(ast::ExprList { elts, .. }) => {
                for elt in elts {
                    self.compile_delete(elt)?;
                }
            }
            _ => return Err(ParseError::syntax("cannot delete expression", self.line)),
        }
        Ok(())
    }

    fn compile_subscript_key(&mut self, slice: &Expr) -> Result<(), ParseError> {
        if slice.is_slice_expr() {
            return Err(self.not_implemented("slices"));
        }
        self.compile_expr(slice)
    }

    // === Expressions ===

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), ParseError> {
        match expr {
            Expr::NoneLiteral(_) => self.emit_const(Value::None)?,
            Expr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => self.emit_const(Value::Bool(*value))?,
            Expr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => {
                let value = match value {
                    Number::Int(i) => Value::Int(i.as_i64().ok_or_else(|| self.not_implemented("integers outside the 64-bit range"))?),
                    Number::Float(f) => Value::Float(*f),
                    Number::Complex { .. } => return Err(self.not_implemented("complex numbers")),
                };
                self.emit_const(value)?;
            }
            Expr::StringLiteral(ast::ExprStringLiteral { value, .. }) => self.emit_const(Value::str(value.to_str()))?,
            Expr::Name(ast::ExprName { id, .. }) => self.emit_variable(Access::Load, id.as_str())?,
            Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.compile_expr(value)?;
                let name = self.add_name(attr.id())?;
                self.builder.emit_u16(Opcode::LoadAttr, name);
            }
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.compile_expr(value)?;
                self.compile_subscript_key(slice)?;
                self.builder.emit(Opcode::LoadSubscr);
            }
            Expr::Call(ast::ExprCall { func, arguments, .. }) => self.compile_call(func, arguments)?,
            Expr::BinOp(ast::ExprBinOp { left, op, right, .. }) => {
                let opcode = self.binary_opcode(*op)?;
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.emit(opcode);
            }
            Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                let opcode = match op {
                    UnaryOp::Not => Opcode::UnaryNot,
                    UnaryOp::USub => Opcode::UnaryNeg,
                    UnaryOp::UAdd => return Err(self.not_implemented("unary '+'")),
                    UnaryOp::Invert => return Err(self.not_implemented("unary '~'")),
                };
                self.compile_expr(operand)?;
                self.builder.emit(opcode);
            }
            Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let opcode = match op {
                    BoolOp::And => Opcode::JumpIfFalseOrPop,
                    BoolOp::Or => Opcode::JumpIfTrueOrPop,
                };
                let mut jumps = Vec::with_capacity(values.len());
                for (i, value) in values.iter().enumerate() {
                    self.compile_expr(value)?;
                    if i + 1 < values.len() {
                        jumps.push(self.builder.emit_jump(opcode));
                    }
                }
                for jump in jumps {
                    self.builder.patch_jump(jump);
                }
            }
            Expr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => self.compile_compare(left, ops, comparators)?,
            Expr::If(ast::ExprIf { test, body, orelse, .. }) => {
                self.compile_expr(test)?;
                let otherwise = self.builder.emit_jump(Opcode::PopJumpIfFalse);
                self.compile_expr(body)?;
                let end = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(otherwise);
                self.compile_expr(orelse)?;
                self.builder.patch_jump(end);
            }
            Expr::List(ast::ExprList { elts, .. }) => self.compile_sequence(elts, Opcode::BuildList)?,
            Expr::Tuple(ast::ExprTuple { elts, .. }) => self.compile_sequence(elts, Opcode::BuildTuple)?,
            Expr::Dict(ast::ExprDict { items, .. }) => {
                for item in items {
                    let Some(key) = &item.key else {
                        return Err(self.not_implemented("dict unpacking (**expr)"));
                    };
                    self.compile_expr(key)?;
                    self.compile_expr(&item.value)?;
                }
                let count = self.operand(items.len())?;
                self.builder.emit_u16(Opcode::BuildDict, count);
            }
            Expr::Lambda(ast::ExprLambda {
                parameters, body, range, ..
            }) => {
                self.compile_function("<lambda>", scope_key(*range), parameters.as_deref(), FunctionBody::Lambda(body))?;
            }
            Expr::FString(_) => return Err(self.not_implemented("f-strings")),
            Expr::Starred(_) => return Err(self.not_implemented("starred expressions (*expr)")),
            Expr::ListComp(_) | Expr::SetComp(_) | Expr::DictComp(_) | Expr::Generator(_) => {
                return Err(self.not_implemented("comprehensions"));
            }
            Expr::Set(_) => return Err(self.not_implemented("set displays")),
            Expr::Named(_) => return Err(self.not_implemented("assignment expressions")),
            Expr::Await(_) | Expr::Yield(_) | Expr::YieldFrom(_) => {
                return Err(self.not_implemented("coroutines and generators"));
            }
            _ => return Err(self.not_implemented("this expression")),
        }
        Ok(())
    }

    fn compile_sequence(&mut self, elts: &[Expr], opcode: Opcode) -> Result<(), ParseError> {
        if elts.iter().any(Expr::is_starred_expr) {
            return Err(self.not_implemented("starred expressions (*expr)"));
        }
        for elt in elts {
            self.compile_expr(elt)?;
        }
        let count = self.operand(elts.len())?;
        self.builder.emit_u16(opcode, count);
        Ok(())
    }

    fn compile_call(&mut self, func: &Expr, arguments: &ast::Arguments) -> Result<(), ParseError> {
        self.compile_expr(func)?;
        for arg in arguments.args.iter() {
            if arg.is_starred_expr() {
                return Err(self.not_implemented("*args unpacking in calls"));
            }
            self.compile_expr(arg)?;
        }
        if arguments.keywords.is_empty() {
            let count = self.count(arguments.args.len())?;
            self.builder.emit_u8(Opcode::CallFunction, count);
            return Ok(());
        }
        let mut names = Vec::with_capacity(arguments.keywords.len());
        for keyword in arguments.keywords.iter() {
            let Some(arg) = &keyword.arg else {
                return Err(self.not_implemented("**kwargs unpacking in calls"));
            };
            self.compile_expr(&keyword.value)?;
            names.push(Value::str(arg.id.as_str()));
        }
        let count = self.count(arguments.args.len() + names.len())?;
        self.emit_const(Value::tuple(names))?;
        self.builder.emit_u8(Opcode::CallFunctionKw, count);
        Ok(())
    }

    fn compile_compare(&mut self, left: &Expr, ops: &[CmpOp], comparators: &[Expr]) -> Result<(), ParseError> {
        self.compile_expr(left)?;
        let mut cleanups = Vec::new();
        for (i, (op, comparator)) in ops.iter().zip(comparators).enumerate() {
            self.compile_expr(comparator)?;
            let opcode = compare_opcode(*op);
            if i + 1 < ops.len() {
                // keep the right operand for the next link: [b, a, b] -> [b, a op b]
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::Rot3);
                self.builder.emit(opcode);
                cleanups.push(self.builder.emit_jump(Opcode::JumpIfFalseOrPop));
            } else {
                self.builder.emit(opcode);
            }
        }
        if !cleanups.is_empty() {
            let end = self.builder.emit_jump(Opcode::Jump);
            for cleanup in cleanups {
                self.builder.patch_jump(cleanup);
            }
            self.builder.emit(Opcode::Rot2);
            self.builder.emit(Opcode::Pop);
            self.builder.patch_jump(end);
        }
        Ok(())
    }

    fn binary_opcode(&self, op: Operator) -> Result<Opcode, ParseError> {
        Ok(match op {
            Operator::Add => Opcode::BinaryAdd,
            Operator::Sub => Opcode::BinarySub,
            Operator::Mult => Opcode::BinaryMul,
            Operator::Div => Opcode::BinaryTrueDiv,
            Operator::FloorDiv => Opcode::BinaryFloorDiv,
            Operator::Mod => Opcode::BinaryMod,
            _ => return Err(self.not_implemented("this binary operator")),
        })
    }

    // === Functions ===

    /// Compiles a nested function and leaves the function object on the stack.
    fn compile_function(
        &mut self,
        name: &str,
        key: ScopeKey,
        parameters: Option<&Parameters>,
        body: FunctionBody<'_>,
    ) -> Result<(), ParseError> {
        let info = self
            .symbols
            .scope(key)
            .ok_or_else(|| ParseError::syntax("function scope missing from symbol table", self.line))?;

        let mut flags = CodeFlags::NEWLOCALS;
        let mut argcount = 0;
        let mut make_flags = 0u8;
        if let Some(parameters) = parameters {
            if !parameters.kwonlyargs.is_empty() {
                return Err(self.not_implemented("keyword-only parameters"));
            }
            let positional: Vec<_> = parameters.posonlyargs.iter().chain(&parameters.args).collect();
            argcount = positional.len();
            if parameters.vararg.is_some() {
                flags.insert(CodeFlags::VARARGS);
            }
            if parameters.kwarg.is_some() {
                flags.insert(CodeFlags::VARKEYWORDS);
            }
            let defaults: Vec<&Expr> = positional.iter().filter_map(|p| p.default.as_deref()).collect();
            if !defaults.is_empty() {
                for default in &defaults {
                    self.compile_expr(default)?;
                }
                let count = self.operand(defaults.len())?;
                self.builder.emit_u16(Opcode::BuildTuple, count);
                make_flags |= 1;
            }
            debug_assert_eq!(parameter_names(parameters), info.params);
        }
        if info.nested {
            flags.insert(CodeFlags::NESTED);
        }

        let varnames: IndexSet<String> = info.locals.clone();
        let cells: IndexSet<String> = info.cellvars.iter().chain(&info.freevars).cloned().collect();
        let mut child = Compiler::new(self.symbols, self.lines, Some(FunctionScope { varnames, cells }));
        child.line = self.line;
        match body {
            FunctionBody::Block(stmts) => {
                child.compile_body(stmts)?;
                child.emit_return_none()?;
            }
            FunctionBody::Lambda(expr) => {
                child.builder.mark_line(child.line);
                child.compile_expr(expr)?;
                child.builder.emit(Opcode::ReturnValue);
            }
        }
        let code = child.builder.build(CodeLayout {
            name: name.to_owned(),
            varnames: info.locals.iter().cloned().collect(),
            cellvars: info.cellvars.iter().cloned().collect(),
            freevars: info.freevars.iter().cloned().collect(),
            argcount,
            flags,
        });

        if !info.freevars.is_empty() {
            for free in &info.freevars {
                let idx = self
                    .function
                    .as_ref()
                    .and_then(|scope| scope.cells.get_index_of(free.as_str()))
                    .ok_or_else(|| ParseError::syntax(format!("no binding for nonlocal '{free}' found"), self.line))?;
                let idx = self.operand(idx)?;
                self.builder.emit_u16(Opcode::LoadClosure, idx);
            }
            let count = self.operand(info.freevars.len())?;
            self.builder.emit_u16(Opcode::BuildTuple, count);
            make_flags |= 2;
        }
        self.emit_const(Value::Code(Arc::new(code)))?;
        self.builder.emit_u8(Opcode::MakeFunction, make_flags);
        Ok(())
    }
}

fn compare_opcode(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Eq => Opcode::CompareEq,
        CmpOp::NotEq => Opcode::CompareNe,
        CmpOp::Lt => Opcode::CompareLt,
        CmpOp::LtE => Opcode::CompareLe,
        CmpOp::Gt => Opcode::CompareGt,
        CmpOp::GtE => Opcode::CompareGe,
        CmpOp::In => Opcode::CompareIn,
        CmpOp::NotIn => Opcode::CompareNotIn,
        CmpOp::Is => Opcode::CompareIs,
        CmpOp::IsNot => Opcode::CompareIsNot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::concrete::decode;

    fn opcodes(code: &Code) -> Vec<Opcode> {
        decode(code).unwrap().into_iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn module_with_statement_layout() {
        let code = compile("with ctx as c:\n    x = 1\n", "<module>").unwrap();
        assert_eq!(
            opcodes(&code),
            vec![
                Opcode::LoadName,
                Opcode::SetupWith,
                Opcode::StoreName,
                Opcode::LoadConst,
                Opcode::StoreName,
                Opcode::PopBlock,
                Opcode::ExitWith,
                Opcode::Jump,
                Opcode::WithExcept,
                Opcode::LoadConst,
                Opcode::ReturnValue,
            ]
        );
        // the with statement and the body statement start lines; the as-clause does not
        assert_eq!(code.line_start(0), Some(1));
        assert_eq!(code.line_start(6), None);
        assert_eq!(code.line_start(9), Some(2));
    }

    #[test]
    fn function_locals_use_slots_and_cells() {
        let code = compile("def f(a, b=2):\n    c = a\n    def g():\n        return c\n    return g\n", "<module>")
            .unwrap();
        let Some(Value::Code(f)) = code.consts().iter().find(|c| matches!(c, Value::Code(_))) else {
            panic!("missing function code");
        };
        assert_eq!(f.varnames(), &["a".to_owned(), "b".to_owned(), "g".to_owned()]);
        assert_eq!(f.cellvars(), &["c".to_owned()]);
        assert_eq!(f.argcount(), 2);
        assert!(opcodes(f).contains(&Opcode::StoreDeref));
        assert!(opcodes(f).contains(&Opcode::LoadClosure));
    }

    #[test]
    fn trailing_expression_is_returned() {
        let code = compile("x = 1\nx + 1\n", "<module>").unwrap();
        let ops = opcodes(&code);
        assert_eq!(ops.last(), Some(&Opcode::ReturnValue));
        assert!(!ops.contains(&Opcode::Pop));
    }

    #[test]
    fn unsupported_constructs_are_reported() {
        let err = compile("class A:\n    pass\n", "<module>").unwrap_err();
        assert!(matches!(err, ParseError::NotImplemented { line: 1, .. }));
        let err = compile("return 1\n", "<module>").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn constant_pool_overflow_is_reported() {
        assert!(compile(&"x = 0\n".repeat(65535), "<module>").is_ok());
        let err = compile(&"x = 0\n".repeat(65536), "<module>").unwrap_err();
        assert!(matches!(err, ParseError::NotImplemented { .. }), "unexpected error: {err:?}");
    }
}
