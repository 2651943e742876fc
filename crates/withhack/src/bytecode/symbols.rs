//! Symbol-table analysis.
//!
//! Decides, for every function scope, which names are locals, which are
//! captured by nested functions (cell variables) and which are captured from
//! enclosing functions (free variables). Everything else in a function is a
//! global. Module scope addresses every name through the name-indexed table.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexSet;
use ruff_python_ast::{
    self as ast, Expr, ExprContext, Parameters, Stmt,
    visitor::{self, Visitor},
};
use ruff_text_size::TextRange;

/// Key of a scope: the start offset of its `def` or `lambda`.
pub(crate) type ScopeKey = u32;

/// Key of the module scope.
pub(crate) const MODULE_SCOPE: ScopeKey = u32::MAX;

pub(crate) fn scope_key(range: TextRange) -> ScopeKey {
    u32::from(range.start())
}

/// Names declared and used in one scope.
#[derive(Debug, Default)]
pub(crate) struct ScopeInfo {
    pub is_function: bool,
    /// Parameter names in slot order.
    pub params: Vec<String>,
    bound: IndexSet<String>,
    used: IndexSet<String>,
    pub globals: AHashSet<String>,
    nonlocals: AHashSet<String>,
    children: Vec<ScopeKey>,
    /// Resolved locals (parameters first), excluding cell variables that are not parameters.
    pub locals: IndexSet<String>,
    pub cellvars: IndexSet<String>,
    pub freevars: IndexSet<String>,
    /// Whether the enclosing scope is a function.
    pub nested: bool,
}

/// Scope information for a whole module.
#[derive(Debug)]
pub(crate) struct SymbolTable {
    scopes: AHashMap<ScopeKey, ScopeInfo>,
}

impl SymbolTable {
    pub fn analyze(body: &[Stmt]) -> Self {
        let mut collector = Collector {
            scopes: AHashMap::new(),
            current: MODULE_SCOPE,
        };
        collector.scopes.insert(MODULE_SCOPE, ScopeInfo::default());
        for stmt in body {
            collector.visit_stmt(stmt);
        }
        let mut table = Self {
            scopes: collector.scopes,
        };
        table.resolve(MODULE_SCOPE, &AHashSet::new());
        table
    }

    pub fn scope(&self, key: ScopeKey) -> Option<&ScopeInfo> {
        self.scopes.get(&key)
    }

    /// Resolves locals, cells and frees for `key` and its children.
    ///
    /// `enclosing` holds the names bound in enclosing function scopes. Returns
    /// the names this scope needs from outside itself.
    fn resolve(&mut self, key: ScopeKey, enclosing: &AHashSet<String>) -> IndexSet<String> {
        let Some(info) = self.scopes.get(&key) else {
            return IndexSet::new();
        };
        let is_function = info.is_function;
        let children = info.children.clone();
        let locals: IndexSet<String> = if is_function {
            info.params
                .iter()
                .chain(info.bound.iter())
                .filter(|name| !info.globals.contains(*name) && !info.nonlocals.contains(*name))
                .cloned()
                .collect()
        } else {
            IndexSet::new()
        };
        let visible: AHashSet<String> = if is_function {
            enclosing
                .iter()
                .filter(|name| !info.globals.contains(*name))
                .chain(locals.iter())
                .cloned()
                .collect()
        } else {
            AHashSet::new()
        };
        let mut needed: IndexSet<String> = info
            .used
            .iter()
            .chain(info.nonlocals.iter())
            .filter(|name| {
                is_function && !locals.contains(*name) && !info.globals.contains(*name) && enclosing.contains(*name)
            })
            .cloned()
            .collect();

        let mut cellvars = IndexSet::new();
        for child in children {
            if let Some(child_info) = self.scopes.get_mut(&child) {
                child_info.nested = is_function;
            }
            for name in self.resolve(child, &visible) {
                if locals.contains(&name) {
                    cellvars.insert(name);
                } else if is_function {
                    needed.insert(name);
                }
            }
        }

        if let Some(info) = self.scopes.get_mut(&key) {
            let params = info.params.len();
            info.locals = locals
                .into_iter()
                .enumerate()
                .filter(|(i, name)| *i < params || !cellvars.contains(name))
                .map(|(_, name)| name)
                .collect();
            info.cellvars = cellvars;
            info.freevars = needed.clone();
        }
        needed
    }
}

struct Collector {
    scopes: AHashMap<ScopeKey, ScopeInfo>,
    current: ScopeKey,
}

impl Collector {
    fn info(&mut self) -> &mut ScopeInfo {
        self.scopes.entry(self.current).or_default()
    }

    fn bind(&mut self, name: &str) {
        self.info().bound.insert(name.to_owned());
    }

    fn enter_function(&mut self, key: ScopeKey, parameters: Option<&Parameters>, body: impl FnOnce(&mut Self)) {
        if let Some(parameters) = parameters {
            for default in parameters
                .posonlyargs
                .iter()
                .chain(&parameters.args)
                .chain(&parameters.kwonlyargs)
                .filter_map(|p| p.default.as_deref())
            {
                self.visit_expr(default);
            }
        }
        self.info().children.push(key);
        let outer = std::mem::replace(&mut self.current, key);
        let info = self.info();
        info.is_function = true;
        if let Some(parameters) = parameters {
            info.params = parameter_names(parameters);
        }
        body(self);
        self.current = outer;
    }
}

/// Parameter names in slot order: positional, `*args`, then `**kwargs`.
pub(crate) fn parameter_names(parameters: &Parameters) -> Vec<String> {
    let mut names: Vec<String> = parameters
        .posonlyargs
        .iter()
        .chain(&parameters.args)
        .map(|p| p.parameter.name.id.to_string())
        .collect();
    if let Some(vararg) = &parameters.vararg {
        names.push(vararg.name.id.to_string());
    }
    if let Some(kwarg) = &parameters.kwarg {
        names.push(kwarg.name.id.to_string());
    }
    names
}

impl<'a> Visitor<'a> for Collector {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::FunctionDef(ast::StmtFunctionDef {
                name,
                parameters,
                body,
                range,
                ..
            }) => {
                self.bind(name.id.as_str());
                self.enter_function(scope_key(*range), Some(parameters), |this| {
                    for stmt in body {
                        this.visit_stmt(stmt);
                    }
                });
            }
            Stmt::Global(ast::StmtGlobal { names, .. }) => {
                for name in names {
                    self.info().globals.insert(name.id.to_string());
                }
            }
            Stmt::Nonlocal(ast::StmtNonlocal { names, .. }) => {
                for name in names {
                    self.info().nonlocals.insert(name.id.to_string());
                }
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, .. }) => {
                if let Expr::Name(ast::ExprName { id, .. }) = target.as_ref() {
                    self.info().used.insert(id.to_string());
                }
                visitor::walk_stmt(self, stmt);
            }
            _ => visitor::walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Name(ast::ExprName { id, ctx, .. }) => match ctx {
                ExprContext::Load => {
                    self.info().used.insert(id.to_string());
                }
                _ => self.bind(id.as_str()),
            },
            Expr::Lambda(ast::ExprLambda {
                parameters, body, range, ..
            }) => {
                self.enter_function(scope_key(*range), parameters.as_deref(), |this| this.visit_expr(body));
            }
            _ => visitor::walk_expr(self, expr),
        }
    }

    fn visit_except_handler(&mut self, handler: &'a ast::ExceptHandler) {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        if let Some(name) = &h.name {
            self.bind(name.id.as_str());
        }
        visitor::walk_except_handler(self, handler);
    }
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;
    use ruff_text_size::Ranged;

    use super::*;

    fn analyze(source: &str) -> (SymbolTable, Vec<Stmt>) {
        let body = parse_module(source).unwrap().into_syntax().body.into_iter().collect::<Vec<_>>();
        (SymbolTable::analyze(&body), body)
    }

    fn function_key(stmt: &Stmt) -> ScopeKey {
        scope_key(stmt.range())
    }

    #[test]
    fn captured_locals_become_cells_and_frees() {
        let (table, body) = analyze("def outer(a):\n    b = 1\n    def inner():\n        return a + b + c\n    return inner\n");
        let outer = table.scope(function_key(&body[0])).unwrap();
        assert_eq!(outer.cellvars.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(outer.locals.contains("a"));
        assert!(!outer.locals.contains("b"));

        let Stmt::FunctionDef(def) = &body[0] else { unreachable!() };
        let inner = table.scope(function_key(&def.body[1])).unwrap();
        assert!(inner.nested);
        assert!(inner.freevars.contains("a"));
        assert!(inner.freevars.contains("b"));
        assert!(!inner.freevars.contains("c"));
    }

    #[test]
    fn global_declarations_are_not_locals() {
        let (table, body) = analyze("def f():\n    global g\n    g = 1\n    h = 2\n");
        let f = table.scope(function_key(&body[0])).unwrap();
        assert!(!f.locals.contains("g"));
        assert!(f.locals.contains("h"));
        assert!(f.globals.contains("g"));
    }
}
