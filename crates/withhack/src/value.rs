use std::{
    cmp::Ordering,
    fmt::{self, Write as _},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    bytecode::Code,
    exception::{ExcType, Exception, RunResult},
    function::{Function, NativeFunction},
    hack::HackRef,
};

/// Runtime value.
///
/// Scalars are stored inline. Mutable containers are shared handles: cloning a
/// `Value::List` clones the handle, so every clone observes the same storage,
/// matching reference semantics in scripts.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(List),
    Tuple(Arc<[Value]>),
    Dict(Dict),
    /// Attribute bucket created by `SimpleNamespace(...)`.
    Object(Object),
    Range(Range),
    Iter(Iter),
    Function(Arc<Function>),
    Native(Arc<NativeFunction>),
    ExcType(ExcType),
    Exception(Arc<Exception>),
    /// A compiled code object; appears as a constant operand of `MakeFunction`.
    Code(Arc<Code>),
    /// A closure cell; appears only on the operand stack while building closures.
    Cell(Cell),
    /// A context-manager hack object.
    Hack(HackRef),
}

impl Value {
    /// Creates a string value.
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(List::new(items))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    /// Returns the type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Object(_) => "types.SimpleNamespace",
            Self::Range(_) => "range",
            Self::Iter(_) => "iterator",
            Self::Function(_) => "function",
            Self::Native(_) => "builtin_function_or_method",
            Self::ExcType(_) => "type",
            Self::Exception(exc) => exc.exc_type().into(),
            Self::Code(_) => "code",
            Self::Cell(_) => "cell",
            Self::Hack(_) => "withhack",
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(list) => !list.read().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.read().is_empty(),
            Self::Range(range) => range.len() > 0,
            _ => true,
        }
    }

    /// Returns the integer value of ints and bools.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            #[expect(clippy::cast_precision_loss, reason = "matches int-to-float promotion")]
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    #[must_use]
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Tuple(a), Self::Tuple(b)) => Arc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Iter(a), Self::Iter(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(a, b),
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Exception(a), Self::Exception(b)) => Arc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Arc::ptr_eq(a, b),
            (Self::Hack(a), Self::Hack(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Value equality (`==`).
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        if self.is_identical(other) {
            return true;
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Float(_), _) | (_, Self::Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (Self::Int(_) | Self::Bool(_), Self::Int(_) | Self::Bool(_)) => self.as_int() == other.as_int(),
            (Self::List(a), Self::List(b)) => seq_eq(&a.read(), &b.read()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => {
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| v.py_eq(other)))
            }
            (Self::Object(a), Self::Object(b)) => {
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| v.py_eq(other)))
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Exception(a), Self::Exception(b)) => a == b,
            _ => false,
        }
    }

    /// Three-way comparison used by `<`, `<=`, `>`, `>=` and `sorted()`.
    pub fn py_cmp(&self, other: &Self) -> RunResult<Ordering> {
        match (self, other) {
            (Self::Int(_) | Self::Bool(_), Self::Int(_) | Self::Bool(_)) => {
                Ok(self.as_int().cmp(&other.as_int()))
            }
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.read(), &b.read()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a
                    .partial_cmp(&b)
                    .ok_or_else(|| ExcType::ValueError.err("cannot order NaN")),
                _ => Err(ExcType::TypeError.err(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }

    /// Membership test (`in`).
    pub fn contains(&self, item: &Self) -> RunResult<bool> {
        match self {
            Self::List(list) => Ok(list.read().iter().any(|v| v.py_eq(item))),
            Self::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Self::Dict(dict) => Ok(dict.read().contains_key(&DictKey::try_from(item)?)),
            Self::Str(s) => match item {
                Self::Str(needle) => Ok(s.contains(&**needle)),
                _ => Err(ExcType::TypeError.err(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name()
                ))),
            },
            Self::Range(range) => Ok(item.as_int().is_some_and(|i| range.contains(i))),
            _ => Err(ExcType::TypeError.err(format!(
                "argument of type '{}' is not iterable",
                self.type_name()
            ))),
        }
    }

    /// Applies a binary arithmetic operator.
    pub fn binary(&self, op: BinaryOp, rhs: &Self) -> RunResult<Self> {
        if let (Some(a), Some(b)) = (self.as_int(), rhs.as_int()) {
            return int_binary(op, a, b);
        }
        match (op, self, rhs) {
            (BinaryOp::Add, Self::Str(a), Self::Str(b)) => Ok(Self::str(format!("{a}{b}"))),
            (BinaryOp::Add, Self::List(a), Self::List(b)) => {
                let mut items = a.read().clone();
                items.extend(b.read().iter().cloned());
                Ok(Self::list(items))
            }
            (BinaryOp::Add, Self::Tuple(a), Self::Tuple(b)) => {
                Ok(Self::tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (BinaryOp::Mul, Self::Str(s), n) | (BinaryOp::Mul, n, Self::Str(s)) if n.as_int().is_some() => {
                let count = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
                Ok(Self::str(s.repeat(count)))
            }
            (BinaryOp::Mul, Self::List(list), n) | (BinaryOp::Mul, n, Self::List(list)) if n.as_int().is_some() => {
                let count = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
                let items = list.read();
                Ok(Self::list(items.iter().cloned().cycle().take(items.len() * count).collect()))
            }
            _ => match (self.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => float_binary(op, a, b),
                _ => Err(ExcType::TypeError.err(format!(
                    "unsupported operand type(s) for {op}: '{}' and '{}'",
                    self.type_name(),
                    rhs.type_name()
                ))),
            },
        }
    }

    /// Returns an iterator over this value, or the value itself if it already is one.
    pub fn to_iter(&self) -> RunResult<Iter> {
        let state = match self {
            Self::Iter(iter) => return Ok(iter.clone()),
            Self::List(list) => IterState::Seq(list.read().clone().into_iter()),
            Self::Tuple(items) => IterState::Seq(items.to_vec().into_iter()),
            Self::Dict(dict) => IterState::Seq(dict.read().keys().map(DictKey::to_value).collect::<Vec<_>>().into_iter()),
            Self::Str(s) => IterState::Seq(s.chars().map(|c| Self::str(c.to_string())).collect::<Vec<_>>().into_iter()),
            Self::Range(range) => IterState::Range {
                next: range.start,
                stop: range.stop,
                step: range.step,
            },
            _ => {
                return Err(ExcType::TypeError.err(format!(
                    "'{}' object is not iterable",
                    self.type_name()
                )));
            }
        };
        Ok(Iter::new(state))
    }

    /// Collects every item of an iterable.
    pub fn to_vec(&self) -> RunResult<Vec<Self>> {
        match self {
            Self::List(list) => Ok(list.read().clone()),
            Self::Tuple(items) => Ok(items.to_vec()),
            _ => {
                let iter = self.to_iter()?;
                let mut items = Vec::new();
                while let Some(item) = iter.next_item() {
                    items.push(item);
                }
                Ok(items)
            }
        }
    }

    /// Returns the `repr()` text of this value.
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => write_float(out, *f),
            Self::Str(s) => write_str_repr(out, s),
            Self::List(list) => {
                out.push('[');
                write_joined(out, list.read().iter());
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                write_joined(out, items.iter());
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(dict) => {
                out.push('{');
                for (i, (k, v)) in dict.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.to_value().write_repr(out);
                    out.push_str(": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            Self::Object(obj) => {
                out.push_str("namespace(");
                for (i, (k, v)) in obj.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(k);
                    out.push('=');
                    v.write_repr(out);
                }
                out.push(')');
            }
            Self::Range(range) => {
                let _ = if range.step == 1 {
                    write!(out, "range({}, {})", range.start, range.stop)
                } else {
                    write!(out, "range({}, {}, {})", range.start, range.stop, range.step)
                };
            }
            Self::Iter(_) => out.push_str("<iterator>"),
            Self::Function(f) => {
                let _ = write!(out, "<function {}>", f.name);
            }
            Self::Native(f) => {
                let _ = write!(out, "<built-in function {}>", f.name());
            }
            Self::ExcType(t) => {
                let _ = write!(out, "<class '{t}'>");
            }
            Self::Exception(exc) => {
                let _ = write!(out, "{}(", exc.exc_type());
                if let Some(msg) = exc.message() {
                    write_str_repr(out, msg);
                }
                out.push(')');
            }
            Self::Code(code) => {
                let _ = write!(out, "<code object {}>", code.name());
            }
            Self::Cell(_) => out.push_str("<cell>"),
            Self::Hack(hack) => match hack.try_lock() {
                Some(hack) => {
                    let _ = write!(out, "<{} object>", hack.kind());
                }
                None => out.push_str("<withhack object>"),
            },
        }
    }
}

/// `str()` conversion: strings print raw, exceptions print their message.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Exception(exc) => f.write_str(exc.message().unwrap_or_default()),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::str(s)
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> RunResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        let ord = x.py_cmp(y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn write_joined<'a>(out: &mut String, items: impl Iterator<Item = &'a Value>) {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "inf" } else { "-inf" });
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        let _ = write!(out, "{f:.1}");
    } else {
        let _ = write!(out, "{f}");
    }
}

fn write_str_repr(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    TrueDiv,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> RunResult<Value> {
    let overflow = || ExcType::ArithmeticError.err("integer overflow");
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        #[expect(clippy::cast_precision_loss, reason = "true division always produces a float")]
        BinaryOp::TrueDiv => return float_binary(op, a as f64, b as f64),
        BinaryOp::FloorDiv | BinaryOp::Mod if b == 0 => {
            return Err(ExcType::ZeroDivisionError.err("integer division or modulo by zero"));
        }
        BinaryOp::FloorDiv => {
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
        }
        BinaryOp::Mod => {
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
        }
    };
    Ok(Value::Int(result))
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> RunResult<Value> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(ExcType::ZeroDivisionError.err("division by zero"));
        }
        BinaryOp::TrueDiv => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
    };
    Ok(Value::Float(result))
}

// ============================================================================
// Containers
// ============================================================================

/// Shared, mutable list storage.
#[derive(Debug, Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Hashable dictionary key.
///
/// Only scalar values and strings can be used as keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl DictKey {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl TryFrom<&Value> for DictKey {
    type Error = crate::exception::RunError;

    fn try_from(value: &Value) -> RunResult<Self> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Str(s) => Ok(Self::Str(s.clone())),
            other => Err(ExcType::TypeError.err(format!("unhashable type: '{}'", other.type_name()))),
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

/// Shared, mutable insertion-ordered dictionary storage.
#[derive(Debug, Clone, Default)]
pub struct Dict(Arc<RwLock<IndexMap<DictKey, Value>>>);

impl Dict {
    #[must_use]
    pub fn new(items: IndexMap<DictKey, Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexMap<DictKey, Value>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexMap<DictKey, Value>> {
        self.0.write()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(&DictKey::from(key)).cloned()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (DictKey::Str(k.into()), v)).collect())
    }
}

/// Shared attribute storage of a `SimpleNamespace`.
#[derive(Debug, Clone, Default)]
pub struct Object(Arc<RwLock<IndexMap<String, Value>>>);

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.write().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.write().shift_remove(name)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Value>> {
        self.0.read()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An integer range as produced by `range()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    #[must_use]
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            self.stop.saturating_sub(self.start)
        } else {
            self.start.saturating_sub(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = self.step.unsigned_abs();
        usize::try_from(span.unsigned_abs().div_ceil(step)).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn contains(&self, i: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= i && i < self.stop
        } else {
            self.stop < i && i <= self.start
        };
        in_bounds && (i - self.start) % self.step == 0
    }
}

/// Iteration state behind an iterator value.
#[derive(Debug)]
pub enum IterState {
    Seq(std::vec::IntoIter<Value>),
    Range { next: i64, stop: i64, step: i64 },
}

/// Shared iterator handle; advancing one clone advances all of them.
#[derive(Debug, Clone)]
pub struct Iter(Arc<Mutex<IterState>>);

impl Iter {
    #[must_use]
    pub fn new(state: IterState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// Creates an iterator over already-computed items.
    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self::new(IterState::Seq(items.into_iter()))
    }

    /// Advances the iterator, returning `None` once exhausted.
    #[must_use]
    pub fn next_item(&self) -> Option<Value> {
        match &mut *self.0.lock() {
            IterState::Seq(items) => items.next(),
            IterState::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(current))
            }
        }
    }
}

/// A closure cell holding a captured variable.
#[derive(Debug, Clone, Default)]
pub struct Cell(Arc<RwLock<Option<Value>>>);

impl Cell {
    #[must_use]
    pub fn new(value: Option<Value>) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.0.read().clone()
    }

    pub fn set(&self, value: Option<Value>) {
        *self.0.write() = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_follow_divisor_sign() {
        assert!(int_binary(BinaryOp::FloorDiv, -7, 2).unwrap().py_eq(&Value::Int(-4)));
        assert!(int_binary(BinaryOp::Mod, -7, 2).unwrap().py_eq(&Value::Int(1)));
        assert!(int_binary(BinaryOp::Mod, 7, -2).unwrap().py_eq(&Value::Int(-1)));
        assert!(int_binary(BinaryOp::FloorDiv, 7, -2).unwrap().py_eq(&Value::Int(-4)));
    }

    #[test]
    fn repr_matches_script_conventions() {
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::list(vec![Value::None, Value::Bool(true)]).repr(), "[None, True]");
    }

    #[test]
    fn range_length_and_membership() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
    }
}
