use indexmap::IndexMap;

use crate::{
    args::CallArgs,
    exception::{Exception, RunResult},
    hack::{BlockCx, CaptureBytecode, HackBase, HackError, WithHack, hack_value, listing_value},
    host::Host,
    value::{Dict, Value},
};

use super::propagates;

/// Collects the variables the guarded block assigns.
///
/// The block runs normally. On exit, `locals` maps each name stored by the
/// block to its value at that point, in order of first assignment. Names the
/// block deleted again are left out.
#[derive(Debug)]
pub struct CaptureLocals {
    capture: CaptureBytecode,
    ordered: bool,
    locals: Option<IndexMap<String, Value>>,
}

impl CaptureLocals {
    /// A capture exposing its result as a dict.
    #[must_use]
    pub fn new(base: HackBase) -> Self {
        Self {
            capture: CaptureBytecode::new(base.must_execute(true)),
            ordered: false,
            locals: None,
        }
    }

    /// A capture exposing its result as a list of `(name, value)` pairs.
    #[must_use]
    pub fn ordered(base: HackBase) -> Self {
        Self {
            ordered: true,
            ..Self::new(base)
        }
    }

    #[must_use]
    pub fn capture(&self) -> &CaptureBytecode {
        &self.capture
    }

    /// The captured bindings, once the block has exited.
    #[must_use]
    pub fn locals(&self) -> Option<&IndexMap<String, Value>> {
        self.locals.as_ref()
    }

    fn collect(&self, cx: &BlockCx<'_>) -> Result<IndexMap<String, Value>, HackError> {
        let context = self.capture.base().require_context()?;
        let body = self
            .capture
            .bytecode()
            .ok_or_else(|| HackError::MalformedBlock("no block was captured".to_owned()))?;
        let frame = cx.host.frame(context).ok_or(HackError::FrameGone(context))?;
        let mut locals = IndexMap::new();
        for name in body.stored_names() {
            if locals.contains_key(name) {
                continue;
            }
            if let Some(value) = frame.lookup_local(name) {
                locals.insert(name.to_owned(), value);
            }
        }
        log::debug!("captured {} local(s) from {context}", locals.len());
        Ok(locals)
    }

    fn locals_value(&self) -> Option<Value> {
        let locals = self.locals.as_ref()?;
        Some(if self.ordered {
            pairs_value(locals)
        } else {
            Value::Dict(locals.iter().map(|(name, value)| (name.clone(), value.clone())).collect())
        })
    }
}

impl WithHack for CaptureLocals {
    fn kind(&self) -> &'static str {
        if self.ordered {
            "CaptureOrderedLocals"
        } else {
            "CaptureLocals"
        }
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.capture.begin(cx)?;
        self.locals = None;
        Ok(cx.this_value())
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        let swallowed = self.capture.finish(cx, exc)?;
        if propagates(exc, swallowed) {
            return Ok(false);
        }
        self.locals = Some(self.collect(cx)?);
        Ok(swallowed)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "locals" => self.locals_value(),
            "bytecode" => self.capture.bytecode().map(listing_value),
            _ => None,
        }
    }
}

/// Collects the variables whose values the guarded block changed.
///
/// Compares the context's locals before and after the block. A name
/// reassigned to an equal value is not reported; bindings to the hack
/// itself never are.
#[derive(Debug)]
pub struct CaptureModifiedLocals {
    base: HackBase,
    before: Option<IndexMap<String, Value>>,
    locals: Option<IndexMap<String, Value>>,
}

impl CaptureModifiedLocals {
    #[must_use]
    pub fn new(base: HackBase) -> Self {
        Self {
            base,
            before: None,
            locals: None,
        }
    }

    #[must_use]
    pub fn locals(&self) -> Option<&IndexMap<String, Value>> {
        self.locals.as_ref()
    }
}

impl WithHack for CaptureModifiedLocals {
    fn kind(&self) -> &'static str {
        "CaptureModifiedLocals"
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.base.enter(cx)?;
        let context = self.base.require_context()?;
        let frame = cx.host.frame(context).ok_or(HackError::FrameGone(context))?;
        self.before = Some(frame.locals());
        self.locals = None;
        Ok(cx.this_value())
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        let swallowed = self.base.exit(exc);
        let before = self.before.take().unwrap_or_default();
        if propagates(exc, swallowed) {
            return Ok(false);
        }
        let context = self.base.require_context()?;
        let frame = cx.host.frame(context).ok_or(HackError::FrameGone(context))?;
        let this = cx.this_value();
        let modified: IndexMap<String, Value> = frame
            .locals()
            .into_iter()
            .filter(|(name, value)| {
                !value.is_identical(&this) && before.get(name).is_none_or(|old| !old.py_eq(value))
            })
            .collect();
        log::debug!("{} local(s) of {context} changed", modified.len());
        self.locals = Some(modified);
        Ok(swallowed)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "locals" => self
                .locals
                .as_ref()
                .map(|locals| Value::Dict(locals.iter().map(|(n, v)| (n.clone(), v.clone())).collect::<Dict>())),
            _ => None,
        }
    }
}

/// `[(name, value), ...]`
fn pairs_value(locals: &IndexMap<String, Value>) -> Value {
    Value::list(
        locals
            .iter()
            .map(|(name, value)| Value::tuple(vec![Value::str(name.as_str()), value.clone()]))
            .collect(),
    )
}

pub(super) fn construct_unordered(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("CaptureLocals", 0, 0)?;
    Ok(hack_value(CaptureLocals::new(HackBase::for_current_frame(host))))
}

pub(super) fn construct_ordered(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("CaptureOrderedLocals", 0, 0)?;
    Ok(hack_value(CaptureLocals::ordered(HackBase::for_current_frame(host))))
}

pub(super) fn construct_modified(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("CaptureModifiedLocals", 0, 0)?;
    Ok(hack_value(CaptureModifiedLocals::new(HackBase::for_current_frame(host))))
}
