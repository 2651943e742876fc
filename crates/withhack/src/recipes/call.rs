use indexmap::IndexMap;

use crate::{
    args::CallArgs,
    exception::{ExcType, Exception, RunResult},
    hack::{BlockCx, HackBase, HackError, WithHack, hack_value, listing_value},
    host::Host,
    value::Value,
};

use super::{CaptureLocals, propagates};

/// How captured locals are passed to the wrapped callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ForwardStyle {
    /// Appended to the fixed positional arguments, in order of first assignment.
    #[strum(serialize = "xargs")]
    Positional,
    /// Merged over the fixed keyword arguments.
    #[strum(serialize = "xkwargs")]
    Keyword,
}

/// Calls a function with the variables the guarded block assigns.
///
/// ```python
/// with xargs(filter, lambda i: i % 2 == 0) as evens:
///     items = range(10)
/// ```
///
/// The block runs normally; afterwards the callable is invoked with the
/// fixed arguments plus the captured locals and its result is bound through
/// the as-clause.
#[derive(Debug)]
pub struct ForwardingCall {
    locals: CaptureLocals,
    style: ForwardStyle,
    func: Value,
    args: Vec<Value>,
    kwargs: IndexMap<String, Value>,
}

impl ForwardingCall {
    #[must_use]
    pub fn new(base: HackBase, style: ForwardStyle, func: Value, args: CallArgs) -> Self {
        Self {
            locals: CaptureLocals::ordered(base),
            style,
            func,
            args: args.positional,
            kwargs: args.keywords,
        }
    }

    fn call_args(&self) -> Result<CallArgs, HackError> {
        let captured = self
            .locals
            .locals()
            .ok_or_else(|| HackError::MalformedBlock("no locals were captured".to_owned()))?;
        let mut positional = self.args.clone();
        let mut keywords = self.kwargs.clone();
        match self.style {
            ForwardStyle::Positional => positional.extend(captured.values().cloned()),
            ForwardStyle::Keyword => keywords.extend(captured.iter().map(|(n, v)| (n.clone(), v.clone()))),
        }
        Ok(CallArgs::with_keywords(positional, keywords))
    }
}

impl WithHack for ForwardingCall {
    fn kind(&self) -> &'static str {
        match self.style {
            ForwardStyle::Positional => "xargs",
            ForwardStyle::Keyword => "xkwargs",
        }
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.locals.enter(cx)
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        let swallowed = self.locals.exit(cx, exc)?;
        if propagates(exc, swallowed) {
            return Ok(false);
        }
        let args = self.call_args()?;
        log::debug!(
            "{}: calling with {} positional and {} keyword argument(s)",
            self.style,
            args.positional.len(),
            args.keywords.len()
        );
        let result = cx.host.call_value(&self.func, args)?;
        self.locals.capture().run_as_clause(cx, result)?;
        Ok(swallowed)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "bytecode" => self.locals.capture().bytecode().map(listing_value),
            other => self.locals.attribute(other),
        }
    }
}

fn construct(host: &mut dyn Host, style: ForwardStyle, mut args: CallArgs) -> RunResult<Value> {
    if args.positional.is_empty() {
        return Err(ExcType::TypeError.err(format!("{style}() missing required argument: 'func'")));
    }
    let func = args.positional.remove(0);
    Ok(hack_value(ForwardingCall::new(HackBase::for_current_frame(host), style, func, args)))
}

/// `xargs(func, *args, **kwargs)`
pub(super) fn construct_xargs(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    construct(host, ForwardStyle::Positional, args)
}

/// `xkwargs(func, *args, **kwargs)`
pub(super) fn construct_xkwargs(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    construct(host, ForwardStyle::Keyword, args)
}
