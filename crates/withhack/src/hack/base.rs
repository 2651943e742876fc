//! Entry/exit state machine shared by every hack.

use indexmap::IndexMap;

use crate::{
    bytecode::{Frame, FrameId},
    exception::{ExcType, Exception, RunError},
    host::Host,
    value::Value,
};

use super::{BlockCx, HackError, inject};

/// Lifecycle of a hack object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HackState {
    Created,
    Entered,
    Exited,
}

/// Context binding and body suppression for one hack object.
///
/// The context frame is fixed when the hack is created, normally to the
/// frame that called the hack's constructor. Entering the hack from any other
/// frame fails.
#[derive(Debug, Clone)]
pub struct HackBase {
    state: HackState,
    context: Option<FrameId>,
    dont_execute: bool,
    must_execute: bool,
}

impl HackBase {
    /// A hack bound to `context`, or to whichever frame first enters it.
    #[must_use]
    pub fn new(context: Option<FrameId>) -> Self {
        Self {
            state: HackState::Created,
            context,
            dont_execute: false,
            must_execute: false,
        }
    }

    /// A hack bound to the frame currently executing in `host`.
    #[must_use]
    pub fn for_current_frame(host: &dyn Host) -> Self {
        Self::new(host.current_frame())
    }

    /// Asks for the body to be skipped.
    #[must_use]
    pub fn dont_execute(mut self, yes: bool) -> Self {
        self.dont_execute = yes;
        self
    }

    /// Forces the body to run even if skipping was asked for.
    #[must_use]
    pub fn must_execute(mut self, yes: bool) -> Self {
        self.must_execute = yes;
        self
    }

    #[must_use]
    pub fn state(&self) -> HackState {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> Option<FrameId> {
        self.context
    }

    /// Whether entering skips the body.
    #[must_use]
    pub fn skips_body(&self) -> bool {
        self.dont_execute && !self.must_execute
    }

    pub(crate) fn require_context(&self) -> Result<FrameId, HackError> {
        self.context
            .ok_or_else(|| HackError::MalformedBlock("hack was never entered".to_owned()))
    }

    /// `Created`/`Exited` to `Entered`.
    ///
    /// Binds the context if it was left open and schedules the body skip.
    pub fn enter(&mut self, cx: &mut BlockCx<'_>) -> Result<(), HackError> {
        if self.state == HackState::Entered {
            return Err(HackError::AlreadyEntered);
        }
        match self.context {
            Some(bound) if bound != cx.frame => {
                return Err(HackError::ContextMismatch { bound, found: cx.frame });
            }
            Some(_) => {}
            None => self.context = Some(cx.frame),
        }
        if self.skips_body() {
            self.skip(cx)?;
        }
        self.state = HackState::Entered;
        log::debug!("entered hack on {}", cx.frame);
        Ok(())
    }

    /// `Entered` to `Exited`.
    ///
    /// Returns whether `exc` is the skip signal, which must be swallowed.
    pub fn exit(&mut self, exc: Option<&Exception>) -> bool {
        self.state = HackState::Exited;
        exc.is_some_and(Exception::is_block_skip)
    }

    /// Skips the rest of the block at the context's next line event.
    pub fn skip(&self, cx: &mut BlockCx<'_>) -> Result<(), HackError> {
        let context = self.require_context()?;
        inject(
            cx.host,
            context,
            Box::new(|_: &mut Frame| Err(RunError::Exc(Exception::bare(ExcType::BlockSkip)))),
        )
    }

    /// Binds `bindings` in the context frame as if assigned there.
    ///
    /// The bindings land at the context's next monitoring event.
    pub fn set_context_locals(&self, cx: &mut BlockCx<'_>, bindings: IndexMap<String, Value>) -> Result<(), HackError> {
        let context = self.require_context()?;
        log::debug!("injecting {} binding(s) into {context}", bindings.len());
        inject(
            cx.host,
            context,
            Box::new(move |frame: &mut Frame| {
                frame.update_locals(bindings);
                Ok(())
            }),
        )
    }
}
