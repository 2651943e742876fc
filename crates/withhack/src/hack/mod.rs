//! The with-hack core.
//!
//! A with-hack is a context manager that takes over the block it guards. On
//! entry it binds to the frame running the `with` statement and may arrange
//! for the body to be skipped; on exit it can pull the block's instructions
//! out of the frame, rewrite their variable accesses and run them again
//! somewhere else.
//!
//! # Module Structure
//!
//! - `injector` - run-once callbacks delivered through frame trace hooks
//! - `extract` - abstract instruction sequences from live frames
//! - `resolve` - local, global then builtin name lookup
//! - `base` - the entry/exit state machine shared by every hack
//! - `capture` - block bytecode capture and as-clause replay
//! - `rewrite` - variable access rewriting

mod base;
mod capture;
mod error;
mod extract;
mod injector;
mod resolve;
mod rewrite;

use std::{fmt, sync::Arc};

pub use base::{HackBase, HackState};
pub use capture::{AS_CLAUSE_NAME, CaptureBytecode, listing_value, split_block};
pub use error::HackError;
pub use extract::{extract, extract_all, extract_code};
pub use injector::{InjectedFn, Injector};
use parking_lot::Mutex;
pub use resolve::{resolve, resolve_in};
pub use rewrite::{AccessStyle, TARGET_SLOT, rewrite_for_function, rewrite_for_target};

use crate::{
    bytecode::FrameId,
    exception::{Exception, RunResult},
    host::Host,
    value::Value,
};

/// Shared handle to a hack object, as stored in [`Value::Hack`].
pub type HackRef = Arc<Mutex<dyn WithHack>>;

/// A context manager implemented by the with-hack machinery.
///
/// The VM locks the hack for the duration of `enter` and `exit`.
pub trait WithHack: fmt::Debug + Send {
    /// Type name scripts see for the hack.
    fn kind(&self) -> &'static str;

    /// Called by `SetupWith`; the result is bound by the as-clause.
    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value>;

    /// Called when the block finishes, with the exception leaving it if any.
    ///
    /// Returning `true` suppresses the exception.
    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool>;

    /// Attribute lookup on the hack object.
    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// What a hack sees while it is entered or exited.
pub struct BlockCx<'h> {
    pub host: &'h mut dyn Host,
    /// The frame running the `with` statement.
    pub frame: FrameId,
    /// The hack being entered or exited.
    pub this: HackRef,
}

impl BlockCx<'_> {
    /// The hack itself as a script value.
    #[must_use]
    pub fn this_value(&self) -> Value {
        Value::Hack(Arc::clone(&self.this))
    }
}

/// Wraps a hack into a script value.
pub fn hack_value(hack: impl WithHack + 'static) -> Value {
    let hack: HackRef = Arc::new(Mutex::new(hack));
    Value::Hack(hack)
}

/// Registers `callback` to run once at the next monitoring event of `context`.
pub fn inject(host: &mut dyn Host, context: FrameId, callback: InjectedFn) -> Result<(), HackError> {
    if !host.monitoring_available() {
        return Err(HackError::MonitoringUnavailable);
    }
    let injector = host.injector();
    let frame = host.frame_mut(context).ok_or(HackError::FrameGone(context))?;
    injector.inject(frame, callback);
    Ok(())
}
