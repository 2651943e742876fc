//! Run-once callbacks delivered through a frame's trace hook.
//!
//! Each frame with pending callbacks has one table entry holding the
//! callbacks in injection order and the trace hook the frame had before.
//! The first firing of the frame's hook drains the entry under the table
//! lock, restores the previous hook and runs the callbacks outside the lock.
//!
//! The frame hooks only fire while monitoring is globally enabled, so the
//! injector installs a no-op global hook while its table is non-empty if no
//! other global hook is present.

use std::sync::{Arc, LazyLock};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::{
    bytecode::{Frame, FrameId},
    exception::RunResult,
    host::{MonitorEvent, MonitorSwitch, ProcessMonitor, TraceHook},
};

/// A callback run once against its frame at the next hook firing.
pub type InjectedFn = Box<dyn FnOnce(&mut Frame) -> RunResult<()> + Send>;

struct Pending {
    callbacks: Vec<InjectedFn>,
    previous: Option<TraceHook>,
}

#[derive(Default)]
struct Table {
    pending: AHashMap<FrameId, Pending>,
    /// The global hook installed by this injector, if any.
    installed: Option<TraceHook>,
}

/// Registry of pending per-frame callbacks.
pub struct Injector {
    switch: Arc<dyn MonitorSwitch>,
    table: Mutex<Table>,
}

static GLOBAL: LazyLock<Arc<Injector>> = LazyLock::new(|| Arc::new(Injector::new(Arc::new(ProcessMonitor))));

impl Injector {
    #[must_use]
    pub fn new(switch: Arc<dyn MonitorSwitch>) -> Self {
        Self {
            switch,
            table: Mutex::new(Table::default()),
        }
    }

    /// The process-wide injector, driving the process-wide monitoring switch.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    #[must_use]
    pub fn switch(&self) -> &Arc<dyn MonitorSwitch> {
        &self.switch
    }

    /// Number of frames with pending callbacks.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.table.lock().pending.len()
    }

    /// Checks whether `frame` has callbacks waiting for its next hook firing.
    #[must_use]
    pub fn is_pending(&self, frame: FrameId) -> bool {
        self.table.lock().pending.contains_key(&frame)
    }

    /// Registers `callback` to run once at the next hook firing of `frame`.
    ///
    /// Further callbacks for the same frame queue behind the first and run in
    /// injection order.
    pub fn inject(self: &Arc<Self>, frame: &mut Frame, callback: InjectedFn) {
        let mut table = self.table.lock();
        if let Some(pending) = table.pending.get_mut(&frame.id()) {
            pending.callbacks.push(callback);
            log::debug!("queued callback #{} for {}", pending.callbacks.len(), frame.id());
            return;
        }

        let previous = frame.set_trace(Some(self.dispatch_hook()));
        table.pending.insert(
            frame.id(),
            Pending {
                callbacks: vec![callback],
                previous,
            },
        );
        if table.pending.len() == 1 {
            self.enable(&mut table);
        }
        log::debug!("installed trace hook on {}", frame.id());
    }

    fn dispatch_hook(self: &Arc<Self>) -> TraceHook {
        let injector = Arc::clone(self);
        Arc::new(move |frame: &mut Frame, event: &MonitorEvent| injector.dispatch(frame, event))
    }

    fn enable(&self, table: &mut Table) {
        if self.switch.global_hook().is_some() {
            return;
        }
        let hook: TraceHook = Arc::new(|_: &mut Frame, _: &MonitorEvent| Ok(()));
        self.switch.set_global_hook(Some(Arc::clone(&hook)));
        table.installed = Some(hook);
        log::debug!("enabled global monitoring");
    }

    fn disable(&self, table: &mut Table) {
        let Some(installed) = table.installed.take() else {
            return;
        };
        // someone may have replaced our hook meanwhile; theirs stays
        if self.switch.global_hook().is_some_and(|hook| Arc::ptr_eq(&hook, &installed)) {
            self.switch.set_global_hook(None);
            log::debug!("disabled global monitoring");
        }
    }

    fn dispatch(&self, frame: &mut Frame, event: &MonitorEvent) -> RunResult<()> {
        let pending = {
            let mut table = self.table.lock();
            let pending = table.pending.remove(&frame.id());
            if pending.is_some() && table.pending.is_empty() {
                self.disable(&mut table);
            }
            pending
        };
        let Some(Pending { callbacks, previous }) = pending else {
            return Ok(());
        };
        frame.set_trace(previous.clone());
        log::debug!("draining {} callback(s) for {} on {event:?}", callbacks.len(), frame.id());
        for callback in callbacks {
            callback(frame)?;
        }
        match previous {
            Some(hook) => hook(frame, event),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("pending_frames", &self.pending_frames())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use parking_lot::RwLock;

    use super::*;
    use crate::{
        bytecode::compile,
        exception::ExcType,
        namespace::Scope,
        value::Value,
    };

    #[derive(Default)]
    struct TestSwitch(RwLock<Option<TraceHook>>);

    impl MonitorSwitch for TestSwitch {
        fn global_hook(&self) -> Option<TraceHook> {
            self.0.read().clone()
        }

        fn set_global_hook(&self, hook: Option<TraceHook>) -> Option<TraceHook> {
            std::mem::replace(&mut *self.0.write(), hook)
        }
    }

    fn injector() -> (Arc<TestSwitch>, Arc<Injector>) {
        let switch = Arc::new(TestSwitch::default());
        let injector = Arc::new(Injector::new(switch.clone()));
        (switch, injector)
    }

    fn frame() -> Frame {
        let code = Arc::new(compile("x = 1\n", "<test>").unwrap());
        Frame::new(code, Scope::new(), Scope::new(), None)
    }

    fn fire(frame: &mut Frame) -> RunResult<()> {
        let hook = frame.trace().cloned().expect("frame has a hook");
        hook(frame, &MonitorEvent::Line { offset: 0, line: 1 })
    }

    #[test]
    fn callbacks_run_once_in_injection_order() {
        let (switch, injector) = injector();
        let mut frame = frame();
        for i in 0..3 {
            injector.inject(
                &mut frame,
                Box::new(move |frame: &mut Frame| {
                    let seen = frame.lookup_local("seen").map_or(0, |v| v.as_int().unwrap_or(0));
                    frame.update_locals([("seen".to_owned(), Value::Int(seen * 10 + i + 1))]);
                    Ok(())
                }),
            );
        }
        assert!(switch.is_enabled());
        assert_eq!(injector.pending_frames(), 1);
        assert!(injector.is_pending(frame.id()));
        assert!(!injector.is_pending(FrameId::next()));

        fire(&mut frame).unwrap();
        assert!(!injector.is_pending(frame.id()));
        assert!(frame.lookup_local("seen").unwrap().py_eq(&Value::Int(123)));
        assert!(frame.trace().is_none());
        assert!(!switch.is_enabled());
        assert_eq!(injector.pending_frames(), 0);
    }

    #[test]
    fn previous_hooks_are_restored_and_forwarded() {
        let (switch, injector) = injector();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let previous: TraceHook = Arc::new(move |_: &mut Frame, _: &MonitorEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let mut frame = frame();
        frame.set_trace(Some(Arc::clone(&previous)));
        injector.inject(&mut frame, Box::new(|_: &mut Frame| Ok(())));

        fire(&mut frame).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(frame.trace().is_some_and(|hook| Arc::ptr_eq(hook, &previous)));
        assert!(!switch.is_enabled());
    }

    #[test]
    fn foreign_global_hook_is_left_alone() {
        let (switch, injector) = injector();
        let foreign: TraceHook = Arc::new(|_: &mut Frame, _: &MonitorEvent| Ok(()));
        switch.set_global_hook(Some(Arc::clone(&foreign)));
        let mut frame = frame();
        injector.inject(&mut frame, Box::new(|_: &mut Frame| Ok(())));
        fire(&mut frame).unwrap();
        assert!(switch.global_hook().is_some_and(|hook| Arc::ptr_eq(&hook, &foreign)));
    }

    #[test]
    fn failing_callback_stops_the_batch() {
        let (_, injector) = injector();
        let ran = Arc::new(AtomicUsize::new(0));
        let mut frame = frame();
        injector.inject(&mut frame, Box::new(|_: &mut Frame| Err(ExcType::ValueError.err("boom"))));
        let counter = Arc::clone(&ran);
        injector.inject(
            &mut frame,
            Box::new(move |_: &mut Frame| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let err = fire(&mut frame).unwrap_err();
        assert!(err.is(ExcType::ValueError));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(injector.pending_frames(), 0);
    }

    #[test]
    fn concurrent_injection_and_draining() {
        let (switch, injector) = injector();
        let ran = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let injector = Arc::clone(&injector);
                let ran = Arc::clone(&ran);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut frame = frame();
                        for _ in 0..3 {
                            let ran = Arc::clone(&ran);
                            injector.inject(
                                &mut frame,
                                Box::new(move |_: &mut Frame| {
                                    ran.fetch_add(1, Ordering::SeqCst);
                                    Ok(())
                                }),
                            );
                        }
                        fire(&mut frame).unwrap();
                        assert!(frame.trace().is_none());
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 8 * 50 * 3);
        assert_eq!(injector.pending_frames(), 0);
        assert!(!switch.is_enabled());
    }
}
