//! Thread-local bindings for the runtime and running task a nested
//! computation call is executing under.
//!
//! A computation function has no explicit handle to the [`crate::runtime::Runtime`]
//! driving it; when it calls back into the runtime (to request another
//! computation's result as a dependency) it does so through these bindings.
//! Each running task also accumulates, on this same stack, the entry ids of
//! every dependency it resolves, so the runtime can write the dependency
//! edges out when the task finishes without threading an accumulator through
//! every call site.

use std::cell::RefCell;

use crate::error::ContextError;
use crate::refs::Ref;
use crate::runtime::Runtime;

struct TaskFrame {
    task: Ref,
    deps: Vec<i64>,
}

thread_local! {
    static RUNTIME_STACK: RefCell<Vec<*const Runtime>> = const { RefCell::new(Vec::new()) };
    static TASK_STACK: RefCell<Vec<TaskFrame>> = const { RefCell::new(Vec::new()) };
}

/// Pushes `runtime` as the current runtime for the lifetime of the returned guard.
pub(crate) fn enter_runtime(runtime: &Runtime) -> RuntimeGuard<'_> {
    RUNTIME_STACK.with(|stack| stack.borrow_mut().push(std::ptr::from_ref(runtime)));
    RuntimeGuard { runtime }
}

/// Pushes `task` as the currently running computation for the lifetime of the
/// returned guard. Dependencies [`record_dependency`]ed while it is live are
/// attributed to `task` and retrievable via [`current_task_dependencies`].
pub(crate) fn enter_task(task: Ref) -> TaskGuard {
    TASK_STACK.with(|stack| stack.borrow_mut().push(TaskFrame { task: task.clone(), deps: Vec::new() }));
    TaskGuard { task }
}

/// Returns the ref of the currently running computation, if any.
pub fn current_task() -> Option<Ref> {
    TASK_STACK.with(|stack| stack.borrow().last().map(|frame| frame.task.clone()))
}

/// Records that the currently running task depends on the entry `entry_id`.
/// A no-op if no task is currently running (a top-level call made from
/// outside any computation has nothing to attribute the dependency to).
pub(crate) fn record_dependency(entry_id: i64) {
    TASK_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            if !frame.deps.contains(&entry_id) {
                frame.deps.push(entry_id);
            }
        }
    });
}

/// Returns the dependency entry ids accumulated so far by the currently
/// running task, in first-recorded order.
pub(crate) fn current_task_dependencies() -> Vec<i64> {
    TASK_STACK.with(|stack| stack.borrow().last().map(|frame| frame.deps.clone()).unwrap_or_default())
}

/// Borrows the currently bound runtime, if any, and calls `f` with it.
pub(crate) fn with_current_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> Result<T, ContextError> {
    RUNTIME_STACK.with(|stack| {
        let stack = stack.borrow();
        let ptr = stack.last().ok_or(ContextError::NoCurrentRuntime)?;
        // SAFETY: a `RuntimeGuard` borrows its `Runtime` for the guard's
        // entire lifetime and pops itself on drop before that borrow ends,
        // so every pointer on this stack is valid for as long as it remains here.
        let runtime = unsafe { &**ptr };
        Ok(f(runtime))
    })
}

/// Scope guard popping a runtime binding on drop. Panics if dropped out of
/// LIFO order relative to other active guards on this thread.
///
/// Returned by [`Runtime::enter`](crate::runtime::Runtime::enter); holding it
/// live is what makes that runtime "current" for [`crate::get_results`] and
/// for registered functions that call back into the runtime.
#[derive(Debug)]
pub struct RuntimeGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for RuntimeGuard<'_> {
    fn drop(&mut self) {
        RUNTIME_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            assert!(
                popped == Some(std::ptr::from_ref(self.runtime)),
                "runtime context guards exited out of order"
            );
        });
    }
}

/// Scope guard popping a task binding (and its accumulated dependencies) on
/// drop. Panics if dropped out of LIFO order relative to other active guards.
pub(crate) struct TaskGuard {
    task: Ref,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        TASK_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            assert!(
                popped.is_some_and(|frame| frame.task == self.task),
                "task context guards exited out of order"
            );
        });
    }
}
