//! Task handles: invocable units of work with reference identity.
//!
//! A [`TaskHandle`] wraps an async closure returning `Result<(), BoxError>`.
//! Every handle receives a process-unique [`TaskId`] when it is built; clones
//! share the id, so the scheduler can find, reprioritize, and report a task by
//! identity rather than by value.
//!
//! | Constructor            | Body                                   |
//! |------------------------|----------------------------------------|
//! | [`TaskHandle::new`]    | `Fn() -> impl Future<Output = TaskResult>` |
//! | [`TaskHandle::from_fn`]| `Fn() -> TaskResult` (runs inline on a worker) |

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Boxed error type accepted from task bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single task body invocation.
pub type TaskResult = Result<(), BoxError>;

/// Type-erased, heap-allocated future returned by a task body.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

// Source of task ids; 0 is never handed out.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`TaskHandle`].
///
/// # Examples
///
/// ```
/// use bgsched::task::TaskHandle;
///
/// let a = TaskHandle::from_fn(|| Ok(()));
/// let b = a.clone();
/// let c = TaskHandle::from_fn(|| Ok(()));
///
/// assert_eq!(a.id(), b.id());
/// assert_ne!(a.id(), c.id());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Object-safe view of an async task body.
///
/// Any `Fn() -> impl Future<Output = TaskResult> + Send` that is also
/// `Send + Sync + 'static` implements this trait via the blanket impl below,
/// which lets [`TaskHandle`] store bodies of different closure types.
pub trait IntoTask: Send + Sync + 'static {
    /// Invoke the body once, boxing the returned future.
    fn call(&self) -> TaskFuture;
}

impl<T, F> IntoTask for T
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = TaskResult> + Send + 'static,
{
    fn call(&self) -> TaskFuture {
        Box::pin((self)())
    }
}

/// A cloneable handle to a unit of work.
///
/// Equality and hashing follow [`TaskId`]: two handles are equal only if one
/// was cloned from the other.
///
/// # Examples
///
/// ```
/// use bgsched::task::TaskHandle;
///
/// let task = TaskHandle::new(|| async {
///     // do some work
///     Ok(())
/// });
/// assert_eq!(task, task.clone());
/// ```
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    body: Arc<dyn IntoTask>,
}

impl TaskHandle {
    /// Creates a task from an async closure.
    pub fn new<T, F>(body: T) -> Self
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            id: TaskId::next(),
            body: Arc::new(body),
        }
    }

    /// Creates a task from a synchronous closure.
    ///
    /// The closure runs directly on a runtime worker, so it should be short;
    /// long blocking work belongs in [`TaskHandle::new`] with
    /// `tokio::task::spawn_blocking` inside the body.
    pub fn from_fn<F>(body: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        Self::new(move || {
            let body = Arc::clone(&body);
            async move { (*body)() }
        })
    }

    /// Returns this task's identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Invokes the body once and returns its future.
    pub fn invoke(&self) -> TaskFuture {
        self.body.call()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

impl std::hash::Hash for TaskHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}
