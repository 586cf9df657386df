//! Cancellation-bearing execution context.
//!
//! Every suspending storage operation takes a [`Context`]. A context can be
//! canceled explicitly, or implicitly when its deadline passes or when its
//! parent is canceled. [`Context::background`] is never canceled and is the
//! value to use at call sites that have nothing to cancel.
//!
//! ```
//! use std::time::Duration;
//! use storage_api::context::{CancelReason, Context};
//!
//! let root = Context::new();
//! let request = root.child();
//! let bounded = request.with_timeout(Duration::from_secs(5));
//!
//! root.cancel();
//! assert!(request.is_canceled());
//! assert_eq!(bounded.reason(), Some(CancelReason::Canceled));
//! assert!(!Context::background().is_canceled());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{StorageError, StorageResult};

/// Why a context was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// `cancel()` was called on the context or one of its ancestors.
    Canceled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => write!(f, "canceled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// A cheaply cloneable cancellation handle.
///
/// Clones share cancellation state: canceling one clone cancels all of them.
/// Use [`Context::child`] for a context that can be canceled independently of
/// its parent.
#[derive(Clone, Default)]
pub struct Context {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    canceled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            canceled: AtomicBool::new(false),
            reason: Mutex::new(None),
            notify: Notify::new(),
            deadline,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel_with(&self, reason: CancelReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason);
        }
        self.canceled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel_with(reason);
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        if self.canceled.load(Ordering::SeqCst) {
            return *self.reason.lock();
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel_with(CancelReason::DeadlineExceeded);
                *self.reason.lock()
            }
            _ => None,
        }
    }
}

impl Context {
    /// Returns the background context, which is never canceled.
    pub fn background() -> Self {
        Self { inner: None }
    }

    /// Creates a new cancelable root context.
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner::new(None))),
        }
    }

    /// Creates a child context.
    ///
    /// The child is canceled when this context is canceled, and can also be
    /// canceled on its own without affecting this context.
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    /// Creates a child context that is canceled after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Creates a child context that is canceled at `deadline`.
    ///
    /// The effective deadline is the earlier of `deadline` and this
    /// context's own deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.deadline(), deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        let inner = Arc::new(Inner::new(deadline));

        if let Some(parent) = &self.inner {
            {
                let mut children = parent.children.lock();
                children.retain(|child| child.strong_count() > 0);
                children.push(Arc::downgrade(&inner));
            }
            // The parent may have been canceled between the push and now.
            if let Some(reason) = parent.reason() {
                inner.cancel_with(reason);
            }
        }

        Self { inner: Some(inner) }
    }

    /// Cancels this context and all of its descendants.
    ///
    /// Has no effect on the background context or on an already canceled
    /// context.
    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.cancel_with(CancelReason::Canceled);
        }
    }

    /// Returns the deadline of this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().and_then(|inner| inner.deadline)
    }

    /// Returns `true` if this context can never be canceled.
    pub fn is_background(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns `true` if this context has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.reason().is_some()
    }

    /// Returns why this context was canceled, or `None` if it is still live.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.as_ref().and_then(|inner| inner.reason())
    }

    /// Returns `Err(Canceled)` if this context has been canceled.
    pub fn check(&self) -> StorageResult<()> {
        match self.reason() {
            Some(reason) => Err(StorageError::canceled(reason)),
            None => Ok(()),
        }
    }

    /// Builds the error reported for this context's cancellation.
    pub fn canceled_error(&self) -> StorageError {
        StorageError::canceled(self.reason().unwrap_or(CancelReason::Canceled))
    }

    /// Completes once this context is canceled.
    ///
    /// Never completes for the background context.
    pub async fn cancelled(&self) {
        let Some(inner) = &self.inner else {
            return std::future::pending().await;
        };

        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if inner.reason().is_some() {
                return;
            }

            match inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            inner.cancel_with(CancelReason::DeadlineExceeded);
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Runs `fut` until it completes or this context is canceled.
    ///
    /// Cancellation is checked before `fut` is polled, so an already
    /// canceled context never starts the work.
    pub async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(self.canceled_error()),
            result = fut => result,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("Context(background)"),
            Some(inner) => f
                .debug_struct("Context")
                .field("reason", &inner.reason())
                .field("deadline", &inner.deadline)
                .finish(),
        }
    }
}
