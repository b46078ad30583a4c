//! Weak handle resolution.
//!
//! Native code only ever sees a [`Context`] token. The token indexes a table of
//! weak references, so a callback arriving after its target was dropped finds
//! nothing instead of a dangling object.

use crate::native::Context;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Weak};

type WeakAny = Weak<dyn Any + Send + Sync>;

static GLOBAL: LazyLock<HandleTable> = LazyLock::new(HandleTable::new);

/// Why a context could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The token was never issued, was released, or its object was dropped.
    #[error("target of context {token} is gone")]
    Gone { token: usize },
    /// The object is alive but is not the type the callback was registered for.
    #[error("target of context {token} is not a {expected}")]
    TypeMismatch {
        token: usize,
        expected: &'static str,
    },
}

/// Token to weak-reference indirection table.
///
/// Tokens start at 1 and are never reused, so a stale token cannot alias a
/// newer registration.
pub struct HandleTable {
    next: AtomicUsize,
    entries: RwLock<HashMap<usize, WeakAny>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide table the dispatch trampolines resolve against.
    pub fn global() -> &'static HandleTable {
        &GLOBAL
    }

    /// Register a weak reference to `target` and return its token.
    pub fn insert<T: Any + Send + Sync>(&self, target: &Arc<T>) -> Context {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        let any: Arc<dyn Any + Send + Sync> = target.clone();
        self.entries.write().insert(token, Arc::downgrade(&any));
        Context::from_token(token)
    }

    pub fn remove(&self, context: Context) {
        self.entries.write().remove(&context.token());
    }

    /// Look up the live target behind `context`.
    ///
    /// The returned `Arc` keeps the object alive only while the caller holds it.
    pub fn resolve<T: Any + Send + Sync>(&self, context: Context) -> Result<Arc<T>, ResolveError> {
        let token = context.token();
        let weak = self
            .entries
            .read()
            .get(&token)
            .cloned()
            .ok_or(ResolveError::Gone { token })?;
        let strong = weak.upgrade().ok_or(ResolveError::Gone { token })?;
        strong.downcast::<T>().map_err(|_| ResolveError::TypeMismatch {
            token,
            expected: std::any::type_name::<T>(),
        })
    }

    /// Drop entries whose objects are gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `context` against the global table.
pub fn resolve<T: Any + Send + Sync>(context: Context) -> Result<Arc<T>, ResolveError> {
    HandleTable::global().resolve(context)
}

/// A registration of `T` in the global table.
///
/// Holds no strong reference. The token is released when the handle drops,
/// after which callbacks carrying it resolve to [`ResolveError::Gone`].
pub struct WeakHandle<T> {
    context: Context,
    _target: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> WeakHandle<T> {
    pub fn new(target: &Arc<T>) -> Self {
        Self {
            context: HandleTable::global().insert(target),
            _target: PhantomData,
        }
    }

    /// The token to pass to the native layer.
    pub fn context(&self) -> Context {
        self.context
    }

    pub fn resolve(&self) -> Result<Arc<T>, ResolveError> {
        resolve(self.context)
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        HandleTable::global().remove(self.context);
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("token", &self.context.token())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
