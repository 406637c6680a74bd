//! Execution-scoped context propagation.
//!
//! The `context` module provides mechanisms for propagating values across API boundaries and between
//! logically associated execution units. Tracing state such as the current trace id and the innermost
//! open span id travel through a [`Context`] so nested code observes them without explicit parameters.
//!
//! # Main Types
//!
//! - [`Context`]: An immutable, execution-scoped collection of string-keyed values.
//! - [`ContextGuard`]: Restores the previous context when dropped.
//!
use crate::propagation::{EnvExtractor, Extractor};
use crate::trace::TraceContext;
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;


thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::new(Context::from_env()));
}

/// Well-known keys stored in a [`Context`].
pub mod keys {
    /// The Google Cloud project id.
    pub const PROJECT_ID: &str = "projectId";
    /// The App Engine service (module) serving the request.
    pub const SERVICE_ID: &str = "serviceId";
    /// The App Engine version serving the request.
    pub const VERSION_ID: &str = "versionId";
    /// The [`TraceId`](crate::trace::TraceId) of the current request.
    pub const TRACE_ID: &str = "traceId";
    /// The [`SpanId`](crate::trace::SpanId) of the innermost open span.
    pub const SPAN_ID: &str = "spanId";
    /// Whether the current request is traced, as a `bool`.
    pub const TRACE_ENABLED: &str = "traceEnabled";
    /// Whether the tracing state was received in a propagation header, as a `bool`.
    pub const TRACE_SAMPLED_FROM_HEADER: &str = "traceSampledFromHeader";
}

type Value = Arc<dyn Any + Send + Sync>;

/// An execution-scoped collection of values.
///
/// A [`Context`] is a propagation mechanism which carries execution-scoped
/// values across API boundaries and between logically associated execution
/// units.
///
/// [`Context`]s are immutable, and their write operations result in the creation
/// of a child context. A lookup on the child checks its own values first and
/// then falls back to its ancestors, so values set later shadow earlier ones
/// with the same key while unrelated keys stay visible.
///
/// ## Managing the current context
///
/// Contexts can be associated with the caller's current thread via the
/// [`attach`] method, and the previous context is restored by dropping the
/// returned [`ContextGuard`]. Contexts nest, and restore their parent outer
/// context when detached. To access the values of the context, a snapshot can
/// be created via [`Context::current`].
///
/// Cloning a context is cheap, and clones are the *same* context as far as
/// [`Context::ptr_eq`] and [`Context::detach`] are concerned.
///
/// [`attach`]: Context::attach()
///
/// # Examples
///
/// ```
/// use cloud_trace::Context;
///
/// let _outer_guard = Context::new().with_value("a", 1u64).attach();
///
/// // Only value a has been set
/// let current = Context::current();
/// assert_eq!(current.get::<u64>("a"), Some(&1));
/// assert_eq!(current.get::<u64>("b"), None);
///
/// {
///     let _inner_guard = Context::current_with_value("b", 42u64).attach();
///     // Both values are set in inner context
///     let current = Context::current();
///     assert_eq!(current.get::<u64>("a"), Some(&1));
///     assert_eq!(current.get::<u64>("b"), Some(&42));
/// }
///
/// // Resets to only the `a` value when inner guard is dropped
/// let current = Context::current();
/// assert_eq!(current.get::<u64>("a"), Some(&1));
/// assert_eq!(current.get::<u64>("b"), None);
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    values: HashMap<Cow<'static, str>, Value>,
    parent: Option<Context>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    /// Creates an empty `Context` with no parent.
    pub fn new() -> Self {
        Context {
            inner: Arc::new(ContextInner {
                values: HashMap::new(),
                parent: None,
            }),
        }
    }

    /// Returns an immutable snapshot of the current thread's context.
    ///
    /// The first access on a thread lazily builds the base of the stack from
    /// the process environment, see [`Context::from_env`].
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context returning its value.
    ///
    /// Note: This function will panic if you attempt to attach another context
    /// while the current one is still borrowed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(cx.borrow().current()))
    }

    /// Returns a child of the current thread's context with the given value.
    pub fn current_with_value<T: 'static + Send + Sync>(
        key: impl Into<Cow<'static, str>>,
        value: T,
    ) -> Self {
        Self::map_current(|cx| cx.with_value(key, value))
    }

    /// Builds a root context from the process environment.
    ///
    /// CGI-style variables are honoured: `GCLOUD_PROJECT`, `GAE_SERVICE`,
    /// `GAE_VERSION` and `HTTP_X_CLOUD_TRACE_CONTEXT`.
    pub fn from_env() -> Self {
        Self::from_extractor(&EnvExtractor::new())
    }

    /// Builds a root context from request data such as headers or server
    /// variables.
    ///
    /// The trace keys are only set when a well-formed propagation header is
    /// present; see [`TraceContext::from_headers`].
    pub fn from_extractor(extractor: &dyn Extractor) -> Self {
        let mut values: Vec<(&'static str, Value)> = Vec::new();
        for (key, var) in [
            (keys::PROJECT_ID, "GCLOUD_PROJECT"),
            (keys::SERVICE_ID, "GAE_SERVICE"),
            (keys::VERSION_ID, "GAE_VERSION"),
        ] {
            if let Some(value) = extractor.get(var) {
                values.push((key, Arc::new(value.into_owned()) as Value));
            }
        }

        let trace_context = TraceContext::from_headers(extractor);
        if trace_context.from_header() {
            values.push((keys::TRACE_ID, Arc::new(trace_context.trace_id()) as Value));
            if let Some(span_id) = trace_context.span_id() {
                values.push((keys::SPAN_ID, Arc::new(span_id.clone()) as Value));
            }
            if let Some(enabled) = trace_context.enabled() {
                values.push((keys::TRACE_ENABLED, Arc::new(enabled) as Value));
            }
            values.push((keys::TRACE_SAMPLED_FROM_HEADER, Arc::new(true) as Value));
        }

        Context {
            inner: Arc::new(ContextInner {
                values: values
                    .into_iter()
                    .map(|(key, value)| (Cow::Borrowed(key), value))
                    .collect(),
                parent: None,
            }),
        }
    }

    /// Returns a reference to the value stored under `key`, if its type is `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::Context;
    ///
    /// let cx = Context::new().with_value("user", "alice".to_string());
    ///
    /// assert_eq!(cx.get::<String>("user").map(String::as_str), Some("alice"));
    /// // wrong type or missing key
    /// assert_eq!(cx.get::<u64>("user"), None);
    /// assert_eq!(cx.get::<String>("tenant"), None);
    /// ```
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.value(key)?.downcast_ref()
    }

    /// Returns the untyped value stored under `key`, walking up the parent
    /// chain until a context holding the key is found.
    pub fn value(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        let mut cx = self;
        loop {
            if let Some(value) = cx.inner.values.get(key) {
                return Some(value.as_ref());
            }
            cx = cx.inner.parent.as_ref()?;
        }
    }

    /// Returns `true` if `key` is set on this context or one of its ancestors.
    pub fn contains_key(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Returns a child of this context with the new value included.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::Context;
    ///
    /// let cx_with_a = Context::new().with_value("a", 1u8);
    /// let cx_with_a_and_b = cx_with_a.with_value("b", 2u8);
    ///
    /// // The first context is still available and unmodified
    /// assert_eq!(cx_with_a.get::<u8>("b"), None);
    ///
    /// // The second context sees both values
    /// assert_eq!(cx_with_a_and_b.get::<u8>("a"), Some(&1));
    /// assert_eq!(cx_with_a_and_b.get::<u8>("b"), Some(&2));
    /// ```
    pub fn with_value<T: 'static + Send + Sync>(
        &self,
        key: impl Into<Cow<'static, str>>,
        value: T,
    ) -> Self {
        let mut values = HashMap::with_capacity(1);
        values.insert(key.into(), Arc::new(value) as Value);
        self.child(values)
    }

    /// Returns a child of this context with all of the given values included.
    ///
    /// When the same key appears more than once, the last occurrence wins.
    pub fn with_values<K, I>(&self, values: I) -> Self
    where
        K: Into<Cow<'static, str>>,
        I: IntoIterator<Item = (K, Arc<dyn Any + Send + Sync>)>,
    {
        self.child(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn child(&self, values: HashMap<Cow<'static, str>, Value>) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                values,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Makes this context the current context on this thread.
    ///
    /// Dropping the returned [`ContextGuard`] detaches it again.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::Context;
    ///
    /// let my_cx = Context::new().with_value("a", 1u64);
    ///
    /// // Set the current thread context
    /// let cx_guard = my_cx.attach();
    /// assert_eq!(Context::current().get::<u64>("a"), Some(&1));
    ///
    /// // Drop the guard to restore the previous context
    /// drop(cx_guard);
    /// assert_eq!(Context::current().get::<u64>("a"), None);
    /// ```
    ///
    /// NOTE: a variable name after the underscore is **required** or the
    /// guard is dropped, detaching the context, _immediately_.
    pub fn attach(self) -> ContextGuard {
        let attached = self.clone();
        let previous = self.attach_unguarded();
        ContextGuard {
            attached,
            previous,
            _marker: PhantomData,
        }
    }

    /// Makes this context the current context on this thread and returns the
    /// context that was current before.
    ///
    /// Callers must balance this with [`Context::detach`].
    pub fn attach_unguarded(self) -> Context {
        CURRENT_CONTEXT.with(|stack| stack.borrow_mut().push(self))
    }

    /// Pops the current context off this thread's stack and returns the
    /// context that becomes current.
    ///
    /// The top of the stack is popped even when it is not `expected`; the
    /// mismatch is logged as a warning and never raised.
    pub fn detach(expected: &Context) -> Context {
        CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop(expected))
    }

    /// Runs `f` with this context attached, detaching it again on every exit
    /// path including unwinding.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::Context;
    ///
    /// let cx = Context::new().with_value("tenant", "acme");
    /// let seen = cx.call(|| Context::current().get::<&str>("tenant").copied());
    ///
    /// assert_eq!(seen, Some("acme"));
    /// assert!(Context::current().get::<&str>("tenant").is_none());
    /// ```
    pub fn call<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.clone().attach();
        f()
    }

    /// Returns a closure that runs `f` with this context attached.
    pub fn wrap<T, F>(self, f: F) -> impl FnOnce() -> T
    where
        F: FnOnce() -> T,
    {
        move || self.call(f)
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cx = self.inner.parent.as_ref();
        while let Some(parent) = cx {
            depth += 1;
            cx = parent.inner.parent.as_ref();
        }
        depth
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.inner.values.keys().map(|k| k.as_ref()).collect();
        keys.sort_unstable();
        f.debug_struct("Context")
            .field("keys", &keys)
            .field("depth", &self.depth())
            .finish()
    }
}

/// A guard that detaches its context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    attached: Context,
    previous: Context,
    // Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl ContextGuard {
    /// The context that was current before this guard's context was attached.
    pub fn previous(&self) -> &Context {
        &self.previous
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // The thread local may already be gone during thread teardown.
        let _ = CURRENT_CONTEXT.try_with(|stack| stack.borrow_mut().pop(&self.attached));
    }
}

/// A stack of the [`Context`] instances that have been attached to a thread.
///
/// The base context is created when the stack is and can never be popped.
struct ContextStack {
    base: Context,
    stack: Vec<Context>,
    // Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const INITIAL_CAPACITY: usize = 8;

    fn new(base: Context) -> Self {
        ContextStack {
            base,
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    fn current(&self) -> &Context {
        self.stack.last().unwrap_or(&self.base)
    }

    #[inline(always)]
    fn push(&mut self, cx: Context) -> Context {
        let previous = self.current().clone();
        self.stack.push(cx);
        previous
    }

    fn pop(&mut self, expected: &Context) -> Context {
        match self.stack.pop() {
            Some(popped) if !popped.ptr_eq(expected) => {
                ct_warn!(
                    name: "Context.DetachMismatch",
                    depth = self.stack.len(),
                    message = "Detached context was not the current context; the current context was detached instead"
                );
            }
            Some(_) => {}
            None => {
                ct_warn!(
                    name: "Context.DetachBase",
                    message = "Attempted to detach the base context which is not allowed"
                );
            }
        }
        self.current().clone()
    }
}
