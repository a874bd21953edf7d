//! Transaction id propagation.
//!
//! Every HTTP request and queue message runs inside a [`RequestContext`]
//! carrying its transaction id, so logs and forwarded messages can be
//! correlated with the caller.

use std::cell::RefCell;
use std::future::Future;
use uuid::Uuid;

/// Header carrying the transaction id.
pub const TRANSACTION_ID_HEADER: &str = "X-Request-Id";

/// Generates a transaction id of the form `tid_<uuid>`.
#[must_use]
pub fn generate_transaction_id() -> String {
    format!("tid_{}", Uuid::new_v4().simple())
}

/// Per-request context holding the transaction id.
#[derive(Clone, Debug)]
pub struct RequestContext {
    transaction_id: String,
}

impl RequestContext {
    /// Creates a context with a generated transaction id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transaction_id: generate_transaction_id(),
        }
    }

    /// Creates a context with an existing transaction id.
    #[must_use]
    pub fn from_id(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
        }
    }

    /// Uses the header value when present and non-blank, otherwise generates one.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(Self::new, Self::from_id)
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

tokio::task_local! {
    static TASK_CONTEXT: RequestContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Restores the previous thread-local context on drop.
pub struct RequestContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Enters a context for synchronous code, such as a blocking store call.
#[must_use]
pub fn enter_request_context(context: RequestContext) -> RequestContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    RequestContextGuard { previous }
}

/// Runs a future inside a context.
///
/// The context is bound to the task only and never written to thread-local
/// state. Use [`enter_request_context`] for synchronous code.
pub async fn scope_request_context<F, T>(context: RequestContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    TASK_CONTEXT.scope(context, fut).await
}

/// Returns the current transaction id, if a context is active.
#[must_use]
pub fn current_request_id() -> Option<String> {
    if let Ok(id) = TASK_CONTEXT.try_with(|ctx| ctx.transaction_id.clone()) {
        return Some(id);
    }

    THREAD_CONTEXT.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|ctx| ctx.transaction_id.clone())
    })
}
