//! Connection context: the value produced by authentication.
//!
//! Every connection starts with the background context. A successful
//! `connection_init` replaces it once with whatever the [`Authenticator`]
//! returned; hooks and the execution engine read it back through
//! [`Connection::context`].
//!
//! [`Authenticator`]: crate::Authenticator
//! [`Connection::context`]: crate::Connection::context

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased, cheaply clonable per-connection context.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl ConnectionContext {
    /// The initial, unauthenticated context.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Arc::new(value)),
        }
    }

    /// Borrow the stored value if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref::<T>()
    }

    pub fn is_background(&self) -> bool {
        self.value.is_none()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_background() {
            f.write_str("ConnectionContext(background)")
        } else {
            f.write_str("ConnectionContext(..)")
        }
    }
}
