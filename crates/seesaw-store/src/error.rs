//! Structured errors for the store.
//!
//! Effect operations return `anyhow::Result` for ergonomics. Anything that
//! reaches a caller through an [`EffectTask`](crate::EffectTask) or
//! `send_and_wait` is a [`StoreError`], so callers can match on what happened.
//!
//! # Example
//!
//! ```ignore
//! use seesaw_store::StoreError;
//!
//! match store.send_and_wait(Action::Save).await {
//!     Ok(()) => {}
//!     Err(StoreError::Effect(e)) => tracing::warn!(error = %e, "save failed"),
//!     Err(StoreError::Timeout { duration }) => tracing::warn!(?duration, "save timed out"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the store and by effect handles.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store loop has stopped; the action was not applied.
    #[error("store is closed")]
    Closed,

    /// An effect unit panicked while running.
    #[error("effect panicked: {0}")]
    EffectPanicked(String),

    /// Waiting for effects took longer than allowed.
    #[error("timed out after {duration:?} waiting for effects")]
    Timeout { duration: Duration },

    /// A single-operation effect returned an error.
    #[error(transparent)]
    Effect(#[from] anyhow::Error),
}

/// Best-effort message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_error_is_transparent() {
        let err = StoreError::from(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "disk full");
        assert!(matches!(err, StoreError::Effect(_)));
    }

    #[test]
    fn test_timeout_message() {
        let err = StoreError::Timeout {
            duration: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
