//! Per-channel notification handlers.
//!
//! Each registered channel maps to one [`ChannelHandler`]. The variant decides
//! how the notification's `params` are decoded before the callback runs.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type RawCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type ValueCallback = Arc<dyn Fn(Value) + Send + Sync>;
type TypedCallback = Arc<dyn Fn(Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// Payload shape a handler expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Serialized `params` bytes, undecoded.
    Raw,
    /// `params` as a generic JSON value.
    Value,
    /// `params` decoded into a concrete type.
    Typed(&'static str),
}

#[derive(Clone)]
#[non_exhaustive]
pub enum ChannelHandler {
    Raw(RawCallback),
    Value(ValueCallback),
    Typed {
        type_name: &'static str,
        invoke: TypedCallback,
    },
}

impl ChannelHandler {
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        ChannelHandler::Raw(Arc::new(f))
    }

    pub fn value<F>(f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        ChannelHandler::Value(Arc::new(f))
    }

    /// Handler invoked with `params` decoded as `T`. Notifications whose
    /// payload does not decode as `T` are dropped without calling `f`.
    pub fn typed<T, F>(f: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        ChannelHandler::Typed {
            type_name: std::any::type_name::<T>(),
            invoke: Arc::new(move |params| {
                let payload = serde_json::from_value::<T>(params)?;
                f(payload);
                Ok(())
            }),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            ChannelHandler::Raw(_) => PayloadKind::Raw,
            ChannelHandler::Value(_) => PayloadKind::Value,
            ChannelHandler::Typed { type_name, .. } => PayloadKind::Typed(type_name),
        }
    }

    /// Decodes `params` for this handler's kind and invokes it.
    ///
    /// Returns the decode error, if any, in which case the callback was not run.
    pub(crate) fn dispatch(&self, params: Value) -> Result<(), serde_json::Error> {
        match self {
            ChannelHandler::Raw(f) => {
                let bytes = serde_json::to_vec(&params)?;
                f(bytes);
                Ok(())
            }
            ChannelHandler::Value(f) => {
                f(params);
                Ok(())
            }
            ChannelHandler::Typed { invoke, .. } => invoke(params),
        }
    }
}

impl fmt::Debug for ChannelHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelHandler").field(&self.kind()).finish()
    }
}
