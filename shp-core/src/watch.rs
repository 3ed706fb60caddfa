//! Canonical watch events
//!
//! A collaborator may hand over an event payload either as an already typed object or as a
//! generic document, depending on which transport produced it. [`RawEvent`] carries either
//! shape and [`RawEvent::decode`] turns it into a typed [`WatchEvent`] in one step.
use std::{any::Any, fmt};

use kube::core::DynamicObject;

use crate::{error::DecodeError, resource::WatchedResource};

/// Kind of change a watch event reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Resource was added
    Added,
    /// Resource was modified
    Modified,
    /// Resource was deleted
    Deleted,
}

/// A decoded watch event for a resource of kind `K`
#[derive(Clone, Debug)]
pub struct WatchEvent<K> {
    /// What happened
    pub type_: EventType,
    /// Snapshot of the object after the change
    pub object: K,
}

impl<K> WatchEvent<K> {
    /// Creates an event
    pub fn new(type_: EventType, object: K) -> Self {
        Self { type_, object }
    }
}

/// Payload of an event as delivered by a subscription
pub enum Payload {
    /// An already typed object
    Typed(Box<dyn Any + Send>),
    /// A generic document
    Dynamic(serde_json::Value),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Typed(_) => f.write_str("Typed(..)"),
            Payload::Dynamic(value) => f.debug_tuple("Dynamic").field(value).finish(),
        }
    }
}

/// An event as delivered by a subscription, before decoding
#[derive(Debug)]
pub struct RawEvent {
    /// What happened
    pub type_: EventType,
    /// The object, in whichever shape the transport produced
    pub payload: Payload,
}

impl RawEvent {
    /// An event carrying a typed object
    pub fn typed<T: Any + Send>(type_: EventType, obj: T) -> Self {
        Self {
            type_,
            payload: Payload::Typed(Box::new(obj)),
        }
    }

    /// An event carrying a generic document
    pub fn dynamic(type_: EventType, value: serde_json::Value) -> Self {
        Self {
            type_,
            payload: Payload::Dynamic(value),
        }
    }

    /// Decodes the payload into `K`
    ///
    /// A typed payload of type `K` is taken as is. A [`DynamicObject`] or a generic document is
    /// deserialized into `K`.
    ///
    /// # Errors
    ///
    /// Fails with a [`DecodeError`] if the payload is a `Status` document, a typed object of some
    /// other type, or a document that does not deserialize into `K`.
    pub fn decode<K: WatchedResource>(self) -> Result<WatchEvent<K>, DecodeError> {
        let value = match self.payload {
            Payload::Typed(boxed) => match boxed.downcast::<K>() {
                Ok(obj) => return Ok(WatchEvent::new(self.type_, *obj)),
                Err(other) => match other.downcast::<DynamicObject>() {
                    Ok(obj) => serde_json::to_value(*obj).map_err(|source| DecodeError::Deserialize {
                        kind: K::kind_name(),
                        source,
                    })?,
                    Err(_) => return Err(DecodeError::UnexpectedType { kind: K::kind_name() }),
                },
            },
            Payload::Dynamic(value) => value,
        };
        if value.get("kind").and_then(serde_json::Value::as_str) == Some("Status") {
            let message = value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(DecodeError::Status {
                kind: K::kind_name(),
                message,
            });
        }
        let object = serde_json::from_value(value).map_err(|source| DecodeError::Deserialize {
            kind: K::kind_name(),
            source,
        })?;
        Ok(WatchEvent::new(self.type_, object))
    }
}
