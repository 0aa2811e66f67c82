// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Type-tagged payloads for long-running operations.
//!
//! Operations carry their metadata and final response as [Any] values. An
//! [Any] is a JSON object with an `@type` field naming the message type. The
//! poller validates this tag before decoding, so a response of an unexpected
//! type is an error and never a default value.

use serde_json::{Map, Value};

const TYPE_FIELD: &str = "@type";
const VALUE_FIELD: &str = "value";
const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// A trait that must be implemented by all messages stored in an [Any].
pub trait Message: serde::ser::Serialize + serde::de::DeserializeOwned {
    /// The fully qualified name of this message type.
    fn typename() -> &'static str;

    /// The type URL used in the `@type` field.
    fn type_url() -> String {
        format!("{TYPE_URL_PREFIX}{}", Self::typename())
    }
}

/// Indicates a problem trying to use an [Any].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AnyError {
    /// Problem serializing an object into an [Any].
    #[error("cannot serialize object into an Any")]
    Serialization(#[source] serde_json::Error),

    /// Problem deserializing an object from an [Any].
    #[error("cannot deserialize from an Any")]
    Deserialization(#[source] serde_json::Error),

    /// The [Any] does not contain the requested type.
    #[error("mismatched typenames extracting from Any, the Any has {has}, the target type is {want}")]
    TypeMismatch {
        /// The type URL found in the [Any].
        has: String,
        /// The type URL of the requested type.
        want: String,
    },
}

/// A message of any type, tagged with its type URL.
///
/// # Example
/// ```
/// # use google_cloud_lro_poller::any::{Any, Message};
/// #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
/// struct Progress { percent: i32 }
/// impl Message for Progress {
///     fn typename() -> &'static str { "example.Progress" }
/// }
///
/// let any = Any::from_msg(&Progress { percent: 42 })?;
/// assert_eq!(any.type_url(), Some("type.googleapis.com/example.Progress"));
/// let progress = any.to_msg::<Progress>()?;
/// assert_eq!(progress, Progress { percent: 42 });
/// # Ok::<(), google_cloud_lro_poller::any::AnyError>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Any(Map<String, Value>);

impl Any {
    /// Creates a new [Any] from a message.
    ///
    /// Messages serialized as JSON objects are stored flatly, next to the
    /// `@type` field. Other messages are stored in a `value` field.
    pub fn from_msg<T: Message>(message: &T) -> Result<Self, AnyError> {
        let value = serde_json::to_value(message).map_err(AnyError::Serialization)?;
        let mut map = match value {
            Value::Object(map) => map,
            other => Map::from_iter([(VALUE_FIELD.to_string(), other)]),
        };
        map.insert(TYPE_FIELD.to_string(), Value::String(T::type_url()));
        Ok(Self(map))
    }

    /// Extracts a message from this [Any].
    ///
    /// Fails with [AnyError::TypeMismatch] if the `@type` field is missing
    /// or names a different type.
    pub fn to_msg<T: Message>(&self) -> Result<T, AnyError> {
        let want = T::type_url();
        match self.type_url() {
            Some(has) if has == want => {}
            has => {
                return Err(AnyError::TypeMismatch {
                    has: has.unwrap_or_default().to_string(),
                    want,
                });
            }
        }
        let mut map = self.0.clone();
        map.remove(TYPE_FIELD);
        let value = match map.remove(VALUE_FIELD) {
            Some(v) if map.is_empty() => v,
            Some(v) => {
                map.insert(VALUE_FIELD.to_string(), v);
                Value::Object(map)
            }
            None => Value::Object(map),
        };
        serde_json::from_value::<T>(value.clone())
            .or_else(|e| match value {
                Value::Object(_) => Err(e),
                // A message with a single `value` field is stored flatly.
                other => serde_json::from_value::<T>(Value::Object(Map::from_iter([(
                    VALUE_FIELD.to_string(),
                    other,
                )]))),
            })
            .map_err(AnyError::Deserialization)
    }

    /// The type URL of the contained message, if any.
    pub fn type_url(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }
}
