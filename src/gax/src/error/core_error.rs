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

use super::LoopError;
use super::rpc::Status;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by the retry, polling, and lease loops.
///
/// Errors come from multiple sources. The service may return an error, the
/// transport may fail to deliver the request, the request may time out, the
/// retry policy may be exhausted, the caller may cancel the loop, or the
/// response may not have the expected type.
///
/// Most applications will just return the error or log it. Applications that
/// need more detail can use the predicates in this type to determine the error
/// kind, [status()][Error::status] to find the last status returned by the
/// service, and the [source][std::error::Error::source] for deeper
/// information.
///
/// # Example
/// ```
/// use google_cloud_gax_retry::error::Error;
/// match example_function() {
///     Err(e) if e.is_exhausted() => { println!("ran out of retry budget {e}"); },
///     Err(e) if matches!(e.status(), Some(_)) => {
///         println!("service error {e}, debug using {:?}", e.status().unwrap());
///     },
///     Err(e) => { println!("some other error {e}"); },
///     Ok(_) => { println!("success, how boring"); },
/// }
///
/// fn example_function() -> Result<String, Error> {
///     // ... details omitted ...
///     # use google_cloud_gax_retry::error::rpc::{Code, Status};
///     # Err(Error::service(Status::default().set_code(Code::NotFound).set_message("NOT FOUND")))
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error with the information returned by Google Cloud services.
    ///
    /// # Example
    /// ```
    /// use google_cloud_gax_retry::error::Error;
    /// use google_cloud_gax_retry::error::rpc::{Code, Status};
    /// let status = Status::default().set_code(Code::NotFound).set_message("NOT FOUND");
    /// let error = Error::service(status.clone());
    /// assert_eq!(error.status(), Some(&status));
    /// ```
    pub fn service(status: Status) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(status)),
            source: None,
        }
    }

    /// Creates an error representing a transport problem.
    ///
    /// The request may or may not have reached the service.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    /// The transport could not send the request or receive the response.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a timeout.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use google_cloud_gax_retry::error::Error;
    /// let error = Error::timeout("simulated timeout");
    /// assert!(error.is_timeout());
    /// assert!(error.source().is_some());
    /// ```
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// The request could not be completed before its deadline.
    ///
    /// This is always a client-side generated error. Note that the request may
    /// or may not have started, and it may or may not complete in the service.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing an exhausted policy.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use google_cloud_gax_retry::error::Error;
    /// let error = Error::exhausted("too many retry attempts");
    /// assert!(error.is_exhausted());
    /// assert!(error.source().is_some());
    /// ```
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Exhausted,
            source: Some(source.into()),
        }
    }

    /// The request could not complete before the retry or polling policy
    /// expired.
    ///
    /// This is always a client-side generated error, but it may be the result
    /// of multiple errors received from the service. Use
    /// [status()][Error::status] to query the last error returned by the
    /// service.
    ///
    /// # Troubleshooting
    ///
    /// The most common cause of this problem is a transient problem that lasts
    /// longer than your retry policy. If your application can tolerate longer
    /// recovery times then extend the retry policy.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Creates an error representing a failure the retry policy refused to
    /// retry.
    pub fn permanent<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            source: Some(source.into()),
        }
    }

    /// The request failed with an error classified as permanent.
    ///
    /// The retry loop stops on the first permanent error, regardless of any
    /// remaining budget in the retry policy.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, ErrorKind::Permanent)
    }

    /// Creates an error representing a failed non-idempotent request.
    pub fn non_idempotent<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::NonIdempotent,
            source: Some(source.into()),
        }
    }

    /// A non-idempotent request failed.
    ///
    /// Such requests are never retried, because the service may have
    /// completed the request before the error was reported.
    pub fn is_non_idempotent(&self) -> bool {
        matches!(self.kind, ErrorKind::NonIdempotent)
    }

    /// Creates an error representing a cancelled loop.
    pub fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(source.into()),
        }
    }

    /// The caller cancelled the loop before it completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing a failed backoff timer.
    pub fn timer<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timer,
            source: Some(source.into()),
        }
    }

    /// The timer used to wait between attempts failed.
    ///
    /// This typically means the scheduler is shutting down. It is reported
    /// separately from [is_exhausted()][Error::is_exhausted].
    pub fn is_timer(&self) -> bool {
        matches!(self.kind, ErrorKind::Timer)
    }

    /// Creates an error representing a deserialization problem.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use google_cloud_gax_retry::error::Error;
    /// let error = Error::deser("simulated problem");
    /// assert!(error.is_deserialization());
    /// assert!(error.source().is_some());
    /// ```
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: Some(source.into()),
        }
    }

    /// The response could not be deserialized.
    ///
    /// The most common cause is a long-running operation whose response does
    /// not contain the expected type.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Creates an error representing a serialization problem.
    pub fn ser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Serialization,
            source: Some(source.into()),
        }
    }

    /// The request could not be serialized.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization)
    }

    /// Creates an error that does not fit any of the other kinds.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
        }
    }

    /// The [Status] payload associated with this error.
    ///
    /// For errors returned by a retry, polling, or lease loop this is the
    /// status of the last error observed by the loop, if any.
    ///
    /// # Examples
    /// ```
    /// use google_cloud_gax_retry::error::{Error, rpc::{Code, Status}};
    /// let error = Error::service(Status::default().set_code(Code::NotFound));
    /// if let Some(status) = error.status() {
    ///     if status.code == Code::NotFound {
    ///         println!("cannot find the thing, more details in {:?}", status.details);
    ///     }
    /// }
    /// ```
    pub fn status(&self) -> Option<&Status> {
        self.service_status().or_else(|| {
            self.as_inner::<LoopError>()
                .and_then(LoopError::last)
                .and_then(Error::status)
        })
    }

    // The status returned by the service, ignoring any loop decoration.
    pub(crate) fn service_status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Returns the source as a specific type, if possible.
    ///
    /// # Example
    /// ```
    /// use google_cloud_gax_retry::error::{Error, LoopError};
    /// let error = Error::exhausted(LoopError::new("my-rpc", "retry policy exhausted", None));
    /// let details = error.as_inner::<LoopError>();
    /// assert_eq!(details.map(LoopError::location), Some("my-rpc"));
    /// ```
    pub fn as_inner<T: StdError + Send + Sync + 'static>(&self) -> Option<&T> {
        self.source.as_ref().and_then(|e| e.downcast_ref::<T>())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(s), _) => {
                write!(
                    f,
                    "the service reports an error with code {} described as: {}",
                    s.code, s.message
                )
            }
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}"),
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")
            }
            (ErrorKind::Serialization, Some(e)) => write!(f, "cannot serialize the request {e}"),
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")
            }
            (ErrorKind::Exhausted, Some(e))
            | (ErrorKind::Permanent, Some(e))
            | (ErrorKind::NonIdempotent, Some(e))
            | (ErrorKind::Cancelled, Some(e))
            | (ErrorKind::Timer, Some(e)) => write!(f, "{e}"),
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

#[derive(Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Io,
    Timeout,
    Serialization,
    Deserialization,
    Exhausted,
    Permanent,
    NonIdempotent,
    Cancelled,
    Timer,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc::Code;
    use test_case::test_case;

    static_assertions::assert_impl_all!(Error: Send, Sync, StdError);

    #[derive(Debug, thiserror::Error)]
    #[error("simulated problem")]
    struct Simulated;

    fn unavailable() -> Status {
        Status::default()
            .set_code(Code::Unavailable)
            .set_message("try again")
    }

    #[test]
    fn service() {
        let status = Status::default()
            .set_code(Code::NotFound)
            .set_message("NOT FOUND");
        let error = Error::service(status.clone());
        assert!(error.source().is_none(), "{error:?}");
        assert_eq!(error.status(), Some(&status));
        assert!(error.to_string().contains("NOT FOUND"), "{error}");
        assert!(error.to_string().contains(Code::NotFound.name()), "{error}");
        assert!(!error.is_exhausted(), "{error:?}");
        assert!(!error.is_io(), "{error:?}");
    }

    #[test_case(Error::io(Simulated), Error::is_io)]
    #[test_case(Error::timeout(Simulated), Error::is_timeout)]
    #[test_case(Error::ser(Simulated), Error::is_serialization)]
    #[test_case(Error::deser(Simulated), Error::is_deserialization)]
    #[test_case(Error::exhausted(Simulated), Error::is_exhausted)]
    #[test_case(Error::permanent(Simulated), Error::is_permanent)]
    #[test_case(Error::non_idempotent(Simulated), Error::is_non_idempotent)]
    #[test_case(Error::cancelled(Simulated), Error::is_cancelled)]
    #[test_case(Error::timer(Simulated), Error::is_timer)]
    fn with_source(error: Error, predicate: fn(&Error) -> bool) {
        assert!(predicate(&error), "{error:?}");
        let got = error.source().and_then(|e| e.downcast_ref::<Simulated>());
        assert!(got.is_some(), "{error:?}");
        assert!(error.as_inner::<Simulated>().is_some(), "{error:?}");
        assert!(error.to_string().contains("simulated problem"), "{error}");
        assert!(error.status().is_none(), "{error:?}");
    }

    #[test]
    fn predicates_are_exclusive() {
        let error = Error::exhausted(Simulated);
        assert!(!error.is_permanent(), "{error:?}");
        assert!(!error.is_cancelled(), "{error:?}");
        assert!(!error.is_timer(), "{error:?}");
        assert!(!error.is_non_idempotent(), "{error:?}");

        let error = Error::other(Simulated);
        assert!(!error.is_exhausted(), "{error:?}");
        assert!(!error.is_io(), "{error:?}");
        assert!(error.to_string().contains("unclassified"), "{error}");
    }

    #[test]
    fn status_through_loop_error() {
        let last = Error::service(unavailable());
        let error = Error::exhausted(LoopError::new(
            "test-location",
            "retry policy exhausted",
            Some(last),
        ));
        assert_eq!(error.status(), Some(&unavailable()));
        let fmt = error.to_string();
        assert!(fmt.contains("retry policy exhausted"), "{fmt}");
        assert!(fmt.contains("test-location"), "{fmt}");
        assert!(fmt.contains("try again"), "{fmt}");
    }

    #[test]
    fn status_through_nested_loop_error() {
        let inner = Error::cancelled(LoopError::new(
            "inner",
            "retry loop cancelled",
            Some(Error::service(unavailable())),
        ));
        let error = Error::exhausted(LoopError::new(
            "outer",
            "polling policy exhausted",
            Some(inner),
        ));
        assert_eq!(error.status(), Some(&unavailable()));
    }

    #[test]
    fn no_status_without_last_error() {
        let error = Error::cancelled(LoopError::new("test-location", "retry loop cancelled", None));
        assert!(error.status().is_none(), "{error:?}");
        assert!(error.is_cancelled(), "{error:?}");
    }
}
