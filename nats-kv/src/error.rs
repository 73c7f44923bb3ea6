// Copyright 2020-2024 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Debug, Display};

/// Error returned by bucket operations, generic over the kind of failure.
///
/// Every operation defines its own `Kind` enum, so callers can match on
/// [Error::kind] while the underlying cause stays reachable through
/// [std::error::Error::source].
#[derive(Debug)]
pub struct Error<Kind>
where
    Kind: Clone + Debug + Display + PartialEq,
{
    pub(crate) kind: Kind,
    pub(crate) source: Option<crate::Error>,
}

impl<Kind> Error<Kind>
where
    Kind: Clone + Debug + Display + PartialEq,
{
    pub(crate) fn new(kind: Kind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source<S>(kind: Kind, source: S) -> Self
    where
        S: Into<crate::Error>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Re-labels the error with a different kind, keeping the source.
    pub(crate) fn map_kind<Other, F>(self, f: F) -> Error<Other>
    where
        Other: Clone + Debug + Display + PartialEq,
        F: FnOnce(Kind) -> Other,
    {
        Error {
            kind: f(self.kind),
            source: self.source,
        }
    }

    // Kinds are not required to be `Copy`.
    pub fn kind(&self) -> Kind {
        self.kind.clone()
    }
}

impl<Kind> Display for Error<Kind>
where
    Kind: Clone + Debug + Display + PartialEq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(err) = &self.source {
            write!(f, "{}: {}", self.kind, err)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl<Kind> std::error::Error for Error<Kind>
where
    Kind: Clone + Debug + Display + PartialEq,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl<Kind> From<Kind> for Error<Kind>
where
    Kind: Clone + Debug + Display + PartialEq,
{
    fn from(kind: Kind) -> Self {
        Self { kind, source: None }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Formatter;

    #[derive(Clone, Debug, PartialEq)]
    enum LookupErrorKind {
        Missing,
        Invalid,
    }

    impl Display for LookupErrorKind {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Missing => write!(f, "key not found"),
                Self::Invalid => write!(f, "invalid key"),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    enum OuterErrorKind {
        Lookup,
    }

    impl Display for OuterErrorKind {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "lookup failed")
        }
    }

    type LookupError = Error<LookupErrorKind>;

    #[test]
    fn new() {
        let error = LookupError::new(LookupErrorKind::Missing);
        assert_eq!(error.kind, LookupErrorKind::Missing);
        assert!(error.source.is_none());
    }

    #[test]
    fn with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let error = LookupError::with_source(LookupErrorKind::Invalid, source);
        assert_eq!(error.kind(), LookupErrorKind::Invalid);
        assert_eq!(error.to_string(), "invalid key: socket closed");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn display_without_source() {
        let error: LookupError = LookupErrorKind::Missing.into();
        assert_eq!(format!("{}", error), "key not found");
    }

    #[test]
    fn map_kind_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error = LookupError::with_source(LookupErrorKind::Missing, source);
        let mapped = error.map_kind(|_| OuterErrorKind::Lookup);
        assert_eq!(mapped.kind(), OuterErrorKind::Lookup);
        assert_eq!(mapped.to_string(), "lookup failed: boom");
    }
}
