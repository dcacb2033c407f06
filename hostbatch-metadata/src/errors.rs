// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while parsing one of the enums in this crate from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseEnumError {
    kind: &'static str,
    input: String,
    known: &'static [&'static str],
}

impl ParseEnumError {
    pub(crate) fn new(
        kind: &'static str,
        input: impl Into<String>,
        known: &'static [&'static str],
    ) -> Self {
        Self {
            kind,
            input: input.into(),
            known,
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unrecognized {}: `{}` (known values: {})",
            self.kind,
            self.input,
            self.known.join(", ")
        )
    }
}

impl error::Error for ParseEnumError {}
