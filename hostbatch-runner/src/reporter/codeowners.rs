// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attributing scripts to owners through a CODEOWNERS-style file.
//!
//! Each non-comment line is a path pattern followed by zero or more owners. The last matching
//! line wins, as on code hosting sites.

use crate::errors::CodeOwnersParseError;
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fmt;

/// A parsed CODEOWNERS-style file.
#[derive(Clone, Debug)]
pub struct CodeOwners {
    path: Utf8PathBuf,
    rules: Vec<OwnerRule>,
}

#[derive(Clone, Debug)]
struct OwnerRule {
    pattern: String,
    matcher: GlobSet,
    owners: Vec<String>,
}

impl CodeOwners {
    /// Reads and parses the file at `path`.
    pub fn from_path(path: &Utf8Path) -> Result<Self, CodeOwnersParseError> {
        let contents = std::fs::read_to_string(path).map_err(|error| CodeOwnersParseError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(path, &contents)
    }

    /// Parses `contents`. `path` is only used in error messages.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, CodeOwnersParseError> {
        let mut rules = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(pattern) = fields.next() else {
                continue;
            };
            let owners = fields
                .take_while(|field| !field.starts_with('#'))
                .map(str::to_owned)
                .collect();
            let matcher = compile_pattern(pattern).map_err(|error| {
                CodeOwnersParseError::InvalidPattern {
                    path: path.to_owned(),
                    line: index + 1,
                    pattern: pattern.to_owned(),
                    error,
                }
            })?;
            rules.push(OwnerRule {
                pattern: pattern.to_owned(),
                matcher,
                owners,
            });
        }

        Ok(Self {
            path: path.to_owned(),
            rules,
        })
    }

    /// Returns the file this was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Looks up the owners of `path`, which is relative to the repository root.
    pub fn owners_for<'a>(&'a self, path: &'a Utf8Path) -> OwnersLookup<'a> {
        match self
            .rules
            .iter()
            .rev()
            .find(|rule| rule.matcher.is_match(path))
        {
            Some(rule) if rule.owners.is_empty() => OwnersLookup::Unowned {
                pattern: &rule.pattern,
            },
            Some(rule) => OwnersLookup::Owners(&rule.owners),
            None => OwnersLookup::NoMatch { path },
        }
    }
}

/// The result of looking up the owners of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnersLookup<'a> {
    /// A rule matched and lists these owners.
    Owners(&'a [String]),
    /// The last matching rule lists no owners.
    Unowned {
        /// The pattern of that rule.
        pattern: &'a str,
    },
    /// No rule matched.
    NoMatch {
        /// The path that was looked up.
        path: &'a Utf8Path,
    },
    /// No code owners file is configured.
    NotConfigured,
}

impl fmt::Display for OwnersLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owners(owners) => write!(f, "owners: {}", owners.join(" ")),
            Self::Unowned { pattern } => {
                write!(f, "owners: unknown (CODEOWNERS entry `{pattern}` lists no owners)")
            }
            Self::NoMatch { path } => {
                write!(f, "owners: unknown (no CODEOWNERS entry matches {path})")
            }
            Self::NotConfigured => write!(f, "owners: unknown (no code owners file configured)"),
        }
    }
}

/// Turns one CODEOWNERS pattern into globs over repository-relative paths.
///
/// * A leading `/` anchors the pattern at the root; otherwise a pattern without any `/` matches
///   at any depth.
/// * A trailing `/` matches everything below a directory.
/// * Any pattern also matches everything below it, if it names a directory.
fn compile_pattern(pattern: &str) -> Result<GlobSet, globset::Error> {
    let anchored = pattern.starts_with('/');
    let trimmed = pattern.trim_start_matches('/').trim_end_matches('/');
    let base = if trimmed.is_empty() {
        "**".to_owned()
    } else if !anchored && !trimmed.contains('/') {
        format!("**/{trimmed}")
    } else {
        trimmed.to_owned()
    };

    let mut builder = GlobSetBuilder::new();
    for glob in [base.clone(), format!("{base}/**")] {
        builder.add(GlobBuilder::new(&glob).literal_separator(true).build()?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use test_case::test_case;

    fn owners() -> CodeOwners {
        CodeOwners::parse(
            Utf8Path::new("CODEOWNERS"),
            indoc! {"
                # Default owners.
                *                       @org/qa
                *.py                    @org/python   # inline comment
                /AutomatedTesting/Gem/  @org/gem-team
                /AutomatedTesting/Gem/PythonTests/Atom @org/atom @rendering-lead
                /AutomatedTesting/Gem/PythonTests/Atom/scratch
            "},
        )
        .unwrap()
    }

    #[test_case("AutomatedTesting/Gem/PythonTests/Atom/hydra_viewport.py", "owners: @org/atom @rendering-lead"; "most specific")]
    #[test_case("AutomatedTesting/Gem/PythonTests/Physics/joints.py", "owners: @org/gem-team"; "directory rule")]
    #[test_case("Tools/scripts/run.py", "owners: @org/python"; "extension anywhere")]
    #[test_case("README.md", "owners: @org/qa"; "catch all")]
    #[test_case(
        "AutomatedTesting/Gem/PythonTests/Atom/scratch/tmp.py",
        "owners: unknown (CODEOWNERS entry `/AutomatedTesting/Gem/PythonTests/Atom/scratch` lists no owners)";
        "explicitly unowned"
    )]
    fn lookup(path: &str, expected: &str) {
        let owners = owners();
        assert_eq!(owners.owners_for(Utf8Path::new(path)).to_string(), expected);
    }

    #[test]
    fn no_match_says_so() {
        let owners = CodeOwners::parse(Utf8Path::new("CODEOWNERS"), "/Gem/ @gem\n").unwrap();
        let path = Utf8Path::new("Tools/run.py");
        assert_eq!(owners.owners_for(path), OwnersLookup::NoMatch { path });
        assert_eq!(
            owners.owners_for(path).to_string(),
            "owners: unknown (no CODEOWNERS entry matches Tools/run.py)"
        );
    }

    #[test]
    fn invalid_pattern() {
        let error = CodeOwners::parse(Utf8Path::new("CODEOWNERS"), "ok @a\nsrc/[ @b\n").unwrap_err();
        match error {
            CodeOwnersParseError::InvalidPattern { line, pattern, .. } => {
                assert_eq!((line, pattern.as_str()), (2, "src/["));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
