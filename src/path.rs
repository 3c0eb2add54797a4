// Copyright 2018 Google Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Parsing and normalization of the absolute POSIX-style paths accepted by the
//! [`crate::engine::Engine`] public API.
//!
//! This module never touches the node store: it is a pure function from a path string to an
//! ordered sequence of component names, or a [`PathError`] if the input is not a well-formed
//! absolute path.

use std::fmt;

/// Error returned when a path string is not acceptable to the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathError {
    message: String,
}

impl PathError {
    fn new<S: Into<String>>(message: S) -> Self {
        PathError { message: message.into() }
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PathError {}

/// Splits an absolute POSIX path into its normal (non-`.`/`..`) components.
///
/// Rejects empty paths, relative paths (those not starting with `/`), and paths containing a
/// NUL byte.  Collapses repeated separators, drops `.` components, and resolves `..` by popping
/// the previous component (popping past the root is a no-op, matching `cd ..` at `/`).
pub fn parse(path: &str) -> Result<Vec<String>, PathError> {
    if path.is_empty() {
        return Err(PathError::new("path must not be empty"));
    }
    if path.contains('\0') {
        return Err(PathError::new("path must not contain a NUL byte"));
    }
    if !path.starts_with('/') {
        return Err(PathError::new(format!("path {:?} is not absolute", path)));
    }

    let mut components: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                components.pop();
            },
            name => components.push(name.to_string()),
        }
    }
    Ok(components)
}

/// Splits a parsed component list into the parent's components and the final component's name.
///
/// Returns `None` if `components` is empty (i.e. the path refers to the root itself, which has
/// no parent and no name of its own from the caller's point of view).
pub fn split_last(components: &[String]) -> Option<(&[String], &str)> {
    components.split_last().map(|(name, parent)| (parent, name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root() {
        assert_eq!(Vec::<String>::new(), parse("/").unwrap());
    }

    #[test]
    fn parse_simple() {
        assert_eq!(vec!["a", "b", "c"], parse("/a/b/c").unwrap());
    }

    #[test]
    fn parse_collapses_repeated_separators() {
        assert_eq!(vec!["a", "b"], parse("//a///b//").unwrap());
    }

    #[test]
    fn parse_drops_dot_components() {
        assert_eq!(vec!["a", "b"], parse("/a/./b/.").unwrap());
    }

    #[test]
    fn parse_resolves_dot_dot() {
        assert_eq!(vec!["b"], parse("/a/../b").unwrap());
        assert_eq!(vec!["a", "c"], parse("/a/b/../c").unwrap());
    }

    #[test]
    fn parse_dot_dot_past_root_stays_at_root() {
        assert_eq!(Vec::<String>::new(), parse("/..").unwrap());
        assert_eq!(Vec::<String>::new(), parse("/../../..").unwrap());
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(parse("").is_err());
    }

    #[test]
    fn parse_rejects_relative() {
        assert!(parse("a/b").is_err());
    }

    #[test]
    fn parse_rejects_nul() {
        assert!(parse("/a\0b").is_err());
    }

    #[test]
    fn split_last_of_root_is_none() {
        let components = parse("/").unwrap();
        assert!(split_last(&components).is_none());
    }

    #[test]
    fn split_last_ok() {
        let components = parse("/a/b/c").unwrap();
        let (parent, name) = split_last(&components).unwrap();
        assert_eq!(["a".to_string(), "b".to_string()], parent);
        assert_eq!("c", name);
    }
}
