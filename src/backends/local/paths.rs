// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::{Component, Path, PathBuf};

use crate::errors::OperationError;

/// Resolve a peer-supplied relative path against `root`.
///
/// Absolute paths and `..` components that would climb above `root` are
/// rejected. The check is lexical; symlinks inside `root` are followed by
/// the filesystem as usual.
pub fn resolve_under_root(root: &Path, requested: &str) -> Result<PathBuf, OperationError> {
    if requested.is_empty() {
        return Err(OperationError::invalid_payload("path is empty"));
    }

    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(OperationError::invalid_payload(format!(
                        "path '{}' escapes the filesystem root",
                        requested
                    )));
                }
                normalized.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(OperationError::invalid_payload(format!(
                    "path '{}' must be relative to the filesystem root",
                    requested
                )));
            }
        }
    }

    if depth == 0 {
        return Err(OperationError::invalid_payload(format!(
            "path '{}' does not name a file",
            requested
        )));
    }
    Ok(root.join(normalized))
}
