use std::fmt;

use thiserror::Error;

/// POSIX-style error codes reported by [`VirtualFs`](super::VirtualFs)
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosixCode {
    ENOENT,
    ENOTDIR,
    EISDIR,
    ENOTEMPTY,
    EEXIST,
    EINVAL,
    EBUSY,
    /// The blob store backing a pack file failed
    EIO,
}

impl PosixCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosixCode::ENOENT => "ENOENT",
            PosixCode::ENOTDIR => "ENOTDIR",
            PosixCode::EISDIR => "EISDIR",
            PosixCode::ENOTEMPTY => "ENOTEMPTY",
            PosixCode::EEXIST => "EEXIST",
            PosixCode::EINVAL => "EINVAL",
            PosixCode::EBUSY => "EBUSY",
            PosixCode::EIO => "EIO",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PosixCode::ENOENT => "no such file or directory",
            PosixCode::ENOTDIR => "not a directory",
            PosixCode::EISDIR => "is a directory",
            PosixCode::ENOTEMPTY => "directory not empty",
            PosixCode::EEXIST => "file already exists",
            PosixCode::EINVAL => "invalid argument",
            PosixCode::EBUSY => "resource busy",
            PosixCode::EIO => "i/o error",
        }
    }
}

impl fmt::Display for PosixCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem error carrying a code callers can branch on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {}, '{path}'", .code.description())]
pub struct FsError {
    pub code: PosixCode,
    pub path: String,
}

impl FsError {
    pub fn new(code: PosixCode, path: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == PosixCode::ENOENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_path() {
        let err = FsError::new(PosixCode::ENOTEMPTY, "/objects");
        assert_eq!(err.to_string(), "ENOTEMPTY: directory not empty, '/objects'");
    }
}
