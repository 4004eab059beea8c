//! Error categories shared by every wcp crate and their process exit codes.
//!
//! Exit codes follow sysexits(3) so scripts driving `wcp` can tell a typo
//! from a missing session from an I/O failure.

pub const EX_USAGE: i32 = 64;
pub const EX_UNAVAILABLE: i32 = 69;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_CANTCREAT: i32 = 73;
pub const EX_IOERR: i32 = 74;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
    NotFound,
    AlreadyExists,
    External,
    Internal,
}

impl ErrorCategory {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::InvalidInput => EX_USAGE,
            ErrorCategory::NotFound => EX_UNAVAILABLE,
            ErrorCategory::AlreadyExists => EX_CANTCREAT,
            ErrorCategory::External => EX_IOERR,
            ErrorCategory::Internal => EX_SOFTWARE,
        }
    }
}
