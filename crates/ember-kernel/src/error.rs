use thiserror::Error;

/// Failures surfaced by file-system operations. Each maps to a `false`/`-1`
/// result at the syscall boundary; none of them leaves persisted state
/// modified.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("out of disk space")]
    OutOfSpace,

    #[error("no such file or directory")]
    NotFound,

    #[error("name already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("bad argument")]
    BadArgument,
}

/// Failures surfaced while building or loading an address space.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    #[error("not enough physical memory")]
    OutOfMemory,

    #[error("not a valid executable image")]
    BadImage,

    #[error("virtual page out of range")]
    BadVirtualPage,

    #[error(transparent)]
    Fs(#[from] FsError),
}
