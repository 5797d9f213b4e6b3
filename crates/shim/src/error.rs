use memmgr::AllocError;
use thiserror::Error;

/// Negative errno values returned through the syscall layer.
pub mod errno {
    pub const EBADF: isize = -9;
    pub const ENOMEM: isize = -12;
    pub const EFAULT: isize = -14;
    pub const ENODEV: isize = -19;
    pub const EINVAL: isize = -22;
    pub const ENOSYS: isize = -38;
}

/// Errors produced by the memory-mapping syscalls and their collaborators.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Function not implemented")]
    NotImplemented,

    #[error("Bad file descriptor")]
    BadFileDescriptor,

    #[error("The file's filesystem cannot map memory")]
    NoDevice,

    /// Nothing is mapped in the requested range. `munmap` treats this as benign.
    #[error("No mapping in the requested range")]
    NoMapping,

    /// Part of the range is not covered by any VMA.
    #[error("Range contains unmapped pages")]
    Unmapped,

    #[error("Cannot allocate memory")]
    OutOfMemory,

    #[error("VMA record allocation failed: {0}")]
    Alloc(#[from] AllocError),
}

impl VmError {
    /// Returns the negative errno reported to the caller of the syscall.
    pub const fn errno(self) -> isize {
        match self {
            VmError::InvalidArgument => errno::EINVAL,
            VmError::NotImplemented => errno::ENOSYS,
            VmError::BadFileDescriptor => errno::EBADF,
            VmError::NoDevice => errno::ENODEV,
            VmError::NoMapping => errno::EFAULT,
            VmError::Unmapped | VmError::OutOfMemory | VmError::Alloc(_) => errno::ENOMEM,
        }
    }
}

pub type Result<T> = core::result::Result<T, VmError>;
