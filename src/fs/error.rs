use thiserror::Error;

/// 文件系统错误类型
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// 底层 I/O 错误
    #[error("Disk I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File name too long")]
    NameTooLong,
    /// 目录表没有空槽
    #[error("Directory is full")]
    DirectoryFull,
    /// 没有空闲 inode 或数据块
    #[error("No space left on device")]
    OutOfSpace,
    /// 逻辑块超出索引块容量
    #[error("File too big")]
    FileTooBig,
    #[error("Directory is not empty")]
    NotEmpty,
    #[error("File or directory already exists: {0}")]
    AlreadyExists(String),
    #[error("File or directory not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Expected a directory, found a file: {0}")]
    NotADirectory(String),
    #[error("Expected a file, found a directory: {0}")]
    IsADirectory(String),
    #[error("Invalid inode: {0}")]
    InvalidInode(u32),
    /// 镜像内容不合法
    #[error("File system corrupted: {0}")]
    Corrupted(String),
}

impl FileSystemError {
    /// 宿主分发层使用的 POSIX errno
    pub fn errno(&self) -> i32 {
        match self {
            Self::Io(_) | Self::Corrupted(_) => 5,
            Self::NotFound(_) => 2,
            Self::AlreadyExists(_) => 17,
            Self::NotADirectory(_) => 20,
            Self::IsADirectory(_) => 21,
            Self::InvalidArgument(_) | Self::InvalidInode(_) => 22,
            Self::FileTooBig => 27,
            Self::OutOfSpace => 28,
            Self::DirectoryFull => 31,
            Self::NameTooLong => 36,
            Self::NotEmpty => 39,
        }
    }
}

impl From<bincode::Error> for FileSystemError {
    fn from(e: bincode::Error) -> Self {
        FileSystemError::Corrupted(e.to_string())
    }
}

/// 文件系统统一结果类型
pub type Result<T> = std::result::Result<T, FileSystemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_follows_posix() {
        assert_eq!(FileSystemError::NameTooLong.errno(), 36);
        assert_eq!(FileSystemError::DirectoryFull.errno(), 31);
        assert_eq!(FileSystemError::OutOfSpace.errno(), 28);
        assert_eq!(FileSystemError::FileTooBig.errno(), 27);
        assert_eq!(FileSystemError::NotEmpty.errno(), 39);
        assert_eq!(FileSystemError::NotFound("x".into()).errno(), 2);
    }

    #[test]
    fn io_errors_convert_and_keep_source() {
        use std::error::Error;
        let e: FileSystemError =
            std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(e, FileSystemError::Io(_)));
        assert!(e.source().is_some());
    }
}
