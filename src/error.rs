use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no free sector left on the volume")]
    NoSpace,
    #[error("inode table is full")]
    NoInodes,
    #[error("{0}: no such file or directory")]
    NotFound(String),
    #[error("open file table is full")]
    TableFull,
    #[error("bad file descriptor {0}")]
    InvalidDescriptor(usize),
    #[error("position {0} is outside the file")]
    InvalidPosition(usize),
    #[error("end of file")]
    EndOfFile,
    #[error("{0}: already exists")]
    AlreadyExists(String),
    #[error("{0}: not a directory")]
    NotADirectory(String),
    #[error("{0}: not a regular file")]
    NotAFile(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("{0}: directory not empty")]
    DirectoryNotEmpty(String),
    #[error("{0}: file is open")]
    InUse(String),
    #[error("invalid volume geometry: {0}")]
    InvalidGeometry(String),
    #[error("corrupted file system: {0}")]
    Corrupt(String),
    #[error("superblock codec: {0}")]
    Codec(#[from] bincode::Error),
}
