/// root i-number
pub const ROOTINO: usize = 0;

pub const SFS_MAGIC: u32 = 0x5346_5331;

/// direct sector slots in one inode record
pub const NDIRECT: usize = 7;

/// on-disk value of `next` when the chain ends here
pub const NO_INODE: u32 = 0;

/// Directory is a file containing a sequence of dirent structures.
pub const DIRSIZ: usize = 28;

/// size of one encoded dirent, name plus inode number
pub const DIRENT_SIZE: usize = DIRSIZ + 4;

/// max bytes of a name, one byte is kept for the terminating NUL
pub const MAX_NAME_LEN: usize = DIRSIZ - 1;

/// default # of inode records
pub const MAXINODE: usize = 2000;

/// default # of descriptor slots
pub const MAXFPTAB: usize = 2000;
