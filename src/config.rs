use super::*;
use common::*;

/// Tunables chosen at mkfs/mount time. The sector geometry is not here, it
/// belongs to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConfig {
    /// # of inode records in the superblock
    pub max_inodes: usize,
    /// # of descriptor slots in the open file table
    pub max_open_files: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        VolumeConfig {
            max_inodes: MAXINODE,
            max_open_files: MAXFPTAB,
        }
    }
}

impl VolumeConfig {
    pub fn with_inodes(mut self, max_inodes: usize) -> Self {
        self.max_inodes = max_inodes;
        self
    }

    pub fn with_open_files(mut self, max_open_files: usize) -> Self {
        self.max_open_files = max_open_files;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_inodes == 0 || self.max_inodes > u32::MAX as usize {
            return Err(FsError::InvalidGeometry(format!(
                "inode count {} out of range",
                self.max_inodes
            )));
        }
        if self.max_open_files == 0 {
            return Err(FsError::InvalidGeometry(
                "open file table needs at least one slot".into(),
            ));
        }
        Ok(())
    }
}
