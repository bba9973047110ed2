use super::*;

use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFile {
    pub ino: usize,
    /// byte cursor
    pub pos: usize,
}

/// In-memory table of open files. Descriptor = slot index + 1.
pub struct FdTable {
    slots: Vec<Option<OpenFile>>,
}

impl FdTable {
    pub fn new(nslots: usize) -> Self {
        Self {
            slots: vec![None; nslots],
        }
    }

    /// Lowest free descriptor, cursor at 0.
    pub fn open(&mut self, ino: usize) -> Result<usize> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TableFull)?;
        self.slots[slot] = Some(OpenFile { ino, pos: 0 });
        debug!("fd {} -> inode {}", slot + 1, ino);
        Ok(slot + 1)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        let slot = self.slot_mut(fd)?;
        *slot = None;
        debug!("fd {} closed", fd);
        Ok(())
    }

    fn slot_mut(&mut self, fd: usize) -> Result<&mut Option<OpenFile>> {
        match fd.checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            Some(slot) if slot.is_some() => Ok(slot),
            _ => Err(FsError::InvalidDescriptor(fd)),
        }
    }

    pub fn get(&self, fd: usize) -> Result<&OpenFile> {
        fd.checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidDescriptor(fd))
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut OpenFile> {
        fd.checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidDescriptor(fd))
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    pub fn is_open(&self, ino: usize) -> bool {
        self.slots.iter().flatten().any(|of| of.ino == ino)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_descriptor_is_reused() {
        let mut fds = FdTable::new(3);
        assert_eq!(fds.open(7).unwrap(), 1);
        assert_eq!(fds.open(8).unwrap(), 2);
        assert_eq!(fds.open(9).unwrap(), 3);
        assert!(matches!(fds.open(10), Err(FsError::TableFull)));
        fds.close(2).unwrap();
        assert!(fds.has_free_slot());
        assert_eq!(fds.open(10).unwrap(), 2);
        assert_eq!(fds.get(2).unwrap().ino, 10);
    }

    #[test]
    fn bad_descriptors_are_rejected() {
        let mut fds = FdTable::new(2);
        assert!(matches!(fds.close(0), Err(FsError::InvalidDescriptor(0))));
        assert!(matches!(fds.close(1), Err(FsError::InvalidDescriptor(1))));
        assert!(matches!(fds.close(3), Err(FsError::InvalidDescriptor(3))));
        let fd = fds.open(4).unwrap();
        fds.close(fd).unwrap();
        assert!(matches!(fds.close(fd), Err(FsError::InvalidDescriptor(_))));
        assert!(fds.get(fd).is_err());
    }

    #[test]
    fn cursors_are_per_descriptor() {
        let mut fds = FdTable::new(4);
        let a = fds.open(5).unwrap();
        let b = fds.open(5).unwrap();
        fds.get_mut(a).unwrap().pos = 10;
        assert_eq!(fds.get(b).unwrap().pos, 0);
        assert!(fds.is_open(5));
        fds.clear();
        assert!(!fds.is_open(5));
    }
}
