use super::*;
use common::*;
use disk::DirEnt;
use file::SectorBuf;

/// A directory's data viewed as a dense array of `DirEnt` slots. The used
/// region ends at the buffer end or at the first slot with an empty name.
pub struct Directory {
    buf: SectorBuf,
}

impl Directory {
    pub fn from_image(image: Vec<u8>, sector_size: usize) -> Self {
        Self {
            buf: SectorBuf::new(image, sector_size),
        }
    }

    /// One sector holding only "." and "..".
    pub fn empty(self_ino: usize, parent_ino: usize, sector_size: usize) -> Result<Self> {
        let mut dir = Self::from_image(vec![0u8; sector_size], sector_size);
        dir.set(0, &DirEnt::raw(".", self_ino))?;
        dir.set(1, &DirEnt::raw("..", parent_ino))?;
        Ok(dir)
    }

    pub fn slots(&self) -> usize {
        self.buf.capacity() / DIRENT_SIZE
    }

    fn slot(&self, i: usize) -> Result<DirEnt> {
        let off = i * DIRENT_SIZE;
        DirEnt::decode(&self.buf.as_bytes()[off..off + DIRENT_SIZE])
    }

    fn set(&mut self, i: usize, ent: &DirEnt) -> Result<()> {
        let off = i * DIRENT_SIZE;
        if i >= self.slots() {
            return Err(FsError::Corrupt(format!("dirent slot {} beyond the directory", i)));
        }
        self.buf.overlay(off, &ent.encode()?);
        Ok(())
    }

    /// Used entries in insertion order, "." and ".." and tombstones included.
    pub fn entries(&self) -> Result<Vec<DirEnt>> {
        let mut ents = Vec::new();
        for i in 0..self.slots() {
            let ent = self.slot(i)?;
            if ent.is_empty() {
                break;
            }
            ents.push(ent);
        }
        Ok(ents)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<usize>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|ent| ent.name_bytes() == name.as_bytes())
            .map(|ent| ent.inum()))
    }

    /// Visible names; "." and ".." are hidden, and so are tombstones since
    /// they are named ".".
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|ent| !is_dot(ent))
            .map(|ent| ent.name())
            .collect())
    }

    /// Entries besides "." and ".." and tombstones.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.iter().all(is_dot))
    }

    /// Put `ent` in the first free slot. `false` means the caller has to
    /// grow the owning inode by a sector and call `grow` first.
    pub fn insert(&mut self, ent: &DirEnt) -> Result<bool> {
        let used = self.entries()?.len();
        if used >= self.slots() {
            return Ok(false);
        }
        self.set(used, ent)?;
        Ok(true)
    }

    pub fn grow(&mut self) {
        self.buf.append_sector();
    }

    /// Rename the entry to "." so it drops out of listings. The slot stays
    /// used: later inserts go after it, never into it.
    pub fn tombstone(&mut self, name: &str) -> Result<Option<usize>> {
        let ents = self.entries()?;
        match ents
            .iter()
            .position(|ent| ent.name_bytes() == name.as_bytes())
        {
            Some(i) => {
                let mut ent = ents[i].clone();
                let inum = ent.inum();
                ent.rename(".");
                self.set(i, &ent)?;
                Ok(Some(inum))
            }
            None => Ok(None),
        }
    }

    /// Bytes of used slots, kept in the directory inode's size.
    pub fn used_bytes(&self) -> Result<usize> {
        Ok(self.entries()?.len() * DIRENT_SIZE)
    }

    pub fn sectors(&self) -> usize {
        self.buf.sectors()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }
}

fn is_dot(ent: &DirEnt) -> bool {
    matches!(ent.name_bytes(), b"." | b"..")
}
