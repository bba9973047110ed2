//! Byte-stream I/O over an inode chain.

use super::*;
use bitmap::BitMap;
use inode::InodeTable;
use sector_store::SectorStore;

use log::{debug, warn};

/// In-memory image of an inode's sectors. Capacity only grows a whole sector
/// at a time, paired with an `InodeTable::append` on the owning inode.
pub struct SectorBuf {
    bytes: Vec<u8>,
    sector_size: usize,
}

impl SectorBuf {
    pub fn new(bytes: Vec<u8>, sector_size: usize) -> Self {
        debug_assert!(bytes.len() % sector_size == 0);
        Self { bytes, sector_size }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn sectors(&self) -> usize {
        self.bytes.len() / self.sector_size
    }

    pub fn append_sector(&mut self) {
        let len = self.bytes.len() + self.sector_size;
        self.bytes.resize(len, 0);
    }

    pub fn overlay(&mut self, pos: usize, data: &[u8]) {
        self.bytes[pos..pos + data.len()].copy_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Size of `ino`, which must fit in the sectors the chain owns.
fn checked_size(inodes: &InodeTable, ino: usize, sector_size: usize) -> Result<usize> {
    let dinode = inodes.get(ino)?;
    let capacity = dinode.nsector as usize * sector_size;
    if dinode.size as usize > capacity {
        return Err(FsError::Corrupt(format!(
            "inode {} size {} exceeds its {} sectors",
            ino, dinode.size, dinode.nsector
        )));
    }
    Ok(dinode.size as usize)
}

/// Read up to `len` bytes at `pos`, clamped to the file size. Nothing left to
/// read, including `len == 0`, is `EndOfFile`.
pub fn read_at(
    dev: &dyn SectorStore,
    inodes: &InodeTable,
    ino: usize,
    pos: usize,
    len: usize,
) -> Result<Vec<u8>> {
    let size = checked_size(inodes, ino, dev.sector_size())?;
    let n = len.min(size.saturating_sub(pos));
    if n == 0 {
        return Err(FsError::EndOfFile);
    }
    let image = inodes.read(ino, dev)?;
    image
        .get(pos..pos + n)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| FsError::Corrupt(format!("inode {} image shorter than its size", ino)))
}

/// Write `data` at `pos`, growing the chain as needed. Returns the # of bytes
/// written, which is short only when growth ran out of sectors or inodes.
pub fn write_at(
    dev: &dyn SectorStore,
    inodes: &mut InodeTable,
    bitmap: &mut BitMap,
    ino: usize,
    pos: usize,
    data: &[u8],
) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    checked_size(inodes, ino, dev.sector_size())?;
    let end = pos + data.len();
    if end > u32::MAX as usize {
        return Err(FsError::NoSpace);
    }
    let mut image = SectorBuf::new(inodes.read(ino, dev)?, dev.sector_size());
    let mut n = data.len();
    while image.capacity() < end {
        match inodes.append(ino, bitmap) {
            Ok(_) => image.append_sector(),
            Err(e) if image.capacity() > pos => {
                n = image.capacity() - pos;
                warn!(
                    "write: inode {} short write of {}/{} bytes: {}",
                    ino,
                    n,
                    data.len(),
                    e
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    image.overlay(pos, &data[..n]);
    inodes.write(ino, image.as_bytes(), dev)?;
    let dinode = inodes.get_mut(ino)?;
    dinode.size = dinode.size.max((pos + n) as u32);
    debug!(
        "write: inode {} [{}, {}) size {} sectors {}",
        ino,
        pos,
        pos + n,
        dinode.size,
        dinode.nsector
    );
    Ok(n)
}
