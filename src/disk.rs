//! Disk layout:
//! [ superblock: header | inode table | free bit map ][ data sectors ... ]
//! The superblock region is `SuperBlock::region_sectors` sectors long, sector 0
//! is always part of it.

use super::*;
use bitmap::BitMap;
use common::*;
use inode::InodeTable;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FileKind {
    Free,
    Directory,
    File,
}

impl Default for FileKind {
    fn default() -> Self {
        FileKind::Free
    }
}

/// inode on disk
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DInode {
    /// File type. Filler in a continuation record.
    pub kind: FileKind,
    /// Size of file (bytes). Filler in a continuation record.
    pub size: u32,
    /// # of sectors owned by the whole chain, kept in the head record
    pub nsector: u32,
    /// Data sector addresses, 0 means unused
    pub direct: [u32; NDIRECT],
    /// continuation record, NO_INODE if the chain ends here
    next: u32,
}

impl DInode {
    /// encoded size: kind tag, size, nsector, direct slots, next
    pub const SIZE: usize = 4 + 4 + 4 + 4 * NDIRECT + 4;

    /// head of a new chain owning `sector`
    pub fn head(kind: FileKind, sector: usize) -> Self {
        let mut dinode = DInode {
            kind,
            nsector: 1,
            ..Default::default()
        };
        dinode.direct[0] = sector as u32;
        dinode
    }

    /// continuation record owning `sector`
    pub fn continuation(sector: usize) -> Self {
        let mut dinode = DInode::default();
        dinode.direct[0] = sector as u32;
        dinode
    }

    pub fn is_occupied(&self) -> bool {
        self.direct[0] != 0
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn next_inode(&self) -> Option<usize> {
        match self.next {
            NO_INODE => None,
            ino => Some(ino as usize),
        }
    }

    pub fn set_next_inode(&mut self, next: Option<usize>) {
        self.next = next.map_or(NO_INODE, |ino| ino as u32);
    }

    /// first free direct slot
    pub fn free_slot(&self) -> Option<usize> {
        self.direct.iter().position(|&s| s == 0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirEnt {
    name: [u8; DIRSIZ],
    /// inode num
    inum: u32,
}

impl DirEnt {
    /// Entry for a user supplied name.
    pub fn new(name: &str, inum: usize) -> Result<Self> {
        validate_name(name)?;
        Ok(Self::raw(name, inum))
    }

    /// Entry without name checks, for "." and "..".
    pub(crate) fn raw(name: &str, inum: usize) -> Self {
        let mut bytes = [0u8; DIRSIZ];
        let len = name.len().min(MAX_NAME_LEN);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        DirEnt {
            name: bytes,
            inum: inum as u32,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// a zero first byte marks the end of the used region
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn inum(&self) -> usize {
        self.inum as usize
    }

    pub fn rename(&mut self, name: &str) {
        *self = DirEnt::raw(name, self.inum());
    }
}

/// Names are 1..=MAX_NAME_LEN bytes, without '/' or NUL, and not "." or "..".
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.bytes().any(|b| b == b'/' || b == 0)
    {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuperHeader {
    /// Must be SFS_MAGIC
    pub magic: u32,
    pub sector_size: u32,
    /// Size of file system image (sectors)
    pub nsectors: u32,
    /// Number of inodes
    pub ninodes: u32,
}

impl SuperHeader {
    /// bytes the header takes at the start of sector 0
    pub const SIZE: usize = 16;

    pub fn decode(sector0: &[u8]) -> Result<Self> {
        let header: SuperHeader = bincode::deserialize(sector0)?;
        if header.magic != SFS_MAGIC {
            return Err(FsError::Corrupt(format!("bad magic {:#x}", header.magic)));
        }
        Ok(header)
    }

    /// # of sectors the superblock described by this header needs, without
    /// building its tables: header, inode table with its u64 length, bitmap
    /// with its u32 bit count and u64 byte length.
    pub fn region_sectors(&self) -> usize {
        let bytes = Self::SIZE as u64
            + 8
            + self.ninodes as u64 * DInode::SIZE as u64
            + 4
            + 8
            + (self.nsectors as u64).div_ceil(8);
        bytes.div_ceil(self.sector_size.max(1) as u64) as usize
    }
}

/// Everything the engine keeps about the volume besides data sectors.
#[derive(Clone, Serialize, Deserialize)]
pub struct SuperBlock {
    pub header: SuperHeader,
    pub inodes: InodeTable,
    pub bitmap: BitMap,
}

impl SuperBlock {
    pub fn new(sector_size: usize, nsectors: usize, ninodes: usize) -> Self {
        SuperBlock {
            header: SuperHeader {
                magic: SFS_MAGIC,
                sector_size: sector_size as u32,
                nsectors: nsectors as u32,
                ninodes: ninodes as u32,
            },
            inodes: InodeTable::new(ninodes),
            bitmap: BitMap::new(nsectors),
        }
    }

    /// # of sectors the serialized superblock occupies; the encoding has a
    /// fixed width so a blank superblock measures the same as a used one.
    pub fn region_sectors(&self) -> Result<usize> {
        let bytes = bincode::serialized_size(self)? as usize;
        Ok(bytes.div_ceil(self.header.sector_size as usize))
    }

    /// Serialized image padded to whole sectors.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut image = bincode::serialize(self)?;
        let len = self.region_sectors()? * self.header.sector_size as usize;
        image.resize(len, 0);
        Ok(image)
    }

    pub fn decode(image: &[u8]) -> Result<Self> {
        let sb: SuperBlock = bincode::deserialize(image)?;
        if sb.header.magic != SFS_MAGIC {
            return Err(FsError::Corrupt(format!("bad magic {:#x}", sb.header.magic)));
        }
        if sb.inodes.len() != sb.header.ninodes as usize || sb.bitmap.len() != sb.header.nsectors as usize {
            return Err(FsError::Corrupt("superblock tables disagree with header".into()));
        }
        Ok(sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_fixed() {
        let dinode = DInode::head(FileKind::File, 9);
        assert_eq!(DInode::SIZE, 44);
        assert_eq!(bincode::serialized_size(&dinode).unwrap() as usize, DInode::SIZE);
        let ent = DirEnt::raw("hello", 3);
        assert_eq!(ent.encode().unwrap().len(), DIRENT_SIZE);
        let header = SuperBlock::new(512, 100, 4).header;
        assert_eq!(bincode::serialized_size(&header).unwrap() as usize, SuperHeader::SIZE);
    }

    #[test]
    fn next_inode_uses_zero_as_sentinel() {
        let mut dinode = DInode::head(FileKind::Directory, 5);
        assert_eq!(dinode.next_inode(), None);
        dinode.set_next_inode(Some(12));
        assert_eq!(dinode.next_inode(), Some(12));
        dinode.set_next_inode(None);
        assert_eq!(dinode.next_inode(), None);
    }

    #[test]
    fn dirent_name_round_trip() {
        let ent = DirEnt::new("notes.txt", 42).unwrap();
        let back = DirEnt::decode(&ent.encode().unwrap()).unwrap();
        assert_eq!(back.name(), "notes.txt");
        assert_eq!(back.inum(), 42);
        assert!(!back.is_empty());
        assert!(DirEnt::decode(&[0u8; DIRENT_SIZE]).unwrap().is_empty());
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        for bad in ["", ".", "..", "a/b", "a\0b"] {
            assert!(matches!(validate_name(bad), Err(FsError::InvalidName(_))));
        }
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(validate_name(&long), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn superblock_region_covers_tables() {
        let sb = SuperBlock::new(128, 64, 10);
        // 16 header + 8 len + 10 * 44 inodes + 4 nbits + 8 len + 8 bitmap bytes
        assert_eq!(sb.region_sectors().unwrap(), 484usize.div_ceil(128));
        assert_eq!(sb.header.region_sectors(), sb.region_sectors().unwrap());
        let image = sb.encode().unwrap();
        assert_eq!(image.len(), 4 * 128);
        let back = SuperBlock::decode(&image).unwrap();
        assert_eq!(back.header, sb.header);
        assert_eq!(SuperHeader::decode(&image[..128]).unwrap(), sb.header);
    }

    #[test]
    fn header_region_matches_encoding() {
        for (ss, nsectors, ninodes) in [(512, 10_000, 2000), (128, 17, 3), (4096, 1, 1)] {
            let sb = SuperBlock::new(ss, nsectors, ninodes);
            assert_eq!(sb.header.region_sectors(), sb.region_sectors().unwrap());
        }
        let huge = SuperHeader {
            magic: SFS_MAGIC,
            sector_size: 512,
            nsectors: 100,
            ninodes: u32::MAX,
        };
        assert!(huge.region_sectors() > 100);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        assert!(matches!(
            SuperHeader::decode(&[0u8; 64]),
            Err(FsError::Corrupt(_))
        ));
    }
}
