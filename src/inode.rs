use super::*;
use bitmap::BitMap;
use common::*;
use disk::{DInode, FileKind};
use sector_store::{read_blocking, write_blocking, SectorStore};

use log::debug;
use serde::{Deserialize, Serialize};

/// Fixed array of inode records; the index is the inode id.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeTable {
    inodes: Vec<DInode>,
}

/// Ids of the records forming one chain, head first.
pub struct Chain<'a> {
    table: &'a InodeTable,
    cur: Option<usize>,
    hops: usize,
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let ino = self.cur?;
        // a chain can never be longer than the table, anything else is a cycle
        if ino >= self.table.len() || self.hops >= self.table.len() {
            self.cur = None;
            return None;
        }
        self.hops += 1;
        self.cur = self.table.inodes[ino].next_inode();
        Some(ino)
    }
}

/// Sector indices owned by one chain, in logical order.
pub struct Sectors<'a> {
    table: &'a InodeTable,
    chain: Chain<'a>,
    cur: Option<usize>,
    slot: usize,
}

impl Iterator for Sectors<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let ino = self.cur?;
            if self.slot < NDIRECT {
                let sector = self.table.inodes[ino].direct[self.slot];
                if sector == 0 {
                    // an empty slot ends the chain
                    self.cur = None;
                    return None;
                }
                self.slot += 1;
                return Some(sector as usize);
            }
            self.cur = self.chain.next();
            self.slot = 0;
        }
    }
}

impl InodeTable {
    pub fn new(ninodes: usize) -> Self {
        Self {
            inodes: vec![DInode::default(); ninodes],
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    pub fn get(&self, ino: usize) -> Result<&DInode> {
        self.inodes
            .get(ino)
            .ok_or_else(|| FsError::Corrupt(format!("inode {} out of range", ino)))
    }

    pub fn get_mut(&mut self, ino: usize) -> Result<&mut DInode> {
        self.inodes
            .get_mut(ino)
            .ok_or_else(|| FsError::Corrupt(format!("inode {} out of range", ino)))
    }

    pub fn is_occupied(&self, ino: usize) -> bool {
        self.inodes.get(ino).is_some_and(DInode::is_occupied)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &DInode)> {
        self.inodes.iter().enumerate()
    }

    pub fn chain(&self, ino: usize) -> Chain<'_> {
        Chain {
            table: self,
            cur: Some(ino),
            hops: 0,
        }
    }

    pub fn sectors(&self, ino: usize) -> Sectors<'_> {
        let mut chain = self.chain(ino);
        let cur = chain.next();
        Sectors {
            table: self,
            chain,
            cur,
            slot: 0,
        }
    }

    fn find_free(&self) -> Result<usize> {
        self.inodes
            .iter()
            .position(|dinode| !dinode.is_occupied())
            .ok_or(FsError::NoInodes)
    }

    /// Claim a free record together with its first sector.
    pub fn alloc(&mut self, kind: FileKind, bitmap: &mut BitMap) -> Result<usize> {
        let ino = self.find_free()?;
        let sector = bitmap.alloc()?;
        self.inodes[ino] = DInode::head(kind, sector);
        debug!("ialloc: inode {} ({:?}) sector {}", ino, kind, sector);
        Ok(ino)
    }

    /// Concatenation of every sector the chain owns.
    pub fn read(&self, ino: usize, dev: &dyn SectorStore) -> Result<Vec<u8>> {
        let ss = dev.sector_size();
        let nsector = self.get(ino)?.nsector as usize;
        let mut image = vec![0u8; nsector * ss];
        let mut count = 0;
        for (sector, chunk) in self.sectors(ino).zip(image.chunks_mut(ss)) {
            check_sector(sector, dev)?;
            read_blocking(dev, sector, chunk);
            count += 1;
        }
        if count != nsector {
            return Err(FsError::Corrupt(format!(
                "inode {} claims {} sectors, chain holds {}",
                ino, nsector, count
            )));
        }
        Ok(image)
    }

    /// Store `bytes` over the chain, sector by sector. The inode must already
    /// own enough sectors; the last partial chunk is zero padded.
    pub fn write(&self, ino: usize, bytes: &[u8], dev: &dyn SectorStore) -> Result<()> {
        let ss = dev.sector_size();
        let capacity = self.get(ino)?.nsector as usize * ss;
        if bytes.len() > capacity {
            return Err(FsError::Corrupt(format!(
                "write of {} bytes into inode {} holding {}",
                bytes.len(),
                ino,
                capacity
            )));
        }
        let mut sectors = self.sectors(ino);
        let mut padded = vec![0u8; ss];
        for chunk in bytes.chunks(ss) {
            let sector = sectors
                .next()
                .ok_or_else(|| FsError::Corrupt(format!("inode {} chain is short", ino)))?;
            check_sector(sector, dev)?;
            if chunk.len() == ss {
                write_blocking(dev, sector, chunk);
            } else {
                padded.fill(0);
                padded[..chunk.len()].copy_from_slice(chunk);
                write_blocking(dev, sector, &padded);
            }
        }
        Ok(())
    }

    /// Grow the chain headed by `ino` by exactly one sector, linking a
    /// continuation record when the tail is full. Nothing is left claimed on
    /// failure.
    pub fn append(&mut self, ino: usize, bitmap: &mut BitMap) -> Result<usize> {
        let tail = self
            .chain(ino)
            .last()
            .ok_or_else(|| FsError::Corrupt(format!("inode {} out of range", ino)))?;
        let sector = match self.inodes[tail].free_slot() {
            Some(slot) => {
                let sector = bitmap.alloc()?;
                self.inodes[tail].direct[slot] = sector as u32;
                sector
            }
            None => {
                // nothing is claimed until the sector is ours too
                let cont = self.find_free()?;
                let sector = bitmap.alloc()?;
                self.inodes[cont] = DInode::continuation(sector);
                self.inodes[tail].set_next_inode(Some(cont));
                debug!("append: inode {} continues in inode {}", ino, cont);
                sector
            }
        };
        self.inodes[ino].nsector += 1;
        debug!(
            "append: inode {} sector {} ({} sectors)",
            ino, sector, self.inodes[ino].nsector
        );
        Ok(sector)
    }

    /// Free every sector of the chain and reset each record to Free. Returns
    /// the # of sectors released.
    pub fn erase(&mut self, ino: usize, bitmap: &mut BitMap) -> usize {
        let records: Vec<usize> = self.chain(ino).collect();
        let mut freed = 0;
        for rec in records {
            for &sector in self.inodes[rec].direct.iter().filter(|&&s| s != 0) {
                bitmap.free(sector as usize);
                freed += 1;
            }
            self.inodes[rec] = DInode::default();
        }
        debug!("erase: inode {} released {} sectors", ino, freed);
        freed
    }
}

fn check_sector(sector: usize, dev: &dyn SectorStore) -> Result<()> {
    if sector >= dev.num_sectors() {
        return Err(FsError::Corrupt(format!("sector {} beyond the volume", sector)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sector_store::MemStore;

    const SS: usize = 64;

    fn setup(nsectors: usize, ninodes: usize) -> (MemStore, InodeTable, BitMap) {
        (
            MemStore::new(SS, nsectors),
            InodeTable::new(ninodes),
            BitMap::new(nsectors),
        )
    }

    #[test]
    fn alloc_claims_first_free_record_and_sector() {
        let (_, mut table, mut bitmap) = setup(32, 4);
        let a = table.alloc(FileKind::Directory, &mut bitmap).unwrap();
        let b = table.alloc(FileKind::File, &mut bitmap).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.get(1).unwrap().direct[0], 2);
        assert_eq!(table.get(1).unwrap().nsector, 1);
        assert!(bitmap.is_set(1) && bitmap.is_set(2));
    }

    #[test]
    fn alloc_fails_without_inodes_or_sectors() {
        let (_, mut table, mut bitmap) = setup(32, 1);
        table.alloc(FileKind::File, &mut bitmap).unwrap();
        assert!(matches!(
            table.alloc(FileKind::File, &mut bitmap),
            Err(FsError::NoInodes)
        ));

        let (_, mut table, mut bitmap) = setup(2, 4);
        table.alloc(FileKind::File, &mut bitmap).unwrap();
        assert!(matches!(
            table.alloc(FileKind::File, &mut bitmap),
            Err(FsError::NoSpace)
        ));
        assert!(!table.is_occupied(1));
    }

    #[test]
    fn append_chains_past_seven_sectors() {
        let (_, mut table, mut bitmap) = setup(64, 4);
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..9 {
            table.append(ino, &mut bitmap).unwrap();
        }
        assert_eq!(table.get(ino).unwrap().nsector, 10);
        assert_eq!(table.chain(ino).collect::<Vec<_>>(), vec![0, 1]);
        let cont = table.get(1).unwrap();
        assert_eq!(cont.kind, FileKind::Free);
        assert_eq!(cont.direct[..3], [8, 9, 10]);
        assert_eq!(table.sectors(ino).collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn append_is_all_or_nothing_without_continuation_slot() {
        let (_, mut table, mut bitmap) = setup(64, 1);
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..6 {
            table.append(ino, &mut bitmap).unwrap();
        }
        let used = bitmap.count_set();
        assert!(matches!(table.append(ino, &mut bitmap), Err(FsError::NoInodes)));
        assert_eq!(bitmap.count_set(), used);
        assert_eq!(table.get(ino).unwrap().nsector, 7);
        assert_eq!(table.get(ino).unwrap().next_inode(), None);
    }

    #[test]
    fn continuation_record_is_sought_before_the_sector() {
        // sectors 1..=7 fill the head exactly, leaving no inode and no sector
        let (_, mut table, mut bitmap) = setup(8, 1);
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..6 {
            table.append(ino, &mut bitmap).unwrap();
        }
        assert_eq!(bitmap.count_set(), 7);
        assert!(matches!(table.append(ino, &mut bitmap), Err(FsError::NoInodes)));

        // with a spare record but no sector, the record stays free
        let (_, mut table, mut bitmap) = setup(8, 2);
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..6 {
            table.append(ino, &mut bitmap).unwrap();
        }
        assert!(matches!(table.append(ino, &mut bitmap), Err(FsError::NoSpace)));
        assert!(!table.is_occupied(1));
        assert_eq!(table.get(ino).unwrap().next_inode(), None);
        assert_eq!(table.get(ino).unwrap().nsector, 7);
    }

    #[test]
    fn read_write_span_the_chain() {
        let (dev, mut table, mut bitmap) = setup(64, 4);
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..8 {
            table.append(ino, &mut bitmap).unwrap();
        }
        let data: Vec<u8> = (0..9 * SS).map(|i| (i % 251) as u8).collect();
        table.write(ino, &data, &dev).unwrap();
        assert_eq!(table.read(ino, &dev).unwrap(), data);

        let too_big = vec![0u8; 9 * SS + 1];
        assert!(matches!(table.write(ino, &too_big, &dev), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn erase_frees_every_record_and_sector() {
        let (_, mut table, mut bitmap) = setup(64, 4);
        let keep = table.alloc(FileKind::File, &mut bitmap).unwrap();
        let ino = table.alloc(FileKind::File, &mut bitmap).unwrap();
        for _ in 0..10 {
            table.append(ino, &mut bitmap).unwrap();
        }
        assert_eq!(table.erase(ino, &mut bitmap), 11);
        assert_eq!(bitmap.count_set(), 1);
        assert!(table.is_occupied(keep));
        assert!(table.iter().filter(|(_, d)| d.is_occupied()).count() == 1);
    }

    #[test]
    fn cyclic_chain_terminates() {
        let (_, mut table, mut bitmap) = setup(64, 3);
        let a = table.alloc(FileKind::File, &mut bitmap).unwrap();
        let b = table.alloc(FileKind::File, &mut bitmap).unwrap();
        table.get_mut(a).unwrap().set_next_inode(Some(b));
        table.get_mut(b).unwrap().set_next_inode(Some(a));
        assert_eq!(table.chain(a).count(), 3);
    }
}
