use super::*;

use log::debug;
use serde::{Deserialize, Serialize};

/// One bit per sector of the whole volume, kept inside the superblock.
#[derive(Clone, Serialize, Deserialize)]
pub struct BitMap {
    nbits: u32, // # of sectors, including the superblock ones
    bits: Vec<u8>,
}

impl BitMap {
    pub fn new(nbits: usize) -> Self {
        Self {
            nbits: nbits as u32,
            bits: vec![0u8; nbits.div_ceil(8)],
        }
    }

    pub fn len(&self) -> usize {
        self.nbits as usize
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    fn locate(sector: usize) -> (usize, u8) {
        let byte = sector / 8; // 第几个 byte
        let bit = sector % 8;
        (byte, 1 << bit)
    }

    pub fn is_set(&self, sector: usize) -> bool {
        if sector >= self.len() {
            return false;
        }
        let (byte, mask) = Self::locate(sector);
        self.bits[byte] & mask != 0
    }

    pub fn set(&mut self, sector: usize) {
        assert!(sector < self.len(), "bitmap: sector {} out of range", sector);
        let (byte, mask) = Self::locate(sector);
        self.bits[byte] |= mask;
    }

    /// First fit from sector 1 upward. Sector 0 is never handed out, so 0 can
    /// mean "no sector" in an inode.
    pub fn alloc(&mut self) -> Result<usize> {
        for sector in 1..self.len() {
            let (byte, mask) = Self::locate(sector);
            if self.bits[byte] & mask == 0 {
                self.bits[byte] |= mask;
                debug!("bitmap: alloc sector {}", sector);
                return Ok(sector);
            }
        }
        Err(FsError::NoSpace)
    }

    pub fn free(&mut self, sector: usize) {
        if sector >= self.len() {
            return;
        }
        let (byte, mask) = Self::locate(sector);
        self.bits[byte] &= !mask;
        debug!("bitmap: free sector {}", sector);
    }

    pub fn count_set(&self) -> usize {
        (0..self.len()).filter(|&s| self.is_set(s)).count()
    }

    pub fn count_free(&self) -> usize {
        self.len() - self.count_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_first_fit_and_skips_sector_zero() {
        let mut bm = BitMap::new(10);
        assert_eq!(bm.alloc().unwrap(), 1);
        assert_eq!(bm.alloc().unwrap(), 2);
        assert_eq!(bm.alloc().unwrap(), 3);
        bm.free(2);
        assert_eq!(bm.alloc().unwrap(), 2);
        assert!(!bm.is_set(0));
    }

    #[test]
    fn alloc_reports_no_space() {
        let mut bm = BitMap::new(4);
        for _ in 1..4 {
            bm.alloc().unwrap();
        }
        assert!(matches!(bm.alloc(), Err(FsError::NoSpace)));
        assert_eq!(bm.count_set(), 3);
        assert_eq!(bm.count_free(), 1);
    }

    #[test]
    fn reserved_sectors_are_skipped() {
        let mut bm = BitMap::new(20);
        for s in 0..9 {
            bm.set(s);
        }
        assert_eq!(bm.alloc().unwrap(), 9);
    }

    #[test]
    fn free_is_unconditional() {
        let mut bm = BitMap::new(16);
        bm.free(5);
        bm.free(500);
        assert!(!bm.is_set(5));
        bm.set(5);
        bm.free(5);
        bm.free(5);
        assert!(!bm.is_set(5));
    }
}
