//! Consistency scan of the superblock tables. Not needed by any operation;
//! `mount` runs it and only logs what it finds.

use super::*;
use disk::{FileKind, SuperBlock};
use vfs::Volume;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsckReport {
    /// marked in the bitmap but owned by nobody
    pub leaked: Vec<usize>,
    /// owned by an inode but clear in the bitmap
    pub unmarked: Vec<usize>,
    /// owned more than once (the superblock region counts as an owner)
    pub shared: Vec<usize>,
    /// sector indices beyond the volume
    pub bad_sectors: Vec<usize>,
    /// occupied records no head inode reaches
    pub orphans: Vec<usize>,
    /// heads whose nsector disagrees with their chain
    pub miscounted: Vec<usize>,
    /// heads whose size does not fit in their sectors
    pub oversized: Vec<usize>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        *self == FsckReport::default()
    }
}

pub fn check(sb: &SuperBlock) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    let nsectors = sb.bitmap.len();
    let sector_size = sb.header.sector_size as usize;
    let mut owners = vec![0u32; nsectors];
    let mut reached = vec![false; sb.inodes.len()];

    for owner in owners.iter_mut().take(sb.region_sectors()?) {
        *owner += 1;
    }

    let mut own = |sector: usize, report: &mut FsckReport| {
        if sector >= nsectors {
            report.bad_sectors.push(sector);
        } else {
            owners[sector] += 1;
        }
    };

    let heads = sb
        .inodes
        .iter()
        .filter(|(_, d)| d.is_occupied() && d.kind != FileKind::Free);
    for (ino, dinode) in heads {
        for rec in sb.inodes.chain(ino) {
            reached[rec] = true;
        }
        let mut count = 0;
        for sector in sb.inodes.sectors(ino) {
            own(sector, &mut report);
            count += 1;
        }
        if count != dinode.nsector as usize {
            report.miscounted.push(ino);
        }
        if dinode.size as usize > dinode.nsector as usize * sector_size {
            report.oversized.push(ino);
        }
    }

    for (ino, dinode) in sb.inodes.iter() {
        if dinode.is_occupied() && !reached[ino] {
            report.orphans.push(ino);
            for &sector in dinode.direct.iter().filter(|&&s| s != 0) {
                own(sector as usize, &mut report);
            }
        }
    }

    for (sector, &n) in owners.iter().enumerate() {
        let marked = sb.bitmap.is_set(sector);
        if n == 0 && marked {
            report.leaked.push(sector);
        }
        if n > 0 && !marked {
            report.unmarked.push(sector);
        }
        if n > 1 {
            report.shared.push(sector);
        }
    }
    Ok(report)
}

impl Volume {
    pub fn fsck(&self) -> Result<FsckReport> {
        check(self.superblock())
    }
}
