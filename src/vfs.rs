use super::*;
use common::*;
use config::VolumeConfig;
use dir::Directory;
use disk::{validate_name, DirEnt, FileKind, SuperBlock, SuperHeader};
use fdtable::FdTable;
use sector_store::{read_blocking, write_blocking, SectorStore};

use log::{debug, info, warn};
use std::sync::Arc;

/// What `stat` reports about an inode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub ino: usize,
    pub kind: FileKind,
    pub size: usize,
    pub nsector: usize,
}

/// A mounted volume: superblock tables, open files and the current directory.
pub struct Volume {
    dev: Arc<dyn SectorStore>,
    sb: SuperBlock,
    /// superblock image as last written; `sync` only rewrites what differs
    shadow: Vec<u8>,
    fds: FdTable,
    cwd: usize,
    config: VolumeConfig,
}

impl Volume {
    /// Format `dev` and return the fresh volume.
    pub fn create(dev: Arc<dyn SectorStore>, config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let sb = SuperBlock::new(dev.sector_size(), dev.num_sectors(), config.max_inodes);
        let mut vol = Volume {
            dev,
            sb,
            shadow: Vec::new(),
            fds: FdTable::new(config.max_open_files),
            cwd: ROOTINO,
            config,
        };
        vol.mkfs()?;
        Ok(vol)
    }

    /// Load the superblock of an already formatted `dev`.
    pub fn mount(dev: Arc<dyn SectorStore>, config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let ss = dev.sector_size();
        if ss < SuperHeader::SIZE {
            return Err(FsError::InvalidGeometry(format!("sector size {} too small", ss)));
        }
        let mut sector0 = vec![0u8; ss];
        read_blocking(&*dev, 0, &mut sector0);
        let header = SuperHeader::decode(&sector0)?;
        if header.sector_size as usize != ss || header.nsectors as usize != dev.num_sectors() {
            return Err(FsError::InvalidGeometry(format!(
                "image formatted for {} sectors of {} bytes, device has {} of {}",
                header.nsectors,
                header.sector_size,
                dev.num_sectors(),
                ss
            )));
        }
        let region = header.region_sectors();
        if region >= dev.num_sectors() {
            return Err(FsError::Corrupt(format!(
                "superblock of {} sectors does not fit the volume",
                region
            )));
        }
        let mut image = vec![0u8; region * ss];
        for (sector, chunk) in image.chunks_mut(ss).enumerate() {
            read_blocking(&*dev, sector, chunk);
        }
        let sb = SuperBlock::decode(&image)?;
        if !sb.inodes.get(ROOTINO)?.is_dir() {
            return Err(FsError::Corrupt("root inode is not a directory".into()));
        }
        // a later mkfs keeps the inode count the image was formatted with
        let config = config.with_inodes(header.ninodes as usize);
        let vol = Volume {
            dev,
            sb,
            shadow: image,
            fds: FdTable::new(config.max_open_files),
            cwd: ROOTINO,
            config,
        };
        let report = vol.fsck()?;
        if !report.is_clean() {
            warn!("mount: volume is inconsistent: {:?}", report);
        }
        info!(
            "mount: {} sectors of {} bytes, {} inodes, {} sectors free",
            header.nsectors,
            ss,
            header.ninodes,
            vol.free_sectors()
        );
        Ok(vol)
    }

    /// Wipe the volume: empty inode table and bitmap, a root directory with
    /// only "." and "..", no open files, cwd at root.
    pub fn mkfs(&mut self) -> Result<()> {
        let ss = self.dev.sector_size();
        let nsectors = self.dev.num_sectors();
        if ss < 2 * DIRENT_SIZE || ss < SuperHeader::SIZE {
            return Err(FsError::InvalidGeometry(format!("sector size {} too small", ss)));
        }
        if nsectors > u32::MAX as usize {
            return Err(FsError::InvalidGeometry(format!("{} sectors is too many", nsectors)));
        }
        let mut sb = SuperBlock::new(ss, nsectors, self.config.max_inodes);
        let region = sb.region_sectors()?;
        if region >= nsectors {
            return Err(FsError::InvalidGeometry(format!(
                "superblock needs {} sectors, volume has {}",
                region, nsectors
            )));
        }
        for sector in 0..region {
            sb.bitmap.set(sector);
        }
        let root = sb.inodes.alloc(FileKind::Directory, &mut sb.bitmap)?;
        if root != ROOTINO {
            return Err(FsError::Corrupt(format!("root landed in inode {}", root)));
        }
        let dir = Directory::empty(root, root, ss)?;
        sb.inodes.write(root, dir.as_bytes(), &*self.dev)?;
        sb.inodes.get_mut(root)?.size = dir.used_bytes()? as u32;

        self.sb = sb;
        self.shadow.clear();
        self.fds.clear();
        self.cwd = ROOTINO;
        self.sync()?;
        info!(
            "mkfs: {} sectors of {} bytes, {} inodes, superblock {} sectors",
            nsectors, ss, self.config.max_inodes, region
        );
        Ok(())
    }

    /// Write back the superblock sectors that changed since the last sync.
    pub fn sync(&mut self) -> Result<()> {
        let ss = self.dev.sector_size();
        let image = self.sb.encode()?;
        let mut written = 0;
        for (sector, chunk) in image.chunks(ss).enumerate() {
            if self.shadow.get(sector * ss..(sector + 1) * ss) != Some(chunk) {
                write_blocking(&*self.dev, sector, chunk);
                written += 1;
            }
        }
        self.shadow = image;
        debug!("sync: {} superblock sectors written", written);
        Ok(())
    }

    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        let parent = self.cwd;
        let mut dir = self.load_dir(parent)?;
        if dir.lookup(name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let ino = self.sb.inodes.alloc(FileKind::Directory, &mut self.sb.bitmap)?;
        let child = Directory::empty(ino, parent, self.dev.sector_size())?;
        let linked = self
            .store_dir(ino, &child)
            .and_then(|_| self.link(parent, &mut dir, &DirEnt::new(name, ino)?));
        if let Err(e) = linked {
            self.sb.inodes.erase(ino, &mut self.sb.bitmap);
            return Err(e);
        }
        self.sync()?;
        debug!("mkdir: {} -> inode {}", name, ino);
        Ok(())
    }

    /// Change directory. A leading '/' starts from root; on any failing
    /// segment the cwd stays where it was.
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let target = self.walk(path)?;
        debug!("cd: {} -> inode {}", path, target);
        self.cwd = target;
        Ok(())
    }

    /// Names in the current directory, in creation order.
    pub fn ls(&self) -> Result<Vec<String>> {
        self.load_dir(self.cwd)?.list()
    }

    /// Open `path`, creating an empty file if it does not exist.
    pub fn open(&mut self, path: &str) -> Result<usize> {
        if !self.fds.has_free_slot() {
            return Err(FsError::TableFull);
        }
        let (dir_ino, leaf) = self.split_path(path)?;
        let mut dir = self.load_dir(dir_ino)?;
        let ino = match dir.lookup(leaf)? {
            Some(ino) => {
                if !self.sb.inodes.get(ino)?.is_file() {
                    return Err(FsError::NotAFile(path.to_string()));
                }
                ino
            }
            None => {
                validate_name(leaf)?;
                let ino = self.sb.inodes.alloc(FileKind::File, &mut self.sb.bitmap)?;
                let linked =
                    DirEnt::new(leaf, ino).and_then(|ent| self.link(dir_ino, &mut dir, &ent));
                if let Err(e) = linked {
                    self.sb.inodes.erase(ino, &mut self.sb.bitmap);
                    return Err(e);
                }
                self.sync()?;
                debug!("open: created {} -> inode {}", path, ino);
                ino
            }
        };
        self.fds.open(ino)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.fds.close(fd)
    }

    /// Read up to `max_len` bytes at the cursor and advance it.
    pub fn read(&mut self, fd: usize, max_len: usize) -> Result<Vec<u8>> {
        let of = *self.fds.get(fd)?;
        let data = file::read_at(&*self.dev, &self.sb.inodes, of.ino, of.pos, max_len)?;
        self.fds.get_mut(fd)?.pos += data.len();
        Ok(data)
    }

    /// Write at the cursor, growing the file as needed, and advance the
    /// cursor by the bytes written.
    pub fn write(&mut self, fd: usize, data: &[u8]) -> Result<usize> {
        let of = *self.fds.get(fd)?;
        let n = file::write_at(
            &*self.dev,
            &mut self.sb.inodes,
            &mut self.sb.bitmap,
            of.ino,
            of.pos,
            data,
        )?;
        self.fds.get_mut(fd)?.pos += n;
        self.sync()?;
        Ok(n)
    }

    /// Move the cursor; valid targets are `0..size`.
    pub fn seek(&mut self, fd: usize, pos: usize) -> Result<usize> {
        let of = self.fds.get_mut(fd)?;
        let size = self.sb.inodes.get(of.ino)?.size as usize;
        if pos >= size {
            return Err(FsError::InvalidPosition(pos));
        }
        of.pos = pos;
        Ok(pos)
    }

    /// Remove a file or an empty directory from the current directory. The
    /// entry is renamed to "." rather than compacted away.
    pub fn rm(&mut self, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let cwd = self.cwd;
        let mut dir = self.load_dir(cwd)?;
        let ino = dir
            .lookup(name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        if self.sb.inodes.get(ino)?.is_dir() {
            if !self.load_dir(ino)?.is_empty()? {
                return Err(FsError::DirectoryNotEmpty(name.to_string()));
            }
        } else if self.fds.is_open(ino) {
            return Err(FsError::InUse(name.to_string()));
        }
        dir.tombstone(name)?;
        self.store_dir(cwd, &dir)?;
        let freed = self.sb.inodes.erase(ino, &mut self.sb.bitmap);
        self.sync()?;
        debug!("rm: {} (inode {}) freed {} sectors", name, ino, freed);
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let ino = self.resolve(path)?;
        let dinode = self.sb.inodes.get(ino)?;
        Ok(Stat {
            ino,
            kind: dinode.kind,
            size: dinode.size as usize,
            nsector: dinode.nsector as usize,
        })
    }

    pub fn cwd(&self) -> usize {
        self.cwd
    }

    pub fn free_sectors(&self) -> usize {
        self.sb.bitmap.count_free()
    }

    pub(crate) fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    #[cfg(test)]
    pub(crate) fn superblock_mut(&mut self) -> &mut SuperBlock {
        &mut self.sb
    }

    fn load_dir(&self, ino: usize) -> Result<Directory> {
        if !self.sb.inodes.get(ino)?.is_dir() {
            return Err(FsError::NotADirectory(format!("inode {}", ino)));
        }
        let image = self.sb.inodes.read(ino, &*self.dev)?;
        Ok(Directory::from_image(image, self.dev.sector_size()))
    }

    fn store_dir(&mut self, ino: usize, dir: &Directory) -> Result<()> {
        self.sb.inodes.write(ino, dir.as_bytes(), &*self.dev)?;
        self.sb.inodes.get_mut(ino)?.size = dir.used_bytes()? as u32;
        Ok(())
    }

    /// Add `ent` to the directory `dir_ino`, growing it by one sector when
    /// every slot is taken. The image is stored only once the growth worked.
    fn link(&mut self, dir_ino: usize, dir: &mut Directory, ent: &DirEnt) -> Result<()> {
        if !dir.insert(ent)? {
            self.sb.inodes.append(dir_ino, &mut self.sb.bitmap)?;
            dir.grow();
            if !dir.insert(ent)? {
                return Err(FsError::Corrupt(format!(
                    "directory inode {} full after growing",
                    dir_ino
                )));
            }
        }
        self.store_dir(dir_ino, dir)
    }

    /// Directory reached by following `path` from cwd (or root).
    fn walk(&self, path: &str) -> Result<usize> {
        let mut cur = if path.starts_with('/') { ROOTINO } else { self.cwd };
        for seg in path.split('/').filter(|seg| !seg.is_empty()) {
            let next = self
                .load_dir(cur)?
                .lookup(seg)?
                .ok_or_else(|| FsError::NotFound(seg.to_string()))?;
            if !self.sb.inodes.get(next)?.is_dir() {
                return Err(FsError::NotADirectory(seg.to_string()));
            }
            cur = next;
        }
        Ok(cur)
    }

    /// Split `path` into the directory holding its last segment and that
    /// segment.
    fn split_path<'p>(&self, path: &'p str) -> Result<(usize, &'p str)> {
        match path.rfind('/') {
            Some(i) => Ok((self.walk(&path[..=i])?, &path[i + 1..])),
            None => Ok((self.cwd, path)),
        }
    }

    fn resolve(&self, path: &str) -> Result<usize> {
        let (dir_ino, leaf) = self.split_path(path)?;
        if leaf.is_empty() {
            return Ok(dir_ino);
        }
        self.load_dir(dir_ino)?
            .lookup(leaf)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }
}
