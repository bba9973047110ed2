//! The sector device the engine runs on, plus the two stores shipped with the
//! crate: a RAM disk and an image file.

use log::{trace, warn};

use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

pub trait SectorStore: Send + Sync + Any {
    fn sector_size(&self) -> usize;
    fn num_sectors(&self) -> usize;
    /// `buf` is exactly one sector long.
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_sector(&self, sector: usize, buf: &[u8]) -> io::Result<()>;
}

/// Read one sector, retrying until the device reports success.
pub fn read_blocking(dev: &dyn SectorStore, sector: usize, buf: &mut [u8]) {
    let mut attempt = 0usize;
    loop {
        match dev.read_sector(sector, buf) {
            Ok(()) => {
                trace!("read sector {}", sector);
                return;
            }
            Err(e) => {
                attempt += 1;
                warn!("read of sector {} failed (attempt {}): {}", sector, attempt, e);
            }
        }
    }
}

/// Write one sector, retrying until the device reports success.
pub fn write_blocking(dev: &dyn SectorStore, sector: usize, buf: &[u8]) {
    let mut attempt = 0usize;
    loop {
        match dev.write_sector(sector, buf) {
            Ok(()) => {
                trace!("wrote sector {}", sector);
                return;
            }
            Err(e) => {
                attempt += 1;
                warn!("write of sector {} failed (attempt {}): {}", sector, attempt, e);
            }
        }
    }
}

fn check_request(sector: usize, len: usize, sector_size: usize, num_sectors: usize) -> io::Result<()> {
    if sector >= num_sectors {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("sector {} out of range (0..{})", sector, num_sectors),
        ));
    }
    if len != sector_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("buffer of {} bytes, sector is {}", len, sector_size),
        ));
    }
    Ok(())
}

/// RAM disk.
pub struct MemStore {
    sector_size: usize,
    num_sectors: usize,
    data: Mutex<Vec<u8>>,
}

impl MemStore {
    pub fn new(sector_size: usize, num_sectors: usize) -> Self {
        Self {
            sector_size,
            num_sectors,
            data: Mutex::new(vec![0u8; sector_size * num_sectors]),
        }
    }
}

impl SectorStore for MemStore {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> io::Result<()> {
        check_request(sector, buf.len(), self.sector_size, self.num_sectors)?;
        let data = self
            .data
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "ram disk lock poisoned"))?;
        let start = sector * self.sector_size;
        buf.copy_from_slice(&data[start..start + self.sector_size]);
        Ok(())
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> io::Result<()> {
        check_request(sector, buf.len(), self.sector_size, self.num_sectors)?;
        let mut data = self
            .data
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "ram disk lock poisoned"))?;
        let start = sector * self.sector_size;
        data[start..start + self.sector_size].copy_from_slice(buf);
        Ok(())
    }
}

/// A disk image in a host file.
pub struct FileStore {
    sector_size: usize,
    num_sectors: usize,
    file: Mutex<File>,
}

impl FileStore {
    /// Create (or resize) the image so that it holds `num_sectors` sectors.
    pub fn create<P: AsRef<Path>>(path: P, sector_size: usize, num_sectors: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len((sector_size * num_sectors) as u64)?;
        Ok(Self {
            sector_size,
            num_sectors,
            file: Mutex::new(file),
        })
    }

    /// Open an existing image; the sector count follows from its length.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if sector_size == 0 || len % sector_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image of {} bytes is not a whole number of {}-byte sectors", len, sector_size),
            ));
        }
        Ok(Self {
            sector_size,
            num_sectors: len / sector_size,
            file: Mutex::new(file),
        })
    }
}

impl SectorStore for FileStore {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> io::Result<()> {
        check_request(sector, buf.len(), self.sector_size, self.num_sectors)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "image lock poisoned"))?;
        file.seek(SeekFrom::Start((sector * self.sector_size) as u64))?;
        file.read_exact(buf)
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> io::Result<()> {
        check_request(sector, buf.len(), self.sector_size, self.num_sectors)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "image lock poisoned"))?;
        file.seek(SeekFrom::Start((sector * self.sector_size) as u64))?;
        file.write_all(buf)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` requests of any kind, then behaves.
    pub struct FlakyStore {
        inner: MemStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(sector_size: usize, num_sectors: usize, failures: usize) -> Self {
            Self {
                inner: MemStore::new(sector_size, num_sectors),
                failures: AtomicUsize::new(failures),
            }
        }

        fn should_fail(&self) -> bool {
            self.failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl SectorStore for FlakyStore {
        fn sector_size(&self) -> usize {
            self.inner.sector_size()
        }

        fn num_sectors(&self) -> usize {
            self.inner.num_sectors()
        }

        fn read_sector(&self, sector: usize, buf: &mut [u8]) -> io::Result<()> {
            if self.should_fail() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "transient"));
            }
            self.inner.read_sector(sector, buf)
        }

        fn write_sector(&self, sector: usize, buf: &[u8]) -> io::Result<()> {
            if self.should_fail() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "transient"));
            }
            self.inner.write_sector(sector, buf)
        }
    }

    #[test]
    fn mem_store_rejects_bad_requests() {
        let dev = MemStore::new(64, 4);
        let mut buf = [0u8; 64];
        assert!(dev.read_sector(4, &mut buf).is_err());
        assert!(dev.write_sector(0, &buf[..32]).is_err());
    }

    #[test]
    fn blocking_io_retries_transient_failures() {
        let dev = FlakyStore::new(64, 4, 3);
        let data = [0xabu8; 64];
        write_blocking(&dev, 2, &data);
        let mut back = [0u8; 64];
        read_blocking(&dev, 2, &mut back);
        assert_eq!(back, data);
        assert_eq!(dev.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn file_store_persists_sectors() {
        let path = std::env::temp_dir().join(format!("sfs-store-{}.img", std::process::id()));
        {
            let dev = FileStore::create(&path, 128, 8).unwrap();
            dev.write_sector(7, &[7u8; 128]).unwrap();
        }
        let dev = FileStore::open(&path, 128).unwrap();
        assert_eq!(dev.num_sectors(), 8);
        let mut buf = [0u8; 128];
        dev.read_sector(7, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 128]);
        std::fs::remove_file(&path).unwrap();
    }
}
