//! SFS, a small single-volume file system on top of a sector device.

pub mod bitmap; // free sector map
pub mod common;
pub mod config;
pub mod dir; // directory entries
pub mod disk; // on-disk layout
pub mod error;
pub mod fdtable; // open file table
pub mod file; // byte stream I/O over inode chains
pub mod fsck;
pub mod inode; // inode table and chains
pub mod sector_store; // the device
pub mod vfs; // the volume API

pub use config::VolumeConfig;
pub use disk::FileKind;
pub use error::{FsError, Result};
pub use fsck::FsckReport;
pub use sector_store::{FileStore, MemStore, SectorStore};
pub use vfs::{Stat, Volume};
