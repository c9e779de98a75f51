use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use log::debug;

use crate::disk::{
    block_device::BlockDevice,
    types::{Block, BLOCK_SIZE},
};

/// 以普通文件作为磁盘镜像的块设备
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    blocks: u64,
}

impl FileDisk {
    /// 打开（必要时创建）镜像文件，并保证它至少有 `nr_blocks` 个块。
    pub fn create<P: AsRef<Path>>(path: P, nr_blocks: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let wanted = nr_blocks as u64 * BLOCK_SIZE as u64;
        if file.metadata()?.len() < wanted {
            debug!(
                "growing image {} to {} blocks",
                path.as_ref().display(),
                nr_blocks
            );
            file.set_len(wanted)?;
        }

        let blocks = file.metadata()?.len() / BLOCK_SIZE as u64;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    /// 打开已经存在的镜像，块数由文件长度决定。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let blocks = file.metadata()?.len() / BLOCK_SIZE as u64;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "disk lock poisoned"))
    }

    fn check_range(&self, block_id: u64) -> Result<()> {
        if block_id >= self.blocks {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {} beyond end of image ({} blocks)", block_id, self.blocks),
            ));
        }
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, block_id: u64, buf: &mut Block) -> Result<()> {
        self.check_range(block_id)?;
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&self, block_id: u64, buf: &Block) -> Result<()> {
        self.check_range(block_id)?;
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn flush(&self) -> Result<()> {
        self.lock()?.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_round_trip_through_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let disk = FileDisk::create(&path, 8).unwrap();
        assert_eq!(disk.block_count(), 8);

        let mut block = [0u8; BLOCK_SIZE];
        block[..5].copy_from_slice(b"hello");
        disk.write_block(3, &block).unwrap();
        drop(disk);

        let disk = FileDisk::open(&path).unwrap();
        let mut back = [0u8; BLOCK_SIZE];
        disk.read_block(3, &mut back).unwrap();
        assert_eq!(&back[..5], b"hello");
    }

    #[test]
    fn out_of_range_block_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDisk::create(dir.path().join("small.img"), 2).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(disk.read_block(2, &mut buf).is_err());
        assert!(disk.write_block(9, &buf).is_err());
    }
}
