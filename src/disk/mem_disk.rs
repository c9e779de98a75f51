use std::{
    collections::HashSet,
    io::{self, Result},
    sync::{Mutex, MutexGuard},
};

use crate::disk::{
    block_device::BlockDevice,
    types::{zeroed_block, Block},
};

/// 内存中的块设备，可以对指定块注入读写错误。
#[derive(Debug, Default)]
pub struct MemDisk {
    blocks: Mutex<Vec<Block>>,
    failing_reads: Mutex<HashSet<u64>>,
    failing_writes: Mutex<HashSet<u64>>,
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory disk lock poisoned")
}

fn guard<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| poisoned())
}

impl MemDisk {
    pub fn new(nr_blocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![zeroed_block(); nr_blocks as usize]),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
        }
    }

    /// 之后对 `block_id` 的读取都会失败
    pub fn fail_reads(&self, block_id: u64) {
        if let Ok(mut set) = self.failing_reads.lock() {
            set.insert(block_id);
        }
    }

    /// 之后对 `block_id` 的写入都会失败
    pub fn fail_writes(&self, block_id: u64) {
        if let Ok(mut set) = self.failing_writes.lock() {
            set.insert(block_id);
        }
    }

    /// 清除所有注入的错误
    pub fn heal(&self) {
        if let Ok(mut set) = self.failing_reads.lock() {
            set.clear();
        }
        if let Ok(mut set) = self.failing_writes.lock() {
            set.clear();
        }
    }

    fn injected(set: &Mutex<HashSet<u64>>, block_id: u64, what: &str) -> Result<()> {
        if guard(set)?.contains(&block_id) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {} failure on block {}", what, block_id),
            ));
        }
        Ok(())
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: u64, buf: &mut Block) -> Result<()> {
        Self::injected(&self.failing_reads, block_id, "read")?;
        let blocks = guard(&self.blocks)?;
        let src = blocks.get(block_id as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "block beyond end of disk")
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&self, block_id: u64, buf: &Block) -> Result<()> {
        Self::injected(&self.failing_writes, block_id, "write")?;
        let mut blocks = guard(&self.blocks)?;
        let dst = blocks.get_mut(block_id as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "block beyond end of disk")
        })?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.blocks.lock().map(|b| b.len() as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_failures_hit_only_chosen_blocks() {
        let disk = MemDisk::new(4);
        let mut buf = zeroed_block();
        buf[0] = 7;
        disk.write_block(1, &buf).unwrap();

        disk.fail_reads(1);
        assert!(disk.read_block(1, &mut buf).is_err());
        assert!(disk.read_block(2, &mut buf).is_ok());

        disk.heal();
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf[0], 7);
    }
}
