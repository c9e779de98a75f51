use log::{debug, error};

use crate::{
    disk::{zeroed_block, BlockDevice, BLOCK_SIZE},
    fs::error::{FileSystemError, Result},
};

/// 每个块号一个引用计数，记录有多少个索引项指向该块。
///
/// 计数为 0 的数据块才能回到空闲位图。
#[derive(Debug, Clone)]
pub struct RefCountTable {
    counts: Vec<u32>,
    start_block: u32,
    nr_blocks: u32,
    dirty: bool,
}

impl RefCountTable {
    pub fn new(total_blocks: u32, start_block: u32, nr_blocks: u32) -> Self {
        Self {
            counts: vec![0; total_blocks as usize],
            start_block,
            nr_blocks,
            dirty: true,
        }
    }

    pub fn get(&self, bno: u32) -> u32 {
        self.counts.get(bno as usize).copied().unwrap_or(0)
    }

    /// 新分配的数据块由唯一的索引项持有
    pub fn set_owned(&mut self, bno: u32) -> Result<()> {
        let slot = self.slot(bno)?;
        *slot = 1;
        self.dirty = true;
        Ok(())
    }

    pub fn inc(&mut self, bno: u32) -> Result<u32> {
        let slot = self.slot(bno)?;
        *slot += 1;
        let now = *slot;
        self.dirty = true;
        debug!("block {} refcount -> {}", bno, now);
        Ok(now)
    }

    /// 减少引用并返回剩余计数。
    ///
    /// 计数已经为 0 的块被视为独占（没有被登记过），直接返回 0。
    pub fn dec(&mut self, bno: u32) -> Result<u32> {
        let slot = self.slot(bno)?;
        if *slot == 0 {
            error!("reference counter of block {} already at zero", bno);
            return Ok(0);
        }
        *slot -= 1;
        let now = *slot;
        self.dirty = true;
        debug!("block {} refcount -> {}", bno, now);
        Ok(now)
    }

    pub fn is_shared(&self, bno: u32) -> bool {
        self.get(bno) > 1
    }

    fn slot(&mut self, bno: u32) -> Result<&mut u32> {
        let len = self.counts.len();
        self.counts.get_mut(bno as usize).ok_or_else(|| {
            FileSystemError::InvalidArgument(format!(
                "block {} outside of reference table ({} blocks)",
                bno, len
            ))
        })
    }

    pub fn load(
        disk: &dyn BlockDevice,
        start_block: u32,
        nr_blocks: u32,
        total_blocks: u32,
    ) -> Result<Self> {
        let mut counts = Vec::with_capacity(total_blocks as usize);
        let mut block_buf = zeroed_block();
        for i in 0..nr_blocks {
            disk.read_block((start_block + i) as u64, &mut block_buf)?;
            counts.extend(
                block_buf
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
        }
        counts.truncate(total_blocks as usize);

        Ok(Self {
            counts,
            start_block,
            nr_blocks,
            dirty: false,
        })
    }

    pub fn sync(&mut self, disk: &dyn BlockDevice) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let per_block = BLOCK_SIZE / 4;
        for i in 0..self.nr_blocks as usize {
            let mut block_buf = zeroed_block();
            let from = (i * per_block).min(self.counts.len());
            let to = ((i + 1) * per_block).min(self.counts.len());
            for (dst, count) in block_buf.chunks_exact_mut(4).zip(&self.counts[from..to]) {
                dst.copy_from_slice(&count.to_le_bytes());
            }
            disk.write_block((self.start_block as usize + i) as u64, &block_buf)?;
        }
        self.dirty = false;
        Ok(())
    }
}
