use log::{debug, error};

use crate::{
    disk::{zeroed_block, BlockDevice, BLOCK_SIZE},
    fs::error::{FileSystemError, Result},
};

/// 空闲位图：bit = 1 表示空闲，bit = 0 表示已占用。
///
/// 空闲计数和位翻转在同一个方法里完成，二者不会各自变化。
/// 编号 0 在格式化时永久占用，所以 `alloc` 可以用 `None`
/// 表示“没有空闲单元”，而不会与合法编号冲突。
#[derive(Debug, Clone)]
pub struct FreeBitmap {
    pub bits: Vec<u8>,    // 位图数据，每个 bit 表示一个单元是否空闲
    pub total: u32,       // 单元总数
    pub free: u32,        // 当前空闲单元数
    pub start_block: u32, // 位图在磁盘中的起始块号
    pub nr_blocks: u32,   // 位图占用的块数
}

impl FreeBitmap {
    /// 创建一个全部占用的位图（格式化时再逐个放开）
    pub fn new(total: u32, start_block: u32, nr_blocks: u32) -> Self {
        Self {
            bits: vec![0; (nr_blocks as usize) * BLOCK_SIZE],
            total,
            free: 0,
            start_block,
            nr_blocks,
        }
    }

    /// 把 [from, to) 标记为空闲
    pub fn release_range(&mut self, from: u32, to: u32) {
        let limit = self.total.min((self.bits.len() * 8) as u32);
        for index in from..to.min(limit) {
            if !self.is_free(index) {
                self.set(index);
                self.free += 1;
            }
        }
    }

    /// 扫描整张位图（而不是某个窗口），找到第一个空闲位并清零。
    pub fn alloc(&mut self) -> Option<u32> {
        let full_bytes = ((self.total / 8) as usize).min(self.bits.len());
        for (byte_index, byte) in self.bits[..full_bytes].iter_mut().enumerate() {
            if *byte != 0 {
                let bit = byte.trailing_zeros();
                *byte &= !(1 << bit);
                self.free -= 1;
                return Some(byte_index as u32 * 8 + bit);
            }
        }

        // 最后一个不满 8 位的字节
        for index in (full_bytes as u32 * 8)..self.total {
            if self.is_free(index) {
                self.clear(index);
                self.free -= 1;
                return Some(index);
            }
        }
        None
    }

    /// 把一个单元放回空闲池。越界编号被拒绝，位图保持不变。
    pub fn release(&mut self, index: u32) -> Result<()> {
        if index >= self.total {
            error!("refusing to free {} beyond bitmap of {}", index, self.total);
            return Err(FileSystemError::InvalidArgument(format!(
                "{} is outside of bitmap range {}",
                index, self.total
            )));
        }
        if self.is_free(index) {
            debug!("{} already free", index);
            return Ok(());
        }
        self.set(index);
        self.free += 1;
        Ok(())
    }

    pub fn is_free(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let bit_index = index % 8;
        index < self.total
            && self
                .bits
                .get(byte_index)
                .is_some_and(|byte| byte & (1 << bit_index) != 0)
    }

    /// 重新数一遍空闲位
    pub fn count_free(&self) -> u32 {
        (0..self.total).filter(|&i| self.is_free(i)).count() as u32
    }

    fn set(&mut self, index: u32) {
        if let Some(byte) = self.bits.get_mut((index / 8) as usize) {
            *byte |= 1 << (index % 8);
        }
    }

    fn clear(&mut self, index: u32) {
        if let Some(byte) = self.bits.get_mut((index / 8) as usize) {
            *byte &= !(1 << (index % 8));
        }
    }

    // 从磁盘加载位图
    pub fn load(
        disk: &dyn BlockDevice,
        start_block: u32,
        nr_blocks: u32,
        total: u32,
    ) -> Result<Self> {
        let mut bits = Vec::with_capacity((nr_blocks as usize) * BLOCK_SIZE);
        let mut block_buf = zeroed_block();

        for i in 0..nr_blocks {
            disk.read_block((start_block + i) as u64, &mut block_buf)?;
            bits.extend_from_slice(&block_buf);
        }

        let mut bitmap = Self {
            bits,
            total,
            free: 0,
            start_block,
            nr_blocks,
        };
        bitmap.free = bitmap.count_free();
        Ok(bitmap)
    }

    // 将位图写回磁盘
    pub fn sync(&self, disk: &dyn BlockDevice) -> Result<()> {
        let mut block_buf = zeroed_block();
        for (i, chunk) in self.bits.chunks(BLOCK_SIZE).enumerate() {
            block_buf.copy_from_slice(chunk);
            disk.write_block(self.start_block as u64 + i as u64, &block_buf)?;
        }
        Ok(())
    }
}
