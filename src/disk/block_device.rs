use std::io::Result;

use crate::disk::types::Block;

/// 块设备抽象：文件系统只通过整块读写访问底层存储。
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: u64, buf: &mut Block) -> Result<()>;
    fn write_block(&self, block_id: u64, buf: &Block) -> Result<()>;

    /// 设备包含的块数
    fn block_count(&self) -> u64;

    /// 把设备缓存刷到持久存储
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
