/// 每个逻辑块（Block）的大小：4KB
/// 文件系统以“块”为最小读写单位。
pub const BLOCK_SIZE: usize = 4096;

/// 默认镜像的块总数：64MB / 4KB = 16384 块
pub const DEFAULT_BLOCK_COUNT: u32 = 64 * 1024 * 1024 / BLOCK_SIZE as u32;

/// 定义一个逻辑块类型（每块 4KB 的字节数组）
/// 所有磁盘读写都以 Block 为单位进行。
pub type Block = [u8; BLOCK_SIZE];

/// 一个全零块
pub const fn zeroed_block() -> Block {
    [0; BLOCK_SIZE]
}
