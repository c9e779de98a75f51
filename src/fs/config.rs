use crate::disk::BLOCK_SIZE;

/// 魔数，用于识别文件系统（"WICH"）
pub const MAGIC: u32 = 0x4843_4957;

pub const SUPER_BLOCK_BLOCK_ID: u32 = 0;
pub const INODE_TABLE_START_BLOCK_ID: u32 = 1;

/// 根目录的 inode 编号
pub const ROOT_INO: u32 = 0;

// 每个 inode 记录 64 字节，一个 4KB 块可以存 64 个 inode
pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;

// 一个位图块可以描述的单元数
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

// 引用计数表：每个块号一个 u32
pub const REFS_PER_BLOCK: u32 = (BLOCK_SIZE / 4) as u32;

/// 索引块能容纳的块指针数（4 字节指针）
pub const PTRS_PER_INDEX: usize = BLOCK_SIZE / 4;

/// 单个文件的最大字节数：1024 * 4KB = 4MB
pub const MAX_FILESIZE: u64 = (PTRS_PER_INDEX * BLOCK_SIZE) as u64;

pub const FILENAME_LEN: usize = 28;
pub const MAX_SUBFILES: usize = 128;
pub const DIR_ENTRY_SIZE: usize = 4 + FILENAME_LEN;

/// 目录自身的基础链接数（"." 与父目录中的表项）
pub const DIR_BASE_LINKS: u32 = 2;

/// 目录树遍历的最大深度，防止损坏镜像中的环
pub const MAX_TREE_DEPTH: usize = 256;

pub const POLICY_NAME_LEN: usize = 32;

/// 空闲块低于数据块总数的这个百分比时需要清理
pub const PERCENT_BLOCKS_FREE: u32 = 20;
