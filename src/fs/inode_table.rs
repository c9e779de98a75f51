use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    disk::{zeroed_block, BlockDevice, BLOCK_SIZE},
    fs::{
        config::{DIR_BASE_LINKS, INODES_PER_BLOCK, INODE_SIZE},
        error::{FileSystemError, Result},
    },
    utils::{current_timestamp, Timestamp},
};

bitflags! {
    /// inode 的类型位与权限位（与 Unix st_mode 相同的取值）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const IFDIR = 0o040000;
        const IFREG = 0o100000;

        const IRUSR = 0o400;
        const IWUSR = 0o200;
        const IXUSR = 0o100;
        const IRGRP = 0o040;
        const IWGRP = 0o020;
        const IXGRP = 0o010;
        const IROTH = 0o004;
        const IWOTH = 0o002;
        const IXOTH = 0o001;
    }
}

impl FileMode {
    pub const PERMS: u32 = 0o777;

    pub fn with_perm(kind: InodeType, perm: u16) -> Self {
        let kind_bits = match kind {
            InodeType::File => Self::IFREG,
            InodeType::Directory => Self::IFDIR,
        };
        kind_bits | Self::from_bits_truncate(perm as u32 & Self::PERMS)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,      // 普通文件
    Directory, // 目录
}

/// 磁盘上的 inode 记录，固定 64 字节
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Inode {
    pub mode: u32,        // 类型与权限位
    pub uid: u32,         // 所属用户
    pub gid: u32,         // 所属组
    pub size: u32,        // 文件大小（字节）
    pub atime: Timestamp, // 最后访问时间（Access Time）
    pub mtime: Timestamp, // 最后修改时间（Modify Time）
    pub ctime: Timestamp, // 状态改变时间（Change Time）
    pub blocks: u32,      // 占用块数，包括索引块本身
    pub nlink: u32,       // 硬链接数
    pub index_block: u32, // 索引块（文件的块表或目录表）
}

impl Inode {
    pub fn new(inode_type: InodeType, uid: u32, gid: u32, perm: u16, index_block: u32) -> Self {
        let now = current_timestamp();
        let (size, nlink) = match inode_type {
            InodeType::Directory => (BLOCK_SIZE as u32, DIR_BASE_LINKS),
            InodeType::File => (0, 1),
        };
        Self {
            mode: FileMode::with_perm(inode_type, perm).bits(),
            uid,
            gid,
            size,
            atime: now,
            mtime: now,
            ctime: now,
            blocks: 1,
            nlink,
            index_block,
        }
    }

    pub fn empty() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: Timestamp::default(),
            mtime: Timestamp::default(),
            ctime: Timestamp::default(),
            blocks: 0,
            nlink: 0,
            index_block: 0,
        }
    }

    pub fn inode_type(&self) -> Option<InodeType> {
        let mode = FileMode::from_bits_retain(self.mode);
        if mode.contains(FileMode::IFDIR) {
            Some(InodeType::Directory)
        } else if mode.contains(FileMode::IFREG) {
            Some(InodeType::File)
        } else {
            None
        }
    }

    pub fn is_dir(&self) -> bool {
        self.inode_type() == Some(InodeType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.inode_type() == Some(InodeType::File)
    }

    pub fn perm(&self) -> u32 {
        self.mode & FileMode::PERMS
    }

    // 更新时间戳
    pub fn touch(&mut self) {
        let now = current_timestamp();
        self.atime = now;
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_modified(&mut self) {
        let now = current_timestamp();
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_accessed(&mut self) {
        self.atime = current_timestamp();
    }

    // 增加/减少硬链接计数
    pub fn inc_link(&mut self) {
        self.nlink += 1;
    }

    pub fn dec_link(&mut self) {
        if self.nlink > 0 {
            self.nlink -= 1;
        }
    }

    /// 按文件大小覆盖到的数据槽数
    pub fn data_slots(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }

    /// 由字节大小重新计算块数（数据槽 + 索引块）
    pub fn recompute_blocks(&mut self) {
        self.blocks = self.data_slots() as u32 + 1;
    }

    /// 第 `slot` 个数据块中属于文件内容的字节数
    pub fn logical_len(&self, slot: usize) -> usize {
        let start = slot * BLOCK_SIZE;
        (self.size as usize).saturating_sub(start).min(BLOCK_SIZE)
    }
}

/// inode 存储区的寻址与读写
#[derive(Debug, Clone)]
pub struct InodeTable {
    pub start_block: u32,
    pub total_inodes: u32,
}

impl InodeTable {
    pub fn new(start_block: u32, total_inodes: u32) -> Self {
        Self {
            start_block,
            total_inodes,
        }
    }

    /// inode 所在的块号与块内偏移
    pub fn position(&self, ino: u32) -> Result<(u64, usize)> {
        if ino >= self.total_inodes {
            return Err(FileSystemError::InvalidInode(ino));
        }
        let block = self.start_block + ino / INODES_PER_BLOCK;
        let offset = (ino % INODES_PER_BLOCK) as usize * INODE_SIZE;
        Ok((block as u64, offset))
    }

    pub fn load(&self, disk: &dyn BlockDevice, ino: u32) -> Result<Inode> {
        let (block_id, offset) = self.position(ino)?;
        let mut block = zeroed_block();
        disk.read_block(block_id, &mut block)?;
        let inode: Inode = bincode::deserialize(&block[offset..offset + INODE_SIZE])?;
        Ok(inode)
    }

    pub fn store(&self, disk: &dyn BlockDevice, ino: u32, inode: &Inode) -> Result<()> {
        let (block_id, offset) = self.position(ino)?;
        let mut block = zeroed_block();
        disk.read_block(block_id, &mut block)?;
        bincode::serialize_into(&mut block[offset..offset + INODE_SIZE], inode)?;
        disk.write_block(block_id, &block)?;
        Ok(())
    }

    /// 把整个 inode 存储区清零（格式化用）
    pub fn scrub(&self, disk: &dyn BlockDevice) -> Result<()> {
        let blocks = self.total_inodes.div_ceil(INODES_PER_BLOCK);
        let zero = zeroed_block();
        for i in 0..blocks {
            disk.write_block((self.start_block + i) as u64, &zero)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn record_is_exactly_one_slot() {
        let inode = Inode::new(InodeType::File, 1, 2, 0o644, 42);
        let bytes = bincode::serialize(&inode).unwrap();
        assert_eq!(bytes.len(), INODE_SIZE);
        // mode 在最前面，index_block 在最后
        assert_eq!(&bytes[..4], &(0o100644u32).to_le_bytes());
        assert_eq!(&bytes[60..64], &42u32.to_le_bytes());
    }

    #[test]
    fn directory_defaults() {
        let dir = Inode::new(InodeType::Directory, 0, 0, 0o755, 9);
        assert!(dir.is_dir());
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.size, 4096);
        assert_eq!(dir.perm(), 0o755);
        assert_eq!(Inode::empty().inode_type(), None);
    }

    #[test]
    fn block_count_follows_size() {
        let mut f = Inode::new(InodeType::File, 0, 0, 0o644, 9);
        f.size = 4096 * 2 + 1;
        f.recompute_blocks();
        assert_eq!(f.blocks, 4);
        assert_eq!(f.logical_len(0), 4096);
        assert_eq!(f.logical_len(2), 1);
        assert_eq!(f.logical_len(3), 0);
        f.size = 4096;
        f.recompute_blocks();
        assert_eq!(f.blocks, 2);
    }

    #[test]
    fn neighbours_in_one_block_do_not_clobber() {
        let disk = MemDisk::new(4);
        let table = InodeTable::new(1, 128);
        let a = Inode::new(InodeType::File, 1, 1, 0o600, 10);
        let b = Inode::new(InodeType::Directory, 2, 2, 0o700, 11);
        table.store(&disk, 5, &a).unwrap();
        table.store(&disk, 6, &b).unwrap();
        table.store(&disk, 64, &a).unwrap();

        assert_eq!(table.load(&disk, 5).unwrap(), a);
        assert_eq!(table.load(&disk, 6).unwrap(), b);
        assert_eq!(table.position(64).unwrap(), (2, 0));
        assert!(matches!(
            table.load(&disk, 128),
            Err(FileSystemError::InvalidInode(128))
        ));
    }
}
