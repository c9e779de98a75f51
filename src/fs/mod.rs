use std::{fmt, sync::Arc};

use log::{debug, info, warn};

use crate::{
    disk::{zeroed_block, BlockDevice, BLOCK_SIZE},
    fs::{
        bitmap::FreeBitmap,
        config::{FILENAME_LEN, PERCENT_BLOCKS_FREE, ROOT_INO},
        directory::Directory,
        error::{FileSystemError, Result},
        index_block::IndexBlock,
        inode_table::{Inode, InodeTable, InodeType},
        ref_table::RefCountTable,
        super_block::{FormatOptions, SuperBlock},
    },
};

pub mod bitmap;
pub mod config;
pub mod control;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod eviction;
pub mod file;
pub mod index_block;
pub mod inode_table;
pub mod namei;
pub mod ref_table;
pub mod super_block;
pub mod walk;

/// statfs 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub data_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub max_name_len: u32,
}

/// 一个已挂载的卷。
///
/// 所有修改都通过 `&mut self` 进行，同一时刻只有一个写者；
/// 宿主负责在调用之间加锁。
pub struct FileSystem {
    disk: Arc<dyn BlockDevice>,          // 底层磁盘抽象层
    pub super_block: SuperBlock,         // 文件系统总体信息
    pub inode_bitmap: FreeBitmap,        // inode 分配信息
    pub data_bitmap: FreeBitmap,         // 数据块分配信息
    pub ref_table: RefCountTable,        // 数据块引用计数
    pub inode_table: InodeTable,         // inode 存储区寻址
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("super_block", &self.super_block)
            .field("free_inodes", &self.inode_bitmap.free)
            .field("free_blocks", &self.data_bitmap.free)
            .finish()
    }
}

impl FileSystem {
    /// 在设备上写出一个空卷（只有根目录），然后直接挂载。
    pub fn format(disk: Arc<dyn BlockDevice>, opts: FormatOptions) -> Result<Self> {
        let sb = SuperBlock::new(opts)?;
        if (sb.nr_blocks as u64) > disk.block_count() {
            return Err(FileSystemError::InvalidArgument(format!(
                "device has {} blocks, {} requested",
                disk.block_count(),
                sb.nr_blocks
            )));
        }

        let inode_table = InodeTable::new(sb.inode_table_start(), sb.nr_inodes);
        inode_table.scrub(disk.as_ref())?;

        // 根目录：inode 0，索引块是第一个数据块
        let root_block = sb.data_block_start();
        let root = Inode::new(InodeType::Directory, 0, 0, 0o755, root_block);
        inode_table.store(disk.as_ref(), ROOT_INO, &root)?;
        Directory::new().store(disk.as_ref(), root_block)?;

        let mut inode_bitmap =
            FreeBitmap::new(sb.nr_inodes, sb.inode_bitmap_start(), sb.nr_ifree_blocks);
        inode_bitmap.release_range(ROOT_INO + 1, sb.nr_inodes);

        let mut data_bitmap =
            FreeBitmap::new(sb.nr_blocks, sb.block_bitmap_start(), sb.nr_bfree_blocks);
        data_bitmap.release_range(root_block + 1, sb.nr_blocks);

        let ref_table = RefCountTable::new(sb.nr_blocks, sb.ref_table_start(), sb.nr_rc_blocks);

        info!(
            "formatted volume: {} blocks ({} data), {} inodes",
            sb.nr_blocks,
            sb.nr_data_blocks(),
            sb.nr_inodes
        );

        let mut fs = Self {
            disk,
            super_block: sb,
            inode_bitmap,
            data_bitmap,
            ref_table,
            inode_table,
        };
        fs.sync()?;
        Ok(fs)
    }

    pub fn mount(disk: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut sb = SuperBlock::load(disk.as_ref())?;

        let inode_bitmap = FreeBitmap::load(
            disk.as_ref(),
            sb.inode_bitmap_start(),
            sb.nr_ifree_blocks,
            sb.nr_inodes,
        )?;
        let data_bitmap = FreeBitmap::load(
            disk.as_ref(),
            sb.block_bitmap_start(),
            sb.nr_bfree_blocks,
            sb.nr_blocks,
        )?;
        let ref_table = RefCountTable::load(
            disk.as_ref(),
            sb.ref_table_start(),
            sb.nr_rc_blocks,
            sb.nr_blocks,
        )?;

        // 以位图为准
        if sb.nr_free_inodes != inode_bitmap.free || sb.nr_free_blocks != data_bitmap.free {
            warn!(
                "superblock counters ({} inodes, {} blocks) disagree with bitmaps ({}, {})",
                sb.nr_free_inodes, sb.nr_free_blocks, inode_bitmap.free, data_bitmap.free
            );
            sb.nr_free_inodes = inode_bitmap.free;
            sb.nr_free_blocks = data_bitmap.free;
        }

        let inode_table = InodeTable::new(sb.inode_table_start(), sb.nr_inodes);
        let root = inode_table.load(disk.as_ref(), ROOT_INO)?;
        if !root.is_dir() {
            return Err(FileSystemError::Corrupted(
                "root inode is not a directory".to_string(),
            ));
        }

        info!(
            "mounted volume: {} blocks ({} free), {} inodes ({} free)",
            sb.nr_blocks, sb.nr_free_blocks, sb.nr_inodes, sb.nr_free_inodes
        );

        Ok(Self {
            disk,
            super_block: sb,
            inode_bitmap,
            data_bitmap,
            ref_table,
            inode_table,
        })
    }

    pub fn unmount(mut self) -> Result<()> {
        self.sync()?;
        info!("unmounted volume");
        Ok(())
    }

    /// 把超级块、两张位图和引用计数表写回各自的区域。
    ///
    /// 超级块中的空闲计数在每次分配和释放时已经和位图同步。
    pub fn sync(&mut self) -> Result<()> {
        let disk = self.disk.as_ref();
        self.super_block.sync(disk)?;
        self.inode_bitmap.sync(disk)?;
        self.data_bitmap.sync(disk)?;
        self.ref_table.sync(disk)?;
        disk.flush()?;
        debug!("synced volume metadata");
        Ok(())
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: BLOCK_SIZE as u32,
            total_blocks: self.super_block.nr_blocks,
            free_blocks: self.data_bitmap.free,
            data_blocks: self.super_block.nr_data_blocks(),
            total_inodes: self.super_block.nr_inodes,
            free_inodes: self.inode_bitmap.free,
            max_name_len: FILENAME_LEN as u32,
        }
    }

    pub fn free_blocks(&self) -> u32 {
        self.data_bitmap.free
    }

    pub fn free_inodes(&self) -> u32 {
        self.inode_bitmap.free
    }

    /// 空闲块低于数据区的 PERCENT_BLOCKS_FREE% 时需要驱逐
    pub fn needs_cleaning(&self) -> bool {
        let data = self.super_block.nr_data_blocks() as u64;
        (self.data_bitmap.free as u64) * 100 < data * PERCENT_BLOCKS_FREE as u64
    }

    pub fn disk(&self) -> &dyn BlockDevice {
        self.disk.as_ref()
    }

    pub fn read_inode(&self, ino: u32) -> Result<Inode> {
        self.inode_table.load(self.disk(), ino)
    }

    pub fn write_inode(&self, ino: u32, inode: &Inode) -> Result<()> {
        self.inode_table.store(self.disk(), ino, inode)
    }

    pub fn read_index(&self, bno: u32) -> Result<IndexBlock> {
        IndexBlock::load(self.disk(), bno)
    }

    pub fn write_index(&self, bno: u32, index: &IndexBlock) -> Result<()> {
        index.store(self.disk(), bno)
    }

    /// 读取目录 inode 及其目录表
    pub fn read_directory(&self, ino: u32) -> Result<(Inode, Directory)> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(FileSystemError::NotADirectory(format!("inode {}", ino)));
        }
        let dir = Directory::load(self.disk(), inode.index_block)?;
        Ok((inode, dir))
    }

    pub fn write_directory(&self, inode: &Inode, dir: &Directory) -> Result<()> {
        dir.store(self.disk(), inode.index_block)
    }

    pub fn alloc_inode(&mut self) -> Result<u32> {
        let ino = self.inode_bitmap.alloc().ok_or(FileSystemError::OutOfSpace)?;
        self.super_block.nr_free_inodes = self.inode_bitmap.free;
        debug!("allocated inode {}", ino);
        Ok(ino)
    }

    pub fn release_inode(&mut self, ino: u32) -> Result<()> {
        self.inode_bitmap.release(ino)?;
        self.super_block.nr_free_inodes = self.inode_bitmap.free;
        debug!("freed inode {}", ino);
        Ok(())
    }

    /// 从位图中取一个块，不涉及引用计数（索引块用）
    pub fn alloc_block(&mut self) -> Result<u32> {
        let bno = self.data_bitmap.alloc().ok_or(FileSystemError::OutOfSpace)?;
        self.super_block.nr_free_blocks = self.data_bitmap.free;
        debug!("allocated block {}", bno);
        Ok(bno)
    }

    pub fn release_block(&mut self, bno: u32) -> Result<()> {
        self.data_bitmap.release(bno)?;
        self.super_block.nr_free_blocks = self.data_bitmap.free;
        debug!("freed block {}", bno);
        Ok(())
    }

    /// 分配一个清零的数据块，引用计数为 1
    pub fn alloc_data_block(&mut self) -> Result<u32> {
        let bno = self.alloc_block()?;
        if let Err(e) = self
            .disk
            .write_block(bno as u64, &zeroed_block())
            .map_err(FileSystemError::from)
            .and_then(|_| self.ref_table.set_owned(bno))
        {
            self.release_block(bno)?;
            return Err(e);
        }
        Ok(bno)
    }

    /// 放弃一个索引项对数据块的引用；计数归零时才真正释放。
    ///
    /// 返回块是否回到了空闲池。
    pub fn release_data_block(&mut self, bno: u32) -> Result<bool> {
        if self.ref_table.dec(bno)? > 0 {
            return Ok(false);
        }
        if let Err(e) = self.disk.write_block(bno as u64, &zeroed_block()) {
            warn!("failed to scrub block {}: {}", bno, e);
        }
        self.release_block(bno)?;
        Ok(true)
    }

    pub fn ref_count(&self, bno: u32) -> u32 {
        self.ref_table.get(bno)
    }
}
