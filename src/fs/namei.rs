use bitflags::bitflags;
use log::{debug, info, warn};

use crate::{
    disk::zeroed_block,
    fs::{
        config::{DIR_BASE_LINKS, ROOT_INO},
        directory::{encode_name, DirEntry},
        error::{FileSystemError, Result},
        inode_table::{Inode, InodeType},
        FileSystem,
    },
};

bitflags! {
    /// rename 的标志位，取值与 renameat2 相同
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RenameFlags: u32 {
        const NOREPLACE = 1 << 0;
        const EXCHANGE = 1 << 1;
        const WHITEOUT = 1 << 2;
    }
}

impl FileSystem {
    /// 在目录中按名字查找，不更新访问时间
    pub fn find_entry(&self, dir: u32, name: &str) -> Result<Option<u32>> {
        encode_name(name)?;
        let (_, table) = self.read_directory(dir)?;
        Ok(table
            .find(name)
            .and_then(|slot| table.get(slot))
            .map(|e| e.inode))
    }

    /// 查找目录项并刷新父目录的访问时间
    pub fn lookup(&mut self, dir: u32, name: &str) -> Result<u32> {
        let found = self.find_entry(dir, name)?;

        let mut parent = self.read_inode(dir)?;
        parent.touch_accessed();
        self.write_inode(dir, &parent)?;

        found.ok_or_else(|| FileSystemError::NotFound(name.to_string()))
    }

    /// 从根目录开始逐级查找绝对路径
    pub fn resolve(&mut self, path: &str) -> Result<u32> {
        let mut ino = ROOT_INO;
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            ino = self.lookup(ino, part)?;
        }
        Ok(ino)
    }

    /// 拆出路径的父目录 inode 与最后一段名字
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(u32, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(FileSystemError::InvalidArgument(format!(
                "'{}' has no final component",
                path
            )));
        }
        Ok((self.resolve(dir)?, name))
    }

    pub fn read_dir(&self, dir: u32) -> Result<Vec<DirEntry>> {
        let (_, table) = self.read_directory(dir)?;
        Ok(table.entries().to_vec())
    }

    pub fn stat(&self, ino: u32) -> Result<Inode> {
        let inode = self.read_inode(ino)?;
        if inode.inode_type().is_none() {
            return Err(FileSystemError::InvalidInode(ino));
        }
        Ok(inode)
    }

    /// 创建普通文件
    pub fn create(&mut self, dir: u32, name: &str, perm: u16) -> Result<u32> {
        self.new_entry(dir, name, InodeType::File, perm)
    }

    pub fn mkdir(&mut self, dir: u32, name: &str, perm: u16) -> Result<u32> {
        self.new_entry(dir, name, InodeType::Directory, perm)
    }

    /// 分配 inode 与索引块，清零索引块，登记到父目录的第一个空槽。
    /// 任何一步失败都会归还已经分配的 inode 和块。
    fn new_entry(&mut self, dir: u32, name: &str, kind: InodeType, perm: u16) -> Result<u32> {
        encode_name(name)?;
        let (mut parent, mut table) = self.read_directory(dir)?;
        if table.find(name).is_some() {
            return Err(FileSystemError::AlreadyExists(name.to_string()));
        }
        if table.is_full() {
            return Err(FileSystemError::DirectoryFull);
        }

        let ino = self.alloc_inode()?;
        let bno = match self.alloc_block() {
            Ok(bno) => bno,
            Err(e) => {
                self.release_inode(ino)?;
                return Err(e);
            }
        };

        let inode = Inode::new(kind, parent.uid, parent.gid, perm, bno);
        let registered = self
            .disk()
            .write_block(bno as u64, &zeroed_block())
            .map_err(FileSystemError::from)
            .and_then(|_| self.write_inode(ino, &inode))
            .and_then(|_| table.insert(ino, name).map(|_| ()))
            .and_then(|_| self.write_directory(&parent, &table));
        if let Err(e) = registered {
            if let Err(clear) = self.write_inode(ino, &Inode::empty()) {
                warn!("inode {}: failed to clear record after aborted create: {}", ino, clear);
            }
            self.release_block(bno)?;
            self.release_inode(ino)?;
            return Err(e);
        }

        parent.touch();
        if kind == InodeType::Directory {
            parent.inc_link();
        }
        self.write_inode(dir, &parent)?;

        debug!("created {:?} '{}' as inode {} in {}", kind, name, ino, dir);
        Ok(ino)
    }

    /// 删除普通文件
    pub fn unlink(&mut self, dir: u32, name: &str) -> Result<()> {
        let ino = self.lookup(dir, name)?;
        if self.read_inode(ino)?.is_dir() {
            return Err(FileSystemError::IsADirectory(name.to_string()));
        }
        self.remove(dir, name)
    }

    /// 删除空目录
    pub fn rmdir(&mut self, dir: u32, name: &str) -> Result<()> {
        let ino = self.lookup(dir, name)?;
        let (inode, table) = self.read_directory(ino).map_err(|e| match e {
            FileSystemError::NotADirectory(_) => FileSystemError::NotADirectory(name.to_string()),
            other => other,
        })?;
        if inode.nlink > DIR_BASE_LINKS || !table.is_empty() {
            return Err(FileSystemError::NotEmpty);
        }
        self.remove(dir, name)
    }

    /// 从父目录摘掉表项；链接数归零时回收 inode 及其所有块。
    ///
    /// unlink、rmdir 和驱逐策略都走这条路径。
    pub fn remove(&mut self, dir: u32, name: &str) -> Result<()> {
        let (mut parent, mut table) = self.read_directory(dir)?;
        let slot = table
            .find(name)
            .ok_or_else(|| FileSystemError::NotFound(name.to_string()))?;
        let ino = table.get(slot).map(|e| e.inode).unwrap_or_default();
        let mut inode = self.read_inode(ino)?;

        table.remove(slot);
        self.write_directory(&parent, &table)?;

        parent.touch();
        if inode.is_dir() {
            parent.dec_link();
        }
        self.write_inode(dir, &parent)?;

        inode.dec_link();
        if inode.is_file() && inode.nlink > 0 {
            inode.touch_modified();
            return self.write_inode(ino, &inode);
        }
        self.destroy_inode(ino, &inode)
    }

    /// 回收 inode：释放数据块（经过引用计数）、清空索引块、清零 inode。
    ///
    /// 读不到索引块时 inode 仍然被销毁，它的数据块就此泄漏。
    fn destroy_inode(&mut self, ino: u32, inode: &Inode) -> Result<()> {
        let bno = inode.index_block;

        if inode.is_file() {
            match self.read_index(bno) {
                Ok(index) => {
                    let slots = (inode.blocks as usize).saturating_sub(1);
                    for (_, data) in index.mapped(slots) {
                        if let Err(e) = self.release_data_block(data) {
                            warn!("inode {}: could not release block {}: {}", ino, data, e);
                        }
                    }
                }
                Err(e) => warn!(
                    "inode {}: index block {} unreadable ({}), leaking {} blocks",
                    ino,
                    bno,
                    e,
                    inode.blocks.saturating_sub(1)
                ),
            }
        }

        if let Err(e) = self.disk().write_block(bno as u64, &zeroed_block()) {
            warn!("inode {}: failed to scrub index block {}: {}", ino, bno, e);
        }
        if let Err(e) = self.write_inode(ino, &Inode::empty()) {
            warn!("inode {}: failed to clear record: {}", ino, e);
        }

        if bno != 0 {
            self.release_block(bno)?;
        }
        self.release_inode(ino)?;
        debug!("destroyed inode {}", ino);
        Ok(())
    }

    /// 改名或移动。
    ///
    /// 跨目录移动是先插入目标目录、再从源目录删除的两次独立写入，
    /// 中间崩溃时表项可能同时出现在两个目录或都不在。
    pub fn rename(
        &mut self,
        src_dir: u32,
        src_name: &str,
        dst_dir: u32,
        dst_name: &str,
        flags: RenameFlags,
    ) -> Result<()> {
        if flags.intersects(RenameFlags::EXCHANGE | RenameFlags::WHITEOUT) {
            return Err(FileSystemError::InvalidArgument(format!(
                "unsupported rename flags {:?}",
                flags
            )));
        }
        encode_name(dst_name)?;

        let (mut src_parent, mut src_table) = self.read_directory(src_dir)?;
        let slot = src_table
            .find(src_name)
            .ok_or_else(|| FileSystemError::NotFound(src_name.to_string()))?;
        let ino = src_table.get(slot).map(|e| e.inode).unwrap_or_default();

        if src_dir == dst_dir {
            if src_table.find(dst_name).is_some() {
                return Err(FileSystemError::AlreadyExists(dst_name.to_string()));
            }
            src_table.rename(slot, dst_name)?;
            self.write_directory(&src_parent, &src_table)?;
            src_parent.touch_modified();
            self.write_inode(src_dir, &src_parent)?;
            info!("renamed '{}' to '{}' in {}", src_name, dst_name, src_dir);
            return Ok(());
        }

        let (mut dst_parent, mut dst_table) = self.read_directory(dst_dir)?;
        if dst_table.find(dst_name).is_some() {
            return Err(FileSystemError::AlreadyExists(dst_name.to_string()));
        }
        if dst_table.is_full() {
            return Err(FileSystemError::DirectoryFull);
        }

        let mut moved = self.read_inode(ino)?;
        if moved.is_dir() && self.contains_dir(ino, dst_dir)? {
            return Err(FileSystemError::InvalidArgument(format!(
                "cannot move '{}' into its own subtree",
                src_name
            )));
        }

        // 先登记到新目录
        dst_table.insert(ino, dst_name)?;
        self.write_directory(&dst_parent, &dst_table)?;
        dst_parent.touch();
        if moved.is_dir() {
            dst_parent.inc_link();
        }
        self.write_inode(dst_dir, &dst_parent)?;

        // 再从旧目录摘除
        src_table.remove(slot);
        self.write_directory(&src_parent, &src_table)?;
        src_parent.touch();
        if moved.is_dir() {
            src_parent.dec_link();
        }
        self.write_inode(src_dir, &src_parent)?;

        moved.touch_modified();
        self.write_inode(ino, &moved)?;

        info!(
            "moved '{}' from {} to '{}' in {}",
            src_name, src_dir, dst_name, dst_dir
        );
        Ok(())
    }
}
