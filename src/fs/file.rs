use log::{debug, warn};

use crate::{
    disk::{zeroed_block, BLOCK_SIZE},
    fs::{
        config::{MAX_FILESIZE, PTRS_PER_INDEX},
        error::{FileSystemError, Result},
        index_block::IndexBlock,
        inode_table::Inode,
        FileSystem,
    },
};

impl FileSystem {
    fn read_file_inode(&self, ino: u32) -> Result<Inode> {
        let inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(FileSystemError::IsADirectory(format!("inode {}", ino)));
        }
        if !inode.is_file() {
            return Err(FileSystemError::InvalidInode(ino));
        }
        Ok(inode)
    }

    /// 把文件的第 `iblock` 个逻辑块映射到物理块号。
    ///
    /// 槽为空且 `create` 为假时返回 `None`；为真时分配一个清零的新块
    /// 并立即写回索引块。
    pub fn get_block(&mut self, ino: u32, iblock: usize, create: bool) -> Result<Option<u32>> {
        if iblock >= PTRS_PER_INDEX {
            return Err(FileSystemError::FileTooBig);
        }
        let mut inode = self.read_file_inode(ino)?;
        let mut index = self.read_index(inode.index_block)?;

        match index.get(iblock)? {
            0 if !create => Ok(None),
            0 => {
                let bno = self.alloc_data_block()?;
                index.set(iblock, bno)?;
                if let Err(e) = self.write_index(inode.index_block, &index) {
                    self.release_data_block(bno)?;
                    return Err(e);
                }
                // 块数至少覆盖到这个槽，回收时才不会漏掉它
                inode.blocks = inode.blocks.max(iblock as u32 + 2);
                self.write_inode(ino, &inode)?;
                Ok(Some(bno))
            }
            bno => Ok(Some(bno)),
        }
    }

    /// 返回一个可以直接写入的物理块：空洞现分配，共享块先复制一份
    fn writable_block(&mut self, index: &mut IndexBlock, slot: usize) -> Result<u32> {
        let current = index.get(slot)?;
        if current == 0 {
            let bno = self.alloc_data_block()?;
            index.set(slot, bno)?;
            return Ok(bno);
        }
        if !self.ref_table.is_shared(current) {
            return Ok(current);
        }

        let copy = self.alloc_data_block()?;
        let mut buf = zeroed_block();
        let copied = self
            .disk()
            .read_block(current as u64, &mut buf)
            .and_then(|_| self.disk().write_block(copy as u64, &buf));
        if let Err(e) = copied {
            self.release_data_block(copy)?;
            return Err(e.into());
        }
        index.set(slot, copy)?;
        self.release_data_block(current)?;
        debug!("copy-on-write: slot {} moved from block {} to {}", slot, current, copy);
        Ok(copy)
    }

    /// 重新按大小计算块数，释放新块数之外的所有槽
    fn settle_blocks(&mut self, inode: &mut Inode, index: &mut IndexBlock) {
        inode.recompute_blocks();
        let new_slots = inode.data_slots();

        for slot in new_slots..PTRS_PER_INDEX {
            let bno = index.blocks[slot];
            if bno == 0 {
                continue;
            }
            if let Err(e) = self.release_data_block(bno) {
                warn!("failed to release block {} of slot {}: {}", bno, slot, e);
            }
            index.blocks[slot] = 0;
        }
    }

    /// 从 `offset` 读到 `buf`，返回读到的字节数；空洞读出 0
    pub fn read(&mut self, ino: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut inode = self.read_file_inode(ino)?;
        let size = inode.size as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);
        let index = self.read_index(inode.index_block)?;

        let mut done = 0;
        let mut block = zeroed_block();
        while done < len {
            let pos = offset as usize + done;
            let slot = pos / BLOCK_SIZE;
            let in_block = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - in_block).min(len - done);

            match index.get(slot)? {
                0 => buf[done..done + n].fill(0),
                bno => {
                    self.disk().read_block(bno as u64, &mut block)?;
                    buf[done..done + n].copy_from_slice(&block[in_block..in_block + n]);
                }
            }
            done += n;
        }

        inode.touch_accessed();
        self.write_inode(ino, &inode)?;
        Ok(done)
    }

    /// 从 `offset` 写入 `data`。
    ///
    /// 动手之前先检查：超出最大文件大小返回 FileTooBig，
    /// 需要的新块（空洞加共享块）多于空闲块返回 OutOfSpace。
    pub fn write(&mut self, ino: u32, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FileSystemError::FileTooBig)?;
        if end > MAX_FILESIZE {
            return Err(FileSystemError::FileTooBig);
        }

        let mut inode = self.read_file_inode(ino)?;
        let mut index = self.read_index(inode.index_block)?;

        let first = (offset / BLOCK_SIZE as u64) as usize;
        let last = ((end - 1) / BLOCK_SIZE as u64) as usize;
        let needed = index.blocks[first..=last]
            .iter()
            .filter(|&&bno| bno == 0 || self.ref_table.is_shared(bno))
            .count();
        if needed > self.free_blocks() as usize {
            return Err(FileSystemError::OutOfSpace);
        }

        let mut written = 0;
        let mut outcome = Ok(());
        let mut block = zeroed_block();
        for slot in first..=last {
            let in_block = if slot == first {
                (offset % BLOCK_SIZE as u64) as usize
            } else {
                0
            };
            let n = (BLOCK_SIZE - in_block).min(data.len() - written);

            let step = self.writable_block(&mut index, slot).and_then(|bno| {
                if n < BLOCK_SIZE {
                    self.disk().read_block(bno as u64, &mut block)?;
                }
                block[in_block..in_block + n].copy_from_slice(&data[written..written + n]);
                self.disk().write_block(bno as u64, &block)?;
                Ok(())
            });
            if let Err(e) = step {
                outcome = Err(e);
                break;
            }
            written += n;
        }

        // 已经写下去的部分要记到索引和 inode 里
        if written > 0 {
            inode.size = inode.size.max((offset + written as u64) as u32);
            inode.touch_modified();
        }
        self.settle_blocks(&mut inode, &mut index);
        self.write_index(inode.index_block, &index)?;
        self.write_inode(ino, &inode)?;
        outcome?;
        Ok(written)
    }

    /// 把文件截断或扩展到 `new_size`，缩小时释放多出来的块
    pub fn truncate(&mut self, ino: u32, new_size: u64) -> Result<()> {
        if new_size > MAX_FILESIZE {
            return Err(FileSystemError::FileTooBig);
        }
        let mut inode = self.read_file_inode(ino)?;
        let mut index = self.read_index(inode.index_block)?;

        // 保留下来的最后一块，超出新大小的部分清零
        let tail = (new_size % BLOCK_SIZE as u64) as usize;
        if new_size < inode.size as u64 && tail != 0 {
            let slot = (new_size / BLOCK_SIZE as u64) as usize;
            if index.get(slot)? != 0 {
                let bno = self.writable_block(&mut index, slot)?;
                let mut block = zeroed_block();
                self.disk().read_block(bno as u64, &mut block)?;
                block[tail..].fill(0);
                self.disk().write_block(bno as u64, &block)?;
            }
        }

        inode.size = new_size as u32;
        self.settle_blocks(&mut inode, &mut index);
        self.write_index(inode.index_block, &index)?;
        inode.touch_modified();
        self.write_inode(ino, &inode)?;
        debug!("inode {} truncated to {} bytes", ino, new_size);
        Ok(())
    }
}
