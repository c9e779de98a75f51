use serde::{Deserialize, Serialize};

use crate::{
    disk::{zeroed_block, Block, BlockDevice},
    fs::{
        config::{DIR_ENTRY_SIZE, FILENAME_LEN, MAX_SUBFILES},
        error::{FileSystemError, Result},
    },
};

/// 检查文件名并转换成定长的磁盘格式
pub fn encode_name(name: &str) -> Result<[u8; FILENAME_LEN]> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FileSystemError::InvalidArgument(format!(
            "invalid file name '{}'",
            name
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(FileSystemError::InvalidArgument(format!(
            "file name '{}' contains '/' or NUL",
            name.escape_default()
        )));
    }
    let bytes = name.as_bytes();
    if bytes.len() > FILENAME_LEN {
        return Err(FileSystemError::NameTooLong);
    }
    let mut fixed = [0u8; FILENAME_LEN];
    fixed[..bytes.len()].copy_from_slice(bytes);
    Ok(fixed)
}

// 一个目录项：inode 编号 + 定长文件名（不足部分补 0，满 28 字节时没有结尾 0）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub filename: [u8; FILENAME_LEN],
}

impl DirEntry {
    pub fn new(inode: u32, name: &str) -> Result<Self> {
        Ok(Self {
            inode,
            filename: encode_name(name)?,
        })
    }

    pub fn name(&self) -> String {
        let len = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_LEN);
        String::from_utf8_lossy(&self.filename[..len]).into_owned()
    }
}

/// 目录表：最多 MAX_SUBFILES 个表项，已占用的槽从 0 开始连续存放。
///
/// 插入只会用第一个空槽，删除会把后面的表项前移，
/// 所以遍历可以在第一个空槽处停止。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_SUBFILES
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn get(&self, slot: usize) -> Option<&DirEntry> {
        self.entries.get(slot)
    }

    /// 线性查找，按定长文件名精确比较，返回槽号
    pub fn find(&self, name: &str) -> Option<usize> {
        let wanted = encode_name(name).ok()?;
        self.entries.iter().position(|e| e.filename == wanted)
    }

    /// 放进第一个空槽，返回槽号
    pub fn insert(&mut self, inode: u32, name: &str) -> Result<usize> {
        let entry = DirEntry::new(inode, name)?;
        if self.find(name).is_some() {
            return Err(FileSystemError::AlreadyExists(name.to_string()));
        }
        if self.is_full() {
            return Err(FileSystemError::DirectoryFull);
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    // 删除表项并压缩，返回被删除的表项
    pub fn remove(&mut self, slot: usize) -> Option<DirEntry> {
        (slot < self.entries.len()).then(|| self.entries.remove(slot))
    }

    /// 原地改名
    pub fn rename(&mut self, slot: usize, new_name: &str) -> Result<()> {
        let filename = encode_name(new_name)?;
        let entry = self
            .entries
            .get_mut(slot)
            .ok_or_else(|| FileSystemError::NotFound(new_name.to_string()))?;
        entry.filename = filename;
        Ok(())
    }

    pub fn decode(block: &Block) -> Result<Self> {
        let mut entries = Vec::new();
        for raw in block.chunks_exact(DIR_ENTRY_SIZE).take(MAX_SUBFILES) {
            let entry: DirEntry = bincode::deserialize(raw)?;
            if entry.inode == 0 {
                break;
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn encode(&self) -> Result<Block> {
        let mut block = zeroed_block();
        for (raw, entry) in block.chunks_exact_mut(DIR_ENTRY_SIZE).zip(&self.entries) {
            bincode::serialize_into(raw, entry)?;
        }
        Ok(block)
    }

    pub fn load(disk: &dyn BlockDevice, bno: u32) -> Result<Self> {
        let mut block = zeroed_block();
        disk.read_block(bno as u64, &mut block)?;
        Self::decode(&block)
    }

    pub fn store(&self, disk: &dyn BlockDevice, bno: u32) -> Result<()> {
        disk.write_block(bno as u64, &self.encode()?)?;
        Ok(())
    }
}
