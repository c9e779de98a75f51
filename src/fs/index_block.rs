use crate::{
    disk::{zeroed_block, Block, BlockDevice},
    fs::{
        config::PTRS_PER_INDEX,
        error::{FileSystemError, Result},
    },
};

/// 文件的索引块：PTRS_PER_INDEX 个数据块号，0 表示尚未分配（空洞）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub blocks: Vec<u32>,
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self {
            blocks: vec![0; PTRS_PER_INDEX],
        }
    }
}

impl IndexBlock {
    pub fn get(&self, slot: usize) -> Result<u32> {
        self.blocks
            .get(slot)
            .copied()
            .ok_or(FileSystemError::FileTooBig)
    }

    pub fn set(&mut self, slot: usize, bno: u32) -> Result<()> {
        let ptr = self.blocks.get_mut(slot).ok_or(FileSystemError::FileTooBig)?;
        *ptr = bno;
        Ok(())
    }

    /// 前 `slots` 个槽中已分配的 (槽号, 块号)
    pub fn mapped(&self, slots: usize) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.blocks
            .iter()
            .take(slots)
            .enumerate()
            .filter(|&(_, &bno)| bno != 0)
            .map(|(slot, &bno)| (slot, bno))
    }

    pub fn decode(block: &Block) -> Self {
        Self {
            blocks: block
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }

    pub fn encode(&self) -> Block {
        let mut block = zeroed_block();
        for (dst, bno) in block.chunks_exact_mut(4).zip(&self.blocks) {
            dst.copy_from_slice(&bno.to_le_bytes());
        }
        block
    }

    pub fn load(disk: &dyn BlockDevice, bno: u32) -> Result<Self> {
        let mut block = zeroed_block();
        disk.read_block(bno as u64, &mut block)?;
        Ok(Self::decode(&block))
    }

    pub fn store(&self, disk: &dyn BlockDevice, bno: u32) -> Result<()> {
        disk.write_block(bno as u64, &self.encode())?;
        Ok(())
    }
}
