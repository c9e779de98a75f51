use serde::{Deserialize, Serialize};

use crate::{
    disk::{zeroed_block, Block, BlockDevice},
    fs::{
        config::{
            BITS_PER_BLOCK, INODES_PER_BLOCK, INODE_TABLE_START_BLOCK_ID, MAGIC,
            REFS_PER_BLOCK, SUPER_BLOCK_BLOCK_ID,
        },
        error::{FileSystemError, Result},
    },
};

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub nr_blocks: u32,
    pub nr_inodes: u32,
}

impl FormatOptions {
    /// 默认 inode 数与块数相同
    pub fn new(nr_blocks: u32) -> Self {
        Self {
            nr_blocks,
            nr_inodes: nr_blocks,
        }
    }

    pub fn with_inodes(mut self, nr_inodes: u32) -> Self {
        self.nr_inodes = nr_inodes;
        self
    }
}

/// 磁盘上的超级块。所有字段按小端 u32 依次存放在块 0 的开头。
///
/// ```text
/// +---------------+
/// |  superblock   |  1 block
/// +---------------+
/// |  inode store  |  nr_istore_blocks
/// +---------------+
/// | ifree bitmap  |  nr_ifree_blocks
/// +---------------+
/// | bfree bitmap  |  nr_bfree_blocks
/// +---------------+
/// |  ref counts   |  nr_rc_blocks
/// +---------------+
/// |  data blocks  |  rest of the volume
/// +---------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub magic: u32,
    pub nr_blocks: u32, // 总块数（含超级块与元数据区）
    pub nr_inodes: u32, // 总 inode 数
    pub nr_istore_blocks: u32,
    pub nr_ifree_blocks: u32,
    pub nr_bfree_blocks: u32,
    pub nr_rc_blocks: u32,
    pub nr_free_inodes: u32,
    pub nr_free_blocks: u32,
}

impl SuperBlock {
    /// 根据格式化参数计算各区域大小
    pub fn new(opts: FormatOptions) -> Result<Self> {
        if opts.nr_inodes < 2 {
            return Err(FileSystemError::InvalidArgument(format!(
                "need at least 2 inodes, got {}",
                opts.nr_inodes
            )));
        }

        let nr_istore_blocks = opts.nr_inodes.div_ceil(INODES_PER_BLOCK);
        let nr_ifree_blocks = opts.nr_inodes.div_ceil(BITS_PER_BLOCK);
        let nr_bfree_blocks = opts.nr_blocks.div_ceil(BITS_PER_BLOCK);
        let nr_rc_blocks = opts.nr_blocks.div_ceil(REFS_PER_BLOCK);

        let meta = 1 + nr_istore_blocks + nr_ifree_blocks + nr_bfree_blocks + nr_rc_blocks;
        // 根目录占一个数据块，至少还要留一个给用户
        if opts.nr_blocks < meta + 2 {
            return Err(FileSystemError::InvalidArgument(format!(
                "volume of {} blocks is too small (metadata needs {})",
                opts.nr_blocks, meta
            )));
        }
        let nr_data_blocks = opts.nr_blocks - meta;

        Ok(Self {
            magic: MAGIC,
            nr_blocks: opts.nr_blocks,
            nr_inodes: opts.nr_inodes,
            nr_istore_blocks,
            nr_ifree_blocks,
            nr_bfree_blocks,
            nr_rc_blocks,
            nr_free_inodes: opts.nr_inodes - 1,
            nr_free_blocks: nr_data_blocks - 1,
        })
    }

    pub fn inode_table_start(&self) -> u32 {
        INODE_TABLE_START_BLOCK_ID
    }

    pub fn inode_bitmap_start(&self) -> u32 {
        self.inode_table_start() + self.nr_istore_blocks
    }

    pub fn block_bitmap_start(&self) -> u32 {
        self.inode_bitmap_start() + self.nr_ifree_blocks
    }

    pub fn ref_table_start(&self) -> u32 {
        self.block_bitmap_start() + self.nr_bfree_blocks
    }

    /// 第一个数据块，格式化时用作根目录的索引块
    pub fn data_block_start(&self) -> u32 {
        self.ref_table_start() + self.nr_rc_blocks
    }

    pub fn nr_data_blocks(&self) -> u32 {
        self.nr_blocks - self.data_block_start()
    }

    pub fn encode(&self) -> Result<Block> {
        let mut block = zeroed_block();
        bincode::serialize_into(&mut block[..], self)?;
        Ok(block)
    }

    pub fn decode(block: &Block) -> Result<Self> {
        let sb: SuperBlock = bincode::deserialize(&block[..])?;
        if sb.magic != MAGIC {
            return Err(FileSystemError::Corrupted(format!(
                "wrong magic number {:#x}",
                sb.magic
            )));
        }
        if sb.nr_free_inodes > sb.nr_inodes || sb.nr_free_blocks > sb.nr_blocks {
            return Err(FileSystemError::Corrupted(
                "free counters exceed totals".to_string(),
            ));
        }
        sb.check_geometry()?;
        Ok(sb)
    }

    /// 每个区域都要装得下它描述的对象，数据区也不能为空
    fn check_geometry(&self) -> Result<()> {
        let fits = |region: u32, per_block: u32, items: u32| {
            region as u64 * per_block as u64 >= items as u64
        };
        let regions = [
            ("inode store", fits(self.nr_istore_blocks, INODES_PER_BLOCK, self.nr_inodes)),
            ("inode bitmap", fits(self.nr_ifree_blocks, BITS_PER_BLOCK, self.nr_inodes)),
            ("block bitmap", fits(self.nr_bfree_blocks, BITS_PER_BLOCK, self.nr_blocks)),
            ("refcount table", fits(self.nr_rc_blocks, REFS_PER_BLOCK, self.nr_blocks)),
        ];
        if let Some((name, _)) = regions.iter().find(|(_, ok)| !ok) {
            return Err(FileSystemError::Corrupted(format!(
                "{} region too small for {} inodes / {} blocks",
                name, self.nr_inodes, self.nr_blocks
            )));
        }
        if self.nr_inodes == 0 {
            return Err(FileSystemError::Corrupted("volume has no inodes".to_string()));
        }

        let data_start = INODE_TABLE_START_BLOCK_ID as u64
            + self.nr_istore_blocks as u64
            + self.nr_ifree_blocks as u64
            + self.nr_bfree_blocks as u64
            + self.nr_rc_blocks as u64;
        if data_start >= self.nr_blocks as u64 {
            return Err(FileSystemError::Corrupted(format!(
                "metadata ends at block {} but volume has {} blocks",
                data_start, self.nr_blocks
            )));
        }
        Ok(())
    }

    pub fn load(disk: &dyn BlockDevice) -> Result<Self> {
        let mut block = zeroed_block();
        disk.read_block(SUPER_BLOCK_BLOCK_ID as u64, &mut block)?;
        let sb = Self::decode(&block)?;
        if (sb.nr_blocks as u64) > disk.block_count() {
            return Err(FileSystemError::Corrupted(format!(
                "superblock claims {} blocks, device has {}",
                sb.nr_blocks,
                disk.block_count()
            )));
        }
        Ok(sb)
    }

    pub fn sync(&self, disk: &dyn BlockDevice) -> Result<()> {
        disk.write_block(SUPER_BLOCK_BLOCK_ID as u64, &self.encode()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_for_a_tiny_volume() {
        let sb = SuperBlock::new(FormatOptions::new(16)).unwrap();
        assert_eq!(sb.nr_istore_blocks, 1);
        assert_eq!(sb.nr_ifree_blocks, 1);
        assert_eq!(sb.nr_bfree_blocks, 1);
        assert_eq!(sb.nr_rc_blocks, 1);
        assert_eq!(sb.data_block_start(), 5);
        assert_eq!(sb.nr_data_blocks(), 11);
        assert_eq!(sb.nr_free_blocks, 10);
        assert_eq!(sb.nr_free_inodes, 15);
    }

    #[test]
    fn regions_follow_each_other() {
        let sb = SuperBlock::new(FormatOptions::new(100_000).with_inodes(5000)).unwrap();
        assert_eq!(sb.nr_istore_blocks, 79);
        assert_eq!(sb.inode_bitmap_start(), 80);
        assert_eq!(sb.block_bitmap_start(), 81);
        assert_eq!(sb.nr_bfree_blocks, 4);
        assert_eq!(sb.ref_table_start(), 85);
        assert_eq!(sb.nr_rc_blocks, 98);
        assert_eq!(sb.data_block_start(), 183);
    }

    #[test]
    fn too_small_volume_is_rejected() {
        assert!(matches!(
            SuperBlock::new(FormatOptions::new(6)),
            Err(FileSystemError::InvalidArgument(_))
        ));
    }

    #[test]
    fn encoded_layout_is_packed_little_endian() {
        let sb = SuperBlock::new(FormatOptions::new(64)).unwrap();
        let block = sb.encode().unwrap();
        assert_eq!(&block[..4], &MAGIC.to_le_bytes());
        assert_eq!(&block[4..8], &64u32.to_le_bytes());
        assert_eq!(SuperBlock::decode(&block).unwrap(), sb);
    }

    #[test]
    fn inconsistent_geometry_is_corruption() {
        let good = SuperBlock::new(FormatOptions::new(64)).unwrap();

        let mut sb = good.clone();
        sb.nr_inodes = 1_000_000;
        assert!(matches!(
            SuperBlock::decode(&sb.encode().unwrap()),
            Err(FileSystemError::Corrupted(_))
        ));

        let mut sb = good.clone();
        sb.nr_blocks = 40_000;
        assert!(matches!(
            SuperBlock::decode(&sb.encode().unwrap()),
            Err(FileSystemError::Corrupted(_))
        ));

        let mut sb = good;
        sb.nr_rc_blocks = 70;
        assert!(matches!(
            SuperBlock::decode(&sb.encode().unwrap()),
            Err(FileSystemError::Corrupted(_))
        ));
    }

    #[test]
    fn wrong_magic_is_corruption() {
        let block = zeroed_block();
        assert!(matches!(
            SuperBlock::decode(&block),
            Err(FileSystemError::Corrupted(_))
        ));
    }
}
