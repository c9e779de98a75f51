use std::ops::ControlFlow;

use log::{debug, info};

use crate::{
    disk::{zeroed_block, Block},
    fs::{
        config::{PTRS_PER_INDEX, ROOT_INO},
        error::Result,
        walk::{Node, TreeVisitor},
        FileSystem,
    },
};

/// 一次去重扫描的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub files_scanned: u32,
    pub blocks_scanned: u32,
    /// 改为指向已有副本的索引项数
    pub blocks_merged: u32,
    /// 因此回到空闲池的块数
    pub blocks_freed: u32,
}

/// 在整棵树里找第一个与 `block` 内容相同的其他块
struct TwinFinder {
    block: u32,
    len: usize,
    data: Block,
    buf: Block,
    found: Option<u32>,
}

impl TreeVisitor for TwinFinder {
    fn visit_file(&mut self, fs: &FileSystem, _: &Node, file: &Node) -> Result<ControlFlow<()>> {
        let index = fs.read_index(file.inode.index_block)?;
        let slots = file.inode.data_slots().min(PTRS_PER_INDEX);

        for (slot, candidate) in index.mapped(slots) {
            if candidate == self.block || file.inode.logical_len(slot) != self.len {
                continue;
            }
            fs.disk().read_block(candidate as u64, &mut self.buf)?;
            if self.buf[..self.len] == self.data[..self.len] {
                self.found = Some(candidate);
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

impl FileSystem {
    /// 找出内容相同的数据块并让它们共享同一个物理块。
    ///
    /// 外层按先序遍历每个文件的每个数据块，内层再遍历整棵树寻找副本；
    /// 找到后把当前索引项改指向副本，副本计数加一，原块计数减一。
    /// 已经共享的块不会被当成合并的来源，所以重复扫描不会再有变化。
    /// 任何 I/O 错误都会中止整次扫描。
    pub fn dedup(&mut self) -> Result<DedupReport> {
        let mut report = DedupReport::default();
        let files = self.collect_files(ROOT_INO)?;
        info!("dedup: scanning {} files", files.len());

        for file in files {
            report.files_scanned += 1;
            let inode = self.read_inode(file.ino)?;
            let mut index = self.read_index(inode.index_block)?;
            let slots = inode.data_slots().min(PTRS_PER_INDEX);

            for slot in 0..slots {
                let block = index.blocks[slot];
                if block == 0 {
                    continue;
                }
                report.blocks_scanned += 1;
                if self.ref_table.is_shared(block) {
                    continue;
                }

                let len = inode.logical_len(slot);
                let mut finder = TwinFinder {
                    block,
                    len,
                    data: zeroed_block(),
                    buf: zeroed_block(),
                    found: None,
                };
                self.disk().read_block(block as u64, &mut finder.data)?;
                self.walk(ROOT_INO, &mut finder)?;
                let Some(twin) = finder.found else {
                    continue;
                };

                index.set(slot, twin)?;
                self.write_index(inode.index_block, &index)?;
                self.ref_table.inc(twin)?;
                if self.release_data_block(block)? {
                    report.blocks_freed += 1;
                }
                report.blocks_merged += 1;
                debug!(
                    "dedup: '{}' slot {} now shares block {} (was {})",
                    file.name, slot, twin, block
                );
            }
        }

        info!(
            "dedup: {} blocks in {} files, {} merged, {} freed",
            report.blocks_scanned, report.files_scanned, report.blocks_merged, report.blocks_freed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{disk::MemDisk, fs::super_block::FormatOptions};

    fn volume() -> FileSystem {
        let disk = Arc::new(MemDisk::new(128));
        FileSystem::format(disk, FormatOptions::new(128)).unwrap()
    }

    #[test]
    fn tails_only_match_with_equal_length() {
        let mut fs = volume();
        let a = fs.create(ROOT_INO, "a", 0o644).unwrap();
        let b = fs.create(ROOT_INO, "b", 0o644).unwrap();
        // 同样的字节，但 b 的逻辑长度更长（后面是 0）
        fs.write(a, 0, b"abc").unwrap();
        fs.write(b, 0, b"abc\0").unwrap();

        let report = fs.dedup().unwrap();
        assert_eq!(report.blocks_scanned, 2);
        assert_eq!(report.blocks_merged, 0);
    }

    #[test]
    fn three_copies_collapse_into_one() {
        let mut fs = volume();
        let page = vec![7u8; 4096];
        let inos: Vec<u32> = ["x", "y", "z"]
            .iter()
            .map(|n| {
                let ino = fs.create(ROOT_INO, n, 0o644).unwrap();
                fs.write(ino, 0, &page).unwrap();
                ino
            })
            .collect();
        let before = fs.free_blocks();

        let report = fs.dedup().unwrap();
        assert_eq!(report.blocks_merged, 2);
        assert_eq!(report.blocks_freed, 2);
        assert_eq!(fs.free_blocks(), before + 2);

        let first = fs.get_block(inos[0], 0, false).unwrap().unwrap();
        for &ino in &inos[1..] {
            assert_eq!(fs.get_block(ino, 0, false).unwrap(), Some(first));
        }
        assert_eq!(fs.ref_count(first), 3);

        // 第二次扫描没有变化
        let again = fs.dedup().unwrap();
        assert_eq!(again.blocks_merged, 0);
        assert_eq!(fs.free_blocks(), before + 2);
    }

    #[test]
    fn duplicate_slots_inside_one_file() {
        let mut fs = volume();
        let ino = fs.create(ROOT_INO, "twice", 0o644).unwrap();
        let mut data = vec![1u8; 4096];
        data.extend(vec![1u8; 4096]);
        fs.write(ino, 0, &data).unwrap();

        let report = fs.dedup().unwrap();
        assert_eq!(report.blocks_merged, 1);
        let b0 = fs.get_block(ino, 0, false).unwrap();
        let b1 = fs.get_block(ino, 1, false).unwrap();
        assert_eq!(b0, b1);

        let mut back = vec![0u8; 8192];
        assert_eq!(fs.read(ino, 0, &mut back).unwrap(), 8192);
        assert_eq!(back, data);
    }
}
