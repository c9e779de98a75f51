use std::sync::Arc;

use dedup_fs::{
    disk::MemDisk,
    fs::{
        config::ROOT_INO, dedup::DedupReport, error::FileSystemError, super_block::FormatOptions,
        FileSystem,
    },
};

fn small_volume() -> (Arc<MemDisk>, FileSystem) {
    let disk = Arc::new(MemDisk::new(16));
    let fs = FileSystem::format(disk.clone(), FormatOptions::new(16).with_inodes(16)).unwrap();
    (disk, fs)
}

fn file_with(fs: &mut FileSystem, dir: u32, name: &str, data: &[u8]) -> u32 {
    let ino = fs.create(dir, name, 0o644).unwrap();
    fs.write(ino, 0, data).unwrap();
    ino
}

#[test]
fn two_identical_files_share_one_block() {
    let (_, mut fs) = small_volume();
    let page = vec![0xAB; 4096];
    let a = file_with(&mut fs, ROOT_INO, "a", &page);
    let b = file_with(&mut fs, ROOT_INO, "b", &page);
    let free = fs.free_blocks();

    let report = fs.dedup().unwrap();
    assert_eq!(
        report,
        DedupReport {
            files_scanned: 2,
            blocks_scanned: 2,
            blocks_merged: 1,
            blocks_freed: 1,
        }
    );
    assert_eq!(fs.free_blocks(), free + 1);

    let shared = fs.get_block(a, 0, false).unwrap().unwrap();
    assert_eq!(fs.get_block(b, 0, false).unwrap(), Some(shared));
    assert_eq!(fs.ref_count(shared), 2);

    // 第二次扫描什么都不做
    let again = fs.dedup().unwrap();
    assert_eq!(again.blocks_merged, 0);
    assert_eq!(fs.free_blocks(), free + 1);
}

#[test]
fn different_content_is_left_alone() {
    let (_, mut fs) = small_volume();
    file_with(&mut fs, ROOT_INO, "a", &[1u8; 4096]);
    file_with(&mut fs, ROOT_INO, "b", &[2u8; 4096]);
    let free = fs.free_blocks();

    assert_eq!(fs.dedup().unwrap().blocks_merged, 0);
    assert_eq!(fs.free_blocks(), free);
}

#[test]
fn duplicates_are_found_across_directories() {
    let (_, mut fs) = small_volume();
    let d1 = fs.mkdir(ROOT_INO, "d1", 0o755).unwrap();
    let d2 = fs.mkdir(d1, "d2", 0o755).unwrap();
    let text = b"the same short tail".to_vec();
    let a = file_with(&mut fs, ROOT_INO, "a", &text);
    let b = file_with(&mut fs, d2, "b", &text);

    assert_eq!(fs.dedup().unwrap().blocks_merged, 1);
    assert_eq!(
        fs.get_block(a, 0, false).unwrap(),
        fs.get_block(b, 0, false).unwrap()
    );

    let mut buf = vec![0u8; text.len()];
    fs.read(b, 0, &mut buf).unwrap();
    assert_eq!(buf, text);
}

#[test]
fn shared_block_outlives_its_first_owner() {
    let (_, mut fs) = small_volume();
    let page = vec![6u8; 4096];
    file_with(&mut fs, ROOT_INO, "a", &page);
    let b = file_with(&mut fs, ROOT_INO, "b", &page);
    fs.dedup().unwrap();
    let shared = fs.get_block(b, 0, false).unwrap().unwrap();
    let free = fs.free_blocks();

    // 删掉 a 只释放它的索引块
    fs.unlink(ROOT_INO, "a").unwrap();
    assert_eq!(fs.free_blocks(), free + 1);
    assert_eq!(fs.ref_count(shared), 1);

    let mut buf = vec![0u8; 4096];
    fs.read(b, 0, &mut buf).unwrap();
    assert_eq!(buf, page);

    fs.unlink(ROOT_INO, "b").unwrap();
    assert_eq!(fs.free_blocks(), free + 3);
    assert_eq!(fs.ref_count(shared), 0);
}

#[test]
fn truncating_a_sharer_keeps_the_block() {
    let (_, mut fs) = small_volume();
    let page = vec![8u8; 4096];
    let a = file_with(&mut fs, ROOT_INO, "a", &page);
    let b = file_with(&mut fs, ROOT_INO, "b", &page);
    fs.dedup().unwrap();
    let shared = fs.get_block(a, 0, false).unwrap().unwrap();
    let free = fs.free_blocks();

    fs.truncate(a, 0).unwrap();
    assert_eq!(fs.free_blocks(), free);
    assert_eq!(fs.ref_count(shared), 1);
    assert_eq!(fs.get_block(b, 0, false).unwrap(), Some(shared));
}

#[test]
fn io_error_aborts_the_scan() {
    let (disk, mut fs) = small_volume();
    let page = vec![1u8; 4096];
    file_with(&mut fs, ROOT_INO, "a", &page);
    let b = file_with(&mut fs, ROOT_INO, "b", &page);
    let index_of_b = fs.stat(b).unwrap().index_block;
    let free = fs.free_blocks();

    disk.fail_reads(index_of_b as u64);
    assert!(matches!(fs.dedup(), Err(FileSystemError::Io(_))));
    disk.heal();

    assert_eq!(fs.free_blocks(), free);
    assert_eq!(fs.dedup().unwrap().blocks_merged, 1);
}
