use std::sync::Arc;

use dedup_fs::{
    disk::MemDisk,
    fs::{
        config::ROOT_INO,
        control::ControlSurface,
        error::{FileSystemError, Result},
        eviction::{EvictionPolicy, Evicted, LruPolicy, PolicyRegistry, TimeField},
        super_block::FormatOptions,
        FileSystem,
    },
    utils::Timestamp,
};

fn volume() -> FileSystem {
    FileSystem::format(Arc::new(MemDisk::new(128)), FormatOptions::new(128)).unwrap()
}

/// 总是删除根目录下名字最小的文件
struct FirstName;

impl EvictionPolicy for FirstName {
    fn name(&self) -> &str {
        "first-name"
    }

    fn clean_partition(&self, fs: &mut FileSystem) -> Result<Option<Evicted>> {
        self.clean_dir(fs, ROOT_INO)
    }

    fn clean_dir(&self, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>> {
        let mut entries = fs.read_dir(dir)?;
        entries.sort_by_key(|e| e.name());
        let Some(first) = entries.into_iter().next() else {
            return Ok(None);
        };
        let size = fs.stat(first.inode)?.size;
        fs.unlink(dir, &first.name())?;
        Ok(Some(Evicted {
            parent: dir,
            name: first.name(),
            ino: first.inode,
            size,
        }))
    }
}

#[test]
fn custom_policy_becomes_active_on_registration() {
    let mut ctl = ControlSurface::new(PolicyRegistry::with_builtin().unwrap());
    ctl.attach("p", volume()).unwrap();
    let fs = ctl.partition_mut("p").unwrap();
    fs.create(ROOT_INO, "b", 0o644).unwrap();
    fs.create(ROOT_INO, "a", 0o644).unwrap();

    ctl.register_policy(Box::new(FirstName)).unwrap();
    assert_eq!(ctl.active_policy(), "first-name");
    assert_eq!(ctl.policies(), vec!["default", "lru", "size", "print", "first-name"]);

    let gone = ctl.clean("p").unwrap().unwrap();
    assert_eq!(gone.name, "a");

    ctl.unregister_policy("first-name").unwrap();
    assert_eq!(ctl.active_policy(), "default");
    assert_eq!(ctl.clean("p").unwrap(), None);
}

#[test]
fn clean_dir_resolves_a_path() {
    let mut ctl = ControlSurface::new(PolicyRegistry::with_builtin().unwrap());
    ctl.attach("p", volume()).unwrap();
    ctl.set_policy("size").unwrap();

    let fs = ctl.partition_mut("p").unwrap();
    let logs = fs.mkdir(ROOT_INO, "logs", 0o755).unwrap();
    for (name, len) in [("a.log", 100usize), ("b.log", 9000)] {
        let ino = fs.create(logs, name, 0o644).unwrap();
        fs.write(ino, 0, &vec![0x11; len]).unwrap();
    }
    let huge = fs.create(ROOT_INO, "huge", 0o644).unwrap();
    fs.write(huge, 0, &vec![0x22; 20000]).unwrap();

    let gone = ctl.clean_dir("p", "/logs").unwrap().unwrap();
    assert_eq!(gone.name, "b.log");
    assert_eq!(gone.parent, logs);

    let fs = ctl.partition_mut("p").unwrap();
    assert!(fs.find_entry(ROOT_INO, "huge").unwrap().is_some());
    assert!(matches!(
        ctl.clean_dir("p", "/missing"),
        Err(FileSystemError::NotFound(_))
    ));
}

#[test]
fn lru_can_rank_by_access_time() {
    let mut fs = volume();
    let a = fs.create(ROOT_INO, "a", 0o644).unwrap();
    let b = fs.create(ROOT_INO, "b", 0o644).unwrap();
    for (ino, sec) in [(a, 500), (b, 100)] {
        let mut inode = fs.read_inode(ino).unwrap();
        inode.atime = Timestamp { sec, nsec: 0 };
        inode.ctime = Timestamp { sec: 1000 - sec, nsec: 0 };
        fs.write_inode(ino, &inode).unwrap();
    }

    let by_access = LruPolicy::new(TimeField::Access);
    assert_eq!(by_access.clean_partition(&mut fs).unwrap().unwrap().ino, b);

    let c = fs.create(ROOT_INO, "c", 0o644).unwrap();
    let by_change = LruPolicy::default();
    // a 的 ctime 是 500，c 是刚刚创建的
    assert_eq!(by_change.clean_partition(&mut fs).unwrap().unwrap().ino, a);
    assert_eq!(fs.find_entry(ROOT_INO, "c").unwrap(), Some(c));
}

#[test]
fn eviction_releases_space() {
    let mut fs = volume();
    let before = fs.free_blocks();
    let ino = fs.create(ROOT_INO, "blob", 0o644).unwrap();
    fs.write(ino, 0, &vec![1u8; 4 * 4096]).unwrap();

    let gone = LruPolicy::default().clean_partition(&mut fs).unwrap().unwrap();
    assert_eq!(gone.size, 4 * 4096);
    assert_eq!(fs.free_blocks(), before);
}

#[test]
fn partitions_are_named_and_detachable() {
    let mut ctl = ControlSurface::new(PolicyRegistry::new());
    let id_a = ctl.attach("a", volume()).unwrap();
    let id_b = ctl.attach("b", volume()).unwrap();
    assert_ne!(id_a, id_b);
    assert!(matches!(
        ctl.attach("a", volume()),
        Err(FileSystemError::AlreadyExists(_))
    ));
    assert_eq!(ctl.partitions(), vec![("a", id_a), ("b", id_b)]);

    let fs = ctl.detach("a").unwrap();
    fs.unmount().unwrap();
    assert!(matches!(
        ctl.partition_mut("a"),
        Err(FileSystemError::InvalidArgument(_))
    ));
    ctl.unmount_all().unwrap();
}

#[test]
fn dedup_through_the_control_surface() {
    let mut ctl = ControlSurface::new(PolicyRegistry::new());
    ctl.attach("p", volume()).unwrap();
    let fs = ctl.partition_mut("p").unwrap();
    for name in ["x", "y"] {
        let ino = fs.create(ROOT_INO, name, 0o644).unwrap();
        fs.write(ino, 0, &[9u8; 100]).unwrap();
    }
    assert_eq!(ctl.dedup("p").unwrap().blocks_freed, 1);
}
