use std::collections::BTreeMap;

use log::info;
use uuid::Uuid;

use crate::{
    fs::{
        config::POLICY_NAME_LEN,
        dedup::DedupReport,
        error::{FileSystemError, Result},
        eviction::{EvictionPolicy, Evicted, PolicyRegistry},
        FileSystem,
    },
    utils::generate_uuid,
};

/// 一个挂在控制面上的分区
#[derive(Debug)]
pub struct Partition {
    pub id: Uuid,
    pub fs: FileSystem,
}

/// 策略选择与按分区触发清理、去重的控制入口
pub struct ControlSurface {
    registry: PolicyRegistry,
    partitions: BTreeMap<String, Partition>,
}

impl ControlSurface {
    pub fn new(registry: PolicyRegistry) -> Self {
        Self {
            registry,
            partitions: BTreeMap::new(),
        }
    }

    pub fn attach(&mut self, name: &str, fs: FileSystem) -> Result<Uuid> {
        if self.partitions.contains_key(name) {
            return Err(FileSystemError::AlreadyExists(format!("partition {}", name)));
        }
        let id = generate_uuid();
        self.partitions.insert(name.to_string(), Partition { id, fs });
        info!("attached partition '{}' ({})", name, id);
        Ok(id)
    }

    pub fn detach(&mut self, name: &str) -> Result<FileSystem> {
        let part = self
            .partitions
            .remove(name)
            .ok_or_else(|| unknown_partition(name))?;
        info!("detached partition '{}' ({})", name, part.id);
        Ok(part.fs)
    }

    /// 按名字排序的分区列表
    pub fn partitions(&self) -> Vec<(&str, Uuid)> {
        self.partitions
            .iter()
            .map(|(name, p)| (name.as_str(), p.id))
            .collect()
    }

    pub fn partition_mut(&mut self, name: &str) -> Result<&mut FileSystem> {
        self.partitions
            .get_mut(name)
            .map(|p| &mut p.fs)
            .ok_or_else(|| unknown_partition(name))
    }

    pub fn policies(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn active_policy(&self) -> &str {
        self.registry.active().name()
    }

    pub fn register_policy(&mut self, policy: Box<dyn EvictionPolicy>) -> Result<()> {
        self.registry.register(policy)
    }

    pub fn unregister_policy(&mut self, name: &str) -> Result<()> {
        self.registry.unregister(name.trim())
    }

    /// 按名字切换策略，输入首尾的空白（包括换行）会被忽略
    pub fn set_policy(&mut self, input: &str) -> Result<()> {
        let name = input.trim();
        if name.len() > POLICY_NAME_LEN {
            return Err(FileSystemError::InvalidArgument(format!(
                "policy name longer than {} bytes",
                POLICY_NAME_LEN
            )));
        }
        self.registry.select(name)?;
        info!("eviction policy set to '{}'", name);
        Ok(())
    }

    /// 用当前策略在分区上驱逐一个文件
    pub fn clean(&mut self, partition: &str) -> Result<Option<Evicted>> {
        let part = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| unknown_partition(partition))?;
        self.registry.active().clean_partition(&mut part.fs)
    }

    /// 用当前策略在分区的某个目录下驱逐一个文件
    pub fn clean_dir(&mut self, partition: &str, path: &str) -> Result<Option<Evicted>> {
        let part = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| unknown_partition(partition))?;
        let dir = part.fs.resolve(path)?;
        self.registry.active().clean_dir(&mut part.fs, dir)
    }

    /// 空闲块低于阈值时反复驱逐，直到恢复或者没有可删的文件
    pub fn clean_until_healthy(&mut self, partition: &str) -> Result<Vec<Evicted>> {
        let mut evicted = Vec::new();
        while self.partition_mut(partition)?.needs_cleaning() {
            match self.clean(partition)? {
                Some(victim) => evicted.push(victim),
                None => break,
            }
        }
        Ok(evicted)
    }

    pub fn dedup(&mut self, partition: &str) -> Result<DedupReport> {
        self.partition_mut(partition)?.dedup()
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for part in self.partitions.values_mut() {
            part.fs.sync()?;
        }
        Ok(())
    }

    pub fn unmount_all(self) -> Result<()> {
        for (_, part) in self.partitions {
            part.fs.unmount()?;
        }
        Ok(())
    }
}

fn unknown_partition(name: &str) -> FileSystemError {
    FileSystemError::InvalidArgument(format!("unknown partition '{}'", name))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        disk::MemDisk,
        fs::{config::ROOT_INO, super_block::FormatOptions},
    };

    fn volume(blocks: u32) -> FileSystem {
        let disk = Arc::new(MemDisk::new(blocks));
        FileSystem::format(disk, FormatOptions::new(blocks)).unwrap()
    }

    #[test]
    fn policy_switching_trims_input() {
        let mut ctl = ControlSurface::new(PolicyRegistry::with_builtin().unwrap());
        assert_eq!(ctl.active_policy(), "default");
        ctl.set_policy("size\n").unwrap();
        assert_eq!(ctl.active_policy(), "size");
        assert!(ctl.set_policy(&"x".repeat(40)).is_err());
        assert!(ctl.set_policy("missing").is_err());
        assert_eq!(ctl.active_policy(), "size");
    }

    #[test]
    fn unknown_partition_is_invalid() {
        let mut ctl = ControlSurface::new(PolicyRegistry::new());
        assert!(matches!(
            ctl.clean("nope"),
            Err(FileSystemError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.dedup("nope"),
            Err(FileSystemError::InvalidArgument(_))
        ));
    }

    #[test]
    fn clean_until_healthy_frees_space() {
        let mut ctl = ControlSurface::new(PolicyRegistry::with_builtin().unwrap());
        ctl.attach("p0", volume(64)).unwrap();
        ctl.set_policy("size").unwrap();

        let fs = ctl.partition_mut("p0").unwrap();
        for i in 0..5 {
            let ino = fs.create(ROOT_INO, &format!("f{}", i), 0o644).unwrap();
            fs.write(ino, 0, &vec![i as u8 + 1; 4096 * 9]).unwrap();
        }
        assert!(fs.needs_cleaning());

        let evicted = ctl.clean_until_healthy("p0").unwrap();
        assert!(!evicted.is_empty());
        assert!(!ctl.partition_mut("p0").unwrap().needs_cleaning());
    }

    #[test]
    fn default_policy_never_evicts() {
        let mut ctl = ControlSurface::new(PolicyRegistry::new());
        ctl.attach("p0", volume(64)).unwrap();
        let fs = ctl.partition_mut("p0").unwrap();
        fs.create(ROOT_INO, "keep", 0o644).unwrap();
        assert_eq!(ctl.clean("p0").unwrap(), None);
        assert_eq!(ctl.partitions().len(), 1);
    }
}
