use std::ops::ControlFlow;

use log::info;

use crate::{
    fs::{
        config::{POLICY_NAME_LEN, ROOT_INO},
        error::{FileSystemError, Result},
        inode_table::Inode,
        walk::{Node, TreeVisitor},
        FileSystem,
    },
    utils::Timestamp,
};

/// 被驱逐的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub parent: u32,
    pub name: String,
    pub ino: u32,
    pub size: u32,
}

/// 空间不足时挑选并删除一个文件的策略。
///
/// 两个方法都返回被删除的文件，没有可删的文件时返回 `None`。
pub trait EvictionPolicy: Send {
    fn name(&self) -> &str;

    /// 在整个分区中挑一个文件删除
    fn clean_partition(&self, fs: &mut FileSystem) -> Result<Option<Evicted>>;

    /// 只在目录 `dir` 的直接子文件中挑选
    fn clean_dir(&self, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>>;
}

/// 什么都不删的默认策略，总是已注册
#[derive(Debug, Default)]
pub struct NoopPolicy;

impl EvictionPolicy for NoopPolicy {
    fn name(&self) -> &str {
        "default"
    }

    fn clean_partition(&self, _fs: &mut FileSystem) -> Result<Option<Evicted>> {
        Ok(None)
    }

    fn clean_dir(&self, _fs: &mut FileSystem, _dir: u32) -> Result<Option<Evicted>> {
        Ok(None)
    }
}

/// LRU 使用的时间字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeField {
    Access,
    Modification,
    #[default]
    Change,
}

impl TimeField {
    fn of(self, inode: &Inode) -> Timestamp {
        match self {
            TimeField::Access => inode.atime,
            TimeField::Modification => inode.mtime,
            TimeField::Change => inode.ctime,
        }
    }
}

/// 删除所选时间字段最旧的文件
#[derive(Debug, Default)]
pub struct LruPolicy {
    pub field: TimeField,
}

impl LruPolicy {
    pub fn new(field: TimeField) -> Self {
        Self { field }
    }
}

/// 删除最大的文件
#[derive(Debug, Default)]
pub struct SizePolicy;

/// 在候选文件中保留“最该被删”的那个
trait Ranking {
    fn prefers(&self, candidate: &Inode, current: &Inode) -> bool;
}

impl Ranking for LruPolicy {
    fn prefers(&self, candidate: &Inode, current: &Inode) -> bool {
        self.field.of(candidate) < self.field.of(current)
    }
}

impl Ranking for SizePolicy {
    fn prefers(&self, candidate: &Inode, current: &Inode) -> bool {
        candidate.size > current.size
    }
}

struct VictimSearch<'r, R: Ranking> {
    ranking: &'r R,
    best: Option<(Evicted, Inode)>,
}

impl<R: Ranking> VictimSearch<'_, R> {
    fn offer(&mut self, parent: u32, file: &Node) {
        let better = match &self.best {
            None => true,
            Some((_, current)) => self.ranking.prefers(&file.inode, current),
        };
        if better {
            self.best = Some((
                Evicted {
                    parent,
                    name: file.name.clone(),
                    ino: file.ino,
                    size: file.inode.size,
                },
                file.inode.clone(),
            ));
        }
    }
}

impl<R: Ranking> TreeVisitor for VictimSearch<'_, R> {
    fn visit_file(&mut self, _: &FileSystem, parent: &Node, file: &Node) -> Result<ControlFlow<()>> {
        self.offer(parent.ino, file);
        Ok(ControlFlow::Continue(()))
    }
}

fn evict(fs: &mut FileSystem, victim: Option<(Evicted, Inode)>) -> Result<Option<Evicted>> {
    let Some((victim, _)) = victim else {
        return Ok(None);
    };
    fs.remove(victim.parent, &victim.name)?;
    info!(
        "evicted '{}' (inode {}, {} bytes) from directory {}",
        victim.name, victim.ino, victim.size, victim.parent
    );
    Ok(Some(victim))
}

fn clean_tree<R: Ranking>(ranking: &R, fs: &mut FileSystem) -> Result<Option<Evicted>> {
    let mut search = VictimSearch {
        ranking,
        best: None,
    };
    fs.walk(ROOT_INO, &mut search)?;
    evict(fs, search.best)
}

fn clean_children<R: Ranking>(ranking: &R, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>> {
    let mut search = VictimSearch {
        ranking,
        best: None,
    };
    for entry in fs.read_dir(dir)? {
        let inode = fs.read_inode(entry.inode)?;
        if inode.is_file() {
            let node = Node {
                ino: entry.inode,
                name: entry.name(),
                inode,
            };
            search.offer(dir, &node);
        }
    }
    evict(fs, search.best)
}

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &str {
        "lru"
    }

    fn clean_partition(&self, fs: &mut FileSystem) -> Result<Option<Evicted>> {
        clean_tree(self, fs)
    }

    fn clean_dir(&self, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>> {
        clean_children(self, fs, dir)
    }
}

impl EvictionPolicy for SizePolicy {
    fn name(&self) -> &str {
        "size"
    }

    fn clean_partition(&self, fs: &mut FileSystem) -> Result<Option<Evicted>> {
        clean_tree(self, fs)
    }

    fn clean_dir(&self, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>> {
        clean_children(self, fs, dir)
    }
}

/// 不删除任何文件，只把目录树按缩进打印到日志里
#[derive(Debug, Default)]
pub struct PrintPolicy;

const TREE_INDENT: usize = 4;

/// 进入子目录时加缩进，离开时减回去
#[derive(Default)]
struct TreePrinter {
    indent: usize,
    lines: Vec<String>,
}

impl TreePrinter {
    fn line(&mut self, name: &str) {
        self.lines.push(format!("{:indent$}{}", "", name, indent = self.indent));
    }
}

impl TreeVisitor for TreePrinter {
    fn enter_dir(&mut self, _: &FileSystem, dir: &Node) -> Result<ControlFlow<()>> {
        self.line(&format!("{}/", dir.name));
        self.indent += TREE_INDENT;
        Ok(ControlFlow::Continue(()))
    }

    fn leave_dir(&mut self, _: &FileSystem, _: &Node) -> Result<()> {
        self.indent = self.indent.saturating_sub(TREE_INDENT);
        Ok(())
    }

    fn visit_file(&mut self, _: &FileSystem, _: &Node, file: &Node) -> Result<ControlFlow<()>> {
        self.line(&file.name);
        Ok(ControlFlow::Continue(()))
    }
}

/// 按先序列出 `start` 之下的目录树，每层缩进 4 个空格，目录名以 `/` 结尾
pub fn render_tree(fs: &FileSystem, start: u32) -> Result<Vec<String>> {
    let mut printer = TreePrinter::default();
    fs.walk(start, &mut printer)?;
    Ok(printer.lines)
}

impl EvictionPolicy for PrintPolicy {
    fn name(&self) -> &str {
        "print"
    }

    fn clean_partition(&self, fs: &mut FileSystem) -> Result<Option<Evicted>> {
        for line in render_tree(fs, ROOT_INO)? {
            info!("{}", line);
        }
        Ok(None)
    }

    fn clean_dir(&self, fs: &mut FileSystem, dir: u32) -> Result<Option<Evicted>> {
        info!("contents of directory {}", dir);
        for entry in fs.read_dir(dir)? {
            info!("{:indent$}{}", "", entry.name(), indent = TREE_INDENT);
        }
        Ok(None)
    }
}

/// 已注册的策略，其中一个处于激活状态。
///
/// "default" 策略永远存在，不能注销。
pub struct PolicyRegistry {
    policies: Vec<Box<dyn EvictionPolicy>>,
    active: usize,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self {
            policies: vec![Box::new(NoopPolicy)],
            active: 0,
        }
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带有 lru、size 与 print 三个内置策略，激活的仍是 default
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(LruPolicy::default()))?;
        registry.register(Box::new(SizePolicy))?;
        registry.register(Box::new(PrintPolicy))?;
        registry.select("default")?;
        Ok(registry)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.policies.iter().position(|p| p.name() == name)
    }

    /// 注册并立即激活新策略
    pub fn register(&mut self, policy: Box<dyn EvictionPolicy>) -> Result<()> {
        let name = policy.name();
        if name.is_empty() || name.len() > POLICY_NAME_LEN {
            return Err(FileSystemError::InvalidArgument(format!(
                "policy name '{}' must be 1 to {} bytes",
                name, POLICY_NAME_LEN
            )));
        }
        if self.position(name).is_some() {
            return Err(FileSystemError::InvalidArgument(format!(
                "policy '{}' is already registered",
                name
            )));
        }
        info!("registered eviction policy '{}'", name);
        self.policies.push(policy);
        self.active = self.policies.len() - 1;
        Ok(())
    }

    /// 注销策略；如果它正处于激活状态，回退到 default
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        if name == NoopPolicy.name() {
            return Err(FileSystemError::InvalidArgument(
                "the default policy cannot be unregistered".to_string(),
            ));
        }
        let pos = self
            .position(name)
            .ok_or_else(|| FileSystemError::NotFound(format!("policy {}", name)))?;
        let active_name = self.active().name().to_string();
        self.policies.remove(pos);
        self.active = self.position(&active_name).unwrap_or(0);
        info!("unregistered eviction policy '{}'", name);
        Ok(())
    }

    pub fn select(&mut self, name: &str) -> Result<()> {
        self.active = self.position(name).ok_or_else(|| {
            FileSystemError::InvalidArgument(format!("unknown policy '{}'", name))
        })?;
        Ok(())
    }

    pub fn active(&self) -> &dyn EvictionPolicy {
        self.policies[self.active].as_ref()
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }
}
