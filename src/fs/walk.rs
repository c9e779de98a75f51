use std::ops::ControlFlow;

use log::warn;

use crate::fs::{
    config::MAX_TREE_DEPTH,
    directory::{DirEntry, Directory},
    error::{FileSystemError, Result},
    inode_table::Inode,
    FileSystem,
};

/// 遍历时看到的一个节点
#[derive(Debug, Clone)]
pub struct Node {
    pub ino: u32,
    pub name: String,
    pub inode: Inode,
}

/// 目录树遍历的回调。
///
/// 返回 `ControlFlow::Break` 会立即结束整个遍历。
pub trait TreeVisitor {
    /// 进入一个子目录之前调用
    fn enter_dir(&mut self, _fs: &FileSystem, _dir: &Node) -> Result<ControlFlow<()>> {
        Ok(ControlFlow::Continue(()))
    }

    /// 子目录的所有表项都处理完之后调用
    fn leave_dir(&mut self, _fs: &FileSystem, _dir: &Node) -> Result<()> {
        Ok(())
    }

    fn visit_file(&mut self, fs: &FileSystem, parent: &Node, file: &Node)
        -> Result<ControlFlow<()>>;
}

struct Frame {
    node: Node,
    entries: Vec<DirEntry>,
    next: usize,
}

impl FileSystem {
    fn open_frame(&self, node: Node) -> Result<Frame> {
        let entries = Directory::load(self.disk(), node.inode.index_block)?
            .entries()
            .to_vec();
        Ok(Frame {
            node,
            entries,
            next: 0,
        })
    }

    /// 从目录 `start` 开始做先序遍历。
    ///
    /// 用显式栈代替递归，深度超过 MAX_TREE_DEPTH 视为目录树损坏（比如出现了环）。
    pub fn walk(&self, start: u32, visitor: &mut dyn TreeVisitor) -> Result<ControlFlow<()>> {
        let (root, _) = self.read_directory(start)?;
        let mut stack = vec![self.open_frame(Node {
            ino: start,
            name: String::from("/"),
            inode: root,
        })?];

        while let Some(frame) = stack.last_mut() {
            let Some(entry) = frame.entries.get(frame.next).cloned() else {
                if let Some(done) = stack.pop() {
                    if !stack.is_empty() {
                        visitor.leave_dir(self, &done.node)?;
                    }
                }
                continue;
            };
            frame.next += 1;

            let node = Node {
                ino: entry.inode,
                name: entry.name(),
                inode: self.read_inode(entry.inode)?,
            };

            if node.inode.is_dir() {
                if stack.len() >= MAX_TREE_DEPTH {
                    return Err(FileSystemError::Corrupted(format!(
                        "directory tree deeper than {} levels at '{}'",
                        MAX_TREE_DEPTH, node.name
                    )));
                }
                if visitor.enter_dir(self, &node)?.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
                let child = self.open_frame(node)?;
                stack.push(child);
            } else if node.inode.is_file() {
                let parent = &stack[stack.len() - 1].node;
                if visitor.visit_file(self, parent, &node)?.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            } else {
                warn!("skipping '{}' (inode {}): unknown type", node.name, node.ino);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// 按先序收集 `start` 之下的所有普通文件
    pub fn collect_files(&self, start: u32) -> Result<Vec<FileRef>> {
        let mut collector = FileCollector::default();
        self.walk(start, &mut collector)?;
        Ok(collector.files)
    }

    /// 目录 `target` 是否就是 `root` 或位于它的子树中
    pub fn contains_dir(&self, root: u32, target: u32) -> Result<bool> {
        if root == target {
            return Ok(true);
        }
        let mut finder = DirFinder { target };
        Ok(self.walk(root, &mut finder)?.is_break())
    }
}

/// 遍历得到的普通文件及其所在目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub parent: u32,
    pub name: String,
    pub ino: u32,
}

#[derive(Default)]
struct FileCollector {
    files: Vec<FileRef>,
}

impl TreeVisitor for FileCollector {
    fn visit_file(
        &mut self,
        _fs: &FileSystem,
        parent: &Node,
        file: &Node,
    ) -> Result<ControlFlow<()>> {
        self.files.push(FileRef {
            parent: parent.ino,
            name: file.name.clone(),
            ino: file.ino,
        });
        Ok(ControlFlow::Continue(()))
    }
}

struct DirFinder {
    target: u32,
}

impl TreeVisitor for DirFinder {
    fn enter_dir(&mut self, _fs: &FileSystem, dir: &Node) -> Result<ControlFlow<()>> {
        if dir.ino == self.target {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn visit_file(&mut self, _: &FileSystem, _: &Node, _: &Node) -> Result<ControlFlow<()>> {
        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        disk::MemDisk,
        fs::{config::ROOT_INO, super_block::FormatOptions},
    };

    fn volume() -> FileSystem {
        let disk = Arc::new(MemDisk::new(256));
        FileSystem::format(disk, FormatOptions::new(256)).unwrap()
    }

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl TreeVisitor for Trace {
        fn enter_dir(&mut self, _: &FileSystem, dir: &Node) -> Result<ControlFlow<()>> {
            self.0.push(format!("+{}", dir.name));
            Ok(ControlFlow::Continue(()))
        }

        fn leave_dir(&mut self, _: &FileSystem, dir: &Node) -> Result<()> {
            self.0.push(format!("-{}", dir.name));
            Ok(())
        }

        fn visit_file(&mut self, _: &FileSystem, p: &Node, f: &Node) -> Result<ControlFlow<()>> {
            self.0.push(format!("{}/{}", p.name, f.name));
            Ok(ControlFlow::Continue(()))
        }
    }

    #[test]
    fn pre_order_with_enter_and_leave() {
        let mut fs = volume();
        fs.create(ROOT_INO, "a", 0o644).unwrap();
        let sub = fs.mkdir(ROOT_INO, "sub", 0o755).unwrap();
        fs.create(sub, "b", 0o644).unwrap();
        fs.create(ROOT_INO, "c", 0o644).unwrap();

        let mut trace = Trace::default();
        assert!(fs.walk(ROOT_INO, &mut trace).unwrap().is_continue());
        assert_eq!(trace.0, vec!["//a", "+sub", "sub/b", "-sub", "//c"]);
    }

    #[test]
    fn break_stops_the_walk() {
        struct FirstFile(Option<String>);
        impl TreeVisitor for FirstFile {
            fn visit_file(&mut self, _: &FileSystem, _: &Node, f: &Node) -> Result<ControlFlow<()>> {
                self.0 = Some(f.name.clone());
                Ok(ControlFlow::Break(()))
            }
        }

        let mut fs = volume();
        fs.create(ROOT_INO, "x", 0o644).unwrap();
        fs.create(ROOT_INO, "y", 0o644).unwrap();
        let mut first = FirstFile(None);
        assert!(fs.walk(ROOT_INO, &mut first).unwrap().is_break());
        assert_eq!(first.0.as_deref(), Some("x"));
    }

    #[test]
    fn subtree_membership() {
        let mut fs = volume();
        let a = fs.mkdir(ROOT_INO, "a", 0o755).unwrap();
        let b = fs.mkdir(a, "b", 0o755).unwrap();
        let c = fs.mkdir(ROOT_INO, "c", 0o755).unwrap();
        assert!(fs.contains_dir(a, b).unwrap());
        assert!(fs.contains_dir(a, a).unwrap());
        assert!(!fs.contains_dir(a, c).unwrap());
    }

    #[test]
    fn cycles_are_reported_as_corruption() {
        let mut fs = volume();
        let a = fs.mkdir(ROOT_INO, "a", 0o755).unwrap();
        // 手工把 a 挂到它自己下面
        let (inode, mut table) = fs.read_directory(a).unwrap();
        table.insert(a, "loop").unwrap();
        fs.write_directory(&inode, &table).unwrap();

        let mut trace = Trace::default();
        assert!(matches!(
            fs.walk(ROOT_INO, &mut trace),
            Err(FileSystemError::Corrupted(_))
        ));
    }
}
