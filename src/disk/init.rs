use std::{path::PathBuf, sync::mpsc::Sender, sync::Arc};

use log::info;

use crate::{
    disk::{BlockDevice, FileDisk, MemDisk, DEFAULT_BLOCK_COUNT},
    fs::{error::Result, super_block::FormatOptions, FileSystem},
};

/// 启动线程发回给界面的进度
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(Result<FileSystem>),
}

/// 打开或格式化卷所需的参数
#[derive(Debug, Clone)]
pub struct BootOptions {
    pub disk_path: PathBuf,
    pub nr_blocks: u32,
    pub nr_inodes: Option<u32>,
    /// 即使镜像已存在也重新格式化
    pub format: bool,
    /// 用内存盘代替镜像文件，退出后内容丢失
    pub ephemeral: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            disk_path: PathBuf::from("disk.img"),
            nr_blocks: DEFAULT_BLOCK_COUNT,
            nr_inodes: None,
            format: false,
            ephemeral: false,
        }
    }
}

impl BootOptions {
    fn format_options(&self) -> FormatOptions {
        let opts = FormatOptions::new(self.nr_blocks);
        match self.nr_inodes {
            Some(n) => opts.with_inodes(n),
            None => opts,
        }
    }
}

/// 在后台线程里准备好卷，通过 `tx` 汇报进度，最后发送 `Finished`。
pub fn perform_disk_initialization(opts: BootOptions, tx: Sender<BootProgress>) {
    let result = boot(&opts, &tx);
    tx.send(BootProgress::Finished(result)).ok();
}

fn boot(opts: &BootOptions, tx: &Sender<BootProgress>) -> Result<FileSystem> {
    let report = |p: BootProgress| {
        tx.send(p).ok();
    };

    report(BootProgress::Step("🧠 Initializing virtual disk..."));
    let (disk, fresh): (Arc<dyn BlockDevice>, bool) = if opts.ephemeral {
        (Arc::new(MemDisk::new(opts.nr_blocks)), true)
    } else {
        let existed = opts.disk_path.exists();
        let disk = FileDisk::create(&opts.disk_path, opts.nr_blocks)?;
        (Arc::new(disk), !existed)
    };
    report(BootProgress::Progress(30));

    let fs = if fresh || opts.format {
        // 只有新磁盘或者明确要求时才格式化
        report(BootProgress::Step("🔧 Formatting new file system..."));
        info!("formatting {}", opts.disk_path.display());
        FileSystem::format(disk, opts.format_options())?
    } else {
        report(BootProgress::Step("⚙️  Mounting file system..."));
        FileSystem::mount(disk)?
    };
    report(BootProgress::Progress(100));
    Ok(fs)
}
