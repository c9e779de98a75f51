use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::{error::Error, time::Duration};

use crate::fs::{
    control::ControlSurface,
    eviction::{render_tree, Evicted},
    inode_table::InodeType,
    namei::RenameFlags,
};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Ls(Option<String>),
    Tree(Option<String>),
    Pwd,
    Cd(String),
    Mkdir(String),
    Rmdir(String),
    Touch(String),
    Rm(String),
    Mv(String, String),
    Cat(String),
    Write(String, String),
    Truncate(String, u64),
    Stat(String),
    Df,
    Sync,
    Dedup,
    Policies,
    Policy(String),
    Clean(Option<String>),
    Exit,
}

/// 一次 shell 会话：控制面、当前分区与工作目录
pub struct Session {
    pub ctl: ControlSurface,
    pub partition: String,
    pub cwd: String,
}

impl Session {
    pub fn new(ctl: ControlSurface, partition: &str) -> Self {
        Self {
            ctl,
            partition: partition.to_string(),
            cwd: String::from("/"),
        }
    }

    /// 把相对路径拼到当前目录上，并处理 "." 与 ".."
    pub fn absolute(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd, path)
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                p => parts.push(p),
            }
        }
        format!("/{}", parts.join("/"))
    }
}

pub fn execute_command(cmd: &Command, session: &mut Session) -> Result<(), Box<dyn Error>> {
    let partition = session.partition.clone();
    match cmd {
        Command::Help => print_help(),
        Command::Ls(path) => {
            let path = session.absolute(path.as_deref().unwrap_or("."));
            let fs = session.ctl.partition_mut(&partition)?;
            let dir = fs.resolve(&path)?;
            let mut entries = fs.read_dir(dir)?;
            entries.sort_by_key(|e| e.name());
            println!("📂  .");
            println!("📁  ..");
            for entry in entries {
                let inode = fs.stat(entry.inode)?;
                match inode.inode_type() {
                    Some(InodeType::Directory) => println!("📁  {}", entry.name().blue().bold()),
                    _ => println!(
                        "📄  {} {}",
                        entry.name(),
                        format!("({} bytes)", inode.size).bright_black()
                    ),
                }
            }
        }
        Command::Tree(path) => {
            let path = session.absolute(path.as_deref().unwrap_or("."));
            let fs = session.ctl.partition_mut(&partition)?;
            let dir = fs.resolve(&path)?;
            println!("{}", path.blue().bold());
            for line in render_tree(fs, dir)? {
                println!("{}", line);
            }
        }
        Command::Pwd => println!("📍 {}", session.cwd.cyan()),
        Command::Cd(path) => {
            let target = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let ino = fs.resolve(&target)?;
            fs.read_directory(ino)?;
            session.cwd = target;
            println!("📂 Moved to {}", session.cwd.blue());
        }
        Command::Mkdir(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let (dir, name) = fs.resolve_parent(&path)?;
            fs.mkdir(dir, name, 0o755)?;
            println!("✅ Created directory: {}", path.green());
        }
        Command::Rmdir(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let (dir, name) = fs.resolve_parent(&path)?;
            fs.rmdir(dir, name)?;
            println!("🗑️  Removed directory: {}", path.red());
        }
        Command::Touch(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let (dir, name) = fs.resolve_parent(&path)?;
            fs.create(dir, name, 0o644)?;
            println!("📝 Created file: {}", path.green());
        }
        Command::Rm(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let (dir, name) = fs.resolve_parent(&path)?;
            fs.unlink(dir, name)?;
            println!("❌ Deleted file: {}", path.red());
        }
        Command::Mv(from, to) => {
            let from = session.absolute(from);
            let to = session.absolute(to);
            let fs = session.ctl.partition_mut(&partition)?;
            let (src_dir, src_name) = fs.resolve_parent(&from)?;
            let (dst_dir, dst_name) = fs.resolve_parent(&to)?;
            fs.rename(src_dir, src_name, dst_dir, dst_name, RenameFlags::NOREPLACE)?;
            println!("🔀 {} -> {}", from.cyan(), to.green());
        }
        Command::Cat(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let ino = fs.resolve(&path)?;
            let size = fs.stat(ino)?.size as usize;
            let mut buf = vec![0u8; size];
            let n = fs.read(ino, 0, &mut buf)?;
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        Command::Write(path, content) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let (dir, name) = fs.resolve_parent(&path)?;
            let ino = match fs.find_entry(dir, name)? {
                Some(ino) => ino,
                None => fs.create(dir, name, 0o644)?,
            };
            fs.truncate(ino, 0)?;
            let n = fs.write(ino, 0, content.as_bytes())?;
            println!("✏️  Wrote {} bytes to {}", n, path.cyan());
        }
        Command::Truncate(path, size) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let ino = fs.resolve(&path)?;
            fs.truncate(ino, *size)?;
            println!("✂️  {} is now {} bytes", path.cyan(), size);
        }
        Command::Stat(path) => {
            let path = session.absolute(path);
            let fs = session.ctl.partition_mut(&partition)?;
            let ino = fs.resolve(&path)?;
            let inode = fs.stat(ino)?;
            let kind = match inode.inode_type() {
                Some(InodeType::Directory) => "Directory",
                _ => "File",
            };
            let show = |t: crate::utils::Timestamp| {
                t.to_datetime()
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string())
            };
            println!("{}", "📊 File Info".bright_yellow().bold());
            println!("{}: {}", "Path".blue(), path);
            println!("{}: {}", "Inode".blue(), ino);
            println!("{}: {}", "Type".blue(), kind);
            println!("{}: {} bytes", "Size".blue(), inode.size);
            println!("{}: {}", "Blocks".blue(), inode.blocks);
            println!("{}: {}", "Links".blue(), inode.nlink);
            println!("{}: {:o}", "Mode".blue(), inode.perm());
            println!("{}: {}:{}", "Owner".blue(), inode.uid, inode.gid);
            println!("{}: {}", "Access".blue(), show(inode.atime));
            println!("{}: {}", "Modify".blue(), show(inode.mtime));
            println!("{}: {}", "Change".blue(), show(inode.ctime));
        }
        Command::Df => {
            let fs = session.ctl.partition_mut(&partition)?;
            let st = fs.statfs();
            println!("{}", "💾 Volume usage".bright_yellow().bold());
            println!(
                "{}: {} / {} free ({} data blocks of {} bytes)",
                "Blocks".blue(),
                st.free_blocks,
                st.total_blocks,
                st.data_blocks,
                st.block_size
            );
            println!(
                "{}: {} / {} free",
                "Inodes".blue(),
                st.free_inodes,
                st.total_inodes
            );
            if fs.needs_cleaning() {
                println!("{}", "⚠️  Free space is low, consider 'clean'".yellow());
            }
        }
        Command::Sync => {
            session.ctl.sync_all()?;
            println!("✅ Synced");
        }
        Command::Dedup => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message("Scanning for duplicated blocks...");
            spinner.enable_steady_tick(Duration::from_millis(80));
            let report = session.ctl.dedup(&partition);
            spinner.finish_and_clear();
            let report = report?;
            println!(
                "🧬 Scanned {} blocks in {} files: {} merged, {} freed",
                report.blocks_scanned,
                report.files_scanned,
                report.blocks_merged.to_string().green(),
                report.blocks_freed.to_string().green()
            );
        }
        Command::Policies => {
            let active = session.ctl.active_policy().to_string();
            for name in session.ctl.policies() {
                if name == active {
                    println!("* {}", name.green().bold());
                } else {
                    println!("  {}", name);
                }
            }
        }
        Command::Policy(name) => {
            session.ctl.set_policy(name)?;
            println!("✅ Eviction policy: {}", session.ctl.active_policy().green());
        }
        Command::Clean(dir) => {
            let evicted = match dir {
                Some(path) => {
                    let path = session.absolute(path);
                    session.ctl.clean_dir(&partition, &path)?
                }
                None => session.ctl.clean(&partition)?,
            };
            print_evicted(evicted);
        }
        Command::Exit => println!("{}", "👋 Exiting shell...".yellow().bold()),
    }

    Ok(())
}

fn print_evicted(evicted: Option<Evicted>) {
    match evicted {
        Some(e) => println!(
            "🧹 Evicted {} ({} bytes)",
            e.name.red(),
            e.size
        ),
        None => println!("{}", "Nothing to evict".bright_black()),
    }
}

fn print_help() {
    println!("{}", "📘 Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  ls [dir]              List a directory
  tree [dir]            Show the directory tree
  pwd                   Print current path
  cd <dir>              Change directory
  mkdir <dir>           Create directory
  rmdir <dir>           Remove empty directory
  touch <file>          Create empty file
  rm <file>             Remove file
  mv <from> <to>        Rename or move
  cat <file>            Print file content
  write <file> <text>   Replace file content with text
  truncate <file> <n>   Set file size
  stat <path>           Show inode info
  df                    Show free blocks and inodes
  sync                  Flush metadata to disk
  dedup                 Merge identical data blocks
  policies              List eviction policies
  policy <name>         Select eviction policy
  clean [dir]           Evict one file with the active policy
  help                  Show this help message
  exit                  Quit the shell
"
        .bright_black()
    );
}
