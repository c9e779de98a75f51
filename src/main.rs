use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use colored::*;
use dedup_fs::{
    disk::{init::BootOptions, DEFAULT_BLOCK_COUNT},
    shell::start_shell,
};
use dialoguer::Confirm;

/// 交互式的去重块文件系统
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// 磁盘镜像路径
    #[arg(short, long, default_value = "disk.img")]
    disk: PathBuf,

    /// 新建镜像的块数
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_COUNT)]
    blocks: u32,

    /// inode 数，默认与块数相同
    #[arg(short, long)]
    inodes: Option<u32>,

    /// 重新格式化已有的镜像
    #[arg(long)]
    format: bool,

    /// 格式化前不再确认
    #[arg(short, long)]
    yes: bool,

    /// 使用内存盘，退出后内容丢失
    #[arg(long)]
    ephemeral: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut format = args.format;
    if format && !args.yes && !args.ephemeral && args.disk.exists() {
        format = Confirm::new()
            .with_prompt(format!(
                "Erase everything on {} and format it?",
                args.disk.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !format {
            println!("{}", "Keeping the existing volume".yellow());
        }
    }

    let opts = BootOptions {
        disk_path: args.disk,
        nr_blocks: args.blocks,
        nr_inodes: args.inodes,
        format,
        ephemeral: args.ephemeral,
    };

    match start_shell(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "❌ Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
