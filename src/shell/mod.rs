pub mod command;
pub mod parse;

use crate::{
    disk::init::{perform_disk_initialization, BootOptions, BootProgress},
    fs::{control::ControlSurface, eviction::PolicyRegistry, FileSystem},
    shell::{
        command::{execute_command, Command, Session},
        parse::parse_command,
    },
};
use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use reedline::{
    DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal,
};
use std::{error::Error, io::stdout, path::PathBuf, sync::mpsc, thread};

/// shell 里挂载的唯一分区的名字
pub const PARTITION: &str = "disk";

const COMMANDS: [&str; 21] = [
    "help", "ls", "tree", "pwd", "cd", "mkdir", "rmdir", "touch", "rm", "mv", "cat", "write",
    "truncate", "stat", "df", "sync", "dedup", "policies", "policy", "clean", "exit",
];

pub fn start_shell(opts: BootOptions) -> Result<(), Box<dyn Error>> {
    let fs = boot(opts)?;
    let mut ctl = ControlSurface::new(PolicyRegistry::with_builtin()?);
    ctl.attach(PARTITION, fs)?;
    let mut session = Session::new(ctl, PARTITION);

    let username = whoami::username();
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    // 初始化 reedline
    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dedupfs_history");

    let mut line_editor = Reedline::create();
    match FileBackedHistory::with_file(100, history_path) {
        Ok(history) => line_editor = line_editor.with_history(Box::new(history)),
        Err(e) => log::warn!("command history disabled: {}", e),
    }

    // 命令补全
    let words = COMMANDS.iter().map(|c| c.to_string()).collect();
    let completer = DefaultCompleter::new_with_wordlen(words, 2);
    line_editor = line_editor.with_completer(Box::new(completer));

    loop {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!(
                "{}:{}",
                format!("{}@{}", username, hostname).green(),
                session.cwd.blue()
            )),
            DefaultPromptSegment::Basic("dedupfs".bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_command(trimmed) {
                    Some(cmd) => {
                        if let Err(e) = execute_command(&cmd, &mut session) {
                            println!("{} {}", "❌ Error:".red().bold(), e);
                        }
                        if cmd == Command::Exit {
                            break;
                        }
                    }
                    None => println!(
                        "{}",
                        "⚠️  Unknown command or missing argument. Type 'help' for command list."
                            .yellow()
                    ),
                }
            }
            Ok(Signal::CtrlC) => {
                println!("{}", "^C".bright_black());
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting...".yellow());
                break;
            }
            Err(e) => {
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    session.ctl.unmount_all()?;
    println!("{}", "GoodBye!".bright_yellow());
    Ok(())
}

/// 在后台线程打开卷，前台显示进度条
fn boot(opts: BootOptions) -> Result<FileSystem, Box<dyn Error>> {
    let mut out = stdout();
    execute!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    println!("{}", "[dedupfs Booting...]".bright_yellow().bold());

    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || perform_disk_initialization(opts, tx));

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut result = None;
    for msg in rx {
        match msg {
            BootProgress::Step(step) => pb.set_message(step),
            BootProgress::Progress(pos) => pb.set_position(pos),
            BootProgress::Finished(r) => {
                result = Some(r);
                break;
            }
        }
    }
    worker.join().map_err(|_| "disk initialization thread panicked")?;

    let fs = match result {
        Some(Ok(fs)) => fs,
        Some(Err(e)) => {
            pb.abandon_with_message("❌ Failed");
            return Err(e.into());
        }
        None => return Err("disk initialization ended without a result".into()),
    };
    pb.finish_with_message("✅ Ready!");

    execute!(
        out,
        SetForegroundColor(Color::Cyan),
        Print(format!("Welcome to dedupfs v{}\n", env!("CARGO_PKG_VERSION"))),
        ResetColor
    )?;
    Ok(fs)
}
