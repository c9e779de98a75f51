//! 带块级去重的教学用块文件系统。
//!
//! `disk` 是块设备抽象，`fs` 是磁盘布局与修改引擎，
//! `shell` 是交互式命令行。

pub mod disk;
pub mod fs;
pub mod shell;
pub mod utils;
