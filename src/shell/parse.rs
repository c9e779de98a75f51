use crate::shell::command::Command;

pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.trim().split_ascii_whitespace().collect();
    let (&cmd, args) = tokens.split_first()?;
    let arg = |i: usize| args.get(i).map(|s| s.to_string());

    match cmd {
        "help" => Some(Command::Help),
        "ls" => Some(Command::Ls(arg(0))),
        "tree" => Some(Command::Tree(arg(0))),
        "pwd" => Some(Command::Pwd),
        "cd" => Some(Command::Cd(arg(0).unwrap_or_else(|| "/".to_string()))),
        "mkdir" => arg(0).map(Command::Mkdir),
        "rmdir" => arg(0).map(Command::Rmdir),
        "touch" => arg(0).map(Command::Touch),
        "rm" => arg(0).map(Command::Rm),
        "mv" => Some(Command::Mv(arg(0)?, arg(1)?)),
        "cat" => arg(0).map(Command::Cat),
        "write" => {
            if args.len() >= 2 {
                Some(Command::Write(args[0].to_string(), args[1..].join(" ")))
            } else {
                None
            }
        }
        "truncate" => Some(Command::Truncate(arg(0)?, args.get(1)?.parse().ok()?)),
        "stat" => arg(0).map(Command::Stat),
        "df" => Some(Command::Df),
        "sync" => Some(Command::Sync),
        "dedup" => Some(Command::Dedup),
        "policies" => Some(Command::Policies),
        "policy" => arg(0).map(Command::Policy),
        "clean" => Some(Command::Clean(arg(0))),
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_required_where_needed() {
        assert_eq!(parse_command("mkdir"), None);
        assert_eq!(parse_command("mv a"), None);
        assert_eq!(parse_command("truncate f x"), None);
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("frobnicate"), None);
    }

    #[test]
    fn write_keeps_the_rest_of_the_line() {
        assert_eq!(
            parse_command("write notes.txt hello   big world"),
            Some(Command::Write("notes.txt".into(), "hello big world".into()))
        );
        assert_eq!(
            parse_command("truncate f 4097"),
            Some(Command::Truncate("f".into(), 4097))
        );
        assert_eq!(parse_command("clean"), Some(Command::Clean(None)));
        assert_eq!(parse_command("tree"), Some(Command::Tree(None)));
        assert_eq!(parse_command("cd"), Some(Command::Cd("/".into())));
    }
}
