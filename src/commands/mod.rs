mod registry;

pub use registry::{all_commands, find_command, Command, CommandKind};

/// Result of dispatching a slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    Exit,
}

pub fn help_text() -> String {
    let mut help = String::from("Commands:\n");
    for command in all_commands() {
        help.push_str(&format!("  {:<14} {}", command.name, command.help));
        if !command.aliases.is_empty() {
            help.push_str(&format!(" (aliases: {})", command.aliases.join(", ")));
        }
        help.push('\n');
    }
    help
}
