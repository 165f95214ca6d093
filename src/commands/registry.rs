/// What a slash command does once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Compact,
    Status,
    AutoApprove,
    Exit,
}

pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help: &'static str,
    pub kind: CommandKind,
}

impl Command {
    fn matches(&self, input: &str) -> bool {
        self.name == input || self.aliases.contains(&input)
    }
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

/// Looks up the command whose name or alias equals the whole input, ignoring
/// case and surrounding whitespace.
pub fn find_command(input: &str) -> Option<&'static Command> {
    let normalized = input.trim().to_lowercase();
    all_commands()
        .iter()
        .find(|command| command.matches(&normalized))
}

const COMMANDS: &[Command] = &[
    Command {
        name: "/help",
        aliases: &["/h", "/?"],
        help: "Show available commands.",
        kind: CommandKind::Help,
    },
    Command {
        name: "/compact",
        aliases: &["/summarize"],
        help: "Summarise the conversation to free up context.",
        kind: CommandKind::Compact,
    },
    Command {
        name: "/status",
        aliases: &["/stats"],
        help: "Show context usage and the current operation.",
        kind: CommandKind::Status,
    },
    Command {
        name: "/auto-approve",
        aliases: &["/yolo"],
        help: "Toggle automatic approval of enabled tools.",
        kind: CommandKind::AutoApprove,
    },
    Command {
        name: "/exit",
        aliases: &["/quit", "/q"],
        help: "Leave the session.",
        kind: CommandKind::Exit,
    },
];
