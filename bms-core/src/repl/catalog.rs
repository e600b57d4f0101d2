//! Command table shared by the parser and the help output.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Status,
    Faults,
    Afe,
    Cycle,
    Press,
    Profile,
    History,
    Help,
}

/// Shape of the arguments following the command keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arguments {
    None,
    /// Zero or more `key=value` assignments drawn from `keys`.
    Assignments { keys: &'static [&'static str] },
    /// Optional unsigned count.
    OptionalCount,
    /// Optional keyword; the first entry is the default.
    OptionalKeyword { keywords: &'static [&'static str] },
    /// Required keyword.
    Keyword { keywords: &'static [&'static str] },
    /// Optional free-form topic.
    Topic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub arguments: Arguments,
    pub usage: &'static str,
    pub summary: &'static str,
}

/// Simulated AFE fields accepted by `afe`.
pub const AFE_KEYS: [&str; 4] = ["stat", "current", "vmin", "vmax"];
pub const PRESS_KINDS: [&str; 2] = ["short", "long"];
pub const PROFILE_NAMES: [&str; 2] = ["lifepo4", "lic"];

const COMMANDS: [CommandSpec; 8] = [
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        arguments: Arguments::None,
        usage: "status",
        summary: "switches, indicators and last measurements",
    },
    CommandSpec {
        name: "faults",
        tag: CommandTag::Faults,
        arguments: Arguments::None,
        usage: "faults",
        summary: "state, trip count and debounce of every fault",
    },
    CommandSpec {
        name: "afe",
        tag: CommandTag::Afe,
        arguments: Arguments::Assignments { keys: &AFE_KEYS },
        usage: "afe [stat=N] [current=N] [vmin=N] [vmax=N]",
        summary: "show or set the simulated AFE registers (raw codes)",
    },
    CommandSpec {
        name: "cycle",
        tag: CommandTag::Cycle,
        arguments: Arguments::OptionalCount,
        usage: "cycle [N]",
        summary: "run N protection cycles (default 1)",
    },
    CommandSpec {
        name: "press",
        tag: CommandTag::Press,
        arguments: Arguments::OptionalKeyword {
            keywords: &PRESS_KINDS,
        },
        usage: "press [short|long]",
        summary: "press the power button; long requests a fault reset",
    },
    CommandSpec {
        name: "profile",
        tag: CommandTag::Profile,
        arguments: Arguments::Keyword {
            keywords: &PROFILE_NAMES,
        },
        usage: "profile <lifepo4|lic>",
        summary: "reload thresholds from a built-in profile",
    },
    CommandSpec {
        name: "history",
        tag: CommandTag::History,
        arguments: Arguments::None,
        usage: "history",
        summary: "recent protection events, oldest first",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        arguments: Arguments::Topic,
        usage: "help [topic]",
        summary: "list commands or describe one",
    },
];

#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
