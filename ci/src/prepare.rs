use bitflags::bitflags;

bitflags! {
    /// Flags that modify how commands are run.
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct Flag: u32 {
        /// Forces certain checks to continue running even if they hit an error.
        const KEEP_GOING = 1 << 0;
    }
}

/// Trait for preparing a subcommand to be run.
pub trait Prepare {
    /// Returns the commands that should be executed for this subcommand.
    fn prepare<'a>(&self, sh: &'a xshell::Shell, flags: Flag) -> Vec<PreparedCommand<'a>>;
}

/// A command with associated metadata, created from a command that implements [`Prepare`].
#[derive(Debug)]
pub struct PreparedCommand<'a> {
    /// The name of the command.
    pub name: &'static str,

    /// The command to execute.
    pub command: xshell::Cmd<'a>,

    /// The message to display if the command fails.
    pub failure_message: &'static str,

    /// The subdirectory path to run the command within.
    pub subdir: Option<&'static str>,

    /// Environment variables that need to be set before the command runs.
    pub env_vars: Vec<(&'static str, &'static str)>,
}

impl<'a> PreparedCommand<'a> {
    /// Creates a new [`PreparedCommand`] from a [`cmd`](xshell::cmd) and a failure message.
    pub fn new<T: argh::SubCommand>(
        command: xshell::Cmd<'a>,
        failure_message: &'static str,
    ) -> Self {
        Self {
            name: T::COMMAND.name,
            command,
            failure_message,
            subdir: None,
            env_vars: vec![],
        }
    }

    /// A builder that adds an environment variable set while the command runs.
    pub fn with_env_var(mut self, key: &'static str, value: &'static str) -> Self {
        self.env_vars.push((key, value));
        self
    }
}
