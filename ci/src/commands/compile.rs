use argh::FromArgs;

use crate::commands::CompileCheckCommand;
use crate::{Flag, Prepare, PreparedCommand};

/// Alias for running the `compile-check` subcommand.
#[derive(FromArgs, Default)]
#[argh(subcommand, name = "compile")]
pub struct CompileCommand {}

impl Prepare for CompileCommand {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, flags: Flag) -> Vec<PreparedCommand<'a>> {
        let mut commands = vec![];
        commands.append(&mut CompileCheckCommand::default().prepare(sh, flags));
        commands
    }
}
