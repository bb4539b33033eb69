use argh::FromArgs;
use xshell::cmd;

use crate::{Flag, Prepare, PreparedCommand};

/// Checks that the crate documentation builds without warnings.
#[derive(FromArgs, Default)]
#[argh(subcommand, name = "doc-check")]
pub struct DocCheckCommand {}

impl Prepare for DocCheckCommand {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, _flags: Flag) -> Vec<PreparedCommand<'a>> {
        let command = PreparedCommand::new::<Self>(
            cmd!(sh, "cargo doc --workspace --no-deps --document-private-items"),
            "Please fix doc warnings in output above.",
        )
        .with_env_var("RUSTDOCFLAGS", "-D warnings");
        vec![command]
    }
}
