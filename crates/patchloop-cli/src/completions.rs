//! Shell completion generation for the patchloop CLI.
//!
//! Provides `patchloop completions <shell>` for bash, zsh, fish, and
//! PowerShell.

use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::{Shell, generate};
use std::io;

/// Arguments for the completions subcommand.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: ShellArg,
}

/// Shells a completion script can be generated for.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ShellArg {
    /// Bash shell completions
    Bash,
    /// Zsh shell completions
    Zsh,
    /// Fish shell completions
    Fish,
    /// PowerShell completions
    PowerShell,
}

impl From<ShellArg> for Shell {
    fn from(arg: ShellArg) -> Self {
        match arg {
            ShellArg::Bash => Shell::Bash,
            ShellArg::Zsh => Shell::Zsh,
            ShellArg::Fish => Shell::Fish,
            ShellArg::PowerShell => Shell::PowerShell,
        }
    }
}

/// Writes the completion script for `args.shell` to stdout.
pub fn generate_completions(args: &CompletionsArgs) {
    write_completions(args.shell, &mut io::stdout());
}

fn write_completions(shell: ShellArg, out: &mut dyn io::Write) {
    let mut cmd = crate::Cli::command();
    generate(Shell::from(shell), &mut cmd, "patchloop", out);
}
