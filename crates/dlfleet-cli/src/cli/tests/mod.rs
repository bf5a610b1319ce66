//! CLI parse tests.

use clap::Parser;

use super::{Cli, CliCommand};

pub(super) fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}
