//! Diagnostics go to stderr. Stdout carries command output only.

mod headless;

use std::io::IsTerminal as _;

use anyhow::Result;
use clap::ColorChoice;

pub(crate) struct Options {
    pub verbose: bool,
    pub color: ColorChoice,
}

impl Options {
    fn use_color(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stderr().is_terminal(),
        }
    }
}

pub(crate) trait Frontend {
    fn set_up(&self, options: &Options) -> Result<()>;
}

pub(crate) fn set_up(options: Options) -> Result<Box<dyn Frontend>> {
    let logger = headless::HeadlessLogger {};
    logger.set_up(&options)?;
    Ok(Box::new(logger))
}
