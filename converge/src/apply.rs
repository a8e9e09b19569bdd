use std::path::PathBuf;

use anyhow::Result;
use converge_core::{feature_membership::FEATURE_MEMBERSHIP, ApplyOptions, LifecycleDirective};

use crate::{
    application::{self, print_resource, read_resource, Options},
    interrupt::InterruptState,
};

#[derive(clap::Parser, Debug)]
pub(crate) struct Args {
    /// The desired resource, as JSON in its API form
    resource: PathBuf,

    /// Fail rather than create a resource that does not exist
    #[arg(long)]
    block_creation: bool,

    /// Fail rather than take over a resource that already exists
    #[arg(long)]
    block_acquire: bool,

    /// Fail rather than change an existing resource
    #[arg(long)]
    block_modification: bool,

    /// Delete and recreate the resource when a field that cannot change in place differs
    #[arg(long)]
    allow_recreate: bool,

    /// A previously saved copy of the resource; its identity selects the object to compare against
    #[arg(long)]
    state_hint: Option<PathBuf>,
}

impl Args {
    fn apply_options(&self, interrupt_state: &InterruptState) -> Result<ApplyOptions> {
        let mut options = ApplyOptions {
            allow_recreate: self.allow_recreate,
            state_hint: self.state_hint.as_deref().map(read_resource).transpose()?,
            cancel: Some(interrupt_state.token()),
            ..Default::default()
        };
        for (set, directive) in [
            (self.block_creation, LifecycleDirective::BlockCreation),
            (self.block_acquire, LifecycleDirective::BlockAcquire),
            (self.block_modification, LifecycleDirective::BlockModification),
        ] {
            if set {
                options.lifecycle.insert(directive);
            }
        }
        Ok(options)
    }
}

pub(crate) fn apply(interrupt_state: &InterruptState, options: &Options, args: &Args) -> Result<()> {
    let desired = read_resource(&args.resource)?;
    let apply_options = args.apply_options(interrupt_state)?;
    let client = application::client(options)?;
    let state = application::runtime().block_on(async {
        client
            .apply(&FEATURE_MEMBERSHIP, &desired, &apply_options)
            .await
            .map_err(anyhow::Error::from)
    })?;
    print_resource(&state)
}

pub(crate) fn plan(interrupt_state: &InterruptState, options: &Options, args: &Args) -> Result<()> {
    let desired = read_resource(&args.resource)?;
    let apply_options = args.apply_options(interrupt_state)?;
    let client = application::client(options)?;
    let plan = application::runtime().block_on(async {
        client
            .plan(&FEATURE_MEMBERSHIP, &desired, &apply_options)
            .await
            .map_err(anyhow::Error::from)
    })?;
    println!("{}", plan);
    for diff in &plan.diffs {
        println!("  {}", diff);
    }
    Ok(())
}
