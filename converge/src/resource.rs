use std::path::PathBuf;

use anyhow::Result;
use converge_core::{feature_membership::FEATURE_MEMBERSHIP, Node};

use crate::{
    application::{self, print_resource, read_resource, Options},
    interrupt::InterruptState,
};

#[derive(clap::Parser, Debug)]
pub(crate) struct TargetArgs {
    /// A JSON file naming the resource; only its identity fields are used
    resource: PathBuf,
}

/// The collection of memberships of one fleet feature.
#[derive(clap::Parser, Debug)]
pub(crate) struct ParentArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    location: String,
    #[arg(long)]
    feature: String,
}

impl ParentArgs {
    fn node(&self) -> Node {
        Node::new()
            .with("project", self.project.as_str())
            .with("location", self.location.as_str())
            .with("feature", self.feature.as_str())
    }
}

#[derive(clap::Parser, Debug)]
pub(crate) struct DeleteAllArgs {
    #[command(flatten)]
    parent: ParentArgs,

    /// Only delete these memberships; all of them when omitted
    #[arg(long = "membership")]
    memberships: Vec<String>,
}

pub(crate) fn get(interrupt_state: &InterruptState, options: &Options, args: &TargetArgs) -> Result<()> {
    let target = read_resource(&args.resource)?;
    let client = application::client(options)?;
    let state = application::runtime().block_on(interrupt_state.run(async {
        Ok(client.get(&FEATURE_MEMBERSHIP, &target).await?)
    }))?;
    print_resource(&state)
}

pub(crate) fn delete(
    interrupt_state: &InterruptState,
    options: &Options,
    args: &TargetArgs,
) -> Result<()> {
    let target = read_resource(&args.resource)?;
    let client = application::client(options)?;
    application::runtime().block_on(interrupt_state.run(async {
        Ok(client.delete(&FEATURE_MEMBERSHIP, &target).await?)
    }))
}

pub(crate) fn list(interrupt_state: &InterruptState, options: &Options, args: &ParentArgs) -> Result<()> {
    let client = application::client(options)?;
    let parent = args.node();
    application::runtime().block_on(interrupt_state.run(async {
        let mut list = client.list(&FEATURE_MEMBERSHIP, &parent).await?;
        loop {
            for item in &list.items {
                println!("{}", FEATURE_MEMBERSHIP.id(item)?);
            }
            if !list.has_next() {
                return Ok(());
            }
            list.next(&client).await?;
        }
    }))
}

pub(crate) fn delete_all(
    interrupt_state: &InterruptState,
    options: &Options,
    args: &DeleteAllArgs,
) -> Result<()> {
    let client = application::client(options)?;
    let parent = args.parent.node();
    let deleted = application::runtime().block_on(interrupt_state.run(async {
        Ok(client
            .delete_all(&FEATURE_MEMBERSHIP, &parent, |item| {
                selected(&args.memberships, item)
            })
            .await?)
    }))?;
    eprintln!("deleted {} resource(s)", deleted);
    Ok(())
}

fn selected(memberships: &[String], item: &Node) -> bool {
    memberships.is_empty()
        || item
            .get_str("membership")
            .is_some_and(|m| memberships.iter().any(|want| want == m))
}
