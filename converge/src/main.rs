mod application;
mod apply;
mod interrupt;
mod logging;
mod resource;

use anyhow::Result;
use application::{handle_result, Options};
use clap::{CommandFactory as _, Parser, Subcommand};
use interrupt::{set_up_process_interrupt_handler, InterruptState};

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    match &args.command {
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "converge", &mut std::io::stdout());
            Ok(())
        }
        Commands::Apply(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            apply::apply(&interrupt_state, &args.options, sub)
        }
        Commands::Plan(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            apply::plan(&interrupt_state, &args.options, sub)
        }
        Commands::Get(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            resource::get(&interrupt_state, &args.options, sub)
        }
        Commands::Delete(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            resource::delete(&interrupt_state, &args.options, sub)
        }
        Commands::List(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            resource::list(&interrupt_state, &args.options, sub)
        }
        Commands::DeleteAll(sub) => {
            let (_logger, interrupt_state) = set_up(&args.options)?;
            resource::delete_all(&interrupt_state, &args.options, sub)
        }
    }
}

/// Logging and Ctrl-C handling, for the commands that talk to a store.
fn set_up(options: &Options) -> Result<(Box<dyn logging::Frontend>, InterruptState)> {
    let logger = logging::set_up(logging::Options {
        verbose: options.verbose,
        color: options.color,
    })?;
    let interrupt_state = set_up_process_interrupt_handler()?;
    Ok((logger, interrupt_state))
}

/// Converge: drive GKE Hub feature memberships to a declared state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the resource so that it matches the file
    Apply(apply::Args),

    /// Show the operations apply would perform, without performing them
    Plan(apply::Args),

    /// Print the current state of a resource
    Get(resource::TargetArgs),

    /// Delete a resource; succeeds if it does not exist
    Delete(resource::TargetArgs),

    /// List the memberships of a feature
    List(resource::ParentArgs),

    /// Delete the memberships of a feature
    DeleteAll(resource::DeleteAllArgs),

    /// Generate markdown documentation for converge
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for converge
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for converge
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}
