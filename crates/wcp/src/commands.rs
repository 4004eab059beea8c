use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;
use wcp_ipc::is_valid_session_name;

use crate::error::CliError;

const LONG_ABOUT: &str = r#"wcp shares one process's output with any number of terminals.

A session is a named Unix socket owned by a foreground wcp process that runs
your command. Other terminals attach to the same name, receive the buffered
history, then follow the live output. Keystrokes typed in an attached
terminal are forwarded to the command's input.

EXAMPLES:
    # Terminal 1: run the dev server inside session "3000"
    wcp 3000 -- npm run dev

    # Terminal 2: replay recent output and follow it
    wcp 3000

    # Follow every running session at once
    wcp watch

    # Stop a session
    wcp kill 3000"#;

#[derive(Parser)]
#[command(name = "wcp")]
#[command(author, version)]
#[command(about = "Share a long-running process's output with any number of terminals")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Disable colored output (also respects NO_COLOR env var)
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command inside a new session
    #[command(long_about = r#"Run a command inside a new session.

Stays in the foreground, echoing the command's output, until the command
exits, the session is killed, or you press Ctrl-C.

EXAMPLES:
    wcp create 3000 -- npm run dev
    wcp create api --save -- cargo run"#)]
    Create {
        /// Session name (letters, digits, '_' and '-')
        name: String,

        /// Remember the command in WCP.md as this project's dev server
        #[arg(long)]
        save: bool,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Attach to a running session
    Connect {
        /// Session name
        name: String,
    },

    /// List sessions
    #[command(visible_alias = "ls")]
    List,

    /// Stop a session by removing its socket
    Kill {
        /// Session name
        name: String,
    },

    /// Follow the output of several sessions, labeled by name
    Watch {
        /// Sessions to follow (default: every live session)
        names: Vec<String>,
    },

    /// Run the dev server saved in WCP.md as session "dev"
    Start,

    /// Show the WCP.md configuration and dev session state
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// `wcp <name> [-- <command...>]`
    #[command(external_subcommand)]
    Shorthand(Vec<String>),
}

impl Commands {
    /// Expands `wcp <name>` to `connect` and `wcp <name> -- <cmd>` to
    /// `create`. Other commands pass through unchanged.
    pub fn resolve(self) -> Result<Commands, CliError> {
        let Commands::Shorthand(args) = self else {
            return Ok(self);
        };
        let mut args = args.into_iter();
        let name = args.next().unwrap_or_default();
        if !is_valid_session_name(&name) {
            return Err(CliError::InvalidName(name));
        }

        let rest: Vec<String> = args.collect();
        match rest.iter().position(|arg| arg == "--") {
            Some(separator) => {
                if separator > 0 {
                    return Err(CliError::UnexpectedArguments(rest[..separator].join(" ")));
                }
                let command = rest[separator + 1..].to_vec();
                if command.is_empty() {
                    return Err(CliError::MissingCommand);
                }
                Ok(Commands::Create {
                    name,
                    save: false,
                    command,
                })
            }
            None if rest.is_empty() => Ok(Commands::Connect { name }),
            None => Err(CliError::UnexpectedArguments(rest.join(" "))),
        }
    }
}
