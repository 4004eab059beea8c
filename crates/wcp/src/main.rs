use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;

use wcp::commands::Cli;
use wcp::commands::Commands;
use wcp::common::init_tracing;
use wcp::error::CliError;
use wcp::handlers;
use wcp::handlers::HandlerContext;
use wcp_common::Colors;
use wcp_common::ErrorCategory;
use wcp_common::color_init;
use wcp_daemon::DaemonError;
use wcp_ipc::ClientError;

fn main() {
    if let Err(e) = run() {
        let (category, suggestion) = if let Some(cli_error) = e.downcast_ref::<CliError>() {
            (cli_error.category(), cli_error.suggestion())
        } else if let Some(client_error) = e.downcast_ref::<ClientError>() {
            (client_error.category(), client_error.suggestion())
        } else if let Some(daemon_error) = e.downcast_ref::<DaemonError>() {
            (daemon_error.category(), daemon_error.suggestion())
        } else if e.downcast_ref::<std::io::Error>().is_some() {
            (ErrorCategory::External, None)
        } else {
            (ErrorCategory::Internal, None)
        };

        eprintln!("{} {}", Colors::error("Error:"), e);
        if let Some(suggestion) = suggestion {
            eprintln!("{} {}", Colors::dim("Suggestion:"), suggestion);
        }
        std::process::exit(category.exit_code());
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    color_init(cli.no_color);
    let _telemetry = init_tracing(if cli.verbose { "debug" } else { "warn" });

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if let Commands::Completions { shell } = &command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "wcp", &mut std::io::stdout());
        return Ok(());
    }

    let ctx = HandlerContext::from_env();

    match command.resolve()? {
        Commands::Create {
            name,
            save,
            command,
        } => handlers::handle_create(&ctx, name, command, save)?,
        Commands::Connect { name } => handlers::handle_connect(&ctx, name)?,
        Commands::List => handlers::handle_list(&ctx)?,
        Commands::Kill { name } => handlers::handle_kill(&ctx, name)?,
        Commands::Watch { names } => handlers::handle_watch(&ctx, names)?,
        Commands::Start => handlers::handle_start(&ctx)?,
        Commands::Status => handlers::handle_status(&ctx)?,
        Commands::Completions { .. } | Commands::Shorthand(_) => unreachable!(),
    }

    Ok(())
}
