use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;

use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use tracing::debug;
use wcp_common::Colors;
use wcp_daemon::signal_name;
use wcp_daemon::DaemonConfig;
use wcp_daemon::DaemonOptions;
use wcp_daemon::SessionDaemon;
use wcp_daemon::ShutdownReason;
use wcp_ipc::connect_watch;
use wcp_ipc::ClientError;
use wcp_ipc::SessionClient;
use wcp_ipc::SessionDirectory;

use crate::error::CliError;
use crate::project_config;
use crate::project_config::DevServer;
use crate::project_config::ProjectConfig;

pub type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Session name used by `start` and reported by `status`.
pub const DEV_SESSION: &str = "dev";

/// Where sessions live and where `WCP.md` is looked up.
pub struct HandlerContext {
    pub sessions: SessionDirectory,
    pub project_dir: PathBuf,
}

impl HandlerContext {
    pub fn from_env() -> Self {
        Self {
            sessions: SessionDirectory::from_env(),
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

pub fn handle_create(
    ctx: &HandlerContext,
    name: String,
    command: Vec<String>,
    save: bool,
) -> HandlerResult {
    if command.is_empty() {
        return Err(CliError::MissingCommand.into());
    }

    if save {
        save_dev_server(ctx, &name, command.clone())?;
    }

    let options = DaemonOptions::new(name.clone(), command)
        .with_directory(ctx.sessions.clone())
        .with_config(DaemonConfig::from_env().with_echo_output(true));
    let daemon = SessionDaemon::start(options)?;

    println!("{} {}", Colors::success("✓ wcp opened:"), Colors::session_name(&name));
    println!("  Socket: {}", Colors::dim(&daemon.socket_path().display().to_string()));
    println!();

    let exit = daemon.run()?;
    println!();
    match exit.reason {
        ShutdownReason::ChildExited(code) => println!("Process exited with code {}", code),
        ShutdownReason::Signal(sig) => println!("Received {}, shutting down...", signal_name(sig)),
        ShutdownReason::EndpointRemoved => println!("Session {} was killed, shutting down...", name),
        ShutdownReason::Requested => println!("Shutting down..."),
    }
    Ok(())
}

fn save_dev_server(ctx: &HandlerContext, name: &str, command: Vec<String>) -> HandlerResult {
    let mut config = project_config::read(&ctx.project_dir).unwrap_or_default();
    config.dev_server = Some(DevServer {
        name: name.to_string(),
        command,
        source: "wcp create --save".to_string(),
    });
    let path = project_config::write(&ctx.project_dir, &config).map_err(CliError::ConfigWrite)?;
    println!("{} {}", Colors::success("✓ Saved dev server to"), path.display());
    Ok(())
}

pub fn handle_connect(ctx: &HandlerContext, name: String) -> HandlerResult {
    println!("Connecting to wcp {}...", Colors::session_name(&name));
    let client = SessionClient::connect(&ctx.sessions, &name)?;
    println!("{} {}", Colors::success("✓ Connected to wcp"), Colors::session_name(&name));
    println!();

    let mut stdout = io::stdout();
    let reason = client.run_interactive(io::stdin(), &mut stdout)?;
    debug!(session = %name, ?reason, "Disconnected");
    Ok(())
}

pub fn handle_list(ctx: &HandlerContext) -> HandlerResult {
    let sessions = ctx.sessions.list()?;
    if sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    println!("{}", Colors::bold("Active sessions:"));
    for session in sessions {
        let status = if session.alive {
            String::new()
        } else {
            format!(" {}", Colors::warning("(stale)"))
        };
        println!("  • {}{}", Colors::session_name(&session.name), status);
    }
    Ok(())
}

pub fn handle_kill(ctx: &HandlerContext, name: String) -> HandlerResult {
    let endpoint = ctx.sessions.endpoint(&name)?;
    if !endpoint.remove()? {
        eprintln!("{}", ClientError::NotFound(name));
        return Ok(());
    }
    println!("{} {}", Colors::success("✓ Killed session"), Colors::session_name(&name));
    Ok(())
}

pub fn handle_watch(ctx: &HandlerContext, names: Vec<String>) -> HandlerResult {
    let targets = if names.is_empty() {
        ctx.sessions.live_names()?
    } else {
        names
    };
    if targets.is_empty() {
        println!("No active sessions to watch.");
        return Ok(());
    }

    println!(
        "Watching {} session(s): {}",
        targets.len(),
        targets.join(", ")
    );
    println!();

    let mut signals = Signals::new([SIGINT])?;
    thread::Builder::new()
        .name("watch-signals".to_string())
        .spawn(move || {
            if signals.forever().next().is_some() {
                println!();
                println!("Stopping watch...");
                std::process::exit(0);
            }
        })?;

    let out = Mutex::new(io::stdout());
    thread::scope(|scope| {
        for (index, name) in targets.iter().enumerate() {
            let out = &out;
            let sessions = &ctx.sessions;
            scope.spawn(move || connect_watch(sessions, name, index, out));
        }
    });

    let mut stdout = io::stdout();
    writeln!(stdout)?;
    writeln!(stdout, "All sessions closed.")?;
    Ok(())
}

pub fn handle_start(ctx: &HandlerContext) -> HandlerResult {
    let dev = project_config::read(&ctx.project_dir)
        .and_then(|config| config.dev_server)
        .ok_or(CliError::NoDevServer)?;

    println!("Starting wcp with: {}", dev.display_command());
    println!();
    handle_create(ctx, DEV_SESSION.to_string(), dev.command, false)
}

pub fn handle_status(ctx: &HandlerContext) -> HandlerResult {
    let path = project_config::config_path(&ctx.project_dir);
    let Some(config) = project_config::read(&ctx.project_dir) else {
        println!("No {} found in {}.", project_config::CONFIG_FILE, ctx.project_dir.display());
        println!(
            "{}",
            Colors::dim("Create one with 'wcp create dev --save -- <command...>'.")
        );
        return Ok(());
    };

    print_config(&config, &path);

    let dev = ctx.sessions.endpoint(DEV_SESSION)?;
    let state = if dev.is_alive() {
        Colors::success("running")
    } else if dev.exists() {
        Colors::warning("stale")
    } else {
        Colors::dim("not running")
    };
    println!("  Session:     {} ({})", DEV_SESSION, state);
    Ok(())
}

fn print_config(config: &ProjectConfig, path: &std::path::Path) {
    println!("{} {}", Colors::bold("Config:"), path.display());
    let project = match &config.project.package_manager {
        Some(pm) => format!("{} ({})", config.project.kind, pm),
        None => config.project.kind.clone(),
    };
    println!("  Project:     {}", project);
    match &config.dev_server {
        Some(dev) => println!(
            "  Dev server:  {} {}",
            dev.display_command(),
            Colors::dim(&format!("[{}]", dev.source))
        ),
        None => println!("  Dev server:  {}", Colors::dim("Not configured")),
    }
}
