use std::{
    error::Error,
    io::IsTerminal,
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use testbed::{
    cli::{Cli, Commands, parse_args},
    config::{load_settings, settings_path},
    environment::{self, Environment},
    lifecycle::{LifecycleController, StopOutcome},
    logs,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let root = resolve_root(args.root)?;
    let settings = load_settings(&settings_path(&root, args.settings.as_deref()))?;
    let controller = LifecycleController::new(root, settings);

    match args.command {
        Commands::Setup => {
            let report = Environment::for_controller(&controller).setup()?;
            if report == Default::default() {
                info!("Environment already up to date");
            } else {
                info!("Environment ready: {report:?}");
            }
        }
        Commands::TestServer { port, force } => {
            let child = register_signal_forwarder()?;
            let status = controller.start_foreground(port, force, |pid| {
                child.store(pid, Ordering::SeqCst);
            })?;
            if !status.success() {
                warn!("Test server exited with {status}");
            }
        }
        Commands::TestServerBg { port } => {
            let pid = controller.start_background(port)?;
            println!("Test server running in background on port {port} (PID {pid})");
        }
        Commands::StopServer { port } => match controller.stop(port)? {
            StopOutcome::Tracked {
                pid,
                terminated: true,
                ..
            } => println!("Stopped test server (PID {pid})"),
            StopOutcome::Tracked { pid, .. } => {
                println!("Cleared PID record for {pid}")
            }
            StopOutcome::PortFallback(summary) => {
                if summary.terminated.is_empty() {
                    println!("No test server running on port {port}");
                } else {
                    println!(
                        "Stopped listener(s) on port {port}: {:?}",
                        summary.terminated
                    );
                }
            }
        },
        Commands::Status {
            port,
            json,
            no_color,
        } => {
            let report = controller.status(port)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let color = !no_color && std::io::stdout().is_terminal();
                print!("{}", report.render(color));
            }
        }
        Commands::Logs { lines } => {
            logs::show_logs(&controller.layout().server_log(), lines)?;
        }
        Commands::Deps => {
            Environment::for_controller(&controller).reinstall()?;
            info!("Dependencies reinstalled");
        }
        Commands::Clean => {
            let removed = environment::clean(&controller)?;
            if removed.is_empty() {
                info!("No generated files to remove");
            }
        }
        Commands::Reset => {
            environment::reset(&controller)?;
            info!("Environment reset");
        }
        Commands::Delete => {
            environment::delete(&controller)?;
            info!("Environment deleted");
        }
    }

    Ok(())
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    let cwd = std::env::current_dir()?;
    let candidate = match root {
        Some(path) if path.is_absolute() => path,
        Some(path) => cwd.join(path),
        None => cwd,
    };
    Ok(candidate.canonicalize().unwrap_or(candidate))
}

/// Keeps testbed alive on Ctrl-C and hands the signal to the foreground server,
/// so testbed returns only after the server has exited.
fn register_signal_forwarder() -> Result<Arc<AtomicU32>, Box<dyn Error>> {
    let child = Arc::new(AtomicU32::new(0));
    let handler_child = Arc::clone(&child);

    ctrlc::set_handler(move || {
        let pid = handler_child.load(Ordering::SeqCst);
        if pid == 0 {
            std::process::exit(130);
        }
        println!("testbed is shutting down... stopping test server (PID {pid})");
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to forward SIGTERM to test server (PID {pid}): {err}");
        }
    })?;

    Ok(child)
}
