use std::{
    env,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use common::SettingsStore;
use server::{
    AdminState, ControlChannel, DEFAULT_QUIET_PERIOD, SharedSettings, build_admin_app,
    init_logging, new_debounce_scheduler, new_relay_manager, new_run_state_tracker,
    new_settings_mirror, spawn_relay_manager, spawn_run_state_listener,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match parse_cli_args() {
        Ok(CliAction::Run(cli)) => *cli,
        Ok(CliAction::Help) => {
            print_cli_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("{}", binary_version_text());
            return Ok(());
        }
        Err(err) => {
            eprintln!("error: {err}\n");
            print_cli_help();
            return Err(err.into());
        }
    };

    init_logging()?;
    info!("{}", binary_version_text());

    let admin_addr = if let Some(value) = cli.admin_addr {
        value
    } else {
        "127.0.0.1:9100".parse()?
    };
    let settings_path = cli
        .settings_path
        .unwrap_or_else(|| PathBuf::from(".rr-server/settings.json"));
    let export_path = cli
        .client_export_path
        .unwrap_or_else(|| PathBuf::from(".rr-server/clients.json"));
    let quiet_period = cli
        .commit_quiet_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_QUIET_PERIOD);

    // An unreadable or malformed settings file is fatal: serving with a
    // store the mirror cannot trust would let the two diverge.
    let store = SettingsStore::open(&settings_path)?;
    info!("settings loaded from {}", settings_path.display());

    let settings: SharedSettings = Arc::new(RwLock::new(store));
    let channel = ControlChannel::new();
    let debounce = new_debounce_scheduler(quiet_period);
    let mirror = new_settings_mirror(settings.clone(), channel.clone(), debounce);

    let run_state = new_run_state_tracker();
    spawn_run_state_listener(run_state.clone(), &channel);

    let relay = new_relay_manager(settings, channel.clone(), export_path);
    let manager_task = spawn_relay_manager(relay.clone(), !cli.no_autostart);

    let app = build_admin_app(AdminState {
        mirror,
        run_state,
        channel,
        roster: relay.roster(),
    });
    let listener = tokio::net::TcpListener::bind(admin_addr).await?;
    info!(
        "admin surface listening on http://{}",
        listener.local_addr()?
    );

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = manager_task => {}
    }

    Ok(())
}

#[derive(Clone, Debug, Default)]
struct CliArgs {
    admin_addr: Option<SocketAddr>,
    settings_path: Option<PathBuf>,
    client_export_path: Option<PathBuf>,
    commit_quiet_ms: Option<u64>,
    no_autostart: bool,
}

enum CliAction {
    Run(Box<CliArgs>),
    Help,
    Version,
}

fn parse_cli_args() -> Result<CliAction, String> {
    let mut args = env::args().skip(1).peekable();
    let mut cli = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "-V" | "--version" => return Ok(CliAction::Version),
            "--admin-addr" => {
                let value = next_arg_value("--admin-addr", &mut args)?;
                cli.admin_addr = Some(
                    value
                        .parse::<SocketAddr>()
                        .map_err(|_| format!("invalid --admin-addr: {value}"))?,
                );
            }
            "--settings-path" => {
                cli.settings_path =
                    Some(PathBuf::from(next_arg_value("--settings-path", &mut args)?));
            }
            "--client-export-path" => {
                cli.client_export_path = Some(PathBuf::from(next_arg_value(
                    "--client-export-path",
                    &mut args,
                )?));
            }
            "--commit-quiet-ms" => {
                let value = next_arg_value("--commit-quiet-ms", &mut args)?;
                cli.commit_quiet_ms = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid --commit-quiet-ms: {value}"))?,
                );
            }
            "--no-autostart" => {
                cli.no_autostart = true;
            }
            _ => {
                return Err(format!("unknown argument: {arg}"));
            }
        }
    }
    Ok(CliAction::Run(Box::new(cli)))
}

fn next_arg_value(
    flag: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> Result<String, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}"))?;
    if value.trim().is_empty() {
        return Err(format!("value for {flag} cannot be empty"));
    }
    Ok(value)
}

fn print_cli_help() {
    eprintln!(concat!(
        "Usage: rr-server [options]\n\n",
        "Options:\n",
        "  --admin-addr <ADDR>           Admin surface listen address (default: 127.0.0.1:9100)\n",
        "  --settings-path <PATH>        Settings file path (default: .rr-server/settings.json)\n",
        "  --client-export-path <PATH>   Client list export path (default: .rr-server/clients.json)\n",
        "  --commit-quiet-ms <MS>        Quiet period before password edits commit (default: 500)\n",
        "  --no-autostart                Keep the relay stopped until a start request arrives\n",
        "  -V, --version                 Show version with git metadata\n",
        "  -h, --help                    Show this help\n"
    ));
}

fn binary_version_text() -> String {
    let binary = env!("CARGO_PKG_NAME");
    let git_tag = option_env!("RR_BUILD_GIT_TAG").unwrap_or("untagged");
    let git_commit = option_env!("RR_BUILD_GIT_COMMIT").unwrap_or("unknown");
    let git_dirty = option_env!("RR_BUILD_GIT_DIRTY").unwrap_or("false");
    let dirty = matches!(git_dirty, "true" | "1" | "yes" | "dirty");

    if dirty {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag}")
    }
}
