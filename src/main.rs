use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use echoalarm::alarm::calculator::{TimeDisplayMode, format_local_fire_time};
use echoalarm::alarm::lifecycle::{ClusterError, ClusterManager, ReconcileReport, SharedCluster};
use echoalarm::alarm::model::{ClusterProfile, parse_wake_time_of_day};
use echoalarm::alarm::scheduler::{PermissionStatus, RegistryScheduler, StaticPermission};
use echoalarm::alarm::tone::{Tone, TonePool};
use echoalarm::api::{ApiServer, ApiServerConfig};
use echoalarm::logging::init_logging;
use echoalarm::notice::Notice;
use echoalarm::store::{FileStore, mark_onboarding_completed, onboarding_completed};

type Manager = ClusterManager<FileStore, RegistryScheduler, StaticPermission>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliPermission {
    Granted,
    Denied,
    NotRequired,
}

impl From<CliPermission> for PermissionStatus {
    fn from(value: CliPermission) -> Self {
        match value {
            CliPermission::Granted => PermissionStatus::Granted,
            CliPermission::Denied => PermissionStatus::Denied,
            CliPermission::NotRequired => PermissionStatus::NotRequired,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliClock {
    #[value(name = "24")]
    Hour24,
    #[value(name = "12")]
    Hour12,
}

impl From<CliClock> for TimeDisplayMode {
    fn from(value: CliClock) -> Self {
        match value {
            CliClock::Hour24 => TimeDisplayMode::Hour24,
            CliClock::Hour12 => TimeDisplayMode::Hour12,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "echoalarm",
    version,
    about = "Schedule a cluster of wake-up alarms spaced by a fixed interval"
)]
struct Cli {
    #[arg(long, global = true, default_value = "echoalarm-store.json")]
    store: PathBuf,

    #[arg(long, global = true, default_value = "echoalarm-registry.json")]
    registry: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = CliPermission::NotRequired)]
    overlay_permission: CliPermission,

    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = CliClock::Hour24)]
    clock: CliClock,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether a cluster is active and its schedule.
    Status,
    /// Compute the cluster the current draft would produce.
    Preview,
    /// Edit the draft; non-numeric or non-positive counts fall back to 1.
    Set {
        #[arg(long)]
        wake_time: Option<String>,
        #[arg(long)]
        interval: Option<String>,
        #[arg(long)]
        alarm_count: Option<String>,
    },
    #[command(subcommand)]
    Tones(ToneCommand),
    /// Register the draft with the alarm scheduler.
    Activate {
        /// Proceed even though alarms may not show over the lock screen.
        #[arg(long)]
        accept_degraded: bool,
    },
    Deactivate {
        #[arg(long)]
        yes: bool,
    },
    StopSound,
    /// Compare the persisted cluster with the scheduler's registrations.
    Reconcile,
    Onboarding {
        #[arg(long)]
        complete: bool,
    },
    /// Serve the local HTTP API until interrupted.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8099)]
        port: u16,
    },
}

#[derive(Subcommand, Debug)]
enum ToneCommand {
    List,
    /// Bundled tones not yet in the pool.
    Defaults,
    AddDefault {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    AddCustom {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Remove {
        uri: String,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(&cli.log_level, cli.log_dir.as_deref())?;
    let mode = TimeDisplayMode::from(cli.clock);

    let mut manager = ClusterManager::new(
        FileStore::new(cli.store.clone()),
        RegistryScheduler::new(cli.registry.clone()),
        StaticPermission::new(cli.overlay_permission.into()),
    );
    manager
        .restore_on_startup()
        .with_context(|| format!("failed to restore alarm cluster from {}", cli.store.display()))?;

    match cli.command {
        Command::Status => print_status(&manager, mode),
        Command::Preview => {
            let profile = manager.preview().map_err(surfaced)?;
            println!("next cluster:");
            print_schedule(&profile, mode);
        }
        Command::Set {
            wake_time,
            interval,
            alarm_count,
        } => {
            let wake_time = wake_time
                .as_deref()
                .map(parse_wake_time_of_day)
                .transpose()?;
            manager
                .edit_draft(|draft| {
                    if let Some(wake_time) = wake_time {
                        draft.set_wake_time_of_day(wake_time);
                    }
                    if let Some(interval) = interval.as_deref() {
                        draft.set_interval(interval);
                    }
                    if let Some(alarm_count) = alarm_count.as_deref() {
                        draft.set_alarm_count(alarm_count);
                    }
                })
                .map_err(surfaced)?;
            print_draft(&manager);
        }
        Command::Tones(command) => run_tones(&mut manager, command)?,
        Command::Activate { accept_degraded } => {
            if accept_degraded {
                manager.acknowledge_degraded_mode();
            }
            let profile = manager.activate_draft().map_err(surfaced)?;
            let notice = Notice::Success {
                message: format!(
                    "{} alarms from {}",
                    profile.alarm_count,
                    format_local_fire_time(profile.wake_time, mode)
                ),
            };
            println!("{}", notice.render_plain());
            print_schedule(&profile, mode);
        }
        Command::Deactivate { yes } => {
            if !yes {
                let notice = Notice::Deactivate {
                    message: "All alarms in the cluster will be cancelled. Re-run with --yes to confirm."
                        .to_string(),
                };
                println!("{}", notice.render_plain());
                return Ok(());
            }
            if manager.deactivate().map_err(surfaced)? {
                println!("alarms cancelled");
            } else {
                println!("no active cluster");
            }
        }
        Command::StopSound => {
            manager.stop_current_sound().map_err(surfaced)?;
            println!("sound stopped");
        }
        Command::Reconcile => {
            let report = manager.reconcile(Utc::now()).map_err(surfaced)?;
            println!("{}", describe_report(&report));
        }
        Command::Onboarding { complete } => {
            if complete {
                mark_onboarding_completed(manager.store_mut())?;
            }
            let done = onboarding_completed(manager.store())?;
            println!("onboarding: {}", if done { "completed" } else { "pending" });
        }
        Command::Serve { bind, port } => {
            let server = ApiServer::start(
                ApiServerConfig {
                    bind_addr: bind.clone(),
                    port,
                },
                SharedCluster::new(manager),
            )
            .with_context(|| format!("failed to start local API at {bind}:{port}"))?;
            println!("listening on http://{bind}:{port}");
            server.wait();
        }
    }
    Ok(())
}

fn run_tones(manager: &mut Manager, command: ToneCommand) -> Result<()> {
    match command {
        ToneCommand::List => print_tones(manager.draft().tone_pool()),
        ToneCommand::Defaults => {
            let available = manager.available_default_tones();
            if available.is_empty() {
                println!("every default tone is already in the pool");
            }
            for tone in available {
                println!("{}  {}", tone.id.as_deref().unwrap_or("-"), tone.name);
            }
        }
        ToneCommand::AddDefault { ids } => {
            let selected = manager
                .available_default_tones()
                .into_iter()
                .filter(|tone| tone.id.as_ref().is_some_and(|id| ids.contains(id)))
                .collect::<Vec<_>>();
            let added = manager.add_default_tones(selected).map_err(surfaced)?;
            println!("added {added} default tone(s)");
        }
        ToneCommand::AddCustom { files } => {
            let selected = files
                .iter()
                .map(|path| Tone::from_picked_file(path))
                .collect::<Vec<_>>();
            let added = manager.add_custom_tones(selected).map_err(surfaced)?;
            println!("added {added} custom tone(s)");
        }
        ToneCommand::Remove { uri } => match manager.remove_tone(&uri).map_err(surfaced)? {
            Some(tone) => println!("removed {}", tone.name),
            None => println!("no tone with uri {uri}"),
        },
    }
    Ok(())
}

/// Wraps a cluster error with the notice a user would see for it.
fn surfaced(err: ClusterError) -> anyhow::Error {
    let notice = Notice::from(&err).render_plain();
    anyhow::Error::new(err).context(notice)
}

fn print_status(manager: &Manager, mode: TimeDisplayMode) {
    match manager.active_profile() {
        Some(profile) => {
            println!("cluster: active");
            print_schedule(profile, mode);
        }
        None => {
            println!("cluster: inactive");
            print_draft(manager);
        }
    }
    if manager.overlay_permission_missing() {
        println!("overlay permission: missing");
    }
}

fn print_draft(manager: &Manager) {
    let draft = manager.draft();
    println!(
        "draft: wake {}, every {} min, {} alarm(s), {} tone(s)",
        draft.wake_time_of_day().format("%H:%M"),
        draft.interval_minutes(),
        draft.alarm_count(),
        draft.tone_pool().len()
    );
}

fn print_schedule(profile: &ClusterProfile, mode: TimeDisplayMode) {
    info!(
        "event=cluster_print module=cli alarms={} interval={}",
        profile.alarm_count, profile.interval_minutes
    );
    for occurrence in profile.occurrences() {
        let tone = occurrence
            .tone
            .map(|tone| tone.name.as_str())
            .unwrap_or("system default");
        println!(
            "  #{:<2} {}  {}",
            occurrence.index + 1,
            format_local_fire_time(occurrence.fire_at, mode),
            tone
        );
    }
}

fn print_tones(pool: &TonePool) {
    if pool.is_empty() {
        println!("tone pool is empty; alarms use the system default sound");
        return;
    }
    for (position, tone) in pool.iter().enumerate() {
        println!("{:>2}. {}  ({})", position + 1, tone.name, tone.uri);
    }
}

fn describe_report(report: &ReconcileReport) -> String {
    match report {
        ReconcileReport::Inactive => "no active cluster".to_string(),
        ReconcileReport::InSync { pending } => {
            format!("in sync: {pending} pending alarm(s) registered")
        }
        ReconcileReport::Reregistered { pending } => {
            format!("re-registered {pending} pending alarm(s)")
        }
        ReconcileReport::CancelledOrphans { cancelled } => {
            format!("cancelled {cancelled} orphaned alarm(s)")
        }
        ReconcileReport::Expired => "every alarm in the active cluster has already fired".to_string(),
    }
}
