//! Entry point: daemon mode plus a handful of operator subcommands that are thin wrappers over
//! the same service library the daemon uses, so they carry no logic of their own to drift from
//! the core.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use filewatchd::process_config::ProcessConfig;
use filewatchd::store::models::NewDataSourceRow;
use filewatchd::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "filewatchd", about = "Watches folders and uploads new files to blob storage")]
struct Cli {
    /// Working directory; `filewatchd.toml`, the database file, and the PID lock file all live
    /// here unless overridden.
    #[arg(short = 'D', long, default_value = ".filewatchd")]
    workdir: PathBuf,

    /// Patches a single `key = value` TOML line into the process config before it is validated.
    /// May be given more than once; later overrides win. Same shape as the teacher's `-c` flag.
    #[arg(short = 'c', long = "config-override")]
    config_override: Vec<String>,

    /// Writes the resolved `filewatchd.toml` to the workdir and exits without starting anything.
    #[arg(long)]
    init: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the supervisor loop until interrupted. Default when no subcommand is given.
    Run,
    /// Reads or writes a Configuration row.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manages FileDataSource rows.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Resets a Failed job back to Pending for another attempt.
    JobRetry { id: i32 },
    /// Lists containers known to the configured blob backend. Advisory only.
    ListContainers,
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum SourceAction {
    Add {
        name: String,
        folder_path: String,
        #[arg(long)]
        archive_folder_path: Option<String>,
        #[arg(long, default_value = "*")]
        file_pattern: String,
    },
    Refresh { name: String },
    Disable { name: String },
    Enable { name: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.workdir)?;
    let workdir = Utf8PathBuf::from_path_buf(cli.workdir.canonicalize()?)
        .map_err(|p| anyhow::anyhow!("workdir {p:?} is not valid UTF-8"))?;
    let cfg_file_path = workdir.join("filewatchd.toml");

    let process_config = ProcessConfig::load(&cfg_file_path, &cli.config_override, &workdir)?;

    if cli.init {
        if cfg_file_path.exists() {
            anyhow::bail!("config file {cfg_file_path} already exists, refusing to overwrite it");
        }
        std::fs::write(
            &cfg_file_path,
            format!(
                "database_url = {:?}\nlog_format = {:?}\n",
                process_config.database_url,
                match process_config.log_format {
                    filewatchd::logging::LogFormat::Text => "text",
                    filewatchd::logging::LogFormat::Json => "json",
                }
            ),
        )?;
        println!("wrote {cfg_file_path}");
        return Ok(());
    }

    filewatchd::logging::init(process_config.log_format)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let core = filewatchd::bootstrap(
            &process_config.database_url,
            process_config.local_fs_root.as_deref(),
        )
        .await?;

        match cli.command.unwrap_or(Command::Run) {
            Command::Run => run_daemon(core, &workdir).await,
            Command::Config { action } => match action {
                ConfigAction::Get { key } => {
                    match core.config.get(&key).await? {
                        Some(v) => println!("{v}"),
                        None => println!("(unset)"),
                    }
                    Ok(())
                }
                ConfigAction::Set { key, value } => {
                    core.config.set(&key, &value, None, None).await?;
                    filewatchd::config_service::warn_on_conflicting_disposition(&core.config).await;
                    println!("set {key} = {value}");
                    Ok(())
                }
            },
            Command::Source { action } => match action {
                SourceAction::Add {
                    name,
                    folder_path,
                    archive_folder_path,
                    file_pattern,
                } => {
                    core.data_sources
                        .create(NewDataSourceRow {
                            name: name.clone(),
                            folder_path,
                            archive_folder_path,
                            file_pattern,
                            is_enabled: true,
                            needs_refresh: false,
                            created_at: chrono::Utc::now().to_rfc3339(),
                        })
                        .await?;
                    println!("added data source {name}");
                    Ok(())
                }
                SourceAction::Refresh { name } => {
                    core.data_sources.request_refresh(&name).await?;
                    println!("refresh requested for {name}");
                    Ok(())
                }
                SourceAction::Disable { name } => {
                    core.data_sources.set_enabled(&name, false).await?;
                    println!("disabled {name}");
                    Ok(())
                }
                SourceAction::Enable { name } => {
                    core.data_sources.set_enabled(&name, true).await?;
                    println!("enabled {name}");
                    Ok(())
                }
            },
            Command::JobRetry { id } => {
                use diesel::prelude::*;
                use filewatchd::store::models::UploadState;
                use filewatchd::store::schema::upload_jobs::dsl as u;
                let now = chrono::Utc::now().to_rfc3339();
                core.store
                    .with_conn(move |conn| {
                        diesel::update(u::upload_jobs.filter(u::id.eq(id)))
                            .set((
                                u::state.eq(UploadState::Pending.to_string()),
                                u::attempts.eq(0),
                                u::last_error.eq(None::<String>),
                                u::next_attempt_at.eq(&now),
                                u::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .map(|_| ())
                            .map_err(filewatchd::error::StoreError::from)
                    })
                    .await?;
                println!("job {id} reset to pending");
                Ok(())
            }
            Command::ListContainers => {
                for name in core.blob.list_containers().await? {
                    println!("{name}");
                }
                Ok(())
            }
        }
    })
}

async fn run_daemon(core: filewatchd::core_services::CoreServices, workdir: &Utf8PathBuf) -> anyhow::Result<()> {
    let _lock = acquire_pid_lock(workdir)?;

    match core.blob.probe().await {
        blob_storage::ProbeResult::Connected => info!("blob backend connectivity check passed"),
        blob_storage::ProbeResult::Disconnected(reason) => {
            tracing::warn!("blob backend connectivity check failed: {reason}")
        }
    }

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    Supervisor::new(core, cancel).run().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

struct PidLock(Utf8PathBuf);

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn acquire_pid_lock(workdir: &Utf8PathBuf) -> anyhow::Result<PidLock> {
    let path = workdir.join("filewatchd.pid");
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    match opts.open(path.as_std_path()) {
        Ok(mut f) => {
            use std::io::Write;
            write!(f, "{}", std::process::id())?;
            Ok(PidLock(path))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = std::fs::read_to_string(&path).unwrap_or_default();
            anyhow::bail!(
                "filewatchd is already running in {workdir} with PID {existing} (lock file {path})"
            )
        }
        Err(e) => Err(e.into()),
    }
}
