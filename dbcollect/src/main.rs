//! dbcollect - collect Oracle workload reports into an archive.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dbcollect::instance::{Credentials, SqlplusProber};
use dbcollect::logging::{self, Verbosity};
use dbcollect::{
    ArchiveSink, CollectConfig, CollectRuntimeBuilder, CompletionMode, DirectoryArchive, ErrorCode,
    Resolver, SqlplusMetadata, SqlplusSessionFactory, StagingDir, SystemRunner,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Completion {
    /// Completion line on the session's stdout
    Channel,
    /// Marker file created by the session
    Marker,
}

#[derive(Parser, Debug)]
#[command(name = "dbcollect")]
#[command(about = "Collect Oracle AWR/Statspack reports and database info", long_about = None)]
struct Args {
    /// Print the explanation of an error code (e.g. E007) and exit
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory for the archive
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parent directory for the staging area
    #[arg(long)]
    tempdir: Option<PathBuf>,

    /// Log file
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Number of days of reports
    #[arg(long)]
    days: Option<u32>,

    /// Days before now at which reports end
    #[arg(long)]
    end_days: Option<u32>,

    /// Use Statspack even if AWR is in use
    #[arg(long)]
    statspack: bool,

    /// Generate AWR reports without detected prior usage
    #[arg(long)]
    force_awr: bool,

    /// Skip instances without AWR or Statspack usage
    #[arg(long)]
    ignore: bool,

    /// Skip reports of other RAC instances
    #[arg(long)]
    no_rac: bool,

    /// Skip reports on standby databases
    #[arg(long)]
    no_stby: bool,

    /// Only collect database info, no reports
    #[arg(long)]
    no_awr: bool,

    /// Strip SQL sections from HTML reports
    #[arg(long)]
    strip: bool,

    /// Only these sids (comma separated)
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Skip these sids (comma separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Use this ORACLE_HOME for every instance
    #[arg(long)]
    orahome: Option<PathBuf>,

    /// Credentials file (sid:enabled:connectstring)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Per-report timeout in minutes
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of parallel sessions, 0 for all CPUs
    #[arg(long)]
    tasks: Option<usize>,

    /// Completion signalling of report sessions
    #[arg(long, value_enum)]
    completion: Option<Completion>,

    /// Debug output on the console
    #[arg(short, long)]
    debug: bool,

    /// Errors only on the console
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn apply(&self, config: &mut CollectConfig) {
        let policy = &mut config.policy;
        if let Some(days) = self.days {
            policy.days = days;
        }
        if let Some(end) = self.end_days {
            policy.end_offset = end;
        }
        policy.prefer_statspack |= self.statspack;
        policy.force_awr |= self.force_awr;
        policy.ignore_missing_usage |= self.ignore;
        policy.include_rac &= !self.no_rac;
        policy.include_standby &= !self.no_stby;
        policy.no_reports |= self.no_awr;
        policy.strip |= self.strip;

        let resolver = &mut config.resolver;
        if !self.include.is_empty() {
            resolver.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            resolver.exclude = self.exclude.clone();
        }
        if self.orahome.is_some() {
            resolver.home_override = self.orahome.clone();
        }
        if self.credentials.is_some() {
            resolver.credentials_file = self.credentials.clone();
        }

        if let Some(minutes) = self.timeout {
            config.session.job_timeout_minutes = minutes;
        }
        if let Some(completion) = self.completion {
            config.session.completion = match completion {
                Completion::Channel => CompletionMode::ControlChannel,
                Completion::Marker => CompletionMode::Marker,
            };
        }
        if self.tasks.is_some() {
            config.run.tasks = self.tasks;
        }
        if let Some(dir) = &self.tempdir {
            config.run.staging_base = dir.clone();
        }
        config.run.show_progress &= !self.quiet;
    }
}

fn explain(code: &str) -> ExitCode {
    match code.parse::<ErrorCode>() {
        Ok(code) => {
            println!("{code}: {}\n\n{}", code.summary(), code.explain());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(2)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(code) = &args.explain {
        return explain(code);
    }

    let log_path = args.logfile.clone().unwrap_or_else(logging::default_log_path);
    let guard = match logging::init_logging(&log_path, Verbosity::from_flags(args.debug, args.quiet)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: cannot open log file {}: {e}", log_path.display());
            return ExitCode::FAILURE;
        }
    };

    let mut archive = None;
    let code = match run(args, &mut archive).await {
        Ok(output) => {
            tracing::info!("Archive complete: {}", output.display());
            0
        }
        Err(err) => {
            let code = err
                .downcast_ref::<dbcollect::CollectError>()
                .map(|e| {
                    tracing::error!("Run aborted ({}), see 'dbcollect --explain {}'", e.code(), e.code());
                    e.exit_code()
                })
                .unwrap_or(1);
            tracing::error!("{err:#}");
            code
        }
    };

    let log_path = guard.finish();
    if let Some(archive) = archive {
        if let Err(e) = archive.store(&log_path, "dbcollect.log").await {
            eprintln!("Error: storing log file: {e}");
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    }
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(u8::try_from(code).unwrap_or(1))
    }
}

/// Collect every resolved instance. Returns the output directory.
///
/// `archive` is set as soon as the output archive exists so the log file
/// can be stored after logging shuts down.
async fn run(
    args: Args,
    archive_slot: &mut Option<Arc<DirectoryArchive>>,
) -> anyhow::Result<PathBuf> {
    let mut config = match &args.config {
        Some(path) => CollectConfig::from_json_file(path)?,
        None => CollectConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    #[cfg(feature = "metrics")]
    dbcollect::metrics::init_metrics()?;

    let output = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(format!(
            "dbcollect-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        ))
    });
    tracing::info!("Collecting into {}", output.display());

    let credentials = match &config.resolver.credentials_file {
        Some(path) => Credentials::load(path)?,
        None => Credentials::default(),
    };

    let runner = Arc::new(SystemRunner);
    let probe_timeout = Duration::from_secs(config.resolver.probe_timeout_secs);
    let prober = Arc::new(SqlplusProber::new(Arc::clone(&runner), probe_timeout));
    let resolver = Resolver::new(config.resolver.clone(), credentials, Arc::clone(&runner), prober);
    let resolved = resolver.resolve_all().await?;

    let staging = Arc::new(
        StagingDir::create(&config.run.staging_base).context("creating staging area")?,
    );
    let archive = Arc::new(DirectoryArchive::new(&output));
    *archive_slot = Some(Arc::clone(&archive));
    let runtime = CollectRuntimeBuilder::new(config.clone())
        .with_factory(Arc::new(SqlplusSessionFactory::new(config.session.clone(), &staging)))
        .with_metadata(Arc::new(SqlplusMetadata::new(
            Arc::clone(&runner),
            config.session.job_timeout(),
        )))
        .with_archive(Arc::clone(&archive))
        .with_staging(staging)
        .build()?;

    let mut result = Ok(());
    for (sid, instance) in resolved {
        let instance = match instance {
            Ok(instance) => instance,
            // already logged by the resolver
            Err(_) => continue,
        };
        match runtime.collect_instance(&instance).await {
            Ok(summary) => tracing::info!(
                sid = %sid,
                reports = summary.archived,
                "{sid}: {} reports, {} other files in {}s",
                summary.archived,
                summary.auxiliary,
                summary.elapsed.as_secs()
            ),
            Err(err) if err.is_instance_scoped() => {
                tracing::error!(sid = %sid, code = %err.code(), "{err}");
            }
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }

    #[cfg(feature = "metrics")]
    {
        let text = dbcollect::metrics::gather_metrics()?;
        archive.store_bytes(text.as_bytes(), "metrics.prom").await?;
    }

    result?;
    Ok(output)
}
