use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use course_nav::bus::LocalBus;
use course_nav::persist::{FileAdapter, PersistenceAdapter};
use course_nav::{doctor as nav_doctor, gnss, CourseHandle, PersistError, Reconciler, ReconcilerConfig};
use course_proto::{paths, Delta};
use course_resources::{GribStore, ResourceError, TrackStore};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const NMEA_ORIGIN: &str = "nmea";

#[derive(Debug, Parser)]
#[command(name = "course", version, about = "Course helper - active route, waypoints and arrival alarm")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Run the course service. Reads `PUT <path> <json>` / `GET` lines on stdin.
    Run,
    /// Print the stored course record.
    Show,
    Grib { #[command(subcommand)] cmd: GribCmd },
    Tracks { #[command(subcommand)] cmd: TrackCmd },
}

#[derive(Debug, Subcommand)]
enum GribCmd {
    List,
    Latest,
    Get {
        id: String,
        #[arg(long, value_delimiter = ',')]
        section: Option<Vec<usize>>,
    },
}

#[derive(Debug, Subcommand)]
enum TrackCmd {
    List,
    Get {
        id: String,
        #[arg(long, value_delimiter = ',')]
        section: Option<Vec<usize>>,
    },
    Delete { id: String },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    store: StoreCfg,
    #[serde(default)]
    course: CourseCfg,
    gnss: Option<GnssCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct StoreCfg { path: String }

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct CourseCfg {
    origin: String,
    record_key: String,
    rebroadcast_secs: u64,
    notify_period_ms: u64,
    sample_size: usize,
}

impl Default for CourseCfg {
    fn default() -> Self {
        let d = ReconcilerConfig::default();
        Self {
            origin: d.origin,
            record_key: d.record_key,
            rebroadcast_secs: d.rebroadcast_interval.as_secs(),
            notify_period_ms: d.notify_period.as_millis() as u64,
            sample_size: d.sample_size,
        }
    }
}

impl CourseCfg {
    fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            origin: self.origin.clone(),
            record_key: self.record_key.clone(),
            rebroadcast_interval: Duration::from_secs(self.rebroadcast_secs),
            notify_period: Duration::from_millis(self.notify_period_ms),
            sample_size: self.sample_size,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct GnssCfg {
    source: String,
    nmea_device: Option<String>,
    nmea_baud: Option<u32>,
    nmea_file: Option<String>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

impl Config {
    fn base(&self) -> PathBuf {
        PathBuf::from(&self.store.path)
    }

    fn db_dir(&self) -> PathBuf {
        self.base().join("course_db")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run => run(&cfg).await?,
        Command::Show => show(&cfg).await?,
        Command::Grib { cmd } => grib_cmd(&cfg, cmd).await?,
        Command::Tracks { cmd } => track_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    nav_doctor::check_course(&cfg.course.reconciler())?;
    if let Some(g) = &cfg.gnss {
        nav_doctor::check_gnss(&g.source, g.nmea_device.as_deref(), g.nmea_file.as_deref())?;
    }
    check_store_writable(&cfg.base()).await?;
    info!("doctor: OK");
    Ok(())
}

async fn check_store_writable(base: &Path) -> Result<()> {
    tokio::fs::create_dir_all(base).await.with_context(|| format!("create {}", base.display()))?;
    let marker = base.join(".doctor-write-check");
    tokio::fs::write(&marker, b"ok").await.with_context(|| format!("{} not writable", base.display()))?;
    tokio::fs::remove_file(&marker).await.ok();
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let course = cfg.course.reconciler();
    nav_doctor::check_course(&course).context("invalid [course] config")?;
    let adapter = Arc::new(FileAdapter::open(cfg.db_dir()).await.context("open course store")?);
    let bus = LocalBus::default();

    let mut mirror = bus.tap();
    let mirror_task = tokio::spawn(async move {
        loop {
            match mirror.recv().await {
                Ok(delta) => match serde_json::to_string(&delta) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("run: cannot encode delta: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("run: stdout mirror lagged, {} deltas dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let reconciler = Reconciler::start(course, adapter, Arc::new(bus.clone()), Arc::new(bus.clone())).await;
    let handle = reconciler.handle();

    let gnss_task = match &cfg.gnss {
        Some(g) if g.source != "none" => {
            let src = open_nmea(g).await?;
            Some(tokio::spawn(feed_positions(src, bus.clone())))
        }
        _ => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(l)) => handle_line(&handle, l.trim()).await,
                Ok(None) => {
                    info!("run: stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("run: stdin error: {:#}", e);
                    stdin_open = false;
                }
            },
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!("run: signal handler failed: {:#}", e);
                }
                break;
            }
        }
    }

    if let Some(t) = gnss_task {
        t.abort();
    }
    reconciler.shutdown().await;
    mirror_task.abort();
    info!("run: stopped");
    Ok(())
}

async fn handle_line(handle: &CourseHandle, line: &str) {
    if line.is_empty() {
        return;
    }
    let mut parts = line.splitn(3, char::is_whitespace);
    match (parts.next(), parts.next(), parts.next()) {
        (Some("PUT"), Some(path), Some(raw)) => {
            let result = match serde_json::from_str(raw.trim()) {
                Ok(value) => handle.put(path, value).await,
                Err(e) => course_nav::CommandResult::rejected(format!("bad json: {}", e)),
            };
            println!("{}", serde_json::json!({ "put": path, "statusCode": result.status_code(), "result": result }));
        }
        (Some("GET"), None, None) => match handle.snapshot().await {
            Some(nav) => match serde_json::to_string(&nav) {
                Ok(s) => println!("{}", s),
                Err(e) => warn!("run: cannot encode course: {}", e),
            },
            None => warn!("run: course service is not running"),
        },
        _ => warn!("run: expected `PUT <path> <json>` or `GET`, got {:?}", line),
    }
}

async fn open_nmea(g: &GnssCfg) -> Result<gnss::NmeaSource> {
    match g.source.as_str() {
        "nmea-serial" => gnss::NmeaSource::serial(
            g.nmea_device.as_deref().context("gnss.nmea_device missing")?,
            g.nmea_baud.unwrap_or(4800),
        ),
        "nmea-file" => gnss::NmeaSource::file(g.nmea_file.as_deref().context("gnss.nmea_file missing")?).await,
        other => anyhow::bail!("unknown gnss.source: {}", other),
    }
}

async fn feed_positions(mut src: gnss::NmeaSource, bus: LocalBus) {
    loop {
        match src.next_fix().await {
            Ok(fix) => {
                let delta = Delta::single(NMEA_ORIGIN, paths::POSITION, serde_json::json!(fix.position));
                if let Err(e) = bus.publish(delta) {
                    warn!("gnss: publish failed: {}", e);
                }
            }
            Err(e) => {
                warn!("gnss: position feed stopped: {:#}", e);
                return;
            }
        }
    }
}

async fn show(cfg: &Config) -> Result<()> {
    let db = FileAdapter::open(cfg.db_dir()).await.context("open course store")?;
    match db.get(&cfg.course.record_key).await {
        Ok(stored) => {
            println!("rev={}", stored.rev);
            println!("{}", serde_json::to_string_pretty(&stored.value)?);
        }
        Err(PersistError::NotFound(_)) => println!("no stored course"),
        Err(e) => return Err(e).context("read course record"),
    }
    Ok(())
}

fn resource_err(e: ResourceError) -> anyhow::Error {
    anyhow::anyhow!("{} (status {})", e.message, e.status)
}

async fn grib_cmd(cfg: &Config, cmd: GribCmd) -> Result<()> {
    let store = GribStore::init(&cfg.base()).await.map_err(resource_err)?;
    let out = match cmd {
        GribCmd::List => serde_json::Value::Object(store.list().await.map_err(resource_err)?),
        GribCmd::Latest => store.latest().await.map_err(resource_err)?,
        GribCmd::Get { id, section } => store.get(&id, section.as_deref()).await.map_err(resource_err)?,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn track_cmd(cfg: &Config, cmd: TrackCmd) -> Result<()> {
    let store = TrackStore::init(&cfg.base(), cfg.course.origin.clone()).await.map_err(resource_err)?;
    match cmd {
        TrackCmd::List => {
            let all = store.list().await.map_err(resource_err)?;
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        TrackCmd::Get { id, section } => {
            let doc = store.get(&id, section.as_deref()).await.map_err(resource_err)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        TrackCmd::Delete { id } => {
            store.set(&id, None).await.map_err(resource_err)?;
            println!("deleted {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_course_section() {
        let cfg: Config = toml::from_str("[store]\npath = \"/tmp/course\"\n").unwrap();
        let rc = cfg.course.reconciler();
        assert_eq!(rc.origin, "freeboard-sk-helper");
        assert_eq!(rc.rebroadcast_interval, Duration::from_secs(30));
        assert_eq!(rc.notify_period, Duration::from_millis(5000));
        assert_eq!(cfg.db_dir(), PathBuf::from("/tmp/course/course_db"));
        assert!(cfg.gnss.is_none());
    }

    #[test]
    fn config_overrides() {
        let cfg: Config = toml::from_str(r#"
            [store]
            path = "/data"
            [course]
            origin = "helm"
            sample_size = 3
            [gnss]
            source = "nmea-file"
            nmea_file = "trip.nmea"
        "#).unwrap();
        let rc = cfg.course.reconciler();
        assert_eq!(rc.origin, "helm");
        assert_eq!(rc.sample_size, 3);
        assert_eq!(rc.record_key, "navData");
        assert_eq!(cfg.gnss.unwrap().source, "nmea-file");
    }

    #[test]
    fn zero_rebroadcast_interval_fails_course_check() {
        let cfg: Config = toml::from_str(r#"
            [store]
            path = "/data"
            [course]
            rebroadcast_secs = 0
        "#).unwrap();
        let rc = cfg.course.reconciler();
        assert_eq!(rc.rebroadcast_interval, Duration::ZERO);
        assert!(nav_doctor::check_course(&rc).is_err());
    }

    #[test]
    fn cli_parses_sections() {
        let cli = Cli::try_parse_from(["course", "--config", "c.toml", "grib", "get", "2024050100", "--section", "0,2"]).unwrap();
        match cli.cmd {
            Command::Grib { cmd: GribCmd::Get { id, section } } => {
                assert_eq!(id, "2024050100");
                assert_eq!(section, Some(vec![0, 2]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
