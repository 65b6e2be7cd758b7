//! Replay command - push a scripted request stream through the proxy.
//!
//! The script is JSON lines, one [`Request`] per line. Blank lines and lines
//! starting with `#` are skipped. Requests without a `token` get one assigned.
//! Each reply is printed to stdout as one JSON line.
//!
//! # Examples
//!
//! ```bash
//! cat > demo.jsonl <<'JSONL'
//! {"op": "create", "path": "\\hello.txt", "options": {}}
//! {"op": "write", "handle": 1, "mode": {"at": 0}, "data": [104, 105]}
//! {"op": "close", "handle": 1}
//! JSONL
//! umfsp replay demo.jsonl --workers 2 --target 'M:'
//!
//! # Keep the volume mounted after the script until Ctrl+C
//! umfsp replay demo.jsonl --hold
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::{debug, info, instrument, warn};

use umfsp_core::testing::{MemFs, populated_memfs};
use umfsp_core::{
    DispatchConfig, DispatchCore, Dispatcher, Request, RequestTokenGenerator, Response, wksid,
};
use umfsp_mount::{LoggingMountManager, MountLifecycle, Volume};

use crate::service::{Interrupted, ServiceLoop};

const REPLY_POLL: Duration = Duration::from_millis(100);
const HOLD_TICK: Duration = Duration::from_secs(1);

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// JSON-lines request script
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// TOML file with dispatch settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Worker thread count (overrides the config file)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Mount target for the replay volume
    #[arg(long, default_value = "M:")]
    pub target: String,

    /// Volume name reported to the mount manager
    #[arg(long, default_value = "memfs")]
    pub volume_name: String,

    /// Pre-populate the root directory with this many files (f0000, f0001, ...)
    #[arg(long, default_value_t = 0)]
    pub files: usize,

    /// Print dispatch statistics to stderr when done
    #[arg(long)]
    pub stats: bool,

    /// Keep the volume mounted after the script until interrupted
    #[arg(long)]
    pub hold: bool,
}

/// Load dispatch settings, applying command-line overrides.
pub fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<DispatchConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str::<DispatchConfig>(&text)
                .with_context(|| format!("Invalid config: {}", path.display()))?
        }
        None => DispatchConfig::default(),
    };
    if let Some(workers) = workers {
        config = config.workers(workers);
    }
    Ok(config)
}

/// Parse one script line. `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<Request>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

#[instrument(level = "info", name = "cmd::replay", skip_all, fields(script = %args.script.display()))]
pub fn execute(args: &Args, service: &Arc<ServiceLoop>) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.workers)?;
    let script = File::open(&args.script)
        .with_context(|| format!("Failed to open script: {}", args.script.display()))?;

    let fs = if args.files > 0 {
        populated_memfs("\\", "f", args.files).context("Failed to populate volume")?
    } else {
        MemFs::new()
    };
    debug!(?config, "starting dispatch core");
    let core = Arc::new(DispatchCore::new(fs, config));
    let volume = Volume::with_shared_provider(&args.volume_name, Arc::clone(core.provider()));
    let lifecycle = MountLifecycle::new(LoggingMountManager);

    let info = lifecycle
        .mount(&volume, &args.target)
        .with_context(|| format!("Failed to mount volume at {:?}", args.target))?;
    info!(mount_point = %info.mount_point, id = %volume.id(), "volume mounted");

    let dispatcher = Dispatcher::start(Arc::clone(&core)).context("Failed to start dispatcher")?;
    let result = run_script(BufReader::new(script), &dispatcher, service);
    if args.hold && result.is_ok() {
        eprintln!("Press Ctrl+C to unmount and exit");
        hold_mounted(service, HOLD_TICK, || {
            debug!(open_handles = core.open_handles(), "volume held");
        });
    }

    dispatcher.stop();
    let closed = core.close_all();
    if closed > 0 {
        debug!(closed, "closed handles left open by the script");
    }
    if let Err(e) = lifecycle.unmount(&volume) {
        warn!(error = %e, "unmount failed");
    }
    wksid::finalize();

    if args.stats {
        let stats = serde_json::json!({
            "dispatch": core.stats_snapshot(),
            "workers": dispatcher.stats().snapshot(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    let replayed = result?;
    info!(replayed, "replay finished");
    Ok(())
}

fn run_script<P, R>(script: R, dispatcher: &Dispatcher<P>, service: &ServiceLoop) -> Result<u64>
where
    P: umfsp_core::FileSystemProvider,
    R: BufRead,
{
    let tokens = RequestTokenGenerator::new();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut replayed = 0u64;

    for (lineno, line) in script.lines().enumerate() {
        if service.is_stopped() {
            return Err(Interrupted.into());
        }
        let line = line.context("Failed to read script")?;
        let Some(mut request) =
            parse_line(&line).with_context(|| format!("Malformed request on line {}", lineno + 1))?
        else {
            continue;
        };
        if request.token.raw() == 0 {
            request.token = tokens.next();
        }
        let token = request.token;
        dispatcher.submit(request)?;

        let reply = await_reply(dispatcher, service)?;
        if reply.token != token {
            bail!("Reply for {} while waiting for {token}", reply.token);
        }
        writeln!(out, "{}", serde_json::to_string(&reply)?)?;
        replayed += 1;
    }
    Ok(replayed)
}

/// Park until the service is stopped, calling `tick` on each idle wakeup.
fn hold_mounted(service: &ServiceLoop, period: Duration, mut tick: impl FnMut()) {
    while !service.wait_timeout(period) {
        tick();
    }
}

fn await_reply<P: umfsp_core::FileSystemProvider>(
    dispatcher: &Dispatcher<P>,
    service: &ServiceLoop,
) -> Result<Response> {
    loop {
        match dispatcher.replies().recv_timeout(REPLY_POLL) {
            Ok(reply) => return Ok(reply),
            Err(e) if e.is_timeout() => {
                if service.is_stopped() {
                    return Err(Interrupted.into());
                }
            }
            Err(_) => bail!("Dispatcher stopped before replying"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use umfsp_core::Operation;

    #[test]
    fn test_parse_line_skips_comments_and_blanks() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# setup").unwrap().is_none());

        let req = parse_line(r#"{"op": "get_volume_info"}"#).unwrap().unwrap();
        assert_eq!(req.op, Operation::GetVolumeInfo);
        assert_eq!(req.token.raw(), 0);
        assert!(parse_line(r#"{"op": "nope"}"#).is_err());
    }

    #[test]
    fn test_load_config_overrides_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        fs::write(&path, "lock_timeout = \"250ms\"\nworkers = 8\n").unwrap();

        let config = load_config(Some(&path), Some(3)).unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.workers, 3);

        fs::write(&path, "lock_timeout = 5\n").unwrap();
        assert!(load_config(Some(&path), None).is_err());
    }

    #[test]
    fn test_run_script_replies_in_order() {
        let core = Arc::new(DispatchCore::new(
            MemFs::new(),
            DispatchConfig::default().workers(2),
        ));
        let dispatcher = Dispatcher::start(Arc::clone(&core)).unwrap();
        let service = ServiceLoop::new();
        let script = Cursor::new(
            "{\"op\": \"get_volume_info\"}\n\n# comment\n{\"op\": \"close\", \"handle\": 9}\n",
        );
        assert_eq!(run_script(script, &dispatcher, &service).unwrap(), 2);
        assert_eq!(core.stats_snapshot().requests, 2);
        assert_eq!(core.stats_snapshot().failures, 1);
        dispatcher.stop();
    }

    #[test]
    fn test_hold_returns_once_stopped() {
        let service = ServiceLoop::new();
        let stopper = {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                service.stop_loop();
            })
        };
        let mut ticks = 0;
        hold_mounted(&service, Duration::from_millis(5), || ticks += 1);
        stopper.join().unwrap();
        assert!(service.is_stopped());
        assert!(ticks >= 1);
    }

    #[test]
    fn test_stopped_service_interrupts() {
        let core = Arc::new(DispatchCore::new(MemFs::new(), DispatchConfig::default().workers(1)));
        let dispatcher = Dispatcher::start(core).unwrap();
        let service = ServiceLoop::new();
        service.stop_loop();
        let err = run_script(Cursor::new("{\"op\": \"get_volume_info\"}\n"), &dispatcher, &service)
            .unwrap_err();
        assert!(err.downcast_ref::<Interrupted>().is_some());
    }
}
