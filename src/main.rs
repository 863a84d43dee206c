use std::{env, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use classroom_monitor::{
    commands,
    config::AppConfig,
    geometry::FrameSize,
    monitor::MonitorMode,
    replay::ReplayBackend,
    utils::logging::init_logging,
    ClassroomContext,
};
use log::info;

const USAGE: &str =
    "usage: classroom-monitor [--config PATH] [--replay FILE] [--mode pose|calibration|attendance]";

const REPLAY_FRAME: FrameSize = FrameSize {
    width: 640,
    height: 480,
};

struct Options {
    config: PathBuf,
    replay: Option<PathBuf>,
    mode: MonitorMode,
}

fn parse_args() -> Result<Options> {
    let mut config = PathBuf::from("classroom.json");
    let mut replay = None;
    let mut mode = MonitorMode::Pose;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| anyhow!("{flag} needs a value\n{USAGE}"));
        match arg.as_str() {
            "--config" => config = PathBuf::from(value("--config")?),
            "--replay" => replay = Some(PathBuf::from(value("--replay")?)),
            "--mode" => mode = value("--mode")?.parse().map_err(|err: String| anyhow!(err))?,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unexpected argument '{other}'\n{USAGE}"),
        }
    }

    Ok(Options {
        config,
        replay,
        mode,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let options = parse_args()?;

    let config = AppConfig::load_or_default(&options.config)?;
    // Only recorded sessions can be driven headless; live capture needs a
    // camera-backed `VisionBackend` supplied by the embedding application.
    let replay = options
        .replay
        .as_deref()
        .ok_or_else(|| anyhow!("no camera backend is built in, pass --replay FILE\n{USAGE}"))?;
    let backend = ReplayBackend::from_file(replay, REPLAY_FRAME)?;
    info!(
        "Replaying {} frames from {}",
        backend.frame_count(),
        replay.display()
    );

    let ctx = ClassroomContext::open(config, Arc::new(backend))?;
    ctx.monitor
        .start(options.mode)
        .await
        .context("failed to start monitor")?;
    let mut stream = ctx
        .monitor
        .open_stream(options.mode)
        .await
        .context("failed to attach to monitor stream")?;

    let mut frames = 0u64;
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(_) => frames += 1,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping {} monitor", options.mode);
                break;
            }
        }
    }

    ctx.monitor.stop(options.mode).await?;
    info!("Received {frames} frames (run {})", stream.run_id);

    let tallies = commands::participation_tallies(&ctx);
    println!("{}", serde_json::to_string_pretty(&tallies)?);
    for summary in commands::participation_summary_today(&ctx).await {
        println!(
            "{}: {} participants, {} participations",
            summary.periodo, summary.total_participantes, summary.total_participaciones
        );
    }

    Ok(())
}
