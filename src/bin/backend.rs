#![forbid(unsafe_code)]

//! HTTP server exposing the fetchtube pipeline.
//!
//! Settings come from `.env`, the environment and finally the command line
//! (`--host`, `--port`, `--temp-dir`, `--env-file`), in ascending priority.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow, bail};
use fetchtube::{
    api::{AppState, router},
    config::{RuntimeOverrides, resolve_runtime_config},
    logging::init_tracing,
    preflight::{ensure_not_root, ensure_program_available},
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq)]
struct BackendArgs {
    host: Option<IpAddr>,
    port: Option<u16>,
    temp_dir: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = BackendArgs::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--port=") {
                parsed.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                parsed.host = Some(parse_host_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--temp-dir=") {
                parsed.temp_dir = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_file = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    parsed.port = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    parsed.host = Some(parse_host_arg(&value)?);
                }
                "--temp-dir" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--temp-dir requires a value"))?;
                    parsed.temp_dir = Some(PathBuf::from(value));
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_file = Some(PathBuf::from(value));
                }
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(parsed)
    }

    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host.map(|host| host.to_string()),
            port: self.port,
            temp_root: self.temp_dir,
            env_path: self.env_file,
            ..RuntimeOverrides::default()
        }
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/FETCHTUBE_HOST")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse()?;
    init_tracing();
    ensure_not_root("backend")?;

    let runtime = resolve_runtime_config(args.into_overrides())?;
    let host = runtime.listen_host()?;
    let pipeline = runtime.pipeline.clone();

    ensure_program_available("yt-dlp", &pipeline.ytdlp_bin, "--version").await?;
    if let Err(err) = ensure_program_available("ffmpeg", &pipeline.ffmpeg_bin, "-version").await {
        warn!(error = %err, "ffmpeg unavailable, compressed downloads will fail");
    }
    tokio::fs::create_dir_all(&pipeline.temp_root)
        .await
        .with_context(|| format!("creating temp root {}", pipeline.temp_root.display()))?;

    let app = router(AppState::new(pipeline.clone()), &runtime.cors_origins);

    let addr = SocketAddr::from((host, runtime.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        temp_root = %pipeline.temp_root.display(),
        "fetchtube backend listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("fetchtube backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
