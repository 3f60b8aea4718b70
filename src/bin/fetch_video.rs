#![forbid(unsafe_code)]

//! Command line front end for the fetchtube pipeline.
//!
//! ```text
//! fetch_video [--info] [--height N] [--container C] [--compress]
//!             [--output-dir DIR] [--file-name NAME] <url>
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use fetchtube::{
    config::{RuntimeOverrides, resolve_runtime_config},
    delivery::save_to_dir,
    logging::init_tracing,
    pipeline::{DownloadRequest, HeightValue, fetch_info, prepare_download},
    preflight::{ensure_not_root, ensure_program_available},
};
use tokio::signal;

const USAGE: &str = concat!(
    "usage: fetch_video [--info] [--height N] [--container C] [--compress] ",
    "[--output-dir DIR] [--file-name NAME] <url>"
);

#[derive(Debug, PartialEq)]
struct FetchArgs {
    url: String,
    info_only: bool,
    height: Option<u32>,
    container: Option<String>,
    compress: bool,
    output_dir: PathBuf,
    file_name: Option<String>,
}

impl FetchArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut url: Option<String> = None;
        let mut info_only = false;
        let mut height = None;
        let mut container = None;
        let mut compress = false;
        let mut output_dir = PathBuf::from(".");
        let mut file_name = None;

        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| -> Result<String> {
                match inline.clone() {
                    Some(value) => Ok(value),
                    None => args.next().ok_or_else(|| anyhow!("{name} requires a value")),
                }
            };
            match flag.as_str() {
                "--info" => info_only = true,
                "--compress" => compress = true,
                "--height" => {
                    let raw = value("--height")?;
                    height = Some(
                        raw.trim_end_matches(['p', 'P'])
                            .parse::<u32>()
                            .with_context(|| format!("--height expects a number, got {raw}"))?,
                    );
                }
                "--container" => container = Some(value("--container")?),
                "--output-dir" => output_dir = PathBuf::from(value("--output-dir")?),
                "--file-name" => file_name = Some(value("--file-name")?),
                "-h" | "--help" => bail!("{USAGE}"),
                other if other.starts_with('-') => bail!("unknown argument: {other}\n{USAGE}"),
                _ => {
                    if url.replace(arg).is_some() {
                        bail!("only one URL may be given\n{USAGE}");
                    }
                }
            }
        }

        Ok(Self {
            url: url.ok_or_else(|| anyhow!("missing URL\n{USAGE}"))?,
            info_only,
            height,
            container,
            compress,
            output_dir,
            file_name,
        })
    }

    fn download_request(&self) -> DownloadRequest {
        DownloadRequest {
            url: self.url.clone(),
            quality: self.height.map(|height| HeightValue::Number(f64::from(height))),
            container: self.container.clone(),
            compress: self.compress,
            file_name: self.file_name.clone(),
            ..DownloadRequest::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = FetchArgs::parse()?;
    init_tracing();
    ensure_not_root("fetch_video")?;

    let runtime = resolve_runtime_config(RuntimeOverrides::default())?;
    let config = runtime.pipeline;
    ensure_program_available("yt-dlp", &config.ytdlp_bin, "--version").await?;
    if args.compress && !args.info_only {
        ensure_program_available("ffmpeg", &config.ffmpeg_bin, "-version").await?;
    }

    // Dropping the pipeline future on Ctrl+C kills the tools and releases
    // the request's artifacts.
    let work = async {
        if args.info_only {
            let metadata = fetch_info(&config, &args.url, None).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            return Ok(());
        }
        tokio::fs::create_dir_all(&args.output_dir)
            .await
            .with_context(|| format!("creating {}", args.output_dir.display()))?;
        let prepared = prepare_download(&config, &args.download_request()).await?;
        let saved = save_to_dir(prepared, &args.output_dir).await?;
        println!("{}", saved.display());
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = work => result,
        _ = signal::ctrl_c() => bail!("interrupted"),
    }
}
