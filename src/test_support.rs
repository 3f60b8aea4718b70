//! Shell-script stand-ins for yt-dlp and ffmpeg used by the unit tests.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use nix::{sys::signal::kill, unistd::Pid};

pub const YOUTUBE_INFO: &str = r#"{"title":"Demo Clip","duration":42,"thumbnail":"https://i.ytimg.com/vi/abc123/hq.jpg","formats":[{"format_id":"18","height":360,"ext":"mp4","vcodec":"avc1","acodec":"mp4a"},{"format_id":"22","height":720,"ext":"mp4","vcodec":"avc1","acodec":"mp4a"},{"format_id":"137","height":1080,"ext":"mp4","vcodec":"avc1","acodec":"none"}]}"#;

/// Writes an executable `/bin/sh` script named `name` into `dir`.
pub fn install_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let script = dir.join(name);
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// A yt-dlp that answers `--dump-single-json` with `info_json` and otherwise
/// writes a small file at the `--output` template (with `ext` substituted)
/// and prints the after-move JSON. Every invocation appends its arguments to
/// `calls.log` next to the script.
pub fn fake_ytdlp(dir: &Path, info_json: &str, ext: &str) -> PathBuf {
    let body = format!(
        r#"log="$(dirname "$0")/calls.log"
echo "$*" >> "$log"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift ;;
  esac
  shift
done
if [ -z "$out" ]; then
  cat <<'JSON'
{info_json}
JSON
  exit 0
fi
file=$(printf '%s' "$out" | sed 's/%(ext)s/{ext}/')
printf 'video-bytes' > "$file"
printf '{{"filepath":"%s","filesize":11,"ext":"{ext}"}}\n' "$file""#
    );
    install_stub(dir, "yt-dlp", &body)
}

/// Shell fragment that starts a long-lived helper in the background, records
/// its pid in [`helper_pidfile`] and waits on it, the way yt-dlp waits on its
/// ffmpeg merger.
const STALL: &str = r#"sleep 30 &
echo $! > "$(dirname "$0")/helper.pid"
wait"#;

pub fn helper_pidfile(dir: &Path) -> PathBuf {
    dir.join("helper.pid")
}

/// A yt-dlp that answers `--dump-single-json` with `info_json` but stalls
/// on the actual download after writing a partial file.
pub fn stalling_ytdlp(dir: &Path, info_json: &str) -> PathBuf {
    let body = format!(
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift ;;
  esac
  shift
done
if [ -z "$out" ]; then
  cat <<'JSON'
{info_json}
JSON
  exit 0
fi
printf 'partial' > "$(printf '%s' "$out" | sed 's/%(ext)s/part/')"
{STALL}"#
    );
    install_stub(dir, "yt-dlp", &body)
}

/// An ffmpeg that writes a partial output file and never finishes.
pub fn stalling_ffmpeg(dir: &Path) -> PathBuf {
    install_stub(
        dir,
        "ffmpeg",
        &format!("for arg; do out=\"$arg\"; done\nprintf 'partial' > \"$out\"\n{STALL}"),
    )
}

/// Polls `pidfile` until a stub has written a pid into it.
pub async fn wait_for_pid(pidfile: &Path) -> i32 {
    for _ in 0..200 {
        let pid = fs::read_to_string(pidfile)
            .ok()
            .and_then(|text| text.trim().parse().ok());
        if let Some(pid) = pid {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("no pid written to {}", pidfile.display());
}

/// Zombies count as gone; nobody may have reaped them yet.
pub fn process_alive(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next());
            !matches!(state, Some('Z' | 'X'))
        }
        Err(_) if Path::new("/proc/self/stat").exists() => false,
        Err(_) => kill(Pid::from_raw(pid), None).is_ok(),
    }
}

/// `true` once `pid` has exited, `false` if it is still running after 5s.
pub async fn wait_until_gone(pid: i32) -> bool {
    for _ in 0..200 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// An ffmpeg that copies its `-i` input to the last argument.
pub fn copying_ffmpeg(dir: &Path) -> PathBuf {
    install_stub(
        dir,
        "ffmpeg",
        r#"input=""
prev=""
for arg; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
cp "$input" "$prev""#,
    )
}

/// An ffmpeg that writes a partial output file and exits 1.
pub fn failing_ffmpeg(dir: &Path) -> PathBuf {
    install_stub(
        dir,
        "ffmpeg",
        r#"for arg; do out="$arg"; done
printf 'partial' > "$out"
echo 'Conversion failed!' >&2
exit 1"#,
    )
}

/// Number of yt-dlp invocations recorded by [`fake_ytdlp`].
pub fn ytdlp_calls(dir: &Path) -> usize {
    fs::read_to_string(dir.join("calls.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

pub fn count_entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|iter| iter.count()).unwrap_or(0)
}
