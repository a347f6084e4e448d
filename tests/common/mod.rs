//! Shell stand-ins for ffprobe, ffmpeg and the interpolation binary.
//!
//! Frame counts come from the input file name: `clip_100.mp4` has 100 frames.
//! Names containing `silent` have no audio stream, names containing
//! `nostream` have no video stream, and names containing `noisy` print a
//! diagnostic on stderr in the middle of the JSON document. Concatenating
//! into an output named `*badconcat*` fails.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use auto_rife::job::VideoJob;
use once_cell::sync::Lazy;
use tempfile::TempDir;

const FFPROBE: &str = r#"#!/bin/sh
input=""
select=""
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift ;;
    -select_streams) select="$2"; shift ;;
  esac
  shift
done
name=$(basename "$input")
if [ "$select" = "a" ]; then
  case "$name" in
    *silent*) echo '{"streams": []}' ;;
    *) echo '{"streams": [{"index": 1, "codec_type": "audio"}]}' ;;
  esac
  exit 0
fi
case "$name" in
  *nostream*) echo '{"streams": []}'; exit 0 ;;
esac
frames=$(printf '%s' "$name" | sed -n 's/.*_\([0-9][0-9]*\)\.mp4$/\1/p')
case "$name" in
  *noisy*)
    printf '{\n    "streams": [\n        {\n'
    echo '[mov,mp4 @ 0x5581] stream 0, timescale not set' >&2
    sleep 0.1
    printf '            "nb_frames": "%s",\n            "r_frame_rate": "30/1"\n        }\n    ]\n}\n' "$frames"
    exit 0
    ;;
esac
printf '{"streams": [{"index": 0, "codec_type": "video", "nb_frames": "%s", "r_frame_rate": "30/1"}]}\n' "$frames"
"#;

const FFMPEG: &str = r#"#!/bin/sh
inputs=""
filter=""
for arg; do out="$arg"; done
while [ $# -gt 0 ]; do
  case "$1" in
    -i) inputs="$inputs
$2"; shift ;;
    -vf) filter="$2"; shift ;;
  esac
  shift
done
first=$(printf '%s\n' "$inputs" | sed -n 2p)
second=$(printf '%s\n' "$inputs" | sed -n 3p)
case "$out" in
  *.png)
    range=$(printf '%s' "$filter" | sed -n 's/.*between(n\\,\([0-9]*\)\\,\([0-9]*\)).*/\1 \2/p')
    set -- $range
    dir=$(dirname "$out")
    n=$(($2 - $1 + 1))
    i=1
    while [ $i -le $n ]; do
      : > "$dir/$(printf '%08d' $i).png"
      printf 'frame=%5d fps=0.0 q=-0.0 size=N/A\r' $i >&2
      i=$((i + 1))
    done
    echo >&2
    ;;
  *.ts)
    frames=$(ls "$(dirname "$first")" | wc -l | tr -d ' ')
    printf 'frame=%5d fps=60 q=-1.0 Lsize=N/A\n' "$frames" >&2
    printf '%s' "$frames" > "$out"
    ;;
  *.m4a)
    : > "$out"
    ;;
  *badconcat*)
    echo "$first: Invalid data found when processing input" >&2
    exit 1
    ;;
  *)
    sed -n "s/^file '\(.*\)'$/\1/p" "$first" | while IFS= read -r segment; do
      printf '%s %s\n' "$(basename "$segment")" "$(cat "$segment")"
    done > "$out"
    if [ -n "$second" ]; then
      echo "audio $(basename "$second")" >> "$out"
    fi
    echo "frame=1 fps=0.0" >&2
    ;;
esac
"#;

const RIFE: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -n) n="$2"; shift ;;
  esac
  shift
done
mkdir -p "$out"
i=1
while [ $i -le $n ]; do
  : > "$out/$(printf '%08d' $i).png"
  i=$((i + 1))
done
"#;

const RIFE_SHORT: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -n) n="$2"; shift ;;
  esac
  shift
done
mkdir -p "$out"
i=2
while [ $i -le $n ]; do
  : > "$out/$(printf '%08d' $i).png"
  i=$((i + 1))
done
"#;

const RIFE_FAIL: &str = "#!/bin/sh\necho 'vkCreateInstance failed -9' >&2\nexit 3\n";

const RIFE_HANG: &str = "#!/bin/sh\nexec sleep 30\n";

/// Directory holding every fake binary, written once per test process.
pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    pub fn ffprobe(&self) -> PathBuf {
        self.dir.path().join("ffprobe")
    }

    pub fn ffmpeg(&self) -> PathBuf {
        self.dir.path().join("ffmpeg")
    }

    pub fn rife(&self) -> PathBuf {
        self.dir.path().join("rife")
    }

    pub fn rife_short(&self) -> PathBuf {
        self.dir.path().join("rife-short")
    }

    pub fn rife_fail(&self) -> PathBuf {
        self.dir.path().join("rife-fail")
    }

    pub fn rife_hang(&self) -> PathBuf {
        self.dir.path().join("rife-hang")
    }
}

pub static TOOLS: Lazy<FakeTools> = Lazy::new(|| {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in [
        ("ffprobe", FFPROBE),
        ("ffmpeg", FFMPEG),
        ("rife", RIFE),
        ("rife-short", RIFE_SHORT),
        ("rife-fail", RIFE_FAIL),
        ("rife-hang", RIFE_HANG),
    ] {
        write_script(&dir.path().join(name), body);
    }
    FakeTools { dir }
});

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// An empty stand-in video; only its name matters to the fake tools.
pub fn touch_video(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, b"").unwrap();
    path
}

/// A job wired to the fake tools, with its output and temp under `root`.
pub fn job(root: &Path, input: &Path, exp: u32, portions: u32) -> VideoJob {
    let mut job = VideoJob::new(input, exp).unwrap();
    job.portion_count = portions;
    job.output_dir = root.join("result");
    job.temp_dir = root.join("temp");
    job.tools.ffmpeg = TOOLS.ffmpeg();
    job.tools.ffprobe = TOOLS.ffprobe();
    job.tools.rife = TOOLS.rife();
    job.poll_interval = Duration::from_millis(10);
    job.tool_timeout = Some(Duration::from_secs(30));
    job
}
