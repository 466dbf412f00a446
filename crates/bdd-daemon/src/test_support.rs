//! Fixtures shared by the unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// File next to the fake borg binary that records every `init` call.
pub const FAKE_BORG_INIT_LOG: &str = "borg-init.log";

/// Stand-in for borg: `init` creates the repository config, `create` writes
/// stdin to `{repo}/{archive}` and the stdin name next to it. Archives whose
/// name contains "fail" exit with status 3 after consuming stdin.
const FAKE_BORG: &str = r#"set -e
case "$1" in
  init)
    repo="$3"
    echo "$repo" >> "$(dirname "$0")/borg-init.log"
    mkdir -p "$repo"
    touch "$repo/config"
    ;;
  create)
    stdin_name="$5"
    location="$6"
    repo="${location%%::*}"
    archive="${location#*::}"
    cat > "$repo/$archive"
    printf '%s' "$stdin_name" > "$repo/$archive.stdin-name"
    case "$archive" in
      *fail*) exit 3 ;;
    esac
    ;;
  *)
    exit 64
    ;;
esac
"#;

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn fake_borg(dir: &Path) -> PathBuf {
    write_script(dir, "borg", FAKE_BORG)
}

pub fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8 ^ (i >> 12) as u8).collect()
}

pub fn compress(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).unwrap()
}

pub async fn send_chunk<W>(writer: &mut W, chunk: &[u8])
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(chunk.len() as u32).await.unwrap();
    writer.write_all(chunk).await.unwrap();
}

pub async fn send_terminator<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(0).await.unwrap();
    writer.flush().await.unwrap();
}
