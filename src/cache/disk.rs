use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hex encoding keeps any key filesystem-safe and reversible.
pub(crate) fn file_name_for(key: &str) -> String {
    hex::encode(key.as_bytes())
}

pub(crate) fn key_from_file_name(name: &str) -> Option<String> {
    let raw = hex::decode(name).ok()?;
    String::from_utf8(raw).ok()
}

pub(crate) fn path_for(directory: &Path, key: &str) -> PathBuf {
    directory.join(file_name_for(key))
}

pub(crate) fn ensure_directory(directory: &Path) {
    if let Err(e) = std::fs::create_dir_all(directory) {
        debug!("Unable to create disk cache directory {:?}: {}", directory, e);
    }
}

pub(crate) async fn read(directory: &Path, key: &str) -> Option<Bytes> {
    tokio::fs::read(path_for(directory, key))
        .await
        .ok()
        .map(Bytes::from)
}

/// 写入失败只记录日志, 磁盘只是溢出层
pub(crate) async fn write(directory: &Path, key: &str, data: &[u8]) {
    let path = path_for(directory, key);
    let tmp = path.with_extension("tmp");
    let result = async {
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await
    }
    .await;

    if let Err(e) = result {
        debug!("Disk cache write failed for {}: {}", key, e);
        let _ = tokio::fs::remove_file(&tmp).await;
    }
}

pub(crate) async fn directory_size(directory: &Path) -> u64 {
    let mut total = 0;
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(metadata) = entry.metadata().await {
            if metadata.is_file() {
                total += metadata.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let key = "audio-main-part-12-3";
        let name = file_name_for(key);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key_from_file_name(&name).as_deref(), Some(key));
        assert_eq!(key_from_file_name("zz"), None);
    }
}
