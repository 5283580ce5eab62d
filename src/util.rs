use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Hex SHA-256 of a file's content, read in 8 KiB chunks.
pub async fn file_content_hash(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut out = String::with_capacity(64);
    for b in hasher.finalize() {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

/// `1536` -> `"1.5 KB"`.
pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// `m:ss`, or `"unknown"`.
pub fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => {
            let secs = d.as_secs();
            format!("{}:{:02}", secs / 60, secs % 60)
        }
        None => "unknown".to_string(),
    }
}

/// Guess a media file extension from a URL path, ignoring the query string.
pub fn infer_extension_from_url(url: &str, default: &'static str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    [".mp3", ".wav", ".m4a", ".ogg", ".flac", ".mp4"]
        .into_iter()
        .find(|ext| path.ends_with(ext))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(0), "0.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024u64.pow(4)), "3.0 TB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(None), "unknown");
        assert_eq!(format_duration(Some(Duration::from_secs_f64(75.9))), "1:15");
        assert_eq!(format_duration(Some(Duration::from_secs(299))), "4:59");
    }

    #[test]
    fn extensions() {
        assert_eq!(infer_extension_from_url("https://cdn/x/a.WAV?sig=1.mp4", ".mp3"), ".wav");
        assert_eq!(infer_extension_from_url("https://cdn/x/a", ".mp3"), ".mp3");
        assert_eq!(infer_extension_from_url("https://cdn/v.mp4", ".mp3"), ".mp4");
    }

    #[tokio::test]
    async fn hash_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let ha = file_content_hash(&a).await.unwrap();
        assert_eq!(ha, file_content_hash(&b).await.unwrap());
        assert_eq!(ha.len(), 64);

        std::fs::write(&b, b"other bytes").unwrap();
        assert_ne!(ha, file_content_hash(&b).await.unwrap());
    }
}
