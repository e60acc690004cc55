use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use warelay_core::{Error, Result};

/// Writes fetched media bytes under the media directory and hands back the
/// stored filename, which the gateway serves at `/media/<filename>`.
#[derive(Clone)]
pub struct MediaStore {
    media_dir: PathBuf,
}

impl MediaStore {
    pub fn new(media_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(media_dir)
            .map_err(|e| Error::Storage(format!("Failed to create media directory: {}", e)))?;
        Ok(Self {
            media_dir: media_dir.to_path_buf(),
        })
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Save media bytes. The filename is derived from the source url's last
    /// path segment plus a millisecond timestamp so repeated fetches never
    /// collide, with the provider-reported subtype as extension.
    pub async fn save(&self, bytes: &[u8], subtype: &str, source_url: &str) -> Result<String> {
        let stem = source_url
            .rsplit('/')
            .next()
            .map(|s| s.split('?').next().unwrap_or(s))
            .filter(|s| !s.is_empty())
            .unwrap_or("media");
        let stem = sanitize(stem);

        let filename = format!("{}_{}.{}", stem, Utc::now().timestamp_millis(), subtype);
        let local_path = self.media_dir.join(&filename);

        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create media file: {}", e)))?;
        file.write_all(bytes)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write media file: {}", e)))?;

        debug!(filename = %filename, size = bytes.len(), "Saved media file");
        Ok(filename)
    }
}

/// Keep only filesystem-safe characters; media names come from remote urls.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Drop any extension the url carried, the stored one wins
    match cleaned.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => cleaned,
    }
}
