//! Fetching of precomputed evaluation weights.

use std::path::PathBuf;

use kibitz_types::{KibitzError, Result};
use tracing::{debug, info};

/// Where weight files are read from.
#[derive(Debug, Clone)]
pub enum WeightStore {
    Directory(PathBuf),
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    /// No location configured; every fetch fails.
    Missing,
}

impl WeightStore {
    /// `http://` and `https://` locations are fetched over the network,
    /// anything else is treated as a directory.
    pub fn from_location(location: Option<&str>) -> Self {
        match location {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                WeightStore::Http {
                    client: reqwest::Client::new(),
                    base_url: url.trim_end_matches('/').to_string(),
                }
            }
            Some(dir) => WeightStore::Directory(PathBuf::from(dir)),
            None => WeightStore::Missing,
        }
    }

    /// Reads `relative` (e.g. `nnue/atomic-2cf13ff256cc.nnue`). Any failure
    /// means the backend cannot start.
    pub async fn fetch(&self, relative: &str) -> Result<Vec<u8>> {
        let bytes = match self {
            WeightStore::Directory(root) => {
                let path = root.join(relative);
                debug!(path = %path.display(), "reading weights");
                tokio::fs::read(&path).await.map_err(|err| {
                    unavailable(format!("failed to read weights {}: {err}", path.display()))
                })?
            }
            WeightStore::Http { client, base_url } => {
                let url = format!("{base_url}/{relative}");
                debug!(%url, "downloading weights");
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|res| res.error_for_status())
                    .map_err(|err| unavailable(format!("failed to fetch weights {url}: {err}")))?;
                response
                    .bytes()
                    .await
                    .map_err(|err| unavailable(format!("failed to read weights {url}: {err}")))?
                    .to_vec()
            }
            WeightStore::Missing => {
                return Err(unavailable(format!(
                    "no weights location configured for '{relative}'"
                )))
            }
        };
        info!(file = relative, bytes = bytes.len(), "weights loaded");
        Ok(bytes)
    }
}

fn unavailable(message: String) -> KibitzError {
    KibitzError::BackendUnavailable(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_store_reads_relative_paths() {
        let root = std::env::temp_dir().join("kibitz-weights-test");
        std::fs::create_dir_all(root.join("nnue")).expect("create weights dir");
        std::fs::write(root.join("nnue/test.nnue"), b"weights").expect("write weights");

        let store = WeightStore::from_location(root.to_str());
        let bytes = store.fetch("nnue/test.nnue").await.expect("fetch weights");
        assert_eq!(bytes, b"weights");

        std::fs::remove_dir_all(&root).expect("cleanup weights dir");
    }

    #[tokio::test]
    async fn missing_files_make_backend_unavailable() {
        let store = WeightStore::from_location(Some("/nonexistent/kibitz"));
        let err = store.fetch("nnue/none.nnue").await.unwrap_err();
        assert!(err.is_backend_unavailable());

        let err = WeightStore::Missing.fetch("x").await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn http_locations_are_detected() {
        assert!(matches!(
            WeightStore::from_location(Some("https://cdn.example/engines/")),
            WeightStore::Http { ref base_url, .. } if base_url == "https://cdn.example/engines"
        ));
    }
}
