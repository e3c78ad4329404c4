use std::error::Error;
use std::fs;
use std::path::Path;
use tracing::info;

/// Public archive hosting per-dataset instrument CSVs and stock lists.
const ARCHIVE_BASE_URL: &str =
    "https://raw.githubusercontent.com/Auquan/auquan-historical-data/master/qq2Data";

/// HTTP client for the historical data archive.
///
/// One URL template per resource kind: `<base>/<dataset>/<instrument>.csv`
/// for instrument data and `<base>/<dataset>/stock_list.txt` for the
/// dataset's instrument universe.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFetcher {
    pub fn new() -> Self {
        Self::with_base_url(ARCHIVE_BASE_URL)
    }

    /// Point the fetcher at a mirror (or, in tests, at nothing routable).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn instrument_url(&self, dataset_id: &str, instrument_id: &str) -> String {
        format!("{}/{}/{}.csv", self.base_url, dataset_id, instrument_id)
    }

    pub fn instrument_list_url(&self, dataset_id: &str) -> String {
        format!("{}/{}/stock_list.txt", self.base_url, dataset_id)
    }

    /// Download one instrument's CSV into `dest`.
    pub async fn download_instrument(
        &self,
        dataset_id: &str,
        instrument_id: &str,
        dest: &Path,
    ) -> Result<(), Box<dyn Error>> {
        let url = self.instrument_url(dataset_id, instrument_id);
        info!(instrument = instrument_id, url = %url, "downloading instrument data");
        self.download(&url, dest).await
    }

    /// Download the dataset's instrument universe list into `dest`.
    pub async fn download_instrument_list(
        &self,
        dataset_id: &str,
        dest: &Path,
    ) -> Result<(), Box<dyn Error>> {
        let url = self.instrument_list_url(dataset_id);
        info!(dataset = dataset_id, url = %url, "downloading instrument list");
        self.download(&url, dest).await
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), Box<dyn Error>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(format!("archive returned {} for {}", resp.status(), url).into());
        }
        let body = resp.text().await?;

        // Full body is in hand before anything touches disk; stage through a
        // sibling path so the real name only ever holds a complete file.
        let staging = dest.with_extension("part");
        fs::write(&staging, body)?;
        fs::rename(&staging, dest)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_url_template() {
        let fetcher = ArchiveFetcher::with_base_url("http://archive.test/qq2Data");
        assert_eq!(
            fetcher.instrument_url("trainingData1", "IBM"),
            "http://archive.test/qq2Data/trainingData1/IBM.csv"
        );
    }

    #[test]
    fn test_instrument_list_url_template() {
        let fetcher = ArchiveFetcher::with_base_url("http://archive.test/qq2Data");
        assert_eq!(
            fetcher.instrument_list_url("trainingData1"),
            "http://archive.test/qq2Data/trainingData1/stock_list.txt"
        );
    }

    #[test]
    fn test_default_points_at_public_archive() {
        let fetcher = ArchiveFetcher::new();
        assert!(fetcher.instrument_url("ds", "IBM").starts_with("https://"));
    }

    #[tokio::test]
    async fn test_unreachable_archive_leaves_no_file() {
        let fetcher = ArchiveFetcher::with_base_url("http://127.0.0.1:1");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("IBM.csv");
        let result = fetcher.download_instrument("ds", "IBM", &dest).await;
        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
