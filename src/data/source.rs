use crate::data::fetcher::ArchiveFetcher;
use crate::data::grouping::group_and_sort_by_time;
use crate::data::parser::parse_row;
use crate::domain::{GroupedUpdates, UpdateRecord};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing::{error, warn};

/// Per-dataset file enumerating the discoverable instrument universe.
const INSTRUMENT_LIST_FILE: &str = "stock_list.txt";

/// Contract a historical data source presents to the backtesting engine:
/// a chronologically grouped stream of update records plus the universe and
/// the field schema the records were built from.
pub trait DataSource {
    /// All update records, partitioned by exact timestamp, ascending.
    fn grouped_updates(&self) -> &GroupedUpdates;

    /// The resolved instrument universe for this run.
    fn instrument_ids(&self) -> &[String];

    /// Field names observed in the first parsed record; `None` until a
    /// record has been parsed.
    fn feature_keys(&self) -> Option<&[String]>;
}

/// Outcome of loading one instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentLoad {
    Loaded { records: usize },
    Skipped { reason: String },
}

/// Aggregated outcome of a [`ArchiveDataSource::load`] run.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Per-instrument outcome, in processing order.
    pub instruments: Vec<(String, InstrumentLoad)>,
    /// Records accumulated across all instruments.
    pub records: usize,
    /// Distinct timestamps after grouping.
    pub batches: usize,
    /// Rows dropped for a missing or unparseable timestamp.
    pub malformed_rows: usize,
    /// Instruments whose rows diverged from the first observed field set.
    pub schema_drift: Vec<String>,
}

impl LoadReport {
    pub fn loaded_count(&self) -> usize {
        self.instruments
            .iter()
            .filter(|(_, outcome)| matches!(outcome, InstrumentLoad::Loaded { .. }))
            .count()
    }

    /// Instruments that were skipped, with reasons.
    pub fn skipped(&self) -> Vec<(&str, &str)> {
        self.instruments
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                InstrumentLoad::Skipped { reason } => Some((id.as_str(), reason.as_str())),
                InstrumentLoad::Loaded { .. } => None,
            })
            .collect()
    }
}

/// Historical data source backed by a remote CSV archive and a local
/// write-once cache.
///
/// Construction is configuration only; all I/O happens in
/// [`load`](ArchiveDataSource::load). The cache layout is
/// `<cache_root>/<dataset_id>/<instrument_id>.csv` next to a
/// `stock_list.txt` naming the discoverable universe. A file already in the
/// cache is never re-fetched.
#[derive(Debug)]
pub struct ArchiveDataSource {
    cache_root: PathBuf,
    dataset_id: String,
    requested: Vec<String>,
    instrument_ids: Vec<String>,
    feature_keys: Option<Vec<String>>,
    grouped: GroupedUpdates,
}

impl ArchiveDataSource {
    /// Configure a source. An empty `instrument_ids` means "use the
    /// dataset's full discoverable universe".
    pub fn new(
        cache_root: impl Into<PathBuf>,
        dataset_id: impl Into<String>,
        instrument_ids: Vec<String>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            dataset_id: dataset_id.into(),
            requested: instrument_ids,
            instrument_ids: Vec::new(),
            feature_keys: None,
            grouped: Vec::new(),
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.cache_root.join(&self.dataset_id)
    }

    pub fn instrument_file(&self, instrument_id: &str) -> PathBuf {
        self.dataset_dir().join(format!("{}.csv", instrument_id))
    }

    pub fn instrument_list_file(&self) -> PathBuf {
        self.dataset_dir().join(INSTRUMENT_LIST_FILE)
    }

    /// Fetch whatever the cache is missing, parse every cached instrument,
    /// and materialize the grouped result.
    ///
    /// Per-instrument failures (unreachable archive, file absent after the
    /// fetch attempt) skip that instrument and show up in the report; the
    /// run continues with the rest of the universe. The only fatal error is
    /// failing to create the cache directory itself.
    pub async fn load(&mut self, archive: &ArchiveFetcher) -> Result<LoadReport, Box<dyn Error>> {
        fs::create_dir_all(self.dataset_dir())?;

        let list_file = self.instrument_list_file();
        if !list_file.exists() {
            if let Err(e) = archive
                .download_instrument_list(&self.dataset_id, &list_file)
                .await
            {
                error!(dataset = %self.dataset_id, "instrument list fetch failed: {}", e);
            }
        }

        self.instrument_ids = if !self.requested.is_empty() {
            self.requested.clone()
        } else {
            self.read_instrument_list()
        };

        let mut report = LoadReport::default();
        let mut all_records: Vec<UpdateRecord> = Vec::new();

        for instrument_id in self.instrument_ids.clone() {
            match self
                .load_instrument(&instrument_id, archive, &mut report)
                .await
            {
                Ok(mut records) => {
                    let count = records.len();
                    all_records.append(&mut records);
                    report
                        .instruments
                        .push((instrument_id, InstrumentLoad::Loaded { records: count }));
                }
                Err(reason) => {
                    warn!(instrument = %instrument_id, "skipping: {}", reason);
                    report
                        .instruments
                        .push((instrument_id, InstrumentLoad::Skipped { reason }));
                }
            }
        }

        report.records = all_records.len();
        self.grouped = group_and_sort_by_time(all_records);
        report.batches = self.grouped.len();
        Ok(report)
    }

    async fn load_instrument(
        &mut self,
        instrument_id: &str,
        archive: &ArchiveFetcher,
        report: &mut LoadReport,
    ) -> Result<Vec<UpdateRecord>, String> {
        let path = self.instrument_file(instrument_id);
        if !path.exists() {
            archive
                .download_instrument(&self.dataset_id, instrument_id, &path)
                .await
                .map_err(|e| format!("fetch failed: {}", e))?;
        }
        if !path.exists() {
            return Err("data file absent after fetch".to_string());
        }

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

        let mut records = Vec::new();
        let mut drifted = false;
        for row in reader.deserialize::<HashMap<String, String>>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(instrument = instrument_id, "dropping undecodable row: {}", e);
                    report.malformed_rows += 1;
                    continue;
                }
            };
            match parse_row(instrument_id, &row) {
                Ok(record) => {
                    drifted |= self.observe_feature_keys(&record);
                    records.push(record);
                }
                Err(e) => {
                    warn!(instrument = instrument_id, "dropping malformed row: {}", e);
                    report.malformed_rows += 1;
                }
            }
        }
        if drifted {
            warn!(
                instrument = instrument_id,
                "field names diverge from the first observed schema"
            );
            report.schema_drift.push(instrument_id.to_string());
        }
        Ok(records)
    }

    /// First parsed record wins: its field names become the representative
    /// schema, set exactly once. Returns whether `record` diverges from the
    /// cached set.
    fn observe_feature_keys(&mut self, record: &UpdateRecord) -> bool {
        let mut keys: Vec<String> = record.fields.keys().cloned().collect();
        keys.sort();
        match &self.feature_keys {
            None => {
                self.feature_keys = Some(keys);
                false
            }
            Some(cached) => keys != *cached,
        }
    }

    fn read_instrument_list(&self) -> Vec<String> {
        let path = self.instrument_list_file();
        match fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                error!(
                    "instrument list {} unreadable, using empty universe: {}",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Grouped batches in ascending time order.
    ///
    /// The result is materialized at load time, so the iterator can be taken
    /// any number of times without touching disk or network again.
    pub fn emit_instrument_updates(
        &self,
    ) -> impl Iterator<Item = &(NaiveDateTime, Vec<UpdateRecord>)> {
        self.grouped.iter()
    }
}

impl DataSource for ArchiveDataSource {
    fn grouped_updates(&self) -> &GroupedUpdates {
        &self.grouped
    }

    fn instrument_ids(&self) -> &[String] {
        &self.instrument_ids
    }

    fn feature_keys(&self) -> Option<&[String]> {
        self.feature_keys.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const IBM_CSV: &str = "\
,open,close,exchange
2017-05-10 09:30:00,151.0,150.0,NYSE
2017-05-10 09:31:00,150.5,150.2,NYSE
";

    const AAPL_CSV: &str = "\
,open,close,exchange
2017-05-10 09:30:00,153.6,153.9,NASDAQ
2017-05-10 09:32:00,154.0,154.1,NASDAQ
";

    /// A fetcher any call to which fails fast; used to prove that warm-cache
    /// loads perform no network calls.
    fn unroutable() -> ArchiveFetcher {
        ArchiveFetcher::with_base_url("http://127.0.0.1:1")
    }

    fn seed_dataset(root: &Path, dataset: &str, files: &[(&str, &str)], list: &[&str]) {
        let dir = root.join(dataset);
        fs::create_dir_all(&dir).unwrap();
        for (instrument, csv) in files {
            fs::write(dir.join(format!("{}.csv", instrument)), csv).unwrap();
        }
        fs::write(dir.join(INSTRUMENT_LIST_FILE), list.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_warm_cache_load_with_explicit_universe() {
        let tmp = tempfile::tempdir().unwrap();
        seed_dataset(
            tmp.path(),
            "ds",
            &[("IBM", IBM_CSV), ("AAPL", AAPL_CSV)],
            &["IBM", "AAPL"],
        );

        let mut source = ArchiveDataSource::new(
            tmp.path(),
            "ds",
            vec!["IBM".to_string(), "AAPL".to_string()],
        );
        let report = source.load(&unroutable()).await.unwrap();

        assert_eq!(report.loaded_count(), 2);
        assert_eq!(report.records, 4);
        assert_eq!(report.malformed_rows, 0);
        assert_eq!(source.instrument_ids(), ["IBM", "AAPL"]);

        // Three distinct timestamps; the shared one holds both instruments
        // in processing order.
        let grouped = source.grouped_updates();
        assert_eq!(grouped.len(), 3);
        for window in grouped.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[0].1[0].instrument_id, "IBM");
        assert_eq!(grouped[0].1[1].instrument_id, "AAPL");
        assert_eq!(grouped[1].1.len(), 1);
        assert_eq!(grouped[2].1.len(), 1);

        // Every record in a group shares the group's timestamp.
        for (time, group) in grouped {
            for record in group {
                assert_eq!(record.time_of_update, *time);
            }
        }
    }

    #[tokio::test]
    async fn test_universe_discovered_from_list_file() {
        let tmp = tempfile::tempdir().unwrap();
        seed_dataset(
            tmp.path(),
            "ds",
            &[("IBM", IBM_CSV), ("AAPL", AAPL_CSV)],
            &["IBM", " AAPL ", ""],
        );

        let mut source = ArchiveDataSource::new(tmp.path(), "ds", Vec::new());
        let report = source.load(&unroutable()).await.unwrap();

        // Lines trimmed, blanks dropped
        assert_eq!(source.instrument_ids(), ["IBM", "AAPL"]);
        assert_eq!(report.loaded_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_list_file_yields_empty_universe() {
        let tmp = tempfile::tempdir().unwrap();

        let mut source = ArchiveDataSource::new(tmp.path(), "ds", Vec::new());
        let report = source.load(&unroutable()).await.unwrap();

        assert!(source.instrument_ids().is_empty());
        assert_eq!(report.records, 0);
        assert_eq!(report.batches, 0);
        assert!(source.feature_keys().is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_skips_instrument_and_keeps_rest() {
        let tmp = tempfile::tempdir().unwrap();
        seed_dataset(
            tmp.path(),
            "ds",
            &[("IBM", IBM_CSV), ("AAPL", AAPL_CSV)],
            &["IBM", "GOOG", "AAPL"],
        );

        let requested = vec!["IBM".to_string(), "GOOG".to_string(), "AAPL".to_string()];
        let mut source = ArchiveDataSource::new(tmp.path(), "ds", requested.clone());
        let report = source.load(&unroutable()).await.unwrap();

        // The requested universe is reported in full; the skip is visible in
        // the report, not by shrinking the id list.
        assert_eq!(source.instrument_ids(), requested.as_slice());
        assert_eq!(report.loaded_count(), 2);
        let skipped = report.skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, "GOOG");

        // Only IBM and AAPL records made it into the groups.
        for (_, group) in source.grouped_updates() {
            for record in group {
                assert_ne!(record.instrument_id, "GOOG");
            }
        }
        assert_eq!(report.records, 4);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped_and_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let bad_csv = "\
,close
not-a-timestamp,150.0
2017-05-10 09:30:00,150.5
";
        seed_dataset(tmp.path(), "ds", &[("IBM", bad_csv)], &["IBM"]);

        let mut source = ArchiveDataSource::new(tmp.path(), "ds", vec!["IBM".to_string()]);
        let report = source.load(&unroutable()).await.unwrap();

        assert_eq!(report.malformed_rows, 1);
        assert_eq!(report.records, 1);
        assert_eq!(report.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_feature_keys_first_record_wins_and_drift_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let aapl_other_schema = "\
,close,volume
2017-05-10 09:30:00,153.9,1200
";
        seed_dataset(
            tmp.path(),
            "ds",
            &[("IBM", IBM_CSV), ("AAPL", aapl_other_schema)],
            &["IBM", "AAPL"],
        );

        let mut source = ArchiveDataSource::new(
            tmp.path(),
            "ds",
            vec!["IBM".to_string(), "AAPL".to_string()],
        );
        let report = source.load(&unroutable()).await.unwrap();

        // Schema comes from IBM's first record, not AAPL's later one.
        assert_eq!(
            source.feature_keys().unwrap(),
            ["close", "exchange", "open"]
        );
        assert_eq!(report.schema_drift, ["AAPL"]);
    }

    #[tokio::test]
    async fn test_warm_cache_reload_is_identical() {
        let tmp = tempfile::tempdir().unwrap();
        seed_dataset(
            tmp.path(),
            "ds",
            &[("IBM", IBM_CSV), ("AAPL", AAPL_CSV)],
            &["IBM", "AAPL"],
        );
        let requested = vec!["IBM".to_string(), "AAPL".to_string()];

        let mut first = ArchiveDataSource::new(tmp.path(), "ds", requested.clone());
        first.load(&unroutable()).await.unwrap();
        let mut second = ArchiveDataSource::new(tmp.path(), "ds", requested);
        second.load(&unroutable()).await.unwrap();

        // The unroutable fetcher would have failed any network call, so the
        // second run was served entirely from cache and matches the first.
        assert_eq!(first.grouped_updates(), second.grouped_updates());
        assert_eq!(first.feature_keys(), second.feature_keys());
    }

    #[tokio::test]
    async fn test_emit_is_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        seed_dataset(tmp.path(), "ds", &[("IBM", IBM_CSV)], &["IBM"]);

        let mut source = ArchiveDataSource::new(tmp.path(), "ds", vec!["IBM".to_string()]);
        source.load(&unroutable()).await.unwrap();

        let first_pass: Vec<_> = source.emit_instrument_updates().collect();
        let second_pass: Vec<_> = source.emit_instrument_updates().collect();
        assert_eq!(first_pass.len(), 2);
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_path_helpers() {
        let source = ArchiveDataSource::new("cache", "ds", Vec::new());
        assert_eq!(source.dataset_dir(), PathBuf::from("cache/ds"));
        assert_eq!(
            source.instrument_file("IBM"),
            PathBuf::from("cache/ds/IBM.csv")
        );
        assert_eq!(
            source.instrument_list_file(),
            PathBuf::from("cache/ds/stock_list.txt")
        );
    }
}
