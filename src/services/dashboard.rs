//! Per-principal dashboard sessions over shared stores.
//!
//! A session is restored from persisted client state the first time a
//! principal is seen, or after it was evicted from the bounded session cache.
//! Mutations run on a copy of the session, are written back, and only then
//! replace the live session; a failed write leaves the old session in place.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{Dataset, Principal};
use crate::services::chart::ChartOutcome;
use crate::services::dataset_store::{DatasetStore, StoredFileSummary};
use crate::services::excel::{validate_upload, ExcelParser};
use crate::services::history::HistoryEntry;
use crate::services::report::{InsightReport, PageLayout};
use crate::services::selection::SelectionPatch;
use crate::services::state_store::{ClientState, KeyValueStore};
use crate::services::workspace::{Snapshot, Workspace};

/// A file as it arrived from the upload transport.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

pub struct DashboardService {
    kv: Arc<dyn KeyValueStore>,
    datasets: Arc<dyn DatasetStore>,
    sessions: Mutex<LruCache<Principal, Workspace>>,
    upload_gate: tokio::sync::Mutex<()>,
    max_file_size: usize,
    layout: PageLayout,
}

impl DashboardService {
    pub fn new(kv: Arc<dyn KeyValueStore>, datasets: Arc<dyn DatasetStore>, config: &Config) -> Self {
        let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            kv,
            datasets,
            sessions: Mutex::new(LruCache::new(capacity)),
            upload_gate: tokio::sync::Mutex::new(()),
            max_file_size: config.max_file_size,
            layout: PageLayout::from_config(config),
        }
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    fn with_session<R>(
        &self,
        principal: &Principal,
        f: impl FnOnce(&mut Workspace, &ClientState<'_>) -> R,
    ) -> R {
        let state = ClientState::new(self.kv.as_ref(), principal.as_str());
        let mut sessions = self.sessions.lock();
        let workspace = sessions.get_or_insert_mut(principal.clone(), || {
            debug!("Restoring workspace for {}", principal);
            Workspace::restore(&state, self.datasets.as_ref(), principal)
        });
        f(workspace, &state)
    }

    /// Apply `change` to a copy of the session, persist the copy, then swap it in.
    ///
    /// When persisting fails the live session is untouched and its state is
    /// written back over whatever part of the copy made it to the store.
    fn commit<R>(
        &self,
        principal: &Principal,
        change: impl FnOnce(&mut Workspace) -> Result<R, AppError>,
        persist: impl FnOnce(&Workspace, &ClientState<'_>) -> Result<(), AppError>,
    ) -> Result<R, AppError> {
        self.with_session(principal, |ws, state| {
            let mut next = ws.clone();
            let out = change(&mut next)?;

            if let Err(err) = persist(&next, state) {
                warn!("Discarding session change for {}: {}", principal, err);
                if let Err(restore_err) = ws.persist(state) {
                    warn!("Failed to rewrite persisted state for {}: {}", principal, restore_err);
                }
                return Err(err);
            }

            *ws = next;
            Ok(out)
        })
    }

    pub fn snapshot(&self, principal: &Principal) -> Snapshot {
        self.with_session(principal, |ws, _| ws.snapshot())
    }

    pub fn chart(&self, principal: &Principal) -> ChartOutcome {
        self.with_session(principal, |ws, _| ws.chart())
    }

    pub fn set_selection(&self, principal: &Principal, patch: SelectionPatch) -> Result<Snapshot, AppError> {
        self.commit(
            principal,
            |ws| {
                ws.set_selection(patch);
                Ok(ws.snapshot())
            },
            Workspace::persist_selection,
        )
    }

    pub fn set_filter(&self, principal: &Principal, field: &str, value: &str) -> Result<Snapshot, AppError> {
        self.commit(
            principal,
            |ws| {
                ws.set_filter(field, value);
                Ok(ws.snapshot())
            },
            Workspace::persist_selection,
        )
    }

    pub fn filter_values(&self, principal: &Principal, field: &str) -> Vec<String> {
        self.with_session(principal, |ws, _| ws.filter_values(field))
    }

    pub fn reset_to_sample(&self, principal: &Principal) -> Result<Snapshot, AppError> {
        let snapshot = self.commit(
            principal,
            |ws| {
                ws.reset_to_sample();
                Ok(ws.snapshot())
            },
            |_, state| Workspace::clear_persisted(state),
        )?;
        info!("Reset {} to the sample dataset", principal);
        Ok(snapshot)
    }

    /// Validate, parse and store an upload, then make it the active dataset.
    ///
    /// Uploads run one at a time. On any error the current dataset is untouched
    /// and the stored copy of the upload is removed again.
    pub async fn load_dataset(&self, principal: &Principal, upload: Upload) -> Result<Snapshot, AppError> {
        let _gate = self.upload_gate.lock().await;
        let start = Instant::now();
        info!("Processing upload {} ({} bytes) for {}", upload.file_name, upload.data.len(), principal);

        validate_upload(
            &upload.file_name,
            upload.content_type.as_deref(),
            upload.data.len(),
            self.max_file_size,
        )?;

        let data = upload.data.clone();
        let rows = tokio::task::spawn_blocking(move || ExcelParser.parse_bytes(&data))
            .await
            .map_err(|e| AppError::Internal(format!("Parser task failed: {}", e)))??;

        if rows.is_empty() {
            warn!("Upload {} has no data rows", upload.file_name);
            return Err(AppError::ParseError("No rows found in uploaded sheet".to_string()));
        }

        let dataset = Dataset::uploaded(&upload.file_name, rows);
        let id = self.datasets.save(principal, &dataset)?;

        let committed = self.commit(
            principal,
            |ws| {
                ws.accept_upload(dataset);
                Ok(ws.snapshot())
            },
            Workspace::persist,
        );
        let snapshot = match committed {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if let Err(remove_err) = self.datasets.remove(principal, id) {
                    warn!("Failed to remove stored upload #{} for {}: {}", id, principal, remove_err);
                }
                return Err(err);
            }
        };

        info!(
            "Upload {} stored as #{} with {} rows in {:?}",
            upload.file_name,
            id,
            snapshot.dataset.row_count,
            start.elapsed()
        );
        Ok(snapshot)
    }

    pub fn history(&self, principal: &Principal) -> Vec<HistoryEntry> {
        self.with_session(principal, |ws, _| ws.history().entries().to_vec())
    }

    pub fn delete_history_entry(&self, principal: &Principal, index: usize) -> Result<HistoryEntry, AppError> {
        self.commit(
            principal,
            |ws| ws.delete_history_entry(index),
            Workspace::persist_history,
        )
    }

    pub fn report(&self, principal: &Principal) -> InsightReport {
        self.with_session(principal, |ws, _| ws.report())
    }

    pub fn stored_files(&self, principal: &Principal) -> Result<Vec<StoredFileSummary>, AppError> {
        self.datasets.list(principal)
    }

    pub fn stored_file(&self, principal: &Principal, id: i64) -> Result<Dataset, AppError> {
        self.datasets.get(principal, id)
    }

    pub fn latest_stored(&self, principal: &Principal) -> Result<Dataset, AppError> {
        self.datasets.latest(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;
    use crate::services::dataset_store::SqliteDatasetStore;
    use crate::services::excel::parser::EXCEL_CONTENT_TYPES;
    use crate::services::selection::ChartType;
    use crate::services::state_store::MemoryStore;
    use rust_xlsxwriter::Workbook;

    /// Reads like an empty store, refuses every write.
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), AppError> {
            Err(AppError::DatabaseError("disk full".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn service_with(config: &Config) -> (DashboardService, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let datasets = Arc::new(SqliteDatasetStore::open_in_memory().unwrap());
        let service = DashboardService::new(kv.clone(), datasets, config);
        (service, kv)
    }

    fn service() -> (DashboardService, Arc<MemoryStore>) {
        service_with(&Config::default())
    }

    fn workbook(rows: &[(&str, f64)]) -> Bytes {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Month").unwrap();
        sheet.write_string(0, 1, "Revenue").unwrap();
        for (i, (month, revenue)) in rows.iter().enumerate() {
            sheet.write_string(i as u32 + 1, 0, *month).unwrap();
            sheet.write_number(i as u32 + 1, 1, *revenue).unwrap();
        }
        Bytes::from(workbook.save_to_buffer().unwrap())
    }

    fn upload(file_name: &str, data: Bytes) -> Upload {
        Upload {
            file_name: file_name.to_string(),
            content_type: Some(EXCEL_CONTENT_TYPES[0].to_string()),
            data,
        }
    }

    fn history_names(service: &DashboardService, principal: &Principal) -> Vec<String> {
        service
            .history(principal)
            .into_iter()
            .map(|entry| entry.file_name)
            .collect()
    }

    #[tokio::test]
    async fn upload_replaces_dataset_and_records_history() {
        let (service, _) = service();
        let alice = Principal::new("alice");

        let snapshot = service
            .load_dataset(&alice, upload("revenue.xlsx", workbook(&[("Jan", 10.0), ("Feb", 12.5)])))
            .await
            .unwrap();

        assert_eq!(snapshot.dataset.name, "revenue");
        assert_eq!(snapshot.columns, ["Month", "Revenue"]);
        assert_eq!(snapshot.numeric_columns, ["Revenue"]);
        assert_eq!(snapshot.selection.x_field, "Month");
        assert_eq!(service.history(&alice)[0].file_name, "revenue.xlsx");
        assert_eq!(service.stored_files(&alice).unwrap().len(), 1);
        assert_eq!(service.latest_stored(&alice).unwrap().rows[1]["Revenue"], CellValue::Number(12.5));
    }

    #[tokio::test]
    async fn failed_upload_leaves_dataset_untouched() {
        let (service, _) = service();
        let alice = Principal::new("alice");

        let err = service
            .load_dataset(&alice, upload("broken.xlsx", Bytes::from_static(b"nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));

        let mut csv = upload("data.csv", Bytes::from_static(b"a,b"));
        csv.content_type = Some("text/csv".to_string());
        let err = service.load_dataset(&alice, csv).await.unwrap_err();
        assert!(err.is_validation());

        let empty = workbook(&[]);
        let err = service.load_dataset(&alice, upload("empty.xlsx", empty)).await.unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));

        assert_eq!(service.snapshot(&alice).dataset.name, "Sample Dataset");
        assert!(service.history(&alice).is_empty());
        assert!(service.stored_files(&alice).unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let config = Config {
            max_file_size: 16,
            ..Config::default()
        };
        let (service, _) = service_with(&config);

        let err = service
            .load_dataset(&Principal::new("a"), upload("big.xlsx", workbook(&[("Jan", 1.0)])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { limit: 16, .. }));
    }

    #[tokio::test]
    async fn upload_that_cannot_be_persisted_is_rolled_back() {
        let datasets = Arc::new(SqliteDatasetStore::open_in_memory().unwrap());
        let service = DashboardService::new(Arc::new(ReadOnlyStore), datasets, &Config::default());
        let alice = Principal::new("alice");

        let err = service
            .load_dataset(&alice, upload("m.xlsx", workbook(&[("Jan", 1.0)])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(_)));

        let snapshot = service.snapshot(&alice);
        assert_eq!(snapshot.dataset.name, "Sample Dataset");
        assert!(service.history(&alice).is_empty());
        assert!(service.stored_files(&alice).unwrap().is_empty());
    }

    #[test]
    fn selection_that_cannot_be_persisted_is_not_applied() {
        let datasets = Arc::new(SqliteDatasetStore::open_in_memory().unwrap());
        let service = DashboardService::new(Arc::new(ReadOnlyStore), datasets, &Config::default());
        let alice = Principal::new("alice");

        assert!(service.set_filter(&alice, "Region", "East").is_err());
        let err = service
            .set_selection(&alice, SelectionPatch {
                chart_type: Some(ChartType::Pie),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(_)));

        let snapshot = service.snapshot(&alice);
        assert_eq!(snapshot.selection.filter_field, "");
        assert_eq!(snapshot.selection.chart_type, ChartType::Line);
        assert_eq!(snapshot.filtered_rows.len(), 4);
    }

    #[tokio::test]
    async fn concurrent_uploads_apply_one_after_the_other() {
        let (service, _) = service();
        let alice = Principal::new("alice");

        let (first, second) = tokio::join!(
            service.load_dataset(&alice, upload("first.xlsx", workbook(&[("Jan", 1.0)]))),
            service.load_dataset(&alice, upload("second.xlsx", workbook(&[("Feb", 2.0), ("Mar", 3.0)]))),
        );
        assert_eq!(first.unwrap().dataset.row_count, 1);
        assert_eq!(second.unwrap().dataset.row_count, 2);

        assert_eq!(history_names(&service, &alice), ["second.xlsx", "first.xlsx"]);

        let snapshot = service.snapshot(&alice);
        assert_eq!(snapshot.dataset.name, "second");
        assert_eq!(snapshot.filtered_rows.len(), 2);
        assert_eq!(snapshot.filtered_rows[1]["Month"], CellValue::from("Mar"));

        let stored: Vec<String> = service
            .stored_files(&alice)
            .unwrap()
            .into_iter()
            .map(|file| file.file_name)
            .collect();
        assert_eq!(stored, ["second.xlsx", "first.xlsx"]);
    }

    #[tokio::test]
    async fn failing_upload_behind_a_good_one_keeps_the_good_one() {
        let (service, _) = service();
        let alice = Principal::new("alice");

        let (first, second) = tokio::join!(
            service.load_dataset(&alice, upload("good.xlsx", workbook(&[("Jan", 1.0)]))),
            service.load_dataset(&alice, upload("bad.xlsx", Bytes::from_static(b"not a workbook"))),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(AppError::ParseError(_))));

        let snapshot = service.snapshot(&alice);
        assert_eq!(snapshot.dataset.name, "good");
        assert_eq!(snapshot.dataset.row_count, 1);
        assert_eq!(history_names(&service, &alice), ["good.xlsx"]);
    }

    #[test]
    fn sessions_survive_a_restart_through_the_stores() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let datasets: Arc<dyn DatasetStore> = Arc::new(SqliteDatasetStore::open_in_memory().unwrap());
        let config = Config::default();
        let alice = Principal::new("alice");

        let first = DashboardService::new(kv.clone(), datasets.clone(), &config);
        tokio_test::block_on(first.load_dataset(&alice, upload("q.xlsx", workbook(&[("Jan", 1.0)])))).unwrap();
        first
            .set_selection(&alice, SelectionPatch {
                chart_type: Some(ChartType::Bar),
                y_fields: Some(vec!["Revenue".to_string()]),
                ..Default::default()
            })
            .unwrap();
        first.set_filter(&alice, "Month", "Jan").unwrap();

        let second = DashboardService::new(kv, datasets, &config);
        let snapshot = second.snapshot(&alice);
        assert_eq!(snapshot.dataset.name, "q");
        assert_eq!(snapshot.selection.chart_type, ChartType::Bar);
        assert_eq!(snapshot.selection.y_fields, ["Revenue"]);
        assert_eq!(snapshot.selection.filter_value, "Jan");
        assert_eq!(snapshot.filtered_rows.len(), 1);
        assert_eq!(second.history(&alice).len(), 1);
    }

    #[test]
    fn evicted_session_is_restored_from_the_stores() {
        let config = Config {
            max_sessions: 1,
            ..Config::default()
        };
        let (service, _) = service_with(&config);
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");

        service.set_filter(&alice, "Region", "East").unwrap();
        assert_eq!(service.snapshot(&bob).filtered_rows.len(), 4);
        {
            let sessions = service.sessions.lock();
            assert_eq!(sessions.len(), 1);
            assert!(!sessions.contains(&alice));
        }

        let snapshot = service.snapshot(&alice);
        assert_eq!(snapshot.selection.filter_value, "East");
        assert_eq!(snapshot.filtered_rows.len(), 1);
        assert!(!service.sessions.lock().contains(&bob));
    }

    #[test]
    fn reset_clears_upload_but_keeps_history() {
        let (service, kv) = service();
        let alice = Principal::new("alice");
        tokio_test::block_on(service.load_dataset(&alice, upload("q.xlsx", workbook(&[("Jan", 1.0)])))).unwrap();

        let snapshot = service.reset_to_sample(&alice).unwrap();
        assert_eq!(snapshot.dataset.name, "Sample Dataset");
        assert_eq!(kv.get("alice:uploadedData").unwrap(), None);
        assert_eq!(kv.get("alice:filters").unwrap(), None);
        assert!(kv.get("alice:uploadHistory").unwrap().is_some());
        assert_eq!(service.history(&alice).len(), 1);
    }

    #[test]
    fn principals_do_not_share_sessions() {
        let (service, _) = service();
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        service.set_filter(&alice, "Region", "East").unwrap();

        assert_eq!(service.snapshot(&alice).filtered_rows.len(), 1);
        assert_eq!(service.snapshot(&bob).filtered_rows.len(), 4);
        assert_eq!(service.filter_values(&bob, "Region"), ["East", "North", "South", "West"]);
    }

    #[test]
    fn deleting_history_persists() {
        let (service, kv) = service();
        let alice = Principal::new("alice");
        tokio_test::block_on(service.load_dataset(&alice, upload("a.xlsx", workbook(&[("Jan", 1.0)])))).unwrap();

        let removed = service.delete_history_entry(&alice, 0).unwrap();
        assert_eq!(removed.file_name, "a.xlsx");
        assert_eq!(kv.get("alice:uploadHistory").unwrap().as_deref(), Some("[]"));
        assert!(matches!(service.delete_history_entry(&alice, 0), Err(AppError::NotFound(_))));
    }
}
