use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::inventory::InventoryRecord;
use crate::domain::session::PendingSection;
use crate::gateway::{Cell, ContainerId, FormatSpec, Row, SectionId, StoreError, TabularStore};

pub const SECTION_PREFIX: &str = "Inventory";
pub const COLUMN_HEADERS: [&str; 4] = ["№", "Product", "Quantity", "Unit"];
const HEADER_ROWS: usize = 5;
const COLUMN_WIDTHS_PX: [u32; 4] = [50, 300, 150, 150];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionStage {
    Container,
    ListSections,
    CreateSection,
    WriteRows,
}

impl SubmissionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::ListSections => "list_sections",
            Self::CreateSection => "create_section",
            Self::WriteRows => "write_rows",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("submission failed at {}: {source}", .stage.as_str())]
pub struct SubmissionError {
    pub stage: SubmissionStage,
    /// Section that exists in the store despite the failure; a retry reuses it.
    pub section: Option<PendingSection>,
    #[source]
    pub source: StoreError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub container: ContainerId,
    pub section_id: SectionId,
    pub section_name: String,
    pub rows_written: usize,
    pub formatted: bool,
}

pub fn section_name(date_label: &str, number: u32) -> String {
    format!("{SECTION_PREFIX} {date_label}_{number}")
}

/// One past the highest disambiguator among sections for `date_label`. A
/// matching name without a numeric suffix counts as 1.
pub fn next_section_number<S: AsRef<str>>(existing: &[S], date_label: &str) -> u32 {
    let prefix = format!("{SECTION_PREFIX} {date_label}");
    existing
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| name.starts_with(&prefix))
        .map(|name| {
            name.rsplit_once('_').and_then(|(_, suffix)| suffix.parse::<u32>().ok()).unwrap_or(1)
        })
        .max()
        .map_or(1, |highest| highest.saturating_add(1))
}

pub fn section_rows(record: &InventoryRecord) -> Vec<Row> {
    let date = record.date_label();
    let mut rows: Vec<Row> = vec![
        vec![Cell::text(format!("Warehouse inventory: {}", record.warehouse))],
        vec![Cell::text(format!("Responsible person: {}", record.responsible_name))],
        vec![Cell::text(format!("Phone: {}", record.phone_number))],
        vec![Cell::text(format!("Date: {date}"))],
        vec![Cell::Empty],
        COLUMN_HEADERS.iter().map(|header| Cell::text(*header)).collect(),
    ];
    rows.extend(record.lines.iter().map(|line| {
        vec![
            Cell::Integer(i64::try_from(line.sequence).unwrap_or(i64::MAX)),
            Cell::text(line.product.clone()),
            Cell::Number(line.quantity),
            Cell::text(line.unit.clone()),
        ]
    }));
    rows
}

pub fn section_format(row_count: usize) -> FormatSpec {
    FormatSpec {
        merged_rows: (0..HEADER_ROWS).collect(),
        merge_columns: COLUMN_HEADERS.len(),
        bordered_rows: row_count,
        bordered_columns: COLUMN_HEADERS.len(),
        column_widths_px: COLUMN_WIDTHS_PX.to_vec(),
        header_row: Some(HEADER_ROWS),
    }
}

fn failed(
    stage: SubmissionStage,
    section: Option<PendingSection>,
) -> impl FnOnce(StoreError) -> SubmissionError {
    move |source| SubmissionError { stage, section, source }
}

/// Writes an [`InventoryRecord`] into the warehouse's container as a new
/// dated section.
#[derive(Clone)]
pub struct InventorySubmitter {
    store: Arc<dyn TabularStore>,
    timeout: Duration,
    naming: Arc<Mutex<()>>,
}

impl InventorySubmitter {
    pub fn new(store: Arc<dyn TabularStore>, timeout: Duration) -> Self {
        Self { store, timeout, naming: Arc::new(Mutex::new(())) }
    }

    /// Writes `record` into a new dated section, or into `pending` when it was
    /// left behind by an earlier failed attempt for the same warehouse and date.
    pub async fn submit(
        &self,
        record: &InventoryRecord,
        pending: Option<&PendingSection>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let reuse = pending.filter(|section| section.belongs_to(&record.warehouse, record.date));
        if let (Some(stale), None) = (pending, reuse) {
            info!(
                event_name = "submission.pending_section_discarded",
                warehouse = %record.warehouse,
                section = %stale.name,
                "pending section belongs to another warehouse or date"
            );
        }

        let container = self
            .bounded(self.store.find_or_create_container(&record.warehouse))
            .await
            .map_err(failed(SubmissionStage::Container, reuse.cloned()))?;

        // Naming and creation stay under one lock so two submissions for the
        // same date never pick the same disambiguator.
        let (section_id, section_name) = {
            let _naming = self.naming.lock().await;
            let name = match reuse {
                Some(section) => section.name.clone(),
                None => {
                    let existing = self
                        .bounded(self.store.list_sections(&container))
                        .await
                        .map_err(failed(SubmissionStage::ListSections, None))?;
                    let date_label = record.date_label();
                    section_name(&date_label, next_section_number(&existing, &date_label))
                }
            };
            // A name that was never created is not ours to keep.
            let id = self
                .bounded(self.store.create_section(&container, &name))
                .await
                .map_err(failed(SubmissionStage::CreateSection, reuse.cloned()))?;
            (id, name)
        };
        info!(
            event_name = "submission.section_created",
            warehouse = %record.warehouse,
            section = %section_name,
            reused = reuse.is_some(),
            "inventory section ready"
        );
        let created = PendingSection {
            warehouse: record.warehouse.clone(),
            date: record.date,
            name: section_name.clone(),
        };

        let rows = section_rows(record);
        self.bounded(self.store.write_rows(&container, &section_name, &rows))
            .await
            .map_err(failed(SubmissionStage::WriteRows, Some(created)))?;

        let format = section_format(rows.len());
        let formatted = match self
            .bounded(self.store.apply_formatting(&container, &section_id, &format))
            .await
        {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    event_name = "submission.formatting_failed",
                    section = %section_name,
                    error = %error,
                    "section written without formatting"
                );
                false
            }
        };

        info!(
            event_name = "submission.completed",
            warehouse = %record.warehouse,
            section = %section_name,
            rows = rows.len(),
            "inventory submitted"
        );
        Ok(SubmissionReceipt {
            container,
            section_id,
            section_name,
            rows_written: rows.len(),
            formatted,
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call).await.map_err(|_| StoreError::Timeout)?
    }
}
