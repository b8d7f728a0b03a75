//! Batch ingestion of amino acid measurements.
//!
//! A batch runs in a single store transaction: rows that fail validation are
//! reported and skipped, any other failure rolls back the whole batch.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::guard::{self, StoreGuard};
use crate::models::{AminoAcid, Food, NewContent, Source};
use crate::normalize;
use crate::resolver::{self, FoodDefaults, FoodKey, SourceDefaults, SourceKey};
use crate::store::{RecordStore, StoreTx};

/// One input row as read from a nutrition dataset export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub food_name: String,
    #[serde(default)]
    pub amino_acid: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub citation: String,
    /// `mg` (default) or `g`, per 100 g of food.
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub confidence: String,
    /// Set when the input record could not be decoded at all. Such a row is
    /// reported as a validation error instead of loaded.
    #[serde(skip)]
    pub unreadable: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub batch_id: Uuid,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub sources_created: usize,
    pub foods_created: usize,
    pub errors: Vec<RowError>,
    /// Foods written by this batch; cached profiles for them are stale.
    pub touched_foods: BTreeSet<i32>,
}

impl IngestReport {
    fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            inserted: 0,
            updated: 0,
            skipped: 0,
            sources_created: 0,
            foods_created: 0,
            errors: Vec::new(),
            touched_foods: BTreeSet::new(),
        }
    }

    fn skip(&mut self, index: usize, err: &Error) {
        self.skipped += 1;
        self.errors.push(RowError {
            index,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Cancels a running batch before its commit point.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Aborted);
        }
        Ok(())
    }
}

/// A row after normalization and parsing, ready to load.
#[derive(Debug)]
struct CleanRow {
    source: SourceKey,
    citation: String,
    food_name: String,
    display_name: String,
    acid: AminoAcid,
    mg_per_100g: f64,
    confidence: f64,
}

impl CleanRow {
    fn parse(row: &RawRow) -> Result<Self> {
        if let Some(reason) = &row.unreadable {
            return Err(Error::Validation(format!("unreadable record: {reason}")));
        }
        let source = SourceKey::new(&row.source)?;
        let food_name = normalize::food_name(&row.food_name)?;
        let acid: AminoAcid = row.amino_acid.parse()?;
        let value = normalize::concentration(&row.value)?;

        let mg_per_100g = match normalize::identifier(&row.unit).as_str() {
            "" | "mg" | "mg/100g" => value,
            "g" | "g/100g" => value * 1000.0,
            other => return Err(Error::Validation(format!("unsupported unit {other:?}"))),
        };

        let confidence = if row.confidence.trim().is_empty() {
            1.0
        } else {
            normalize::decimal(&row.confidence)?
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::Validation(format!(
                "confidence {confidence} outside 0..=1"
            )));
        }

        Ok(Self {
            source,
            citation: normalize::collapse(&row.citation),
            food_name,
            display_name: normalize::collapse(&row.food_name),
            acid,
            mg_per_100g,
            confidence,
        })
    }
}

enum Upsert {
    Inserted,
    Updated,
}

pub struct Pipeline<'a, S> {
    store: &'a S,
    guard: &'a StoreGuard,
    abort: AbortHandle,
}

impl<'a, S: RecordStore> Pipeline<'a, S> {
    pub fn new(store: &'a S, guard: &'a StoreGuard) -> Self {
        Self {
            store,
            guard,
            abort: AbortHandle::default(),
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Loads `rows` as one batch. Either every valid row is committed, or
    /// nothing is.
    pub fn ingest(&self, rows: &[RawRow]) -> Result<IngestReport> {
        let batch_id = Uuid::new_v4();
        info!("batch {batch_id}: ingesting {} rows", rows.len());

        let result = self
            .guard
            .call(|| self.store.write(|tx| self.load(tx, rows, batch_id)));

        match &result {
            Ok(report) => info!(
                "batch {batch_id}: committed, {} inserted, {} updated, {} skipped",
                report.inserted, report.updated, report.skipped
            ),
            Err(e) => error!("batch {batch_id}: rolled back: {e}"),
        }
        result
    }

    fn load(&self, tx: &mut dyn StoreTx, rows: &[RawRow], batch_id: Uuid) -> Result<IngestReport> {
        let mut report = IngestReport::new(batch_id);

        for (index, row) in rows.iter().enumerate() {
            self.abort.check()?;

            let clean = match CleanRow::parse(row) {
                Ok(clean) => clean,
                Err(e) if e.is_row_level() => {
                    warn!("batch {batch_id}: skipping row {index}: {e}");
                    report.skip(index, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.load_row(tx, &clean, &mut report)?;
        }

        for &food_id in &report.touched_foods {
            refresh_coverage(tx, food_id)?;
        }

        self.abort.check()?;
        Ok(report)
    }

    fn load_row(&self, tx: &mut dyn StoreTx, row: &CleanRow, report: &mut IngestReport) -> Result<()> {
        let (mut source, created) = resolver::resolve::<Source>(
            tx,
            &row.source,
            SourceDefaults {
                citation: row.citation.clone(),
            },
        )?;
        if created {
            report.sources_created += 1;
        } else {
            resolver::backfill_citation(tx, &mut source, &row.citation)?;
        }

        let (food, created) = resolver::resolve::<Food>(
            tx,
            &FoodKey::new(&row.food_name, &source)?,
            FoodDefaults {
                display_name: row.display_name.clone(),
            },
        )?;
        if created {
            report.foods_created += 1;
        }

        match upsert_content(tx, &food, &source, row)? {
            Upsert::Inserted => report.inserted += 1,
            Upsert::Updated => report.updated += 1,
        }
        report.touched_foods.insert(food.id);
        Ok(())
    }
}

/// The value and source always take the newest write; the higher confidence
/// of the old and new measurement is kept.
fn upsert_content(tx: &mut dyn StoreTx, food: &Food, source: &Source, row: &CleanRow) -> Result<Upsert> {
    let (existing, created) = match tx.find_content(food.id, row.acid)? {
        Some(existing) => (existing, false),
        None => guard::create_or_reuse(
            tx,
            "amino acid content",
            |tx| {
                tx.insert_content(&NewContent {
                    food_id: food.id,
                    amino_acid: row.acid.as_str().to_string(),
                    mg_per_100g: row.mg_per_100g,
                    source_id: source.id,
                    confidence: row.confidence,
                })
            },
            |tx| tx.find_content(food.id, row.acid),
        )?,
    };
    if created {
        return Ok(Upsert::Inserted);
    }

    tx.update_content(
        existing.id,
        row.mg_per_100g,
        source.id,
        existing.confidence.max(row.confidence),
    )?;
    Ok(Upsert::Updated)
}

fn refresh_coverage(tx: &mut dyn StoreTx, food_id: i32) -> Result<()> {
    let present: BTreeSet<AminoAcid> = tx
        .food_contents(food_id)?
        .iter()
        .filter_map(|content| content.acid())
        .collect();
    tx.set_food_coverage(food_id, present.len() as i32)
}

/// Reads ingestion rows from a CSV file with a header line. Columns other
/// than the known ones are ignored; missing optional columns read as empty.
///
/// Only an unreadable file or header fails the load. A record that cannot be
/// decoded, such as one with invalid UTF-8, still yields a row so the batch
/// reports it at its index and loads the rest.
pub fn read_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Validation(format!("cannot read {}: {e}", path.display())))?;
    let headers = reader
        .byte_headers()
        .map_err(|e| Error::Validation(format!("cannot read header of {}: {e}", path.display())))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.byte_records().enumerate() {
        let record = record
            .map_err(|e| Error::Validation(format!("{} record {index}: {e}", path.display())))?;
        let row = record
            .deserialize::<RawRow>(Some(&headers))
            .unwrap_or_else(|e| {
                warn!("{} record {index} is unreadable: {e}", path.display());
                RawRow {
                    unreadable: Some(e.to_string()),
                    ..RawRow::default()
                }
            });
        rows.push(row);
    }
    Ok(rows)
}
