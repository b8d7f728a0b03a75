//! Transactional record store consumed by ingestion and scoring.
//!
//! Writes happen inside [`RecordStore::write`]: returning `Ok` from the
//! closure commits, returning `Err` rolls everything back. Every insert is
//! executed immediately so generated ids are visible to later statements of
//! the same transaction. Reads on [`RecordStore`] itself only ever see
//! committed data.

use crate::error::Result;
use crate::models::{AminoAcid, AminoAcidContent, Food, NewContent, NewFood, NewSource, Source};

#[cfg(test)]
pub(crate) mod memory;

/// Operations available inside an open write transaction.
///
/// Inserts fail with [`crate::Error::Conflict`] when a uniqueness constraint
/// rejects the row.
pub trait StoreTx {
    fn find_source(&mut self, key: &str) -> Result<Option<Source>>;
    fn insert_source(&mut self, new: &NewSource) -> Result<Source>;
    fn set_source_citation(&mut self, source_id: i32, citation: &str) -> Result<()>;

    fn find_food(&mut self, name: &str, source_id: i32) -> Result<Option<Food>>;
    fn insert_food(&mut self, new: &NewFood) -> Result<Food>;
    fn set_food_coverage(&mut self, food_id: i32, essential_present: i32) -> Result<()>;

    fn find_content(&mut self, food_id: i32, acid: AminoAcid) -> Result<Option<AminoAcidContent>>;
    fn insert_content(&mut self, new: &NewContent) -> Result<AminoAcidContent>;
    fn update_content(
        &mut self,
        content_id: i32,
        mg_per_100g: f64,
        source_id: i32,
        confidence: f64,
    ) -> Result<()>;
    fn food_contents(&mut self, food_id: i32) -> Result<Vec<AminoAcidContent>>;
}

pub trait RecordStore: Send + Sync {
    /// Runs `f` in one transaction. A backend may run `f` again from the start
    /// after the database rolled the first attempt back on a deadlock.
    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnMut(&mut dyn StoreTx) -> Result<T>;

    fn food(&self, food_id: i32) -> Result<Option<Food>>;
    fn foods(&self, food_ids: &[i32]) -> Result<Vec<Food>>;
    fn sources(&self, source_ids: &[i32]) -> Result<Vec<Source>>;
    fn contents_for_food(&self, food_id: i32) -> Result<Vec<AminoAcidContent>>;
    fn contents_for_acids(&self, acids: &[AminoAcid]) -> Result<Vec<AminoAcidContent>>;

    /// Foods whose normalized name contains `needle` literally, ordered by
    /// name then id, at most `limit` of them.
    fn search_foods(&self, needle: &str, limit: usize) -> Result<Vec<Food>>;
}
