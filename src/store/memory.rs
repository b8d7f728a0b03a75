//! In-memory [`RecordStore`] with fault injection, used by the test suite.

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{AminoAcid, AminoAcidContent, Food, NewContent, NewFood, NewSource, Source};
use crate::store::{RecordStore, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    sources: Vec<Source>,
    foods: Vec<Food>,
    contents: Vec<AminoAcidContent>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Faults {
    /// Fail the n-th content write (1-based) of the next transaction.
    fail_content_write: Option<usize>,
    fail_commit: bool,
    /// Another writer commits this food name right before our insert.
    racing_food: Option<String>,
    /// Every food insert conflicts and no row ever becomes visible.
    phantom_conflict: bool,
    /// Runs once when the n-th content write (1-based) of a transaction starts.
    on_content_write: Option<(usize, Box<dyn FnOnce() + Send>)>,
    content_writes: usize,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    committed: Mutex<Tables>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_content_write(&self, nth: usize) {
        self.faults.lock().unwrap().fail_content_write = Some(nth);
    }

    pub fn fail_commit(&self) {
        self.faults.lock().unwrap().fail_commit = true;
    }

    pub fn race_food(&self, name: &str) {
        self.faults.lock().unwrap().racing_food = Some(name.to_string());
    }

    pub fn phantom_conflict(&self) {
        self.faults.lock().unwrap().phantom_conflict = true;
    }

    pub fn on_content_write<F>(&self, nth: usize, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.faults.lock().unwrap().on_content_write = Some((nth, Box::new(hook)));
    }

    pub fn all_sources(&self) -> Vec<Source> {
        self.committed.lock().unwrap().sources.clone()
    }

    pub fn all_foods(&self) -> Vec<Food> {
        self.committed.lock().unwrap().foods.clone()
    }

    pub fn all_contents(&self) -> Vec<AminoAcidContent> {
        self.committed.lock().unwrap().contents.clone()
    }
}

struct MemoryTx<'a> {
    tables: &'a mut Tables,
    /// Rows other writers commit while this transaction is open.
    committed: &'a mut Tables,
    faults: &'a mut Faults,
}

impl MemoryTx<'_> {
    fn count_content_write(&mut self) -> Result<()> {
        self.faults.content_writes += 1;
        if self.faults.fail_content_write == Some(self.faults.content_writes) {
            self.faults.fail_content_write = None;
            return Err(Error::Storage("injected write failure".to_string()));
        }
        let due = matches!(
            &self.faults.on_content_write,
            Some((nth, _)) if *nth == self.faults.content_writes
        );
        if due {
            if let Some((_, hook)) = self.faults.on_content_write.take() {
                hook();
            }
        }
        Ok(())
    }
}

impl StoreTx for MemoryTx<'_> {
    fn find_source(&mut self, key: &str) -> Result<Option<Source>> {
        Ok(self.tables.sources.iter().find(|s| s.key == key).cloned())
    }

    fn insert_source(&mut self, new: &NewSource) -> Result<Source> {
        if self.tables.sources.iter().any(|s| s.key == new.key) {
            return Err(Error::Conflict(format!("source {}", new.key)));
        }
        let row = Source {
            id: self.tables.next_id(),
            key: new.key.clone(),
            citation: new.citation.clone(),
        };
        self.tables.sources.push(row.clone());
        Ok(row)
    }

    fn set_source_citation(&mut self, source_id: i32, citation: &str) -> Result<()> {
        let row = self
            .tables
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or_else(|| Error::NotFound(format!("source {source_id}")))?;
        row.citation = citation.to_string();
        Ok(())
    }

    fn find_food(&mut self, name: &str, source_id: i32) -> Result<Option<Food>> {
        Ok(self
            .tables
            .foods
            .iter()
            .find(|f| f.name == name && f.source_id == source_id)
            .cloned())
    }

    fn insert_food(&mut self, new: &NewFood) -> Result<Food> {
        if self.faults.phantom_conflict {
            return Err(Error::Conflict(format!("food {}", new.name)));
        }
        if self.faults.racing_food.as_deref() == Some(new.name.as_str()) {
            self.faults.racing_food = None;
            let winner = Food {
                id: self.tables.next_id(),
                name: new.name.clone(),
                display_name: format!("{} (racing writer)", new.display_name),
                source_id: new.source_id,
                essential_present: 0,
                amino_data_incomplete: true,
            };
            // The winner is committed whether or not this transaction is.
            self.committed.next_id = self.committed.next_id.max(winner.id);
            self.committed.foods.push(winner.clone());
            self.tables.foods.push(winner);
            return Err(Error::Conflict(format!("food {}", new.name)));
        }
        if self
            .tables
            .foods
            .iter()
            .any(|f| f.name == new.name && f.source_id == new.source_id)
        {
            return Err(Error::Conflict(format!("food {}", new.name)));
        }
        let row = Food {
            id: self.tables.next_id(),
            name: new.name.clone(),
            display_name: new.display_name.clone(),
            source_id: new.source_id,
            essential_present: new.essential_present,
            amino_data_incomplete: new.amino_data_incomplete,
        };
        self.tables.foods.push(row.clone());
        Ok(row)
    }

    fn set_food_coverage(&mut self, food_id: i32, essential_present: i32) -> Result<()> {
        let row = self
            .tables
            .foods
            .iter_mut()
            .find(|f| f.id == food_id)
            .ok_or_else(|| Error::NotFound(format!("food {food_id}")))?;
        row.essential_present = essential_present;
        row.amino_data_incomplete = essential_present < AminoAcid::ALL.len() as i32;
        Ok(())
    }

    fn find_content(&mut self, food_id: i32, acid: AminoAcid) -> Result<Option<AminoAcidContent>> {
        Ok(self
            .tables
            .contents
            .iter()
            .find(|c| c.food_id == food_id && c.amino_acid == acid.as_str())
            .cloned())
    }

    fn insert_content(&mut self, new: &NewContent) -> Result<AminoAcidContent> {
        self.count_content_write()?;
        if self
            .tables
            .contents
            .iter()
            .any(|c| c.food_id == new.food_id && c.amino_acid == new.amino_acid)
        {
            return Err(Error::Conflict(format!("content {}", new.amino_acid)));
        }
        let row = AminoAcidContent {
            id: self.tables.next_id(),
            food_id: new.food_id,
            amino_acid: new.amino_acid.clone(),
            mg_per_100g: new.mg_per_100g,
            source_id: new.source_id,
            confidence: new.confidence,
        };
        self.tables.contents.push(row.clone());
        Ok(row)
    }

    fn update_content(
        &mut self,
        content_id: i32,
        mg_per_100g: f64,
        source_id: i32,
        confidence: f64,
    ) -> Result<()> {
        self.count_content_write()?;
        let row = self
            .tables
            .contents
            .iter_mut()
            .find(|c| c.id == content_id)
            .ok_or_else(|| Error::NotFound(format!("content {content_id}")))?;
        row.mg_per_100g = mg_per_100g;
        row.source_id = source_id;
        row.confidence = confidence;
        Ok(())
    }

    fn food_contents(&mut self, food_id: i32) -> Result<Vec<AminoAcidContent>> {
        Ok(self
            .tables
            .contents
            .iter()
            .filter(|c| c.food_id == food_id)
            .cloned()
            .collect())
    }
}

impl RecordStore for MemoryStore {
    fn write<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&mut dyn StoreTx) -> Result<T>,
    {
        let mut committed = self.committed.lock().unwrap();
        let mut faults = self.faults.lock().unwrap();
        let mut staged = committed.clone();
        faults.content_writes = 0;

        let value = f(&mut MemoryTx {
            tables: &mut staged,
            committed: &mut *committed,
            faults: &mut *faults,
        })?;

        if std::mem::take(&mut faults.fail_commit) {
            return Err(Error::Storage("injected commit failure".to_string()));
        }
        *committed = staged;
        Ok(value)
    }

    fn food(&self, food_id: i32) -> Result<Option<Food>> {
        let tables = self.committed.lock().unwrap();
        Ok(tables.foods.iter().find(|f| f.id == food_id).cloned())
    }

    fn foods(&self, food_ids: &[i32]) -> Result<Vec<Food>> {
        let tables = self.committed.lock().unwrap();
        Ok(tables
            .foods
            .iter()
            .filter(|f| food_ids.contains(&f.id))
            .cloned()
            .collect())
    }

    fn sources(&self, source_ids: &[i32]) -> Result<Vec<Source>> {
        let tables = self.committed.lock().unwrap();
        Ok(tables
            .sources
            .iter()
            .filter(|s| source_ids.contains(&s.id))
            .cloned()
            .collect())
    }

    fn contents_for_food(&self, food_id: i32) -> Result<Vec<AminoAcidContent>> {
        let tables = self.committed.lock().unwrap();
        Ok(tables
            .contents
            .iter()
            .filter(|c| c.food_id == food_id)
            .cloned()
            .collect())
    }

    fn contents_for_acids(&self, acids: &[AminoAcid]) -> Result<Vec<AminoAcidContent>> {
        let tables = self.committed.lock().unwrap();
        Ok(tables
            .contents
            .iter()
            .filter(|c| acids.iter().any(|aa| aa.as_str() == c.amino_acid))
            .cloned()
            .collect())
    }

    fn search_foods(&self, needle: &str, limit: usize) -> Result<Vec<Food>> {
        let tables = self.committed.lock().unwrap();
        let mut found: Vec<Food> = tables
            .foods
            .iter()
            .filter(|f| f.name.contains(needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        found.truncate(limit);
        Ok(found)
    }
}
