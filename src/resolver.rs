//! Get-or-create for reference entities.
//!
//! A lookup always precedes creation and an existing row is returned as-is,
//! so resolving the same natural key any number of times yields one row.

use crate::error::Result;
use crate::guard;
use crate::models::{Food, NewFood, NewSource, Source};
use crate::normalize;
use crate::store::StoreTx;

pub trait Resolve: Sized {
    type Key;
    type Defaults;

    const KIND: &'static str;

    fn find(tx: &mut dyn StoreTx, key: &Self::Key) -> Result<Option<Self>>;
    fn create(tx: &mut dyn StoreTx, key: &Self::Key, defaults: Self::Defaults) -> Result<Self>;
}

/// Returns the entity for `key`, creating it from `defaults` when absent.
/// The flag is `true` only when this call created the row.
pub fn resolve<E: Resolve>(
    tx: &mut dyn StoreTx,
    key: &E::Key,
    defaults: E::Defaults,
) -> Result<(E, bool)> {
    if let Some(existing) = E::find(tx, key)? {
        return Ok((existing, false));
    }
    guard::create_or_reuse(
        tx,
        E::KIND,
        |tx| E::create(tx, key, defaults),
        |tx| E::find(tx, key),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(raw: &str) -> Result<Self> {
        normalize::source_key(raw).map(SourceKey)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct SourceDefaults {
    pub citation: String,
}

impl Resolve for Source {
    type Key = SourceKey;
    type Defaults = SourceDefaults;

    const KIND: &'static str = "source";

    fn find(tx: &mut dyn StoreTx, key: &SourceKey) -> Result<Option<Self>> {
        tx.find_source(key.as_str())
    }

    fn create(tx: &mut dyn StoreTx, key: &SourceKey, defaults: SourceDefaults) -> Result<Self> {
        tx.insert_source(&NewSource {
            key: key.0.clone(),
            citation: defaults.citation,
        })
    }
}

/// Fills in a source's citation if it was created without one. A citation
/// that is already present is never replaced.
pub fn backfill_citation(tx: &mut dyn StoreTx, source: &mut Source, citation: &str) -> Result<()> {
    let citation = normalize::collapse(citation);
    if source.citation.is_empty() && !citation.is_empty() {
        tx.set_source_citation(source.id, &citation)?;
        source.citation = citation;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodKey {
    name: String,
    source_id: i32,
}

impl FoodKey {
    pub fn new(raw_name: &str, source: &Source) -> Result<Self> {
        Ok(Self {
            name: normalize::food_name(raw_name)?,
            source_id: source.id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct FoodDefaults {
    pub display_name: String,
}

impl Resolve for Food {
    type Key = FoodKey;
    type Defaults = FoodDefaults;

    const KIND: &'static str = "food";

    fn find(tx: &mut dyn StoreTx, key: &FoodKey) -> Result<Option<Self>> {
        tx.find_food(&key.name, key.source_id)
    }

    fn create(tx: &mut dyn StoreTx, key: &FoodKey, defaults: FoodDefaults) -> Result<Self> {
        tx.insert_food(&NewFood {
            name: key.name.clone(),
            display_name: defaults.display_name,
            source_id: key.source_id,
            essential_present: 0,
            amino_data_incomplete: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::MemoryStore;
    use crate::store::RecordStore;

    fn defaults() -> SourceDefaults {
        SourceDefaults {
            citation: "USDA FoodData Central".into(),
        }
    }

    #[test]
    fn source_is_created_once_and_reused() {
        let store = MemoryStore::new();
        let key = SourceKey::new("  USDA  FDC ").unwrap();

        let (first, second) = store
            .write(|tx| {
                let first = resolve::<Source>(tx, &key, defaults())?;
                let second = resolve::<Source>(
                    tx,
                    &key,
                    SourceDefaults {
                        citation: "ignored".into(),
                    },
                )?;
                Ok((first, second))
            })
            .unwrap();

        assert!(first.1);
        assert!(!second.1);
        assert_eq!(first.0, second.0);
        assert_eq!(second.0.citation, "USDA FoodData Central");
        assert_eq!(store.all_sources().len(), 1);
    }

    #[test]
    fn food_resolution_is_stable_across_spellings_and_runs() {
        let store = MemoryStore::new();
        for spelling in ["Chicken Breast", "  chicken   breast ", "CHICKEN BREAST"] {
            store
                .write(|tx| {
                    let (source, _) =
                        resolve::<Source>(tx, &SourceKey::new("usda")?, defaults())?;
                    let key = FoodKey::new(spelling, &source)?;
                    resolve::<Food>(
                        tx,
                        &key,
                        FoodDefaults {
                            display_name: spelling.to_string(),
                        },
                    )
                })
                .unwrap();
        }

        let foods = store.all_foods();
        assert_eq!(foods.len(), 1);
        assert_eq!(foods[0].name, "chicken breast");
        assert_eq!(foods[0].display_name, "Chicken Breast");
    }

    #[test]
    fn same_food_name_under_different_sources_is_distinct() {
        let store = MemoryStore::new();
        store
            .write(|tx| {
                for source_key in ["usda", "infoods"] {
                    let (source, _) =
                        resolve::<Source>(tx, &SourceKey::new(source_key)?, defaults())?;
                    let key = FoodKey::new("lentils, boiled", &source)?;
                    resolve::<Food>(
                        tx,
                        &key,
                        FoodDefaults {
                            display_name: "Lentils, boiled".into(),
                        },
                    )?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(store.all_foods().len(), 2);
    }

    #[test]
    fn racing_writer_is_reused_after_conflict() {
        let store = MemoryStore::new();
        store.race_food("tofu");

        let (food, created) = store
            .write(|tx| {
                let (source, _) = resolve::<Source>(tx, &SourceKey::new("usda")?, defaults())?;
                resolve::<Food>(
                    tx,
                    &FoodKey::new("Tofu", &source)?,
                    FoodDefaults {
                        display_name: "Tofu".into(),
                    },
                )
            })
            .unwrap();

        assert!(!created);
        assert_eq!(food.display_name, "Tofu (racing writer)");
        assert_eq!(store.all_foods().len(), 1);
    }

    #[test]
    fn racing_writer_survives_our_rollback() {
        let store = MemoryStore::new();
        store
            .write(|tx| resolve::<Source>(tx, &SourceKey::new("usda")?, defaults()).map(|_| ()))
            .unwrap();
        store.race_food("tofu");

        let result: Result<()> = store.write(|tx| {
            let (source, _) = resolve::<Source>(tx, &SourceKey::new("usda")?, defaults())?;
            let (food, created) = resolve::<Food>(
                tx,
                &FoodKey::new("Tofu", &source)?,
                FoodDefaults {
                    display_name: "Tofu".into(),
                },
            )?;
            assert!(!created);
            assert_eq!(food.display_name, "Tofu (racing writer)");
            Err(Error::Storage("a later row failed".into()))
        });

        assert!(matches!(result, Err(Error::Storage(_))));
        let foods = store.all_foods();
        assert_eq!(foods.len(), 1);
        assert_eq!(foods[0].display_name, "Tofu (racing writer)");
    }

    #[test]
    fn persistent_conflict_surfaces_as_fatal() {
        let store = MemoryStore::new();
        store.phantom_conflict();

        let result = store.write(|tx| {
            let (source, _) = resolve::<Source>(tx, &SourceKey::new("usda")?, defaults())?;
            resolve::<Food>(
                tx,
                &FoodKey::new("Tofu", &source)?,
                FoodDefaults {
                    display_name: "Tofu".into(),
                },
            )
        });

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(store.all_sources().is_empty());
    }

    #[test]
    fn citation_is_backfilled_but_never_overwritten() {
        let store = MemoryStore::new();
        store
            .write(|tx| {
                let key = SourceKey::new("doi:10.1/xyz")?;
                let (mut source, _) = resolve::<Source>(
                    tx,
                    &key,
                    SourceDefaults {
                        citation: String::new(),
                    },
                )?;
                backfill_citation(tx, &mut source, "Smith et al. 2020")?;
                backfill_citation(tx, &mut source, "Someone else")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.all_sources()[0].citation, "Smith et al. 2020");
    }

    #[test]
    fn empty_keys_are_rejected() {
        assert!(matches!(SourceKey::new(" "), Err(Error::Validation(_))));
        let source = Source {
            id: 1,
            key: "usda".into(),
            citation: String::new(),
        };
        assert!(matches!(FoodKey::new("\t", &source), Err(Error::Validation(_))));
    }
}
