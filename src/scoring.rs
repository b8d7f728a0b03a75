//! Reads over committed data: food name search, unit conversion and
//! deficit-based food recommendations.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{AminoAcid, Food};
use crate::normalize;
use crate::store::RecordStore;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

pub type AminoProfile = BTreeMap<AminoAcid, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub citation: String,
    pub confidence: f64,
}

/// Stored concentrations of one food with where each value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodProfile {
    pub food: Food,
    pub mg_per_100g: AminoProfile,
    pub provenance: BTreeMap<AminoAcid, Provenance>,
}

impl FoodProfile {
    /// Milligrams actually consumed when eating `grams` of this food.
    pub fn actual(&self, grams: f64) -> Result<AminoProfile> {
        check_grams(grams)?;
        let factor = grams / 100.0;
        Ok(self
            .mg_per_100g
            .iter()
            .map(|(&acid, &mg)| (acid, mg * factor))
            .collect())
    }
}

/// Foods whose name contains `text` after the same normalization applied at
/// ingestion. Needs at least two characters; `limit` is capped at
/// [`MAX_SEARCH_LIMIT`].
pub fn search_foods<S: RecordStore>(store: &S, text: &str, limit: Option<usize>) -> Result<Vec<Food>> {
    let needle = normalize::identifier(text);
    if needle.chars().count() < 2 {
        return Err(Error::Validation(
            "search text needs at least 2 characters".to_string(),
        ));
    }
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if limit == 0 {
        return Err(Error::Validation("search limit must be positive".to_string()));
    }
    store.search_foods(&needle, limit.min(MAX_SEARCH_LIMIT))
}

pub fn check_grams(grams: f64) -> Result<()> {
    if !grams.is_finite() || grams <= 0.0 {
        return Err(Error::Validation(format!(
            "grams eaten must be positive, got {grams}"
        )));
    }
    Ok(())
}

pub fn food_profile<S: RecordStore>(store: &S, food_id: i32) -> Result<FoodProfile> {
    let food = store
        .food(food_id)?
        .ok_or_else(|| Error::NotFound(format!("food {food_id}")))?;
    let contents = store.contents_for_food(food_id)?;

    let mut source_ids: Vec<i32> = contents.iter().map(|c| c.source_id).collect();
    source_ids.sort_unstable();
    source_ids.dedup();
    let sources: HashMap<i32, _> = store
        .sources(&source_ids)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut mg_per_100g = AminoProfile::new();
    let mut provenance = BTreeMap::new();
    for content in contents {
        let Some(acid) = content.acid() else {
            continue;
        };
        mg_per_100g.insert(acid, content.mg_per_100g);
        if let Some(source) = sources.get(&content.source_id) {
            provenance.insert(
                acid,
                Provenance {
                    source: source.key.clone(),
                    citation: source.citation.clone(),
                    confidence: content.confidence,
                },
            );
        }
    }

    Ok(FoodProfile {
        food,
        mg_per_100g,
        provenance,
    })
}

/// `mg = mg_per_100g × grams / 100` for every measured amino acid of the food.
pub fn actual_amino_acids<S: RecordStore>(store: &S, food_id: i32, grams: f64) -> Result<AminoProfile> {
    check_grams(grams)?;
    food_profile(store, food_id)?.actual(grams)
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MixItem {
    pub food_id: i32,
    pub grams: f64,
}

/// Totals over a whole meal. Every essential amino acid is present in the
/// result, zero when no eaten food has a measurement for it.
pub fn mix<S: RecordStore>(store: &S, items: &[MixItem]) -> Result<AminoProfile> {
    let mut totals: AminoProfile = AminoAcid::ALL.iter().map(|&acid| (acid, 0.0)).collect();
    for item in items {
        for (acid, mg) in actual_amino_acids(store, item.food_id, item.grams)? {
            *totals.entry(acid).or_default() += mg;
        }
    }
    Ok(totals)
}

/// What is still missing after `intake`, never negative.
pub fn deficit(target: &AminoProfile, intake: &AminoProfile) -> AminoProfile {
    target
        .iter()
        .map(|(&acid, &required)| {
            let eaten = intake.get(&acid).copied().unwrap_or(0.0);
            (acid, (required - eaten).max(0.0))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub food: Food,
    pub score: f64,
    pub reason: String,
}

/// Ranks foods by the sum of their mg/100g over the limiting amino acids,
/// the entries of `target` that still have a positive requirement.
///
/// Foods without a measurement for a limiting acid score 0 for that term.
/// A food is ranked as soon as it has a stored row for any limiting acid,
/// including a measured 0; foods with no such row are left out. Ties go to
/// the alphabetically first normalized name.
pub fn recommend<S: RecordStore>(
    store: &S,
    target: &AminoProfile,
    exclude: &[i32],
    top_n: Option<usize>,
) -> Result<Vec<Recommendation>> {
    if let Some((acid, mg)) = target.iter().find(|(_, mg)| !mg.is_finite() || **mg < 0.0) {
        return Err(Error::Validation(format!(
            "required {acid} must be a non-negative amount, got {mg}"
        )));
    }

    let limiting: Vec<AminoAcid> = target
        .iter()
        .filter(|(_, &mg)| mg > 0.0)
        .map(|(&acid, _)| acid)
        .collect();
    if limiting.is_empty() {
        return Ok(Vec::new());
    }

    let mut scores: HashMap<i32, f64> = HashMap::new();
    for content in store.contents_for_acids(&limiting)? {
        if exclude.contains(&content.food_id) {
            continue;
        }
        *scores.entry(content.food_id).or_default() += content.mg_per_100g;
    }

    let food_ids: Vec<i32> = scores.keys().copied().collect();
    let reason = format!(
        "High in {} per 100g",
        limiting
            .iter()
            .map(AminoAcid::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut ranked: Vec<Recommendation> = store
        .foods(&food_ids)?
        .into_iter()
        .filter_map(|food| {
            let score = *scores.get(&food.id)?;
            Some(Recommendation {
                food,
                score,
                reason: reason.clone(),
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.food.name.cmp(&b.food.name))
            .then_with(|| a.food.id.cmp(&b.food.id))
    });
    if let Some(n) = top_n {
        ranked.truncate(n);
    }
    Ok(ranked)
}
