//! Reader for the USDA FoodData Central bulk CSV distribution.
//!
//! Three files of a release are joined: `nutrient.csv` names the nutrients,
//! `food_nutrient.csv` holds one amount per food and nutrient, and `food.csv`
//! carries descriptions and data types. Every food with at least one essential
//! amino acid becomes a set of [`RawRow`]s for the regular ingestion pipeline.
//! An amino acid FDC does not report for a food is left absent, never zero.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::ingest::RawRow;
use crate::models::AminoAcid;

pub const NUTRIENT_CSV: &str = "nutrient.csv";
pub const FOOD_NUTRIENT_CSV: &str = "food_nutrient.csv";
pub const FOOD_CSV: &str = "food.csv";

pub const DEFAULT_SOURCE_KEY: &str = "USDA FoodData Central (Bulk)";
pub const DEFAULT_CITATION: &str =
    "U.S. Department of Agriculture, Agricultural Research Service. FoodData Central.";

/// nutrient id -> (amino acid, mg per reported unit)
pub type NutrientMap = HashMap<i64, (AminoAcid, f64)>;

/// fdc id -> amino acid -> mg per 100 g
pub type FoodAminoMap = BTreeMap<i64, BTreeMap<AminoAcid, f64>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FoodInfo {
    pub description: String,
    pub data_type: String,
}

#[derive(Debug, Clone)]
pub struct UsdaSource {
    pub key: String,
    pub citation: String,
}

impl Default for UsdaSource {
    fn default() -> Self {
        Self {
            key: DEFAULT_SOURCE_KEY.to_string(),
            citation: DEFAULT_CITATION.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NutrientRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    unit_name: String,
}

#[derive(Debug, Deserialize)]
struct FoodNutrientRecord {
    #[serde(default)]
    fdc_id: String,
    #[serde(default)]
    nutrient_id: String,
    #[serde(default)]
    amount: String,
}

#[derive(Debug, Deserialize)]
struct FoodRecord {
    #[serde(default)]
    fdc_id: String,
    #[serde(default)]
    data_type: String,
    #[serde(default)]
    description: String,
}

/// The three CSV files of one extracted release.
#[derive(Debug, Clone)]
pub struct UsdaDataset {
    pub nutrient_csv: PathBuf,
    pub food_nutrient_csv: PathBuf,
    pub food_csv: PathBuf,
}

impl UsdaDataset {
    /// Finds the release files anywhere below `root`; releases are often
    /// wrapped in a dated subdirectory.
    pub fn locate(root: &Path) -> Result<Self> {
        Ok(Self {
            nutrient_csv: find_file(root, NUTRIENT_CSV)?,
            food_nutrient_csv: find_file(root, FOOD_NUTRIENT_CSV)?,
            food_csv: find_file(root, FOOD_CSV)?,
        })
    }

    pub fn rows(&self, source: &UsdaSource) -> Result<Vec<RawRow>> {
        let nutrients = load_nutrient_map(&self.nutrient_csv)?;
        info!("{} essential amino acid nutrients in {NUTRIENT_CSV}", nutrients.len());

        let per_food = accumulate_food_amino_acids(&self.food_nutrient_csv, &nutrients)?;
        info!("{} foods report at least one essential amino acid", per_food.len());

        let keep: BTreeSet<i64> = per_food.keys().copied().collect();
        let foods = load_food_info(&self.food_csv, &keep)?;
        if foods.len() < keep.len() {
            warn!(
                "{} foods with amino acid data have no entry in {FOOD_CSV}",
                keep.len() - foods.len()
            );
        }

        Ok(to_rows(&per_food, &foods, source))
    }
}

fn find_file(root: &Path, file_name: &str) -> Result<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(|entry| entry.into_path())
        .ok_or_else(|| {
            Error::Validation(format!("could not find {file_name} under {}", root.display()))
        })
}

/// Visits every decodable record of `path`. Records that fail to decode are
/// counted and skipped; I/O and header errors fail the read.
fn each_record<T, F>(path: &Path, mut visit: F) -> Result<()>
where
    T: DeserializeOwned,
    F: FnMut(T),
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Validation(format!("cannot read {}: {e}", path.display())))?;
    reader
        .headers()
        .map_err(|e| Error::Validation(format!("cannot read header of {}: {e}", path.display())))?;

    let mut skipped = 0usize;
    for record in reader.deserialize::<T>() {
        match record {
            Ok(record) => visit(record),
            Err(e) if e.is_io_error() => {
                return Err(Error::Validation(format!("cannot read {}: {e}", path.display())))
            }
            Err(e) => {
                debug!("{}: skipping record: {e}", path.display());
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("{}: skipped {skipped} undecodable records", path.display());
    }
    Ok(())
}

/// Milligrams per unit FDC reports an amino acid in, `None` for units that
/// are not a mass.
fn mg_per_unit(unit_name: &str) -> Option<f64> {
    match unit_name.trim().to_uppercase().as_str() {
        "MG" => Some(1.0),
        "G" => Some(1000.0),
        "UG" => Some(0.001),
        _ => None,
    }
}

pub fn load_nutrient_map(path: &Path) -> Result<NutrientMap> {
    let mut nutrients = NutrientMap::new();
    each_record(path, |record: NutrientRecord| {
        let Ok(id) = record.id.parse::<i64>() else {
            return;
        };
        let Ok(acid) = record.name.parse::<AminoAcid>() else {
            return;
        };
        match mg_per_unit(&record.unit_name) {
            Some(factor) => {
                nutrients.insert(id, (acid, factor));
            }
            None => warn!(
                "nutrient {id} ({acid}) has unsupported unit {:?}, ignored",
                record.unit_name
            ),
        }
    })?;
    Ok(nutrients)
}

/// Amounts per food for the nutrients in `nutrients`, converted to mg.
/// Records with a missing or unparsable id or amount are skipped.
pub fn accumulate_food_amino_acids(path: &Path, nutrients: &NutrientMap) -> Result<FoodAminoMap> {
    let mut per_food = FoodAminoMap::new();
    each_record(path, |record: FoodNutrientRecord| {
        let (Ok(fdc_id), Ok(nutrient_id), Ok(amount)) = (
            record.fdc_id.parse::<i64>(),
            record.nutrient_id.parse::<i64>(),
            record.amount.parse::<f64>(),
        ) else {
            return;
        };
        if let Some(&(acid, factor)) = nutrients.get(&nutrient_id) {
            per_food.entry(fdc_id).or_default().insert(acid, amount * factor);
        }
    })?;
    Ok(per_food)
}

pub fn load_food_info(path: &Path, keep: &BTreeSet<i64>) -> Result<HashMap<i64, FoodInfo>> {
    let mut foods = HashMap::new();
    each_record(path, |record: FoodRecord| {
        let Ok(fdc_id) = record.fdc_id.parse::<i64>() else {
            return;
        };
        if keep.contains(&fdc_id) {
            foods.insert(
                fdc_id,
                FoodInfo {
                    description: record.description,
                    data_type: record.data_type,
                },
            );
        }
    })?;
    Ok(foods)
}

/// Curated datasets score higher than branded label data.
pub fn confidence_for_data_type(data_type: &str) -> f64 {
    let data_type = data_type.to_lowercase().replace('_', " ");
    if data_type.contains("foundation") || data_type.contains("sr legacy") {
        1.0
    } else if data_type.contains("survey") {
        0.9
    } else if data_type.contains("branded") {
        0.8
    } else {
        0.85
    }
}

fn to_rows(
    per_food: &FoodAminoMap,
    foods: &HashMap<i64, FoodInfo>,
    source: &UsdaSource,
) -> Vec<RawRow> {
    let mut rows = Vec::new();
    for (fdc_id, amounts) in per_food {
        let Some(info) = foods.get(fdc_id) else {
            continue;
        };
        let food_name = if info.description.trim().is_empty() {
            format!("USDA Food {fdc_id}")
        } else {
            info.description.clone()
        };
        let confidence = confidence_for_data_type(&info.data_type).to_string();
        for (acid, mg) in amounts {
            rows.push(RawRow {
                source: source.key.clone(),
                food_name: food_name.clone(),
                amino_acid: acid.as_str().to_string(),
                value: mg.to_string(),
                citation: source.citation.clone(),
                unit: "mg".to_string(),
                confidence: confidence.clone(),
                unreadable: None,
            });
        }
    }
    rows
}
