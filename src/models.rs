use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::schema::{amino_acid_content, food, source};

/// The nine essential amino acids tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AminoAcid {
    Histidine,
    Isoleucine,
    Leucine,
    Lysine,
    Methionine,
    Phenylalanine,
    Threonine,
    Tryptophan,
    Valine,
}

impl AminoAcid {
    pub const ALL: [AminoAcid; 9] = [
        AminoAcid::Histidine,
        AminoAcid::Isoleucine,
        AminoAcid::Leucine,
        AminoAcid::Lysine,
        AminoAcid::Methionine,
        AminoAcid::Phenylalanine,
        AminoAcid::Threonine,
        AminoAcid::Tryptophan,
        AminoAcid::Valine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AminoAcid::Histidine => "histidine",
            AminoAcid::Isoleucine => "isoleucine",
            AminoAcid::Leucine => "leucine",
            AminoAcid::Lysine => "lysine",
            AminoAcid::Methionine => "methionine",
            AminoAcid::Phenylalanine => "phenylalanine",
            AminoAcid::Threonine => "threonine",
            AminoAcid::Tryptophan => "tryptophan",
            AminoAcid::Valine => "valine",
        }
    }
}

impl fmt::Display for AminoAcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AminoAcid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = crate::normalize::identifier(s);
        AminoAcid::ALL
            .iter()
            .copied()
            .find(|aa| aa.as_str() == name)
            .ok_or_else(|| Error::Validation(format!("unknown amino acid {s:?}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable)]
pub struct Source {
    pub id: i32,
    pub key: String,
    pub citation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable)]
pub struct Food {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub source_id: i32,
    pub essential_present: i32,
    pub amino_data_incomplete: bool,
}

/// Stored measurement row. `amino_acid` is kept as the normalized text column;
/// use [`AminoAcidContent::acid`] for the typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable)]
pub struct AminoAcidContent {
    pub id: i32,
    pub food_id: i32,
    pub amino_acid: String,
    pub mg_per_100g: f64,
    pub source_id: i32,
    pub confidence: f64,
}

impl AminoAcidContent {
    pub fn acid(&self) -> Option<AminoAcid> {
        self.amino_acid.parse().ok()
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "source"]
pub struct NewSource {
    pub key: String,
    pub citation: String,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "food"]
pub struct NewFood {
    pub name: String,
    pub display_name: String,
    pub source_id: i32,
    pub essential_present: i32,
    pub amino_data_incomplete: bool,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "amino_acid_content"]
pub struct NewContent {
    pub food_id: i32,
    pub amino_acid: String,
    pub mg_per_100g: f64,
    pub source_id: i32,
    pub confidence: f64,
}
