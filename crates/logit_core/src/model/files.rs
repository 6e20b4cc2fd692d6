//! File records referenced by runs.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Model file category, stored in `ModelFile.model_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFileKind {
    #[serde(rename = "TCF")]
    Tcf,
    #[serde(rename = "ECF")]
    Ecf,
    #[serde(rename = "TGC")]
    Tgc,
    #[serde(rename = "TBC")]
    Tbc,
    #[serde(rename = "BC_DBASE")]
    BcDbase,
    #[serde(rename = "TEF")]
    Tef,
}

impl ModelFileKind {
    pub const ALL: [ModelFileKind; 6] = [
        Self::Tcf,
        Self::Ecf,
        Self::Tgc,
        Self::Tbc,
        Self::BcDbase,
        Self::Tef,
    ];

    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Tcf => "TCF",
            Self::Ecf => "ECF",
            Self::Tgc => "TGC",
            Self::Tbc => "TBC",
            Self::BcDbase => "BC_DBASE",
            Self::Tef => "TEF",
        }
    }

    /// Parses the persisted spelling (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_db_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl Display for ModelFileKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dat {
    pub name: String,
    pub amendments: String,
    pub comments: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    pub name: String,
    pub kind: ModelFileKind,
    pub comments: String,
    pub timestamp: String,
}

/// A model file as seen from one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunModelFile {
    pub model_file: ModelFile,
    /// First run (chronologically) to reference this model file.
    pub new_file: bool,
}

/// A sub-file as seen from one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSubFile {
    pub name: String,
    pub new_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ied {
    pub name: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub amendments: String,
    pub comments: String,
    pub timestamp: String,
}
