use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized drug-label section. `Other` collects SPL codes outside the
/// fixed vocabulary and is never offered to the intent router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Section {
    IndicationsAndUsage,
    DosageAndAdministration,
    Contraindications,
    WarningsAndPrecautions,
    AdverseReactions,
    UseInSpecificPopulations,
    HowSuppliedStorageAndHandling,
    PatientCounselingInformation,
    ClinicalPharmacology,
    Other,
}

impl Section {
    /// Routable vocabulary, in the order it is presented to the router.
    pub const VOCABULARY: [Section; 9] = [
        Section::DosageAndAdministration,
        Section::Contraindications,
        Section::WarningsAndPrecautions,
        Section::AdverseReactions,
        Section::UseInSpecificPopulations,
        Section::HowSuppliedStorageAndHandling,
        Section::PatientCounselingInformation,
        Section::IndicationsAndUsage,
        Section::ClinicalPharmacology,
    ];

    /// Sections searched when routing yields nothing usable.
    pub const FALLBACK: [Section; 4] = [
        Section::DosageAndAdministration,
        Section::Contraindications,
        Section::WarningsAndPrecautions,
        Section::AdverseReactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::IndicationsAndUsage => "INDICATIONS_AND_USAGE",
            Section::DosageAndAdministration => "DOSAGE_AND_ADMINISTRATION",
            Section::Contraindications => "CONTRAINDICATIONS",
            Section::WarningsAndPrecautions => "WARNINGS_AND_PRECAUTIONS",
            Section::AdverseReactions => "ADVERSE_REACTIONS",
            Section::UseInSpecificPopulations => "USE_IN_SPECIFIC_POPULATIONS",
            Section::HowSuppliedStorageAndHandling => "HOW_SUPPLIED_STORAGE_AND_HANDLING",
            Section::PatientCounselingInformation => "PATIENT_COUNSELING_INFORMATION",
            Section::ClinicalPharmacology => "CLINICAL_PHARMACOLOGY",
            Section::Other => "OTHER",
        }
    }

    /// Parse a section name. Case and surrounding whitespace are ignored.
    pub fn from_name(name: &str) -> Option<Section> {
        let wanted = name.trim().to_ascii_uppercase();
        if wanted == Section::Other.as_str() {
            return Some(Section::Other);
        }
        Section::VOCABULARY
            .iter()
            .copied()
            .find(|s| s.as_str() == wanted)
    }

    /// Map an SPL (LOINC) section code to its normalized section.
    pub fn from_loinc_code(code: &str) -> Section {
        match code.trim() {
            "34067-9" => Section::IndicationsAndUsage,
            "34068-7" => Section::DosageAndAdministration,
            "34070-3" => Section::Contraindications,
            "43685-7" => Section::WarningsAndPrecautions,
            "34084-4" => Section::AdverseReactions,
            "43684-0" => Section::UseInSpecificPopulations,
            "34069-5" => Section::HowSuppliedStorageAndHandling,
            "34076-0" => Section::PatientCounselingInformation,
            "34090-1" => Section::ClinicalPharmacology,
            _ => Section::Other,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
