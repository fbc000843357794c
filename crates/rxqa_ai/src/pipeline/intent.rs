use rxqa_core::domain::Section;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct IntentPayload {
    #[serde(default)]
    drug: Option<String>,
    // Models emit `null` or mixed-type lists here; neither should cost the drug.
    #[serde(default)]
    sections: Option<Vec<serde_json::Value>>,
}

/// Routing decision extracted from the model's reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutedIntent {
    pub drug: Option<String>,
    pub sections: Vec<Section>,
}

/// Parse `{"drug": ..., "sections": [...]}`, optionally wrapped in a code
/// fence. Unknown section names are dropped; `OTHER` is not routable.
pub fn parse_intent(raw: &str) -> Result<RoutedIntent, String> {
    let body = strip_code_fence(raw.trim());
    let payload: IntentPayload = serde_json::from_str(body).map_err(|e| e.to_string())?;

    let drug = payload
        .drug
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null") && !d.eq_ignore_ascii_case("none"));

    let mut sections: Vec<Section> = Vec::new();
    let names = payload.sections.unwrap_or_default();
    for name in names.iter().filter_map(|v| v.as_str()) {
        match Section::from_name(name) {
            Some(Section::Other) | None => {}
            Some(s) if sections.contains(&s) => {}
            Some(s) => sections.push(s),
        }
    }

    Ok(RoutedIntent { drug, sections })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Skip the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_drug_and_known_sections() {
        let got = parse_intent(
            r#"{"drug": "Metformin", "sections": ["DOSAGE_AND_ADMINISTRATION", "warnings_and_precautions", "DRUG_INTERACTIONS", "OTHER"]}"#,
        )
        .unwrap();
        assert_eq!(
            got,
            RoutedIntent {
                drug: Some("Metformin".to_string()),
                sections: vec![Section::DosageAndAdministration, Section::WarningsAndPrecautions],
            }
        );
    }

    #[test]
    fn null_and_missing_fields_are_empty() {
        assert_eq!(parse_intent(r#"{"drug": null}"#).unwrap(), RoutedIntent::default());
        assert_eq!(parse_intent(r#"{"drug": "null", "sections": []}"#).unwrap(), RoutedIntent::default());
    }

    #[test]
    fn null_sections_keep_the_routed_drug() {
        let got = parse_intent(r#"{"drug": "metformin", "sections": null}"#).unwrap();
        assert_eq!(
            got,
            RoutedIntent {
                drug: Some("metformin".to_string()),
                sections: Vec::new(),
            }
        );

        let got = parse_intent(r#"{"drug": "metformin", "sections": [null, 3, "CONTRAINDICATIONS"]}"#).unwrap();
        assert_eq!(got.drug.as_deref(), Some("metformin"));
        assert_eq!(got.sections, vec![Section::Contraindications]);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let got = parse_intent("```json\n{\"drug\": \"lisinopril\", \"sections\": [\"CONTRAINDICATIONS\"]}\n```").unwrap();
        assert_eq!(got.drug.as_deref(), Some("lisinopril"));
        assert_eq!(got.sections, vec![Section::Contraindications]);
    }

    #[test]
    fn prose_is_a_parse_error() {
        assert!(parse_intent("The user is asking about metformin dosing.").is_err());
        assert!(parse_intent(r#"{"drug": "x", "sections": "DOSAGE"}"#).is_err());
    }
}
