use rxqa_core::domain::Section;

/// Conjunction of optional metadata predicates applied before ranking.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchFilter {
    drug_key: Option<String>,
    sections: Vec<Section>,
}

impl SearchFilter {
    /// Blank drug names and empty section lists impose no constraint.
    pub fn new(drug: Option<&str>, sections: Option<&[Section]>) -> Self {
        let drug_key = drug.map(drug_key).filter(|d| !d.is_empty());
        let mut uniq: Vec<Section> = Vec::new();
        for s in sections.unwrap_or(&[]) {
            if !uniq.contains(s) {
                uniq.push(*s);
            }
        }
        Self {
            drug_key,
            sections: uniq,
        }
    }

    pub fn matches_all(&self) -> bool {
        self.drug_key.is_none() && self.sections.is_empty()
    }

    /// SQL predicate over `records` plus its positional parameters.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(d) = &self.drug_key {
            params.push(d.clone());
            clauses.push(format!("drug_key = ?{}", params.len()));
        }
        if !self.sections.is_empty() {
            let mut slots = Vec::new();
            for s in &self.sections {
                params.push(s.as_str().to_string());
                slots.push(format!("?{}", params.len()));
            }
            clauses.push(format!("section IN ({})", slots.join(", ")));
        }
        if clauses.is_empty() {
            return ("1 = 1".to_string(), params);
        }
        (clauses.join(" AND "), params)
    }
}

/// Drug names compare case-insensitively, ignoring surrounding whitespace.
pub fn drug_key(name: &str) -> String {
    name.trim().to_lowercase()
}
