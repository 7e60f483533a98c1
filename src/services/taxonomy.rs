//! eBird taxonomy lookup: common name -> species code.

use std::path::Path;

use strsim::normalized_levenshtein;

/// Minimum similarity for a fuzzy name match (0.0 - 1.0).
const MATCH_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct TaxonEntry {
    pub common_name: String,
    pub code: String,
}

/// In-memory species list from the eBird taxonomy CSV.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entries: Vec<TaxonEntry>,
}

impl Taxonomy {
    pub fn from_entries(entries: Vec<TaxonEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let text = std::fs::read_to_string(path)?;
        let taxonomy = Self::parse_csv(&text)?;
        tracing::info!(
            path = %path.display(),
            species = taxonomy.len(),
            "Loaded eBird taxonomy"
        );
        Ok(taxonomy)
    }

    /// Parse the taxonomy CSV, keeping rows whose `CATEGORY` is `species`.
    pub fn parse_csv(text: &str) -> Result<Self, TaxonomyError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .map(|h| split_csv_line(h.trim_start_matches('\u{feff}')))
            .ok_or_else(|| TaxonomyError::Format("empty taxonomy file".to_string()))?;

        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| TaxonomyError::Format(format!("missing column {name}")))
        };
        let name_col = column("PRIMARY_COM_NAME")?;
        let code_col = column("SPECIES_CODE")?;
        let category_col = column("CATEGORY")?;

        let entries = lines
            .filter(|line| !line.trim().is_empty())
            .map(split_csv_line)
            .filter(|row| row.get(category_col).map(|c| c.trim()) == Some("species"))
            .filter_map(|row| {
                let common_name = row.get(name_col)?.trim().to_string();
                let code = row.get(code_col)?.trim().to_string();
                (!common_name.is_empty() && !code.is_empty()).then_some(TaxonEntry { common_name, code })
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact case-insensitive match first, then the closest name above the
    /// similarity threshold.
    pub fn resolve(&self, common_name: &str) -> Option<&TaxonEntry> {
        let wanted = common_name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        if let Some(exact) = self
            .entries
            .iter()
            .find(|e| e.common_name.to_lowercase() == wanted)
        {
            return Some(exact);
        }

        self.entries
            .iter()
            .map(|e| (e, normalized_levenshtein(&wanted, &e.common_name.to_lowercase())))
            .filter(|(_, score)| *score > MATCH_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, _)| e)
    }
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => in_quotes = !in_quotes,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("Failed to read taxonomy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid taxonomy CSV: {0}")]
    Format(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\u{feff}TAXON_ORDER,CATEGORY,SPECIES_CODE,PRIMARY_COM_NAME,SCI_NAME\n\
        1,species,ostric2,Common Ostrich,Struthio camelus\n\
        2,slash,y00934,\"Ostrich, Common/Somali\",Struthio sp.\n\
        3,species,amerob,American Robin,Turdus migratorius\n\
        4,species,sonspa,Song Sparrow,Melospiza melodia\n";

    #[test]
    fn test_parse_keeps_species_rows_only() {
        let taxonomy = Taxonomy::parse_csv(CSV).unwrap();
        assert_eq!(taxonomy.len(), 3);
    }

    #[test]
    fn test_split_quoted_fields() {
        let fields = split_csv_line(r#"a,"b, c","say ""hi""",d"#);
        assert_eq!(fields, ["a", "b, c", r#"say "hi""#, "d"]);
    }

    #[test]
    fn test_missing_column_is_error() {
        assert!(matches!(
            Taxonomy::parse_csv("CATEGORY,SPECIES_CODE\nspecies,x\n"),
            Err(TaxonomyError::Format(_))
        ));
    }

    #[test]
    fn test_exact_match_ignores_case() {
        let taxonomy = Taxonomy::parse_csv(CSV).unwrap();
        assert_eq!(taxonomy.resolve("american robin").unwrap().code, "amerob");
    }

    #[test]
    fn test_fuzzy_match() {
        let taxonomy = Taxonomy::parse_csv(CSV).unwrap();
        assert_eq!(taxonomy.resolve("American Robbin").unwrap().code, "amerob");
        assert!(taxonomy.resolve("Bald Eagle").is_none());
    }
}
