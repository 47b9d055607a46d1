use serde::{Deserialize, Serialize};

/// Read model of a generated evaluation report.
///
/// Reports belong to the reporting subsystem; this service only needs to know
/// whose report it is, which evaluator produced it and where the blob lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    /// Scope tag matched against `OrderScope::evaluators`.
    pub evaluator: String,
    /// Object-storage key of the rendered file.
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub created_at: i64,
}

impl Report {
    /// Download filename shown to the user, e.g. `Jane_Doe_claude_report.pdf`.
    pub fn download_filename(&self) -> String {
        let extension = self
            .storage_key
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
            .unwrap_or("pdf");
        let stem: String = format!("{}_{}_report", self.subject_name, self.evaluator)
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect();
        format!("{}.{}", stem, extension)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReport {
    pub subject_id: String,
    pub subject_name: String,
    pub evaluator: String,
    pub storage_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, key: &str) -> Report {
        Report {
            id: "r1".into(),
            subject_id: "s1".into(),
            subject_name: name.into(),
            evaluator: "claude".into(),
            storage_key: key.into(),
            created_at: 0,
        }
    }

    #[test]
    fn filename_replaces_unsafe_characters() {
        let r = report("Jane Doe/Sr.", "reports/s1/claude.pdf");
        assert_eq!(r.download_filename(), "Jane_Doe_Sr._claude_report.pdf");
    }

    #[test]
    fn filename_defaults_to_pdf_without_extension() {
        let r = report("Kim", "reports/s1/claude");
        assert_eq!(r.download_filename(), "Kim_claude_report.pdf");
    }
}
