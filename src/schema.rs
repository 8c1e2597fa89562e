use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Number of numbered diagnosis slots (`D1`..`D25`) on a claims header row.
pub const NUMBERED_DIAGNOSIS_SLOTS: usize = 25;

/// Names of the source and derived tables/columns the loader touches.
///
/// Identifiers cannot be bound as SQL parameters, so every name here is
/// validated by [`ClaimsSchema::validate`] and quoted with [`quote_ident`]
/// before it is emitted into a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsSchema {
    pub header_table: String,
    pub service_line_table: String,
    pub encounter_key: String,
    pub doctor_id: String,
    pub patient_id: String,
    /// Admitting diagnosis first, then the numbered slots.
    pub diagnosis_columns: Vec<String>,
    pub procedure_column: String,
    pub diagnosis_table: String,
    pub procedure_table: String,
}

impl Default for ClaimsSchema {
    fn default() -> Self {
        let mut diagnosis_columns = Vec::with_capacity(NUMBERED_DIAGNOSIS_SLOTS + 1);
        diagnosis_columns.push("DA".to_string());
        diagnosis_columns.extend((1..=NUMBERED_DIAGNOSIS_SLOTS).map(|i| format!("D{i}")));

        Self {
            header_table: "medical_headers".to_string(),
            service_line_table: "medical_service_lines".to_string(),
            encounter_key: "encounter_key".to_string(),
            doctor_id: "doctor_id".to_string(),
            patient_id: "patient_id".to_string(),
            diagnosis_columns,
            procedure_column: "procedure".to_string(),
            diagnosis_table: "diagnosis_table".to_string(),
            procedure_table: "procedures_table".to_string(),
        }
    }
}

impl ClaimsSchema {
    /// Load a descriptor from JSON. Fields missing from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed reading schema file {}", path.display()))?;
        let schema: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed parsing schema file {}", path.display()))?;
        schema
            .validate()
            .with_context(|| format!("Invalid schema in {}", path.display()))?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        let named = [
            ("header_table", &self.header_table),
            ("service_line_table", &self.service_line_table),
            ("encounter_key", &self.encounter_key),
            ("doctor_id", &self.doctor_id),
            ("patient_id", &self.patient_id),
            ("procedure_column", &self.procedure_column),
            ("diagnosis_table", &self.diagnosis_table),
            ("procedure_table", &self.procedure_table),
        ];
        for (role, ident) in named {
            check_ident(role, ident)?;
        }

        if self.diagnosis_columns.is_empty() {
            bail!("Schema must name at least one diagnosis column");
        }
        for column in &self.diagnosis_columns {
            check_ident("diagnosis_columns", column)?;
        }

        let sources = [&self.header_table, &self.service_line_table];
        for derived in [&self.diagnosis_table, &self.procedure_table] {
            if sources.iter().any(|s| s.eq_ignore_ascii_case(derived)) {
                bail!("Derived table {derived} would shadow a source table");
            }
        }
        if self.diagnosis_table.eq_ignore_ascii_case(&self.procedure_table) {
            bail!(
                "Derived diagnosis and procedure tables share the name {}",
                self.diagnosis_table
            );
        }
        Ok(())
    }
}

fn check_ident(role: &str, ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        bail!("Schema field {role} is empty");
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        bail!("Schema field {role} has invalid identifier {ident:?}");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Schema field {role} has invalid identifier {ident:?}");
    }
    Ok(())
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('\"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_has_admitting_plus_numbered_slots() {
        let schema = ClaimsSchema::default();
        assert_eq!(schema.diagnosis_columns.len(), 26);
        assert_eq!(schema.diagnosis_columns[0], "DA");
        assert_eq!(schema.diagnosis_columns[1], "D1");
        assert_eq!(schema.diagnosis_columns[25], "D25");
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn rejects_identifiers_that_need_escaping() {
        let schema = ClaimsSchema {
            doctor_id: "doctor_id; DROP TABLE x".to_string(),
            ..ClaimsSchema::default()
        };
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("doctor_id"), "{err}");

        let schema = ClaimsSchema {
            header_table: "1headers".to_string(),
            ..ClaimsSchema::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn rejects_empty_diagnosis_slots() {
        let schema = ClaimsSchema {
            diagnosis_columns: Vec::new(),
            ..ClaimsSchema::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn rejects_derived_table_shadowing_source() {
        let schema = ClaimsSchema {
            diagnosis_table: "MEDICAL_HEADERS".to_string(),
            ..ClaimsSchema::default()
        };
        assert!(schema.validate().is_err());

        let schema = ClaimsSchema {
            procedure_table: "diagnosis_table".to_string(),
            ..ClaimsSchema::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(
            &path,
            r#"{ "header_table": "claims_headers", "diagnosis_columns": ["DX1", "DX2"] }"#,
        )
        .unwrap();

        let schema = ClaimsSchema::from_json_file(&path).unwrap();
        assert_eq!(schema.header_table, "claims_headers");
        assert_eq!(schema.diagnosis_columns, vec!["DX1", "DX2"]);
        assert_eq!(schema.service_line_table, "medical_service_lines");
        assert_eq!(schema.diagnosis_table, "diagnosis_table");
    }

    #[test]
    fn json_file_with_bad_identifier_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(&path, r#"{ "patient_id": "patient id" }"#).unwrap();
        assert!(ClaimsSchema::from_json_file(&path).is_err());
    }

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("D1"), "\"D1\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
