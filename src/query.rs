//! SQL for the derived tables and per-doctor aggregates.
//!
//! Values (codes, the exclusion pattern) are always bound as numbered
//! parameters. Identifiers come from a validated [`ClaimsSchema`].

use crate::schema::{ClaimsSchema, quote_ident};

/// A statement plus the values bound to `?1..?n`, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<String>,
}

fn numbered_placeholders(range: std::ops::Range<usize>) -> String {
    range
        .map(|i| format!("?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE IF NOT EXISTS` for the diagnosis-filtered encounters.
///
/// Each code is bound once and shared by every slot's `IN` list. The exclusion
/// pattern, when present, is bound once after the codes and checked against
/// every slot; a single matching slot removes the encounter. NULL slots match
/// neither side.
pub fn create_diagnosis_table(
    schema: &ClaimsSchema,
    diagnosis_codes: &[String],
    excluded_diagnoses: Option<&str>,
) -> BoundQuery {
    let codes = numbered_placeholders(0..diagnosis_codes.len());
    let slots: Vec<String> = schema
        .diagnosis_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect();

    let any_included = slots
        .iter()
        .map(|slot| format!("{slot} IN ({codes})"))
        .collect::<Vec<_>>()
        .join("\n                OR ");

    let mut params = diagnosis_codes.to_vec();
    let mut predicate = format!("(\n                {any_included}\n            )");

    if let Some(pattern) = excluded_diagnoses {
        params.push(pattern.to_string());
        let exclusion = format!("?{}", params.len());
        let none_excluded = slots
            .iter()
            .map(|slot| format!("({slot} IS NULL OR {slot} NOT LIKE {exclusion})"))
            .collect::<Vec<_>>()
            .join("\n                AND ");
        predicate.push_str(&format!(
            "\n            AND (\n                {none_excluded}\n            )"
        ));
    }

    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} AS
        SELECT {encounter_key}, {doctor_id}, {patient_id}
        FROM {header_table}
        WHERE {predicate}
        "#,
        table = quote_ident(&schema.diagnosis_table),
        encounter_key = quote_ident(&schema.encounter_key),
        doctor_id = quote_ident(&schema.doctor_id),
        patient_id = quote_ident(&schema.patient_id),
        header_table = quote_ident(&schema.header_table),
    );

    BoundQuery { sql, params }
}

/// `CREATE TABLE IF NOT EXISTS` for the procedure-filtered service lines.
pub fn create_procedure_table(schema: &ClaimsSchema, procedure_codes: &[String]) -> BoundQuery {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} AS
        SELECT {encounter_key}, {procedure}
        FROM {service_line_table}
        WHERE {procedure} IN ({codes})
        "#,
        table = quote_ident(&schema.procedure_table),
        encounter_key = quote_ident(&schema.encounter_key),
        procedure = quote_ident(&schema.procedure_column),
        service_line_table = quote_ident(&schema.service_line_table),
        codes = numbered_placeholders(0..procedure_codes.len()),
    );

    BoundQuery {
        sql,
        params: procedure_codes.to_vec(),
    }
}

/// Distinct diagnosed patients who share an encounter with a qualifying procedure.
///
/// Doctor and patient ids are compared by their text form so integer and text
/// encodings of the same id are one identity.
pub fn count_operated_on(schema: &ClaimsSchema) -> String {
    let doctor_id = quote_ident(&schema.doctor_id);
    let patient_id = quote_ident(&schema.patient_id);
    let encounter_key = quote_ident(&schema.encounter_key);
    format!(
        r#"
        SELECT CAST(diagnosis.{doctor_id} AS TEXT) AS doctor_id,
               COUNT(DISTINCT CAST(diagnosis.{patient_id} AS TEXT)) AS num_operated_on
        FROM {diagnosis_table} AS diagnosis
        INNER JOIN {procedure_table} AS procedures
            ON diagnosis.{encounter_key} = procedures.{encounter_key}
        WHERE diagnosis.{doctor_id} IS NOT NULL
        GROUP BY 1
        "#,
        diagnosis_table = quote_ident(&schema.diagnosis_table),
        procedure_table = quote_ident(&schema.procedure_table),
    )
}

pub fn count_diagnosed(schema: &ClaimsSchema) -> String {
    let doctor_id = quote_ident(&schema.doctor_id);
    format!(
        r#"
        SELECT CAST({doctor_id} AS TEXT) AS doctor_id,
               COUNT(DISTINCT CAST({patient_id} AS TEXT)) AS num_diagnosed
        FROM {diagnosis_table}
        WHERE {doctor_id} IS NOT NULL
        GROUP BY 1
        "#,
        patient_id = quote_ident(&schema.patient_id),
        diagnosis_table = quote_ident(&schema.diagnosis_table),
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn diagnosis_codes_are_bound_once_and_shared_by_every_slot() {
        let schema = ClaimsSchema::default();
        let query = create_diagnosis_table(&schema, &codes(&["250.00", "250.01"]), Some("152.%"));

        assert_eq!(query.params, codes(&["250.00", "250.01", "152.%"]));
        assert_eq!(query.sql.matches("IN (?1, ?2)").count(), 26);
        assert_eq!(query.sql.matches("NOT LIKE ?3").count(), 26);
        assert!(query.sql.contains("\"D25\" IN (?1, ?2)"));
        assert!(query.sql.contains("(\"DA\" IS NULL OR \"DA\" NOT LIKE ?3)"));
        assert!(!query.sql.contains("250.00"));
    }

    #[test]
    fn diagnosis_query_without_exclusion_has_no_like_clause() {
        let schema = ClaimsSchema::default();
        let query = create_diagnosis_table(&schema, &codes(&["250.00"]), None);
        assert_eq!(query.params, codes(&["250.00"]));
        assert!(!query.sql.contains("NOT LIKE"));
    }

    #[test]
    fn diagnosis_query_follows_custom_slots() {
        let schema = ClaimsSchema {
            diagnosis_columns: codes(&["DX1", "DX2"]),
            diagnosis_table: "dx_subset".to_string(),
            ..ClaimsSchema::default()
        };
        let query = create_diagnosis_table(&schema, &codes(&["A"]), Some("B%"));
        assert!(query.sql.contains("CREATE TABLE IF NOT EXISTS \"dx_subset\""));
        assert_eq!(query.sql.matches(" IN (?1)").count(), 2);
        assert_eq!(query.sql.matches("NOT LIKE ?2").count(), 2);
        assert!(!query.sql.contains("\"D1\""));
    }

    #[test]
    fn procedure_query_binds_each_code() {
        let schema = ClaimsSchema::default();
        let query = create_procedure_table(&schema, &codes(&["33510", "33511", "33512"]));
        assert_eq!(query.params.len(), 3);
        assert!(query.sql.contains("\"procedure\" IN (?1, ?2, ?3)"));
        assert!(query.sql.contains("FROM \"medical_service_lines\""));
    }

    #[test]
    fn aggregate_queries_count_distinct_patients() {
        let schema = ClaimsSchema::default();
        let operated = count_operated_on(&schema);
        assert!(operated.contains("COUNT(DISTINCT CAST(diagnosis.\"patient_id\" AS TEXT))"));
        assert!(operated.contains("INNER JOIN \"procedures_table\""));

        let diagnosed = count_diagnosed(&schema);
        assert!(diagnosed.contains("COUNT(DISTINCT CAST(\"patient_id\" AS TEXT))"));
        assert!(diagnosed.contains("IS NOT NULL"));
    }
}
