use claims_loader::{ClaimsFilter, ClaimsSchema, DoctorCounts, OutputFormat, export, with_loader};
use rusqlite::{Connection, params};
use std::fs;

fn seed(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE claim_header (
            claim_id TEXT, npi TEXT, member_id TEXT,
            dx_primary TEXT, dx_secondary TEXT
        );
        CREATE TABLE claim_line (claim_id TEXT, cpt TEXT);
        ",
    )
    .unwrap();

    let headers = [
        ("C1", "N1", "M1", Some("250.00"), None),
        ("C2", "N1", "M1", None, Some("250.00")),
        ("C3", "N1", "M2", Some("250.00"), Some("152.3")),
        ("C4", "N2", "M3", Some("250.01"), None),
    ];
    for (claim, npi, member, primary, secondary) in headers {
        conn.execute(
            "INSERT INTO claim_header VALUES (?1, ?2, ?3, ?4, ?5)",
            params![claim, npi, member, primary, secondary],
        )
        .unwrap();
    }
    for (claim, cpt) in [("C2", "33510"), ("C3", "33510"), ("C4", "99213")] {
        conn.execute("INSERT INTO claim_line VALUES (?1, ?2)", params![claim, cpt])
            .unwrap();
    }
}

#[test]
fn descriptor_file_drives_every_table_and_column() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("claims.sqlite");
    seed(&db);

    let schema_path = dir.path().join("schema.json");
    fs::write(
        &schema_path,
        r#"{
            "header_table": "claim_header",
            "service_line_table": "claim_line",
            "encounter_key": "claim_id",
            "doctor_id": "npi",
            "patient_id": "member_id",
            "diagnosis_columns": ["dx_primary", "dx_secondary"],
            "procedure_column": "cpt",
            "diagnosis_table": "dx_subset",
            "procedure_table": "cpt_subset"
        }"#,
    )
    .unwrap();
    let schema = ClaimsSchema::from_json_file(&schema_path).unwrap();

    let filter = ClaimsFilter {
        diagnosis_codes: vec!["250.00".to_string(), "250.01".to_string()],
        procedure_codes: vec!["33510".to_string()],
        excluded_diagnoses: Some("152.%".to_string()),
    };

    let table = with_loader(&db, filter, schema, |loader| {
        let table = loader.doctor_diagnosis_procedure_data()?;
        let derived = loader.derived_row_counts()?;
        assert_eq!(derived.diagnosis_rows, 3);
        assert_eq!(derived.procedure_rows, 2);
        Ok(table)
    })
    .unwrap();

    // C3 is excluded by its secondary diagnosis; C1 and C2 are the same member.
    assert_eq!(
        table.get("N1"),
        Some(DoctorCounts {
            num_diagnosed: 1,
            num_operated_on: 1
        })
    );
    assert_eq!(
        table.get("N2"),
        Some(DoctorCounts {
            num_diagnosed: 1,
            num_operated_on: 0
        })
    );

    let out = dir.path().join("doctors.csv");
    export::write_table_to_path(&table, OutputFormat::Csv, &out).unwrap();
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "doctor_id,num_diagnosed,num_operated_on\nN1,1,1\nN2,1,0\n"
    );
}
