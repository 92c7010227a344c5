use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{AttachmentRef, HistoryRecord, Patient, PatientSummary};

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn insert_patient(conn: &mut Connection, patient: &Patient) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    let now = Local::now().naive_local().format(DATETIME_FMT).to_string();

    tx.execute(
        "INSERT INTO patients (id, clinic_id, given_name, family_name, date_of_birth,
         notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            patient.id.to_string(),
            patient.clinic_id.to_string(),
            patient.given_name,
            patient.family_name,
            patient.date_of_birth.map(|d| d.to_string()),
            patient.notes,
            now,
        ],
    )?;

    insert_history_rows(&tx, patient)?;
    tx.commit()?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, clinic_id, given_name, family_name, date_of_birth, notes
         FROM patients WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok(PatientRow {
                id: row.get::<_, String>(0)?,
                clinic_id: row.get::<_, String>(1)?,
                given_name: row.get::<_, String>(2)?,
                family_name: row.get::<_, String>(3)?,
                date_of_birth: row.get::<_, Option<String>>(4)?,
                notes: row.get::<_, Option<String>>(5)?,
            })
        },
    );

    let row = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut patient = patient_from_row(row)?;
    patient.history = fetch_history(conn, id)?;
    Ok(Some(patient))
}

/// Persist the full patient tree: scalar row upsert, then history and
/// attachment rows replaced wholesale inside one transaction.
pub fn save_patient(conn: &mut Connection, patient: &Patient) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    let now = Local::now().naive_local().format(DATETIME_FMT).to_string();

    let updated = tx.execute(
        "UPDATE patients SET clinic_id = ?2, given_name = ?3, family_name = ?4,
         date_of_birth = ?5, notes = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            patient.id.to_string(),
            patient.clinic_id.to_string(),
            patient.given_name,
            patient.family_name,
            patient.date_of_birth.map(|d| d.to_string()),
            patient.notes,
            now,
        ],
    )?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO patients (id, clinic_id, given_name, family_name, date_of_birth,
             notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                patient.id.to_string(),
                patient.clinic_id.to_string(),
                patient.given_name,
                patient.family_name,
                patient.date_of_birth.map(|d| d.to_string()),
                patient.notes,
                now,
            ],
        )?;
    }

    // History and attachment rows are replaced rather than diffed.
    // Attachment rows cascade with their record.
    tx.execute(
        "DELETE FROM history_records WHERE patient_id = ?1",
        params![patient.id.to_string()],
    )?;
    insert_history_rows(&tx, patient)?;

    tx.commit()?;
    Ok(())
}

/// Delete the patient row. History and attachment rows cascade.
pub fn delete_patient(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let id_str = id.to_string();

    let records: i64 = conn.query_row(
        "SELECT COUNT(*) FROM history_records WHERE patient_id = ?1",
        params![id_str],
        |row| row.get(0),
    )?;

    let deleted = conn.execute("DELETE FROM patients WHERE id = ?1", params![id_str])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Patient".into(),
            id: id_str,
        });
    }

    tracing::info!(patient_id = %id, records, "Patient deleted with all history records");
    Ok(())
}

pub fn list_patients(conn: &Connection) -> Result<Vec<PatientSummary>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.given_name, p.family_name, COUNT(h.id)
         FROM patients p
         LEFT JOIN history_records h ON h.patient_id = p.id
         GROUP BY p.id
         ORDER BY p.family_name, p.given_name",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut summaries = Vec::new();
    for row in rows {
        let (id, given_name, family_name, record_count) = row?;
        summaries.push(PatientSummary {
            id: parse_uuid(&id)?,
            given_name,
            family_name,
            record_count: record_count as u32,
        });
    }
    Ok(summaries)
}

fn insert_history_rows(tx: &Transaction<'_>, patient: &Patient) -> Result<(), DatabaseError> {
    let mut record_stmt = tx.prepare(
        "INSERT INTO history_records (id, patient_id, recorded_at, note)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut attachment_stmt = tx.prepare(
        "INSERT INTO attachments (record_id, position, object_key, url)
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    for record in &patient.history {
        record_stmt.execute(params![
            record.id.to_string(),
            patient.id.to_string(),
            record.recorded_at.format(DATETIME_FMT).to_string(),
            record.note,
        ])?;
        for (position, attachment) in record.attachments.iter().enumerate() {
            attachment_stmt.execute(params![
                record.id.to_string(),
                position as i64,
                attachment.key,
                attachment.url,
            ])?;
        }
    }
    Ok(())
}

fn fetch_history(conn: &Connection, patient_id: &Uuid) -> Result<Vec<HistoryRecord>, DatabaseError> {
    let mut record_stmt = conn.prepare(
        "SELECT id, recorded_at, note FROM history_records
         WHERE patient_id = ?1 ORDER BY recorded_at DESC",
    )?;
    let rows = record_stmt.query_map(params![patient_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut attachment_stmt = conn.prepare(
        "SELECT object_key, url FROM attachments
         WHERE record_id = ?1 ORDER BY position",
    )?;

    let mut history = Vec::new();
    for row in rows {
        let (id, recorded_at, note) = row?;
        let record_id = parse_uuid(&id)?;

        let attachment_rows = attachment_stmt.query_map(params![id], |row| {
            Ok(AttachmentRef {
                key: row.get::<_, String>(0)?,
                url: row.get::<_, String>(1)?,
            })
        })?;
        let mut attachments = Vec::new();
        for attachment in attachment_rows {
            attachments.push(attachment?);
        }

        history.push(HistoryRecord {
            id: record_id,
            recorded_at: parse_datetime(&recorded_at),
            note,
            attachments,
            pending_deletion: false,
        });
    }
    Ok(history)
}

// Internal row type for Patient scalar mapping
struct PatientRow {
    id: String,
    clinic_id: String,
    given_name: String,
    family_name: String,
    date_of_birth: Option<String>,
    notes: Option<String>,
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: parse_uuid(&row.id)?,
        clinic_id: parse_uuid(&row.clinic_id)?,
        given_name: row.given_name,
        family_name: row.family_name,
        date_of_birth: row
            .date_of_birth
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        notes: row.notes,
        history: Vec::new(),
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

fn parse_datetime(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, DATETIME_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .unwrap_or_default()
}
