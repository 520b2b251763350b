use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    Alert, BloodPressure, Habit, HabitCheckIn, HabitEntry, Resident, VitalSample,
};
use crate::store::{AlertStore, DedupStore, ResidentDirectory, SampleStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn vital_from_row(row: &PgRow) -> sqlx::Result<VitalSample> {
    let systolic: Option<f64> = row.try_get("systolic")?;
    let diastolic: Option<f64> = row.try_get("diastolic")?;
    Ok(VitalSample {
        resident_id: row.try_get("resident_id")?,
        timestamp: row.try_get("recorded_at")?,
        heart_rate: row.try_get("heart_rate")?,
        blood_pressure: systolic
            .zip(diastolic)
            .map(|(systolic, diastolic)| BloodPressure {
                systolic,
                diastolic,
            }),
        temperature: row.try_get("temperature")?,
        oxygen_saturation: row.try_get("oxygen_saturation")?,
    })
}

fn check_in_from_row(row: &PgRow) -> Result<HabitCheckIn> {
    let habits: String = row.try_get("habits").map_err(EngineError::store)?;
    Ok(HabitCheckIn {
        resident_id: row.try_get("resident_id").map_err(EngineError::store)?,
        timestamp: row.try_get("recorded_at").map_err(EngineError::store)?,
        habits: serde_json::from_str(&habits).map_err(EngineError::store)?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let alert_type: String = row.try_get("alert_type").map_err(EngineError::store)?;
    let severity: String = row.try_get("severity").map_err(EngineError::store)?;
    let metrics: String = row.try_get("metrics").map_err(EngineError::store)?;
    Ok(Alert {
        alert_id: row.try_get("alert_id").map_err(EngineError::store)?,
        resident_id: row.try_get("resident_id").map_err(EngineError::store)?,
        alert_type: alert_type.parse()?,
        severity: severity.parse()?,
        timestamp: row.try_get("created_at").map_err(EngineError::store)?,
        details: row.try_get("details").map_err(EngineError::store)?,
        metrics: serde_json::from_str(&metrics).map_err(EngineError::store)?,
        alert_key: row.try_get("alert_key").map_err(EngineError::store)?,
    })
}

fn resident_from_row(row: &PgRow) -> sqlx::Result<Resident> {
    let age: Option<i32> = row.try_get("age")?;
    Ok(Resident {
        resident_id: row.try_get("resident_id")?,
        name: row.try_get("full_name")?,
        date_of_birth: row.try_get("date_of_birth")?,
        age: age.and_then(|a| u32::try_from(a).ok()),
        chronic_conditions: row.try_get("chronic_conditions")?,
        cohort: row.try_get("cohort")?,
    })
}

#[async_trait]
impl SampleStore for PgStore {
    async fn vitals_since(&self, resident_id: &str, since: DateTime<Utc>) -> Result<Vec<VitalSample>> {
        let rows = sqlx::query(
            "SELECT resident_id, recorded_at, heart_rate, systolic, diastolic, \
             temperature, oxygen_saturation \
             FROM urban_blue_zone.vital_samples \
             WHERE resident_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at",
        )
        .bind(resident_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::store)?;

        rows.iter()
            .map(|row| vital_from_row(row).map_err(EngineError::store))
            .collect()
    }

    async fn check_ins_since(
        &self,
        resident_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HabitCheckIn>> {
        let rows = sqlx::query(
            "SELECT resident_id, recorded_at, habits \
             FROM urban_blue_zone.habit_check_ins \
             WHERE resident_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at",
        )
        .bind(resident_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::store)?;

        rows.iter().map(check_in_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO urban_blue_zone.alerts
            (alert_id, resident_id, alert_type, severity, created_at, details, metrics, alert_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (alert_id) DO NOTHING
            "#,
        )
        .bind(alert.alert_id)
        .bind(&alert.resident_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.timestamp)
        .bind(&alert.details)
        .bind(alert.metrics.to_string())
        .bind(&alert.alert_key)
        .execute(&self.pool)
        .await
        .map_err(EngineError::store)?;
        Ok(())
    }

    async fn alerts_since(
        &self,
        resident_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let mut query = String::from(
            "SELECT alert_id, resident_id, alert_type, severity, created_at, details, \
             metrics, alert_key \
             FROM urban_blue_zone.alerts \
             WHERE created_at >= $1",
        );
        if resident_id.is_some() {
            query.push_str(" AND resident_id = $2");
        }
        query.push_str(" ORDER BY created_at");

        let mut rows = sqlx::query(&query).bind(since);
        if let Some(value) = resident_id {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await.map_err(EngineError::store)?;
        records.iter().map(alert_from_row).collect()
    }
}

#[async_trait]
impl DedupStore for PgStore {
    async fn seen_since(&self, alert_key: &str, since: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM urban_blue_zone.alert_dedup \
             WHERE alert_key = $1 AND last_emitted_at >= $2",
        )
        .bind(alert_key)
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::store)?;
        Ok(row.is_some())
    }

    async fn record(&self, alert_key: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO urban_blue_zone.alert_dedup (alert_key, last_emitted_at)
            VALUES ($1, $2)
            ON CONFLICT (alert_key) DO UPDATE
            SET last_emitted_at = GREATEST(alert_dedup.last_emitted_at, EXCLUDED.last_emitted_at)
            "#,
        )
        .bind(alert_key)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(EngineError::store)?;
        Ok(())
    }
}

#[async_trait]
impl ResidentDirectory for PgStore {
    async fn resident(&self, resident_id: &str) -> Result<Option<Resident>> {
        let row = sqlx::query(
            "SELECT resident_id, full_name, date_of_birth, age, chronic_conditions, cohort \
             FROM urban_blue_zone.residents WHERE resident_id = $1",
        )
        .bind(resident_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::store)?;

        row.as_ref()
            .map(resident_from_row)
            .transpose()
            .map_err(EngineError::store)
    }

    async fn roster(&self, cohort: Option<&str>) -> Result<Vec<Resident>> {
        let mut query = String::from(
            "SELECT resident_id, full_name, date_of_birth, age, chronic_conditions, cohort \
             FROM urban_blue_zone.residents",
        );
        if cohort.is_some() {
            query.push_str(" WHERE cohort = $1");
        }
        query.push_str(" ORDER BY resident_id");

        let mut rows = sqlx::query(&query);
        if let Some(value) = cohort {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await.map_err(EngineError::store)?;
        records
            .iter()
            .map(|row| resident_from_row(row).map_err(EngineError::store))
            .collect()
    }
}

#[derive(Debug, serde::Deserialize)]
struct ResidentCsvRow {
    resident_id: String,
    full_name: String,
    date_of_birth: Option<NaiveDate>,
    age: Option<i32>,
    /// Semicolon separated.
    chronic_conditions: Option<String>,
    cohort: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct VitalCsvRow {
    resident_id: String,
    recorded_at: DateTime<Utc>,
    heart_rate: Option<f64>,
    systolic: Option<f64>,
    diastolic: Option<f64>,
    temperature: Option<f64>,
    oxygen_saturation: Option<f64>,
    source_key: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct CheckInCsvRow {
    resident_id: String,
    recorded_at: DateTime<Utc>,
    movement: Option<f64>,
    nutrition: Option<f64>,
    downshift: Option<f64>,
    social: Option<f64>,
    purpose: Option<f64>,
    steps: Option<u32>,
    active_minutes: Option<u32>,
    downshift_minutes: Option<f64>,
    plant_based_meals: Option<u32>,
    total_meals: Option<u32>,
    social_interactions: Option<u32>,
    purpose_pulse: Option<f64>,
    source_key: Option<String>,
}

fn split_conditions(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn habits_from_csv(row: &CheckInCsvRow) -> BTreeMap<Habit, HabitEntry> {
    let entries = [
        (
            Habit::Movement,
            HabitEntry {
                score: row.movement,
                steps: row.steps,
                active_minutes: row.active_minutes,
                ..HabitEntry::default()
            },
        ),
        (
            Habit::Nutrition,
            HabitEntry {
                score: row.nutrition,
                plant_based_meals: row.plant_based_meals,
                total_meals: row.total_meals,
                ..HabitEntry::default()
            },
        ),
        (
            Habit::Downshift,
            HabitEntry {
                score: row.downshift,
                minutes: row.downshift_minutes,
                ..HabitEntry::default()
            },
        ),
        (
            Habit::Social,
            HabitEntry {
                score: row.social,
                interactions: row.social_interactions,
                ..HabitEntry::default()
            },
        ),
        (
            Habit::Purpose,
            HabitEntry {
                score: row.purpose,
                pulse: row.purpose_pulse,
                ..HabitEntry::default()
            },
        ),
    ];

    entries
        .into_iter()
        .filter(|(_, entry)| *entry != HabitEntry::default())
        .collect()
}

pub async fn import_residents(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut upserted = 0usize;

    for result in reader.deserialize::<ResidentCsvRow>() {
        let row = result?;
        sqlx::query(
            r#"
            INSERT INTO urban_blue_zone.residents
            (resident_id, full_name, date_of_birth, age, chronic_conditions, cohort)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resident_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                date_of_birth = EXCLUDED.date_of_birth,
                age = EXCLUDED.age,
                chronic_conditions = EXCLUDED.chronic_conditions,
                cohort = EXCLUDED.cohort
            "#,
        )
        .bind(&row.resident_id)
        .bind(&row.full_name)
        .bind(row.date_of_birth)
        .bind(row.age)
        .bind(split_conditions(row.chronic_conditions.as_deref()))
        .bind(&row.cohort)
        .execute(pool)
        .await?;
        upserted += 1;
    }

    info!(upserted, path = %csv_path.display(), "imported residents");
    Ok(upserted)
}

pub async fn import_vitals(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<VitalCsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO urban_blue_zone.vital_samples
            (id, resident_id, recorded_at, heart_rate, systolic, diastolic,
             temperature, oxygen_saturation, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.resident_id)
        .bind(row.recorded_at)
        .bind(row.heart_rate)
        .bind(row.systolic)
        .bind(row.diastolic)
        .bind(row.temperature)
        .bind(row.oxygen_saturation)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "imported vital samples");
    Ok(inserted)
}

pub async fn import_check_ins(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CheckInCsvRow>() {
        let row = result?;
        let habits = serde_json::to_string(&habits_from_csv(&row))?;
        let source_key = row
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO urban_blue_zone.habit_check_ins
            (id, resident_id, recorded_at, habits, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.resident_id)
        .bind(row.recorded_at)
        .bind(habits)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "imported check-ins");
    Ok(inserted)
}
