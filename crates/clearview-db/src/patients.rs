//! PostgreSQL patient lookup.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clearview_core::{Error, Patient, PatientRepository, Result};

/// PostgreSQL patient repository.
pub struct PgPatientRepository {
    pool: Pool<Postgres>,
}

impl PgPatientRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a patient. Used by seeding and integration tests; imports are
    /// handled outside this service.
    pub async fn insert(&self, patient: &Patient) -> Result<()> {
        sqlx::query(
            "INSERT INTO patient (id, first_name, last_name, name, email, phone, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(patient.id)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(&patient.legacy_name)
        .bind(&patient.email)
        .bind(&patient.phone)
        .bind(patient.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    fn parse_row(r: &PgRow) -> Patient {
        Patient {
            id: r.get("id"),
            first_name: r.get("first_name"),
            last_name: r.get("last_name"),
            legacy_name: r.get("name"),
            email: r.get("email"),
            phone: r.get("phone"),
            created_at: r.get("created_at"),
        }
    }
}

#[async_trait]
impl PatientRepository for PgPatientRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, name, email, phone, created_at
             FROM patient WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_row))
    }
}
