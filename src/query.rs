use diesel::mysql::MysqlConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;

use crate::error::{Error, Result};
use crate::models::{AminoAcid, AminoAcidContent, Food, NewContent, NewFood, NewSource, Source};
use crate::store::{RecordStore, StoreTx};

pub type DbPool = r2d2::Pool<ConnectionManager<MysqlConnection>>;

/// MySQL-backed [`RecordStore`] over a pooled diesel connection.
#[derive(Clone)]
pub struct MysqlStore {
    pool: DbPool,
}

impl MysqlStore {
    pub fn connect(database_url: &str, max_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<MysqlConnection>::new(database_url);
        let pool = r2d2::Pool::builder().max_size(max_size).build(manager)?;
        Ok(Self { pool })
    }
}

struct MysqlTx<'a> {
    conn: &'a MysqlConnection,
}

impl StoreTx for MysqlTx<'_> {
    fn find_source(&mut self, source_key: &str) -> Result<Option<Source>> {
        use crate::schema::source::dsl::*;

        Ok(source
            .filter(key.eq(source_key))
            .first::<Source>(self.conn)
            .optional()?)
    }

    fn insert_source(&mut self, new: &NewSource) -> Result<Source> {
        use crate::schema::source::dsl::*;

        diesel::insert_into(source).values(new).execute(self.conn)?;
        // MySQL has no RETURNING; read the row back to learn its generated id.
        Ok(source.filter(key.eq(new.key.as_str())).first::<Source>(self.conn)?)
    }

    fn set_source_citation(&mut self, source_id: i32, text: &str) -> Result<()> {
        use crate::schema::source::dsl::*;

        diesel::update(source.find(source_id))
            .set(citation.eq(text))
            .execute(self.conn)?;
        Ok(())
    }

    fn find_food(&mut self, food_name: &str, owner: i32) -> Result<Option<Food>> {
        use crate::schema::food::dsl::*;

        Ok(food
            .filter(name.eq(food_name))
            .filter(source_id.eq(owner))
            .first::<Food>(self.conn)
            .optional()?)
    }

    fn insert_food(&mut self, new: &NewFood) -> Result<Food> {
        use crate::schema::food::dsl::*;

        diesel::insert_into(food).values(new).execute(self.conn)?;
        Ok(food
            .filter(name.eq(new.name.as_str()))
            .filter(source_id.eq(new.source_id))
            .first::<Food>(self.conn)?)
    }

    fn set_food_coverage(&mut self, food_id: i32, present: i32) -> Result<()> {
        use crate::schema::food::dsl::*;

        diesel::update(food.find(food_id))
            .set((
                essential_present.eq(present),
                amino_data_incomplete.eq(present < AminoAcid::ALL.len() as i32),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn find_content(&mut self, owner: i32, acid: AminoAcid) -> Result<Option<AminoAcidContent>> {
        use crate::schema::amino_acid_content::dsl::*;

        Ok(amino_acid_content
            .filter(food_id.eq(owner))
            .filter(amino_acid.eq(acid.as_str()))
            .first::<AminoAcidContent>(self.conn)
            .optional()?)
    }

    fn insert_content(&mut self, new: &NewContent) -> Result<AminoAcidContent> {
        use crate::schema::amino_acid_content::dsl::*;

        diesel::insert_into(amino_acid_content)
            .values(new)
            .execute(self.conn)?;
        Ok(amino_acid_content
            .filter(food_id.eq(new.food_id))
            .filter(amino_acid.eq(new.amino_acid.as_str()))
            .first::<AminoAcidContent>(self.conn)?)
    }

    fn update_content(
        &mut self,
        content_id: i32,
        mg: f64,
        latest_source: i32,
        best_confidence: f64,
    ) -> Result<()> {
        use crate::schema::amino_acid_content::dsl::*;

        diesel::update(amino_acid_content.find(content_id))
            .set((
                mg_per_100g.eq(mg),
                source_id.eq(latest_source),
                confidence.eq(best_confidence),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn food_contents(&mut self, owner: i32) -> Result<Vec<AminoAcidContent>> {
        use crate::schema::amino_acid_content::dsl::*;

        Ok(amino_acid_content
            .filter(food_id.eq(owner))
            .load::<AminoAcidContent>(self.conn)?)
    }
}

/// Runs `f` in a READ COMMITTED transaction. Without gap locks a second
/// insert of the same natural key waits for the first writer and then fails
/// with a duplicate-key error, and a plain lookup sees the winner's row.
fn read_committed<T, F>(conn: &MysqlConnection, f: &mut F) -> Result<T>
where
    F: FnMut(&mut dyn StoreTx) -> Result<T>,
{
    // Applies to the next transaction started on this connection only.
    diesel::sql_query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED").execute(conn)?;
    conn.transaction::<T, Error, _>(|| f(&mut MysqlTx { conn }))
}

impl RecordStore for MysqlStore {
    /// A deadlock victim has already been rolled back by InnoDB, so the whole
    /// transaction is run once more before giving up.
    fn write<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&mut dyn StoreTx) -> Result<T>,
    {
        let conn = self.pool.get()?;
        let conn: &MysqlConnection = &conn;
        match read_committed(conn, &mut f) {
            Err(Error::Deadlock(reason)) => {
                warn!("write transaction deadlocked ({reason}), running it again");
                read_committed(conn, &mut f)
            }
            other => other,
        }
    }

    fn food(&self, food_id: i32) -> Result<Option<Food>> {
        use crate::schema::food::dsl::*;

        let conn = self.pool.get()?;
        Ok(food.find(food_id).first::<Food>(&*conn).optional()?)
    }

    fn foods(&self, food_ids: &[i32]) -> Result<Vec<Food>> {
        use crate::schema::food::dsl::*;

        let conn = self.pool.get()?;
        Ok(food
            .filter(id.eq_any(food_ids.to_vec()))
            .load::<Food>(&*conn)?)
    }

    fn sources(&self, source_ids: &[i32]) -> Result<Vec<Source>> {
        use crate::schema::source::dsl::*;

        let conn = self.pool.get()?;
        Ok(source
            .filter(id.eq_any(source_ids.to_vec()))
            .load::<Source>(&*conn)?)
    }

    fn contents_for_food(&self, owner: i32) -> Result<Vec<AminoAcidContent>> {
        use crate::schema::amino_acid_content::dsl::*;

        let conn = self.pool.get()?;
        Ok(amino_acid_content
            .filter(food_id.eq(owner))
            .load::<AminoAcidContent>(&*conn)?)
    }

    fn contents_for_acids(&self, acids: &[AminoAcid]) -> Result<Vec<AminoAcidContent>> {
        use crate::schema::amino_acid_content::dsl::*;

        let names: Vec<&str> = acids.iter().map(AminoAcid::as_str).collect();
        let conn = self.pool.get()?;
        Ok(amino_acid_content
            .filter(amino_acid.eq_any(names))
            .load::<AminoAcidContent>(&*conn)?)
    }

    fn search_foods(&self, needle: &str, limit: usize) -> Result<Vec<Food>> {
        use crate::schema::food::dsl::*;

        let conn = self.pool.get()?;
        Ok(food
            .filter(name.like(format!("%{}%", escape_like(needle))))
            .order((name.asc(), id.asc()))
            .limit(limit as i64)
            .load::<Food>(&*conn)?)
    }
}

/// Escapes LIKE wildcards with MySQL's default escape character.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
