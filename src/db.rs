use std::{fmt::Debug, str::FromStr, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};

use crate::metrics::Metrics;

/// A student's grade record.
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Grade {
    pub id: i64,
    pub student_name: String,
    pub email: String,
    pub class: String,
    pub grade: i64,
}

/// Request body for creating or replacing a grade. Missing fields default to
/// their zero value.
#[derive(Default, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct GradeInput {
    pub student_name: String,
    pub email: String,
    pub class: String,
    pub grade: i64,
}

impl Grade {
    pub fn apply(&mut self, input: GradeInput) {
        self.student_name = input.student_name;
        self.email = input.email;
        self.class = input.class;
        self.grade = input.grade;
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub metrics: Metrics,
}

#[async_trait]
pub trait Database: Sized + Clone + Send + Sync + 'static {
    type Settings: Debug + Clone + Send + Sync + 'static;
    async fn new(settings: &Self::Settings) -> eyre::Result<Self>;
    async fn version(&self) -> eyre::Result<String>;
    fn engine(&self) -> &'static str;
    async fn ping(&self) -> eyre::Result<()>;

    async fn list_grades(&self) -> eyre::Result<Vec<Grade>>;
    async fn get_grade(&self, id: i64) -> eyre::Result<Option<Grade>>;
    async fn create_grade(&self, input: GradeInput) -> eyre::Result<Grade>;
    async fn update_grade(&self, grade: &Grade) -> eyre::Result<()>;
    async fn delete_grade(&self, id: i64) -> eyre::Result<()>;
    async fn average_grade(&self) -> eyre::Result<f64>;
}

#[derive(Debug, Clone)]
pub struct Sqlite {
    pool: SqlitePool,
    metrics: Metrics,
}

impl Sqlite {
    async fn setup_db(pool: &SqlitePool) -> eyre::Result<()> {
        sqlx::query(
            "create table if not exists grades (
                id           integer primary key autoincrement,
                student_name text    not null default '',
                email        text    not null default '',
                class        text    not null default '',
                grade        integer not null default 0
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Database for Sqlite {
    type Settings = DatabaseSettings;

    async fn new(settings: &Self::Settings) -> eyre::Result<Self> {
        let opts = SqliteConnectOptions::from_str(&settings.url)?
            .journal_mode(SqliteJournalMode::Wal)
            .optimize_on_close(true, None)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        // NOTE: every connection to an in-memory database sees its own empty
        // database, so the pool must never open a second one.
        let in_memory = settings.url.contains(":memory:") || settings.url.contains("mode=memory");

        let mut pool_opts = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
        if in_memory {
            pool_opts = pool_opts
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_opts.connect_with(opts).await?;

        Self::setup_db(&pool).await?;

        Ok(Self {
            pool,
            metrics: settings.metrics.clone(),
        })
    }

    async fn version(&self) -> eyre::Result<String> {
        let result: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await?;

        Ok(result)
    }

    fn engine(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> eyre::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_grades(&self) -> eyre::Result<Vec<Grade>> {
        let _timer = self.metrics.timer("db", "get_grades");
        let grades = sqlx::query_as::<_, Grade>(
            "select id, student_name, email, class, grade from grades order by id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(grades)
    }

    async fn get_grade(&self, id: i64) -> eyre::Result<Option<Grade>> {
        let _timer = self.metrics.timer("db", "get_grades_id");
        let grade = sqlx::query_as::<_, Grade>(
            "select id, student_name, email, class, grade from grades where id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(grade)
    }

    async fn create_grade(&self, input: GradeInput) -> eyre::Result<Grade> {
        let _timer = self.metrics.timer("db", "post_grades");
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "insert into grades(student_name, email, class, grade)
            values(?1, ?2, ?3, ?4)",
        )
        .bind(input.student_name.as_str())
        .bind(input.email.as_str())
        .bind(input.class.as_str())
        .bind(input.grade)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut grade = Grade {
            id: result.last_insert_rowid(),
            ..Default::default()
        };
        grade.apply(input);
        Ok(grade)
    }

    async fn update_grade(&self, grade: &Grade) -> eyre::Result<()> {
        let _timer = self.metrics.timer("db", "put_grades_id");
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "update grades set
                    student_name = ?2,
                    email        = ?3,
                    class        = ?4,
                    grade        = ?5
                where id = ?1",
        )
        .bind(grade.id)
        .bind(grade.student_name.as_str())
        .bind(grade.email.as_str())
        .bind(grade.class.as_str())
        .bind(grade.grade)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn delete_grade(&self, id: i64) -> eyre::Result<()> {
        let _timer = self.metrics.timer("db", "delete_grades_id");
        sqlx::query("delete from grades where id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn average_grade(&self) -> eyre::Result<f64> {
        let _timer = self.metrics.timer("db", "get_grades_avg");
        let average: Option<f64> = sqlx::query_scalar("select avg(grade) from grades")
            .fetch_one(&self.pool)
            .await?;

        Ok(average.unwrap_or(0.0))
    }
}
