//! PostgreSQL implementation of RecordStore
//!
//! - Progress counters advance with a single guarded `UPDATE ... RETURNING`
//! - Status transitions are conditional updates, so a lost race surfaces as an error
//! - JSON page content lives in JSONB columns

use async_trait::async_trait;
use deckgen_core::{
    DescriptionContent, NewPage, NewProject, NewTask, OutlineContent, Page, PageStatus,
    PageUpdate, Project, ProjectStatus, RecordStore, StoreError, TaskError, TaskErrorKind,
    TaskProgress, TaskRecord, TaskStatus, TaskType,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, task_type, owner_id, status, progress_total, progress_completed, \
     progress_failed, error_kind, error_message, created_at, started_at, completed_at";

const PAGE_COLUMNS: &str = "id, project_id, order_index, part, outline_content, \
     description_content, generated_image_path, status, created_at, updated_at";

/// PostgreSQL implementation of RecordStore
///
/// # Example
///
/// ```ignore
/// use deckgen_storage::PostgresRecordStore;
///
/// let store = PostgresRecordStore::connect("postgres://localhost/deckgen").await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to database: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(Self { pool })
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("fetch task"))?;
        row.as_ref().map(task_from_row).transpose()
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    // =========================================================================
    // Projects
    // =========================================================================

    #[instrument(skip(self, project))]
    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let status = project.status.unwrap_or(ProjectStatus::Draft);
        let row = sqlx::query(
            r#"
            INSERT INTO projects (id, status, idea_prompt, extra_requirements)
            VALUES ($1, $2, $3, $4)
            RETURNING id, status, idea_prompt, extra_requirements, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(status.as_str())
        .bind(&project.idea_prompt)
        .bind(&project.extra_requirements)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create project"))?;

        project_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, idea_prompt, extra_requirements, created_at, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get project"))?
        .ok_or(StoreError::ProjectNotFound(project_id))?;

        project_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("update project status"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProjectNotFound(project_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        // Pages go with the project through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete project"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProjectNotFound(project_id));
        }
        debug!(project_id = %project_id, "Project deleted");
        Ok(())
    }

    // =========================================================================
    // Pages
    // =========================================================================

    #[instrument(skip(self, page), fields(project_id = %page.project_id))]
    async fn create_page(&self, page: NewPage) -> Result<Page, StoreError> {
        let status = if page.description_content.is_some() {
            PageStatus::DescriptionGenerated
        } else {
            PageStatus::Draft
        };

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pages (id, project_id, order_index, part, outline_content, description_content, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(page.project_id)
        .bind(page.order_index)
        .bind(&page.part)
        .bind(page.outline_content.map(Json))
        .bind(page.description_content.map(Json))
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::ProjectNotFound(page.project_id)
            }
            _ => {
                error!("Failed to create page: {}", e);
                StoreError::Database(e.to_string())
            }
        })?;

        page_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_page(&self, page_id: Uuid) -> Result<Page, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1"))
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get page"))?
            .ok_or(StoreError::PageNotFound(page_id))?;

        page_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_pages(&self, project_id: Uuid) -> Result<Vec<Page>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE project_id = $1 ORDER BY order_index, id"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list pages"))?;

        rows.iter().map(page_from_row).collect()
    }

    #[instrument(skip(self, update))]
    async fn apply_page_update(
        &self,
        page_id: Uuid,
        update: PageUpdate,
    ) -> Result<Page, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pages
            SET description_content = COALESCE($2, description_content),
                generated_image_path = COALESCE($3, generated_image_path),
                status = COALESCE($4, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(page_id)
        .bind(update.description_content.map(Json))
        .bind(update.generated_image_path)
        .bind(update.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("apply page update"))?
        .ok_or(StoreError::PageNotFound(page_id))?;

        page_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn delete_page(&self, page_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM pages WHERE id = $1")
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete page"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PageNotFound(page_id));
        }
        Ok(())
    }

    // =========================================================================
    // Task records
    // =========================================================================

    #[instrument(skip(self, task), fields(task_type = %task.task_type, owner_id = %task.owner_id))]
    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        let total = i32::try_from(task.total)
            .map_err(|_| StoreError::Serialization(format!("total out of range: {}", task.total)))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (id, task_type, owner_id, status, progress_total)
            VALUES ($1, $2, $3, 'PENDING', $4)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(task.task_type.as_str())
        .bind(task.owner_id)
        .bind(total)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create task"))?;

        task_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.fetch_task(task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    #[instrument(skip(self))]
    async fn mark_task_running(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'RUNNING', started_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("mark task running"))?;

        match row {
            Some(row) => task_from_row(&row),
            None => {
                let current = self.get_task(task_id).await?;
                Err(StoreError::InvalidTransition {
                    task_id,
                    from: current.status,
                    to: TaskStatus::Running,
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn record_item_outcome(
        &self,
        task_id: Uuid,
        succeeded: bool,
    ) -> Result<TaskProgress, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET progress_completed = progress_completed + CASE WHEN $2 THEN 1 ELSE 0 END,
                progress_failed = progress_failed + CASE WHEN $2 THEN 0 ELSE 1 END
            WHERE id = $1
              AND progress_completed + progress_failed < progress_total
            RETURNING progress_total, progress_completed, progress_failed
            "#,
        )
        .bind(task_id)
        .bind(succeeded)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("record item outcome"))?;

        match row {
            Some(row) => progress_from_row(&row),
            None => {
                let current = self.get_task(task_id).await?;
                Err(StoreError::ProgressOverflow {
                    task_id,
                    total: current.progress.total,
                })
            }
        }
    }

    #[instrument(skip(self, progress, error))]
    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<TaskProgress>,
        error: Option<TaskError>,
    ) -> Result<TaskRecord, StoreError> {
        if !status.is_terminal() {
            let current = self.get_task(task_id).await?;
            return Err(StoreError::InvalidTransition {
                task_id,
                from: current.status,
                to: status,
            });
        }

        let counter_value = |value: u32| {
            i32::try_from(value).map_err(|_| StoreError::InvalidProgress {
                task_id,
                reason: format!("counter {value} out of range"),
            })
        };
        let (total, completed, failed) = match progress {
            Some(p) => (
                Some(counter_value(p.total)?),
                Some(counter_value(p.completed)?),
                Some(counter_value(p.failed)?),
            ),
            None => (None, None, None),
        };

        // Counters are replaced only if they keep the total and never go down
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = $2, error_kind = $3, error_message = $4, completed_at = NOW(),
                progress_completed = COALESCE($6, progress_completed),
                progress_failed = COALESCE($7, progress_failed)
            WHERE id = $1 AND status IN ('PENDING', 'RUNNING')
              AND ($5::INTEGER IS NULL OR (
                    $5 = progress_total
                AND $6 >= progress_completed
                AND $7 >= progress_failed
                AND $6 + $7 <= progress_total))
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(status.as_str())
        .bind(error.as_ref().map(|e| e.kind.as_str()))
        .bind(error.as_ref().map(|e| e.message.as_str()))
        .bind(total)
        .bind(completed)
        .bind(failed)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("finish task"))?;

        if let Some(row) = row {
            return task_from_row(&row);
        }

        let current = self.get_task(task_id).await?;
        if current.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                task_id,
                from: current.status,
                to: status,
            });
        }
        let reason = progress
            .and_then(|p| p.replacement_error(&current.progress))
            .unwrap_or_else(|| "rejected by stored counters".to_string());
        Err(StoreError::InvalidProgress { task_id, reason })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("Failed to {}: {}", action, e);
        StoreError::Database(e.to_string())
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: String = row.try_get(column).map_err(column_error(column))?;
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Serialization(e.to_string()))
}

fn column_error(column: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Serialization(format!("column {column}: {e}"))
}

fn counter(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i32 = row.try_get(column).map_err(column_error(column))?;
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("column {column}: negative counter {value}")))
}

fn project_from_row(row: &PgRow) -> Result<Project, StoreError> {
    Ok(Project {
        id: row.try_get("id").map_err(column_error("id"))?,
        status: parse_column::<ProjectStatus>(row, "status")?,
        idea_prompt: row.try_get("idea_prompt").map_err(column_error("idea_prompt"))?,
        extra_requirements: row
            .try_get("extra_requirements")
            .map_err(column_error("extra_requirements"))?,
        created_at: row.try_get("created_at").map_err(column_error("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(column_error("updated_at"))?,
    })
}

fn page_from_row(row: &PgRow) -> Result<Page, StoreError> {
    let outline: Option<Json<OutlineContent>> = row
        .try_get("outline_content")
        .map_err(column_error("outline_content"))?;
    let description: Option<Json<DescriptionContent>> = row
        .try_get("description_content")
        .map_err(column_error("description_content"))?;

    Ok(Page {
        id: row.try_get("id").map_err(column_error("id"))?,
        project_id: row.try_get("project_id").map_err(column_error("project_id"))?,
        order_index: row.try_get("order_index").map_err(column_error("order_index"))?,
        part: row.try_get("part").map_err(column_error("part"))?,
        outline_content: outline.map(|j| j.0),
        description_content: description.map(|j| j.0),
        generated_image_path: row
            .try_get("generated_image_path")
            .map_err(column_error("generated_image_path"))?,
        status: parse_column::<PageStatus>(row, "status")?,
        created_at: row.try_get("created_at").map_err(column_error("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(column_error("updated_at"))?,
    })
}

fn progress_from_row(row: &PgRow) -> Result<TaskProgress, StoreError> {
    Ok(TaskProgress {
        total: counter(row, "progress_total")?,
        completed: counter(row, "progress_completed")?,
        failed: counter(row, "progress_failed")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let error_kind: Option<String> = row.try_get("error_kind").map_err(column_error("error_kind"))?;
    let error_message: Option<String> = row
        .try_get("error_message")
        .map_err(column_error("error_message"))?;
    let error = match error_kind {
        Some(kind) => Some(TaskError {
            kind: kind
                .parse::<TaskErrorKind>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            message: error_message.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(TaskRecord {
        id: row.try_get("id").map_err(column_error("id"))?,
        task_type: parse_column::<TaskType>(row, "task_type")?,
        owner_id: row.try_get("owner_id").map_err(column_error("owner_id"))?,
        status: parse_column::<TaskStatus>(row, "status")?,
        progress: progress_from_row(row)?,
        error,
        created_at: row.try_get("created_at").map_err(column_error("created_at"))?,
        started_at: row.try_get("started_at").map_err(column_error("started_at"))?,
        completed_at: row.try_get("completed_at").map_err(column_error("completed_at"))?,
    })
}
