use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, parse_uuid, require_non_blank, Database};
use crate::error::ValidationError;
use crate::models::*;

const PROJECT_SELECT: &str =
    "SELECT p.id, p.owner_id, u.username, p.title, p.slug, p.tease, p.published, p.created_at, p.updated_at
     FROM projects p JOIN users u ON u.id = p.owner_id";

impl Database {
    // ============================================================
    // Project operations
    // ============================================================

    pub fn create_project(&self, owner_id: Uuid, input: CreateProjectInput) -> Result<Project> {
        require_non_blank(&input.title, "title")?;
        require_non_blank(&input.slug, "slug")?;
        if !is_valid_slug(&input.slug) {
            return Err(ValidationError::InvalidSlug(input.slug).into());
        }
        if self.get_project_by_slug(&input.slug)?.is_some() {
            return Err(ValidationError::DuplicateProjectSlug(input.slug).into());
        }

        let id = Uuid::new_v4();
        let now = fmt_datetime(Utc::now());
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO projects (id, owner_id, title, slug, tease, published, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    id.to_string(),
                    owner_id.to_string(),
                    &input.title,
                    &input.slug,
                    &input.tease,
                    input.published,
                    &now,
                    &now,
                ),
            )?;
        }

        self.get_project_by_slug(&input.slug)?
            .ok_or_else(|| anyhow::anyhow!("Project {} vanished after insert", id))
    }

    pub fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        let project = conn
            .query_row(
                &format!("{PROJECT_SELECT} WHERE p.slug = ?"),
                [slug],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    /// Published projects of active members, newest first.
    pub fn get_published_projects(&self) -> Result<Vec<Project>> {
        self.query_projects(
            "WHERE p.published = 1 AND u.is_active = 1",
            rusqlite::params![],
        )
    }

    /// Projects of one member, newest first. Drafts only when asked for.
    pub fn get_user_projects(&self, owner_id: Uuid, include_drafts: bool) -> Result<Vec<Project>> {
        self.query_projects(
            "WHERE p.owner_id = ? AND (p.published = 1 OR ?)",
            rusqlite::params![owner_id.to_string(), include_drafts],
        )
    }

    pub fn update_project(&self, slug: &str, input: UpdateProjectInput) -> Result<Option<Project>> {
        let Some(existing) = self.get_project_by_slug(slug)? else {
            return Ok(None);
        };
        if let Some(title) = &input.title {
            require_non_blank(title, "title")?;
        }

        let project = Project {
            title: input.title.unwrap_or(existing.title),
            tease: input.tease.unwrap_or(existing.tease),
            published: input.published.unwrap_or(existing.published),
            updated_at: Utc::now(),
            ..existing
        };

        let conn = self.conn();
        conn.execute(
            "UPDATE projects SET title = ?, tease = ?, published = ?, updated_at = ? WHERE id = ?",
            (
                &project.title,
                &project.tease,
                project.published,
                fmt_datetime(project.updated_at),
                project.id.to_string(),
            ),
        )?;

        Ok(Some(project))
    }

    pub fn delete_project(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM projects WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    fn query_projects(&self, filter: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{PROJECT_SELECT} {filter} ORDER BY p.created_at DESC, p.rowid DESC"))?;

        let projects = stmt
            .query_map(params, project_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(projects)
    }
}

fn is_valid_slug(slug: &str) -> bool {
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: parse_uuid(row.get::<_, String>(0)?),
        owner_id: parse_uuid(row.get::<_, String>(1)?),
        owner_username: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        tease: row.get(5)?,
        published: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
        updated_at: parse_datetime(row.get::<_, String>(8)?),
    })
}
