//! Users, groups, the follow graph, activity stream and login sessions.

use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, parse_uuid, require_non_blank, Database};
use crate::auth;
use crate::error::ValidationError;
use crate::models::*;

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.is_active, u.created_at";

const ACTION_SELECT: &str =
    "SELECT a.id, a.actor_id, actor.username, a.verb, a.target_id, target.username, a.timestamp
     FROM actions a
     JOIN users actor ON actor.id = a.actor_id
     LEFT JOIN users target ON target.id = a.target_id";

impl Database {
    // ============================================================
    // User operations
    // ============================================================

    pub fn create_user(&self, input: CreateUserInput) -> Result<User> {
        require_non_blank(&input.username, "username")?;
        require_non_blank(&input.password, "password")?;
        if !input.email.is_empty() && input.email.parse::<lettre::Address>().is_err() {
            return Err(ValidationError::InvalidEmail(input.email).into());
        }

        if self.get_user_by_username(&input.username)?.is_some() {
            return Err(ValidationError::UsernameTaken(input.username).into());
        }

        let password_hash = auth::hash_password(&input.password)?;
        let conn = self.conn();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
            (
                id.to_string(),
                &input.username,
                &input.email,
                &password_hash,
                fmt_datetime(now),
            ),
        )?;

        Ok(User {
            id,
            username: input.username,
            email: input.email,
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"),
                [id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?"),
                [username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Checks credentials. Unknown users, wrong passwords and deactivated
    /// accounts are all reported as `None`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {USER_COLUMNS}, u.password_hash FROM users u WHERE u.username = ?"),
                [username],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(5)?)),
            )
            .optional()?
        };

        let Some((user, password_hash)) = row else {
            return Ok(None);
        };

        if !user.is_active || !auth::verify_password(password, &password_hash)? {
            return Ok(None);
        }

        Ok(Some(user))
    }

    pub fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE users SET is_active = ? WHERE id = ?",
            (is_active, id.to_string()),
        )?;
        if !is_active {
            conn.execute("DELETE FROM login_sessions WHERE user_id = ?", [id.to_string()])?;
        }
        Ok(rows > 0)
    }

    pub fn get_active_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.is_active = 1 ORDER BY u.username"
        ))?;

        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    // ============================================================
    // Group operations
    // ============================================================

    /// Returns the group with this name, creating it on first use.
    pub fn create_group(&self, name: &str) -> Result<Group> {
        require_non_blank(name, "name")?;
        let conn = self.conn();

        conn.execute(
            "INSERT OR IGNORE INTO user_groups (id, name) VALUES (?, ?)",
            (Uuid::new_v4().to_string(), name),
        )?;

        let group = conn.query_row(
            "SELECT id, name FROM user_groups WHERE name = ?",
            [name],
            |row| {
                Ok(Group {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                })
            },
        )?;

        Ok(group)
    }

    pub fn add_user_to_group(&self, group_name: &str, user_id: Uuid) -> Result<Group> {
        let group = self.create_group(group_name)?;
        let conn = self.conn();

        conn.execute(
            "INSERT OR IGNORE INTO user_group_members (group_id, user_id) VALUES (?, ?)",
            (group.id.to_string(), user_id.to_string()),
        )?;

        Ok(group)
    }

    pub fn is_group_member(&self, group_name: &str, user_id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_group_members m
             JOIN user_groups g ON g.id = m.group_id
             WHERE g.name = ? AND m.user_id = ?",
            (group_name, user_id.to_string()),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Addresses of active group members that have an email on file.
    pub fn get_group_member_emails(&self, group_name: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT u.email FROM users u
             JOIN user_group_members m ON m.user_id = u.id
             JOIN user_groups g ON g.id = m.group_id
             WHERE g.name = ? AND u.is_active = 1 AND u.email != ''
             ORDER BY u.username",
        )?;

        let emails = stmt
            .query_map([group_name], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(emails)
    }

    // ============================================================
    // Follow graph
    // ============================================================

    /// Makes `user_id` follow `target_id` and records the action.
    ///
    /// Returns `false` when the follow already existed; no action is recorded then.
    pub fn follow(&self, user_id: Uuid, target_id: Uuid) -> Result<bool> {
        if user_id == target_id {
            return Err(ValidationError::CannotFollowSelf.into());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = fmt_datetime(Utc::now());

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO follows (id, user_id, target_id, started_at) VALUES (?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                target_id.to_string(),
                &now,
            ),
        )?;

        if inserted > 0 {
            tx.execute(
                "INSERT INTO actions (id, actor_id, verb, target_id, timestamp) VALUES (?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    user_id.to_string(),
                    VERB_STARTED_FOLLOWING,
                    target_id.to_string(),
                    &now,
                ),
            )?;
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    /// The activity already recorded for the follow is kept.
    pub fn unfollow(&self, user_id: Uuid, target_id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM follows WHERE user_id = ? AND target_id = ?",
            (user_id.to_string(), target_id.to_string()),
        )?;
        Ok(rows > 0)
    }

    pub fn get_follow(&self, user_id: Uuid, target_id: Uuid) -> Result<Option<Follow>> {
        let conn = self.conn();
        let follow = conn
            .query_row(
                "SELECT id, user_id, target_id, started_at FROM follows
                 WHERE user_id = ? AND target_id = ?",
                (user_id.to_string(), target_id.to_string()),
                follow_from_row,
            )
            .optional()?;
        Ok(follow)
    }

    /// Users following `user_id`, most recent first.
    pub fn get_followers(&self, user_id: Uuid) -> Result<Vec<User>> {
        self.related_users(
            "JOIN follows f ON f.user_id = u.id WHERE f.target_id = ?",
            user_id,
        )
    }

    /// Users that `user_id` follows, most recent first.
    pub fn get_following(&self, user_id: Uuid) -> Result<Vec<User>> {
        self.related_users(
            "JOIN follows f ON f.target_id = u.id WHERE f.user_id = ?",
            user_id,
        )
    }

    pub fn get_related_users(&self, user_id: Uuid, relationship: Relationship) -> Result<Vec<User>> {
        match relationship {
            Relationship::Followers => self.get_followers(user_id),
            Relationship::Following => self.get_following(user_id),
        }
    }

    fn related_users(&self, join: &str, user_id: Uuid) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users u {join} ORDER BY f.started_at DESC, u.username"
        ))?;

        let users = stmt
            .query_map([user_id.to_string()], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    pub fn count_followers(&self, user_id: Uuid) -> Result<u64> {
        self.count_follows("target_id", user_id)
    }

    pub fn count_following(&self, user_id: Uuid) -> Result<u64> {
        self.count_follows("user_id", user_id)
    }

    fn count_follows(&self, column: &str, user_id: Uuid) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM follows WHERE {column} = ?"),
            [user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn get_profile(&self, username: &str) -> Result<Option<UserProfile>> {
        let Some(user) = self.get_user_by_username(username)? else {
            return Ok(None);
        };

        Ok(Some(UserProfile {
            followers_count: self.count_followers(user.id)?,
            following_count: self.count_following(user.id)?,
            user,
        }))
    }

    // ============================================================
    // Activity stream
    // ============================================================

    /// Actions performed by the user, newest first.
    pub fn get_actor_actions(&self, user_id: Uuid) -> Result<Vec<Action>> {
        self.query_actions("WHERE a.actor_id = ?1", user_id)
    }

    /// Actions performed by the users `user_id` follows, newest first.
    pub fn get_dashboard_actions(&self, user_id: Uuid) -> Result<Vec<Action>> {
        self.query_actions(
            "WHERE a.actor_id IN (SELECT target_id FROM follows WHERE user_id = ?1)
               AND a.actor_id != ?1",
            user_id,
        )
    }

    fn query_actions(&self, clause: &str, user_id: Uuid) -> Result<Vec<Action>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ACTION_SELECT} {clause} ORDER BY a.timestamp DESC"
        ))?;

        let actions = stmt
            .query_map([user_id.to_string()], action_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(actions)
    }

    // ============================================================
    // Login sessions
    // ============================================================

    pub fn create_login_session(&self, user_id: Uuid, ttl: Duration) -> Result<String> {
        let conn = self.conn();
        let token = auth::generate_token();
        let now = Utc::now();

        conn.execute(
            "DELETE FROM login_sessions WHERE expires_at <= ?",
            [fmt_datetime(now)],
        )?;
        conn.execute(
            "INSERT INTO login_sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            (
                &token,
                user_id.to_string(),
                fmt_datetime(now + ttl),
                fmt_datetime(now),
            ),
        )?;

        Ok(token)
    }

    /// The logged-in user for a session token, if the session is live.
    pub fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM login_sessions s JOIN users u ON u.id = s.user_id
                     WHERE s.token = ? AND s.expires_at > ? AND u.is_active = 1"
                ),
                (token, fmt_datetime(Utc::now())),
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_login_session(&self, token: &str) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM login_sessions WHERE token = ?", [token])?;
        Ok(rows > 0)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        is_active: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn follow_from_row(row: &Row<'_>) -> rusqlite::Result<Follow> {
    Ok(Follow {
        id: parse_uuid(row.get::<_, String>(0)?),
        user_id: parse_uuid(row.get::<_, String>(1)?),
        target_id: parse_uuid(row.get::<_, String>(2)?),
        started_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<Action> {
    Ok(Action {
        id: parse_uuid(row.get::<_, String>(0)?),
        actor_id: parse_uuid(row.get::<_, String>(1)?),
        actor_username: row.get(2)?,
        verb: row.get(3)?,
        target_id: row.get::<_, Option<String>>(4)?.map(parse_uuid),
        target_username: row.get(5)?,
        timestamp: parse_datetime(row.get::<_, String>(6)?),
    })
}
