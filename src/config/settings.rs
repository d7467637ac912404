//! Settings management via SQLite.

use crate::db::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid value for setting {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Settings manager backed by SQLite.
pub struct Settings<'a> {
    db: &'a Database,
}

impl<'a> Settings<'a> {
    /// Create a new settings manager.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get a setting value.
    pub fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let result: Result<String, _> = self.db.conn().query_row(
            "SELECT value FROM settings WHERE key = ?",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SettingsError::Database(e)),
        }
    }

    /// Get a setting value or return a default.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .ok()
            .flatten()
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a boolean setting.
    pub fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        match self.get(key)? {
            Some(v) => Ok(matches!(
                v.to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            None => Ok(false),
        }
    }

    /// Get a numeric setting, failing on values that don't parse.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, SettingsError> {
        match self.get(key)? {
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| SettingsError::Invalid {
                    key: key.to_string(),
                    value: v,
                }),
            None => Ok(None),
        }
    }

    /// Set a setting value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.db.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    /// Delete a setting.
    pub fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.db
            .conn()
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(())
    }

    /// List all settings.
    pub fn list(&self) -> Result<Vec<(String, String)>, SettingsError> {
        let mut stmt = self
            .db
            .conn()
            .prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn get_missing_returns_none() {
        let db = setup_db();
        assert_eq!(Settings::new(&db).get("model").unwrap(), None);
    }

    #[test]
    fn set_then_get_upserts() {
        let db = setup_db();
        let settings = Settings::new(&db);

        settings.set("model", "a").unwrap();
        settings.set("model", "b").unwrap();

        assert_eq!(settings.get("model").unwrap().as_deref(), Some("b"));
        assert_eq!(settings.list().unwrap().len(), 1);
    }

    #[test]
    fn get_or_falls_back() {
        let db = setup_db();
        assert_eq!(Settings::new(&db).get_or("missing", "dflt"), "dflt");
    }

    #[test]
    fn get_bool_accepts_truthy_values() {
        let db = setup_db();
        let settings = Settings::new(&db);

        for value in ["true", "1", "YES", "on"] {
            settings.set("flag", value).unwrap();
            assert!(settings.get_bool("flag").unwrap(), "{value} should be true");
        }
        settings.set("flag", "off").unwrap();
        assert!(!settings.get_bool("flag").unwrap());
        assert!(!settings.get_bool("unset").unwrap());
    }

    #[test]
    fn get_u64_parses_and_rejects() {
        let db = setup_db();
        let settings = Settings::new(&db);

        settings.set("max_tokens", " 2048 ").unwrap();
        assert_eq!(settings.get_u64("max_tokens").unwrap(), Some(2048));

        settings.set("max_tokens", "lots").unwrap();
        assert!(matches!(
            settings.get_u64("max_tokens"),
            Err(SettingsError::Invalid { .. })
        ));
    }

    #[test]
    fn delete_removes_value() {
        let db = setup_db();
        let settings = Settings::new(&db);

        settings.set("k", "v").unwrap();
        settings.delete("k").unwrap();
        assert_eq!(settings.get("k").unwrap(), None);
    }

    #[test]
    fn list_sorted_by_key() {
        let db = setup_db();
        let settings = Settings::new(&db);

        settings.set("zeta", "1").unwrap();
        settings.set("alpha", "2").unwrap();

        let keys: Vec<_> = settings.list().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["alpha", "zeta"]);
    }
}
