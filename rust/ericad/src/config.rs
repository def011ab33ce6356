//! Per-workspace settings, stored as one JSON object under the `erica` key of
//! the `settings` table and merged over the defaults below.

use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SETTINGS_KEY: &str = "erica";
pub const MAX_SAVE_WRITES_LIMIT: i64 = 20_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EricaSettings {
    pub copy_only_empty_default: bool,
    pub max_save_writes: i64,
    pub include_inactive_topics: bool,
}

impl Default for EricaSettings {
    fn default() -> Self {
        Self {
            copy_only_empty_default: true,
            max_save_writes: 5000,
            include_inactive_topics: false,
        }
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

impl EricaSettings {
    /// Applies a partial update field by field; unknown fields are errors.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "copyOnlyEmptyDefault" => self.copy_only_empty_default = parse_bool(v, k)?,
                "maxSaveWrites" => {
                    self.max_save_writes = parse_i64_range(v, k, 1, MAX_SAVE_WRITES_LIMIT)?
                }
                "includeInactiveTopics" => self.include_inactive_topics = parse_bool(v, k)?,
                _ => return Err(format!("unknown erica setting: {}", k)),
            }
        }
        Ok(())
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = Self::default();
        if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
            if let Some(obj) = saved.as_object() {
                // Malformed historical values fall back to defaults.
                let mut candidate = current.clone();
                if candidate.merge_patch(obj).is_ok() {
                    current = candidate;
                }
            }
        }
        Ok(current)
    }

    pub fn store(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(self)?)
    }
}
