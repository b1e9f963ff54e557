// Bulk catalog import reducers
// Accept JSON arrays exported from the admin panel (camelCase keys)

use spacetimedb::{reducer, ReducerContext};
use serde_json::Value;

use crate::admin::{self, TaskSpec, UpgradeSpec};
use crate::TaskType;

const UPGRADE_DEFAULT_DIFFICULTY: f64 = crate::config::UPGRADE_COST_EXPONENT;

fn parse_array(json_data: &str, what: &str) -> Result<Vec<Value>, String> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    match data {
        Value::Array(items) => Ok(items),
        _ => Err(format!("Expected JSON array of {}", what)),
    }
}

fn parse_task_type(raw: &str) -> Option<TaskType> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "DAILY" => Some(TaskType::Daily),
        "SOCIAL" => Some(TaskType::Social),
        "CIPHER" => Some(TaskType::Cipher),
        "SPECIAL" => Some(TaskType::Special),
        _ => None,
    }
}

/// Optional u32 field; values that do not fit are rejected, never truncated
fn u32_field(i: usize, u: &Value, name: &str) -> Result<Option<u32>, String> {
    match u.get(name).and_then(|v| v.as_u64()) {
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| format!("Upgrade {}: {} {} out of range", i, name, n)),
        None => Ok(None),
    }
}

/// Parse one upgrade entry; boosts and optional fields default to zero / none
pub fn parse_upgrade(i: usize, u: &Value) -> Result<UpgradeSpec, String> {
    let boost = |name: &str| u.get(name).and_then(|v| v.as_u64()).unwrap_or(0);
    Ok(UpgradeSpec {
        key: u.get("key").and_then(|v| v.as_str()).ok_or(format!("Upgrade {}: missing key", i))?.to_string(),
        name: u.get("name").and_then(|v| v.as_str()).ok_or(format!("Upgrade {}: missing name", i))?.to_string(),
        description: u.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        base_cost: u.get("baseCost").and_then(|v| v.as_u64()).ok_or(format!("Upgrade {}: missing baseCost", i))?,
        max_level: u32_field(i, u, "maxLevel")?.ok_or(format!("Upgrade {}: missing maxLevel", i))?,
        difficulty: u.get("difficulty").and_then(|v| v.as_f64()).unwrap_or(UPGRADE_DEFAULT_DIFFICULTY),
        unlock_level: u32_field(i, u, "unlockLevel")?.unwrap_or(0),
        stars_price: u32_field(i, u, "starsPrice")?,
        pph_boost: boost("pphBoost"),
        tap_boost: u32_field(i, u, "tapBoost")?.unwrap_or(0),
        energy_boost: u32_field(i, u, "energyBoost")?.unwrap_or(0),
        auto_tap_boost: boost("autoTapBoost"),
        is_listed: u.get("isListed").and_then(|v| v.as_bool()).unwrap_or(true),
    })
}

pub fn parse_task(i: usize, t: &Value) -> Result<TaskSpec, String> {
    let type_raw = t.get("type").and_then(|v| v.as_str()).ok_or(format!("Task {}: missing type", i))?;
    let task_type = parse_task_type(type_raw).ok_or(format!("Task {}: unknown type {}", i, type_raw))?;
    Ok(TaskSpec {
        key: t.get("key").and_then(|v| v.as_str()).ok_or(format!("Task {}: missing key", i))?.to_string(),
        title: t.get("title").and_then(|v| v.as_str()).ok_or(format!("Task {}: missing title", i))?.to_string(),
        task_type,
        reward: t.get("reward").and_then(|v| v.as_u64()).ok_or(format!("Task {}: missing reward", i))?,
        link: t.get("link").and_then(|v| v.as_str()).map(|s| s.to_string()),
        is_daily: t.get("isDaily").and_then(|v| v.as_bool()).unwrap_or(task_type == TaskType::Daily),
        is_active: t.get("isActive").and_then(|v| v.as_bool()).unwrap_or(true),
    })
}

/// Upsert the upgrade catalog from a JSON array (matched by key)
/// The whole batch is rejected if any entry is invalid
#[reducer]
pub fn bulk_import_upgrades(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_admin(ctx, "bulk_import_upgrades")?;

    let specs = parse_array(&json_data, "upgrades")?
        .iter()
        .enumerate()
        .map(|(i, u)| {
            let spec = parse_upgrade(i, u)?;
            admin::validate_upgrade(&spec).map_err(|e| format!("Upgrade {}: {}", i, e))?;
            Ok(spec)
        })
        .collect::<Result<Vec<_>, String>>()?;

    let total = specs.len();
    let mut created = 0;
    for spec in specs {
        if admin::store_upgrade(ctx, spec) {
            created += 1;
        }
    }

    log::info!("[IMPORT] upgrades: {} created, {} updated", created, total - created);
    Ok(())
}

/// Upsert the task catalog from a JSON array (matched by key)
#[reducer]
pub fn bulk_import_tasks(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_admin(ctx, "bulk_import_tasks")?;

    let specs = parse_array(&json_data, "tasks")?
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let spec = parse_task(i, t)?;
            admin::validate_task(&spec).map_err(|e| format!("Task {}: {}", i, e))?;
            Ok(spec)
        })
        .collect::<Result<Vec<_>, String>>()?;

    let total = specs.len();
    let mut created = 0;
    for spec in specs {
        if admin::store_task(ctx, spec) {
            created += 1;
        }
    }

    log::info!("[IMPORT] tasks: {} created, {} updated", created, total - created);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_upgrade_defaults() {
        let u = json!({
            "key": "energy_tank",
            "name": "Energy tank",
            "baseCost": 500,
            "maxLevel": 20,
            "energyBoost": 250,
            "starsPrice": 75
        });
        let spec = parse_upgrade(0, &u).unwrap();
        assert_eq!(spec.key, "energy_tank");
        assert_eq!(spec.base_cost, 500);
        assert_eq!(spec.max_level, 20);
        assert_eq!(spec.energy_boost, 250);
        assert_eq!(spec.pph_boost, 0);
        assert_eq!(spec.stars_price, Some(75));
        assert_eq!(spec.description, "");
        assert_eq!(spec.difficulty, UPGRADE_DEFAULT_DIFFICULTY);
        assert!(spec.is_listed);
    }

    #[test]
    fn test_parse_upgrade_reports_index_and_field() {
        let u = json!({ "key": "x", "name": "X", "maxLevel": 3 });
        assert_eq!(parse_upgrade(4, &u).unwrap_err(), "Upgrade 4: missing baseCost");
    }

    #[test]
    fn test_parse_upgrade_rejects_values_past_u32() {
        let u = json!({ "key": "x", "name": "X", "baseCost": 10, "maxLevel": 4_294_967_297u64 });
        assert_eq!(parse_upgrade(2, &u).unwrap_err(), "Upgrade 2: maxLevel 4294967297 out of range");

        let u = json!({ "key": "x", "name": "X", "baseCost": 10, "maxLevel": 5, "energyBoost": 5_000_000_000u64 });
        assert!(parse_upgrade(0, &u).unwrap_err().contains("energyBoost"));

        let u = json!({ "key": "x", "name": "X", "baseCost": 10, "maxLevel": 5, "starsPrice": 4_294_967_296u64 });
        assert!(parse_upgrade(0, &u).unwrap_err().contains("starsPrice"));

        let u = json!({ "key": "x", "name": "X", "baseCost": 10, "maxLevel": u32::MAX, "tapBoost": 7 });
        let spec = parse_upgrade(0, &u).unwrap();
        assert_eq!(spec.max_level, u32::MAX);
        assert_eq!(spec.tap_boost, 7);
    }

    #[test]
    fn test_parse_task() {
        let t = json!({ "key": "daily_login", "title": "Daily login", "type": "daily", "reward": 300 });
        let spec = parse_task(0, &t).unwrap();
        assert_eq!(spec.task_type, TaskType::Daily);
        assert!(spec.is_daily);
        assert!(spec.is_active);
        assert_eq!(spec.link, None);

        let t = json!({
            "key": "follow_x", "title": "Follow", "type": "SOCIAL", "reward": 1000,
            "link": "https://x.com/example", "isActive": false
        });
        let spec = parse_task(1, &t).unwrap();
        assert_eq!(spec.task_type, TaskType::Social);
        assert!(!spec.is_daily);
        assert!(!spec.is_active);

        let t = json!({ "key": "k", "title": "T", "type": "QUIZ", "reward": 1 });
        assert_eq!(parse_task(2, &t).unwrap_err(), "Task 2: unknown type QUIZ");
    }

    #[test]
    fn test_parse_array_rejects_non_arrays() {
        assert!(parse_array("{\"key\":1}", "tasks").is_err());
        assert!(parse_array("not json", "tasks").is_err());
        assert_eq!(parse_array("[]", "tasks").unwrap().len(), 0);
    }
}
