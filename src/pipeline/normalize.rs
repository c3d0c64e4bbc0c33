//! Plan normalisation: provider text → validated [`MealPlan`].
//!
//! Providers are asked for a bare JSON object but are not always obedient,
//! so a single outer code fence is stripped first. The document is then
//! walked field by field; the first violation is reported with its path
//! (`$` is the root, e.g. `days[1].meals.lunch.name`) and nothing is
//! returned. A plan is either complete or absent.
//!
//! Accepted field aliases: `pantry_summary`/`pantrySummary` and
//! `ingredients_used`/`ingredientsUsed`.

use crate::error::MalformedPlan;
use crate::output::{DayMeals, DayPlan, MealEntry, MealPlan};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

const MEAL_KEYS: [&str; 3] = ["breakfast", "lunch", "dinner"];

/// Stateless validator for provider output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanNormalizer;

impl PlanNormalizer {
    /// Parse and validate `raw` into a [`MealPlan`].
    pub fn normalize(&self, raw: &str) -> Result<MealPlan, MalformedPlan> {
        normalize(raw)
    }
}

/// Free-function form of [`PlanNormalizer::normalize`].
pub fn normalize(raw: &str) -> Result<MealPlan, MalformedPlan> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| MalformedPlan::new("$", format!("not valid JSON: {e}")))?;
    let root = as_object(&value, "$")?;

    let (pantry_path, pantry) = field_alias(root, "$", "pantry_summary", "pantrySummary")?;
    let pantry_summary = string_array(pantry, &pantry_path)?;

    let days_value = root
        .get("days")
        .ok_or_else(|| MalformedPlan::new("days", "missing field"))?;
    let days_array = days_value
        .as_array()
        .ok_or_else(|| MalformedPlan::new("days", format!("expected array, got {}", kind(days_value))))?;
    if days_array.len() != 3 {
        return Err(MalformedPlan::new(
            "days",
            format!("expected 3 days, got {}", days_array.len()),
        ));
    }

    let days = [
        day(&days_array[0], 0)?,
        day(&days_array[1], 1)?,
        day(&days_array[2], 2)?,
    ];

    debug!(
        "Normalised plan: {} pantry items, {} meals",
        pantry_summary.len(),
        days.len() * MEAL_KEYS.len()
    );
    Ok(MealPlan::new(pantry_summary, days))
}

// ── Fence stripping ──────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

/// Remove one Markdown code fence wrapping the whole document, if present.
pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

// ── Field walkers ────────────────────────────────────────────────────────

fn day(value: &Value, index: usize) -> Result<DayPlan, MalformedPlan> {
    let path = format!("days[{index}]");
    let obj = as_object(value, &path)?;

    let label = string_field(obj, &path, "day")?;
    let focus = string_field(obj, &path, "focus")?;

    let meals_path = format!("{path}.meals");
    let meals_value = obj
        .get("meals")
        .ok_or_else(|| MalformedPlan::new(&meals_path, "missing field"))?;
    let meals = as_object(meals_value, &meals_path)?;

    if let Some(extra) = meals.keys().find(|k| !MEAL_KEYS.contains(&k.as_str())) {
        return Err(MalformedPlan::new(
            format!("{meals_path}.{extra}"),
            "unexpected meal (only breakfast, lunch and dinner are allowed)",
        ));
    }

    Ok(DayPlan {
        label,
        focus,
        meals: DayMeals {
            breakfast: meal(meals, &meals_path, "breakfast")?,
            lunch: meal(meals, &meals_path, "lunch")?,
            dinner: meal(meals, &meals_path, "dinner")?,
        },
    })
}

fn meal(meals: &Map<String, Value>, parent: &str, key: &str) -> Result<MealEntry, MalformedPlan> {
    let path = format!("{parent}.{key}");
    let value = meals
        .get(key)
        .ok_or_else(|| MalformedPlan::new(&path, "missing meal"))?;
    let obj = as_object(value, &path)?;

    let name = string_field(obj, &path, "name")?;
    let (uses_path, uses) = field_alias(obj, &path, "ingredients_used", "ingredientsUsed")?;
    Ok(MealEntry {
        name,
        ingredients_used: string_array(uses, &uses_path)?,
    })
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, MalformedPlan> {
    value
        .as_object()
        .ok_or_else(|| MalformedPlan::new(path, format!("expected object, got {}", kind(value))))
}

/// Look up `snake`, then `camel`; the returned path names whichever matched.
fn field_alias<'a>(
    obj: &'a Map<String, Value>,
    parent: &str,
    snake: &str,
    camel: &str,
) -> Result<(String, &'a Value), MalformedPlan> {
    if let Some(v) = obj.get(snake) {
        return Ok((child_path(parent, snake), v));
    }
    if let Some(v) = obj.get(camel) {
        return Ok((child_path(parent, camel), v));
    }
    Err(MalformedPlan::new(child_path(parent, snake), "missing field"))
}

fn string_field(obj: &Map<String, Value>, parent: &str, key: &str) -> Result<String, MalformedPlan> {
    let path = child_path(parent, key);
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(MalformedPlan::new(
            path,
            format!("expected string, got {}", kind(other)),
        )),
        None => Err(MalformedPlan::new(path, "missing field")),
    }
}

fn string_array(value: &Value, path: &str) -> Result<Vec<String>, MalformedPlan> {
    let items = value
        .as_array()
        .ok_or_else(|| MalformedPlan::new(path, format!("expected array, got {}", kind(value))))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(MalformedPlan::new(
                format!("{path}[{i}]"),
                format!("expected string, got {}", kind(other)),
            )),
        })
        .collect()
}

fn child_path(parent: &str, key: &str) -> String {
    if parent == "$" {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
