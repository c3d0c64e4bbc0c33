//! The canonical meal-plan shape returned by every provider.
//!
//! A [`MealPlan`] can only be produced by [`crate::pipeline::normalize`]; its
//! fields are private so nothing else can assemble a half-filled plan. The
//! three-day length is part of the type (`[DayPlan; 3]`).

use serde::Serialize;
use std::fmt::Write as _;

/// A validated three-day plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MealPlan {
    pantry_summary: Vec<String>,
    days: [DayPlan; 3],
}

/// One day of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayPlan {
    /// e.g. "Day 1".
    #[serde(rename = "day")]
    pub label: String,
    /// Short theme for the day, e.g. "Eat the Fresh Stuff".
    pub focus: String,
    pub meals: DayMeals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayMeals {
    pub breakfast: MealEntry,
    pub lunch: MealEntry,
    pub dinner: MealEntry,
}

impl DayMeals {
    /// Meals in serving order with their display names.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &MealEntry)> {
        [
            ("Breakfast", &self.breakfast),
            ("Lunch", &self.lunch),
            ("Dinner", &self.dinner),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MealEntry {
    pub name: String,
    pub ingredients_used: Vec<String>,
}

impl MealPlan {
    pub(crate) fn new(pantry_summary: Vec<String>, days: [DayPlan; 3]) -> Self {
        Self {
            pantry_summary,
            days,
        }
    }

    /// Ingredients the provider detected on the receipt, in its order.
    pub fn pantry_summary(&self) -> &[String] {
        &self.pantry_summary
    }

    pub fn days(&self) -> &[DayPlan; 3] {
        &self.days
    }

    /// Render the plan as Markdown: a "Detected Ingredients" list followed by
    /// one section per day.
    pub fn to_markdown(&self) -> String {
        let mut md = String::from("## Detected Ingredients\n\n");
        if self.pantry_summary.is_empty() {
            md.push_str("_none detected_\n");
        }
        for item in &self.pantry_summary {
            let _ = writeln!(md, "- {item}");
        }

        for day in &self.days {
            let _ = write!(md, "\n## {}", day.label);
            if !day.focus.is_empty() {
                let _ = write!(md, " — {}", day.focus);
            }
            md.push_str("\n\n");
            for (meal, entry) in day.meals.iter() {
                let _ = writeln!(md, "- **{meal}:** {}", entry.name);
                if !entry.ingredients_used.is_empty() {
                    let _ = writeln!(md, "  - Uses: {}", entry.ingredients_used.join(", "));
                }
            }
        }
        md
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;

    #[test]
    fn markdown_lists_pantry_and_every_meal() {
        let md = fixtures::plan().to_markdown();
        assert!(md.starts_with("## Detected Ingredients\n\n- Milk\n- Eggs\n- Bread\n"));
        assert_eq!(md.matches("## Day ").count(), 3);
        assert_eq!(md.matches("**Breakfast:**").count(), 3);
        assert!(md.contains("## Day 2 — Leftovers"));
        assert!(md.contains("  - Uses: Eggs, Bread"));
    }

    #[test]
    fn markdown_omits_uses_line_for_empty_ingredients() {
        let md = fixtures::plan().to_markdown();
        let dinner_line = md
            .lines()
            .position(|l| l.contains("French Toast"))
            .unwrap();
        let next = md.lines().nth(dinner_line + 1).unwrap_or("");
        assert!(!next.contains("Uses:"), "got: {next:?}");
    }

    #[test]
    fn serialises_with_wire_field_names() {
        let json = serde_json::to_value(fixtures::plan()).unwrap();
        assert_eq!(json["days"].as_array().unwrap().len(), 3);
        assert_eq!(json["days"][0]["day"], "Day 1");
        assert_eq!(
            json["days"][0]["meals"]["lunch"]["ingredients_used"][1],
            "Bread"
        );
        assert_eq!(json["pantry_summary"][0], "Milk");
    }
}
