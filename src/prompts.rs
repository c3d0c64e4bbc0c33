//! Prompts sent to the generation providers.
//!
//! There is exactly one system prompt and it is the same for every provider;
//! only the request envelope differs (see [`crate::pipeline::provider`]). The
//! receipt text only ever enters through [`user_message`].

/// System prompt describing the task and the JSON shape to return.
pub const SYSTEM_PROMPT: &str = r#"You are an expert meal planner focused on Zero Food Waste.
Analyze the provided grocery receipt text.
1. Identify the edible ingredients.
2. Create a 3-day meal plan (Breakfast, Lunch, Dinner) that uses these ingredients efficiently.
3. Prioritize using highly perishable items (meat, berries, greens) on Day 1.
4. Suggest "Leftover Logic" (e.g., use roast chicken from Day 1 dinner in Day 2 lunch).

Return ONLY valid JSON with this structure:
{
    "pantry_summary": ["item1", "item2"],
    "days": [
        {
            "day": "Day 1",
            "focus": "Eat the Fresh Stuff",
            "meals": {
                "breakfast": { "name": "...", "ingredients_used": ["..."] },
                "lunch": { "name": "...", "ingredients_used": ["..."] },
                "dinner": { "name": "...", "ingredients_used": ["..."] }
            }
        },
        ... (Day 2, Day 3)
    ]
}"#;

/// The user turn carrying the receipt text.
pub fn user_message(receipt_text: &str) -> String {
    format!("Here is the receipt text: \n\n{receipt_text}")
}

/// System prompt and user turn in one block, for providers without a
/// separate system role in the request.
pub fn combined_prompt(receipt_text: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\n{}", user_message(receipt_text))
}
