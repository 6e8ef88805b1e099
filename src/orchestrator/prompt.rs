//! Prompt construction for both request modes.

use chrono::{DateTime, Local};

use crate::protocol::FixRequest;

/// Message used when a failure carries no text.
pub const UNKNOWN_DB_ERROR: &str = "Unknown database error";

/// System prompt template for conversation mode.
const CONVERSATION_PROMPT_TEMPLATE: &str = r#"You are a DB Query Assistant. Your task is to help users query and analyze database information.

Date: {date}

When using the query tool:
- First, diagnose the database tables and schema by running exploratory queries (e.g. SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'; and SELECT column_name, data_type FROM information_schema.columns WHERE table_name = '<table>';).
- Based on the schema information, frame your final query to get the most accurate results.
- Match text case-insensitively.
- Break your response into multiple steps.
- Table names are case sensitive. Use double quotes for them.
- Column names are case sensitive. Use double quotes for them.

When displaying query results:
- ALWAYS place query results in a table format.
- For complex data or very wide tables, select only the most relevant columns.
- Add a brief explanation of the results after the table.

Never mention or include any programming libraries or runtime details.
ALWAYS USE POSTGRES SYNTAX, NOT ANY OTHER SQL SYNTAX.
Never include technical details in the response.
You can use the query tool multiple times.

[MUST] THE LAST CALL SHOULD BE A TEXT RESPONSE WITH MESSAGE: ✅"#;

/// System prompt template for repair (AutoFix) mode.
const REPAIR_PROMPT_TEMPLATE: &str = r#"You are a SQL Error Fixer. A database query has failed with the error: "{error}".
Your task is to analyze the error and suggest a fixed query.

Based on common PostgreSQL errors:
- If column doesn't exist: Check table schema and correct column name
- If enum value is invalid: Check the valid enum values and use correct casing
- If syntax error: Fix syntax according to PostgreSQL standards
- If table doesn't exist: Check schema for correct table name
{details}
Provide a brief explanation of what was wrong and the fixed query and run the new query using query tool"#;

/// Builds the conversation-mode system prompt.
pub fn conversation_prompt(now: DateTime<Local>, custom_instructions: Option<&str>) -> String {
    let prompt = CONVERSATION_PROMPT_TEMPLATE
        .replace("{date}", &now.format("%A, %B %-d, %Y %H:%M:%S").to_string());
    with_custom_instructions(prompt, custom_instructions)
}

/// Builds the repair-mode system prompt.
pub fn repair_prompt(fix: &FixRequest, custom_instructions: Option<&str>) -> String {
    let mut details = String::new();
    if let Some(sql) = fix.fix_error.sql.as_deref().filter(|s| !s.trim().is_empty()) {
        details.push_str(&format!("\nThe failing query was: {}\n", sql));
    }
    if let Some(context) = &fix.fix_context {
        details.push_str(&format!(
            "\nAdditional context from the user: \"{}\"\n",
            context
        ));
    }

    let prompt = REPAIR_PROMPT_TEMPLATE
        .replace("{error}", error_message(fix))
        .replace("{details}", &details);
    with_custom_instructions(prompt, custom_instructions)
}

/// The synthetic user message that starts a repair turn.
pub fn repair_user_message(fix: &FixRequest) -> String {
    format!("Fix this database error: {}", error_message(fix))
}

fn error_message(fix: &FixRequest) -> &str {
    let message = fix.fix_error.message.as_str();
    if message.trim().is_empty() {
        UNKNOWN_DB_ERROR
    } else {
        message
    }
}

fn with_custom_instructions(mut prompt: String, custom_instructions: Option<&str>) -> String {
    if let Some(instructions) = custom_instructions.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\nCustom Instructions from the user:\n");
        prompt.push_str(instructions);
    }
    prompt
}
