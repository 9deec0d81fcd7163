//! Tool declarations and system prompt for the reasoning agent
//!
//! The JSON schemas here are the wire contract of the four bridge
//! operations. The descriptions matter: they are what teaches the model to
//! wrap pseudonyms in `{s{...}}` / `{t{...}}` markers instead of trying to
//! print names it cannot know.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// System instructions driving the function-call flowchart
pub const SYSTEM_PROMPT: &str = "\
SYSTEM INSTRUCTIONS
For all user questions, follow this flowchart of actions
1) First, you must get the schema of the database with get_schema.
2) Next, use get_table_info to learn the columns of any table you plan to query, \
including the metadata tables that describe fields.
3) Examine your function options. Choose one and return the function call if appropriate.
4) Examine the results of the function call.
5) Repeat steps 3 and 4 until a narrative response is appropriate.
6) If asked to list names, use hashed IDs in place of names.
7) If your narrative answer includes hashed values, you MUST use the template_response \
function call.
8) Be concise and completely true to the data in your narrative response. Explain where \
your answers came from in the database.
";

/// The four tool declarations, in Anthropic Messages tool format
pub static TOOL_DEFINITIONS: Lazy<Value> = Lazy::new(|| {
    json!([
        {
            "name": "get_schema",
            "description": "Use this function to get the full schema printout from the \
                database. This will provide information about the different tables and views \
                in the database, including the titles of tables, their data, and the datatypes.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "description": "The name of this function, get_schema, to be used \
                            by the code. Always answer with get_schema."
                    }
                },
                "required": []
            }
        },
        {
            "name": "get_table_info",
            "description": "Use this function to list the column names of one table in the \
                database.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "table_id": {
                        "type": "string",
                        "description": "The exact name of the table that you want to find \
                            information about. Always use fully qualified table names: the \
                            exact name of the table as it appears in the database schema."
                    }
                },
                "required": ["table_id"]
            }
        },
        {
            "name": "sql_query",
            "description": "Based on the information gathered in get_schema and \
                get_table_info, this function sends an ai-generated sql query to the database \
                for execution and returns results that can answer the user's question.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SQL query on a single line that will help give \
                            quantitative answers to the user's question when run on the given \
                            sql database. In the SQL query, always use the fully qualified \
                            dataset and table names. Always wrap table names in quotes to \
                            avoid errors."
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "template_response",
            "description": "If your final response includes at least one hashed value, use \
                this function to create a structured response so that the program can look up \
                the hashed value(s).",
            "input_schema": {
                "type": "object",
                "properties": {
                    "final_response": {
                        "type": "string",
                        "description": "Your final response that includes the literal hashed \
                            value(s) in context, as if those values are names. Wrap those \
                            values in double curly braces, like this: {s{hash value}}. As you \
                            can see, you must include a letter s or t between the first pair \
                            of curly braces to indicate whether the person is a teacher or \
                            student. Examples: 'The students {s{12345}} and {s{67890}} are in \
                            cluster 3 for Math 6+.', 'The teacher {t{1f999ee01}} is doing well \
                            in the cluster analysis for Science 7.', 'Here are the students in \
                            cluster 2 in {t{0912049012}}''s class: {s{a1b2c3d4e5}}, \
                            {s{f6g7h8i9j0}}.'"
                    }
                },
                "required": ["final_response"]
            }
        }
    ])
});
