//! Plan contract: parse the planner's output, validate it against the closed
//! action schema, serialize canonical plan blocks, strip plan JSON from chat
//! replies, and inject fallback fetches for user-shared links.

pub mod inject;
pub mod parser;

pub use inject::{detect_url, inject_fallback_fetch, needs_browser};
pub use parser::{
    extract_fenced_block, format_plan_block, parse_plan, repair_prompt, strip_plan_block,
    validate_plan, PlanParse,
};
