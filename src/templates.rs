pub const SCENARIO_TASK_PROMPT_MD: &str = include_str!("../prompts/scenario_task.md");
pub const TEST_OUTCOME_SCHEMA_JSON: &str = include_str!("../schemas/test_outcome.schema.json");
