//! Plan data model.
//!
//! A [`Plan`] is an ordered, non-empty list of [`Step`]s. Each step names a
//! [`Skill`] (the operation kind), carries a [`StepParams`] mapping, and an
//! [`OnFail`] policy deciding whether a failure aborts the rest of the run.
//!
//! Plans arrive as untrusted JSON — from a planner LLM or from a file on
//! disk — and nothing here is considered safe until it has passed
//! `validator::validate`. Steps are immutable once validated; the executor
//! never rewrites them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// JSON Schema the raw plan value is checked against before typed decoding.
/// The same text is embedded in the planner prompt so the LLM and the
/// validator always agree on the plan shape.
pub const PLAN_SCHEMA_JSON: &str = include_str!("plan.schema.json");

/// An ordered sequence of steps. Order is execution order: later steps may
/// depend on filesystem state produced by earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// One requested operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub skill: Skill,
    pub params: StepParams,
    #[serde(default)]
    pub on_fail: OnFail,
}

/// The fixed operation kind a step requests.
///
/// `Unknown` is never produced by a validated plan (the schema enum rejects
/// it first); it exists so the executor stays total for callers that load a
/// plan file directly without validation — such a step yields a failing log
/// entry instead of a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Skill {
    CreateFile,
    WriteText,
    AppendText,
    ReplaceText,
    RemoveText,
    ReadFile,
    ListDir,
    MoveFile,
    CopyFile,
    DeleteFile,
    Unknown(String),
}

impl Skill {
    /// Wire name of the skill (snake_case, as it appears in plan JSON).
    pub fn name(&self) -> &str {
        match self {
            Skill::CreateFile => "create_file",
            Skill::WriteText => "write_text",
            Skill::AppendText => "append_text",
            Skill::ReplaceText => "replace_text",
            Skill::RemoveText => "remove_text",
            Skill::ReadFile => "read_file",
            Skill::ListDir => "list_dir",
            Skill::MoveFile => "move_file",
            Skill::CopyFile => "copy_file",
            Skill::DeleteFile => "delete_file",
            Skill::Unknown(name) => name,
        }
    }
}

impl From<String> for Skill {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create_file" => Skill::CreateFile,
            "write_text" => Skill::WriteText,
            "append_text" => Skill::AppendText,
            "replace_text" => Skill::ReplaceText,
            "remove_text" => Skill::RemoveText,
            "read_file" => Skill::ReadFile,
            "list_dir" => Skill::ListDir,
            "move_file" => Skill::MoveFile,
            "copy_file" => Skill::CopyFile,
            "delete_file" => Skill::DeleteFile,
            _ => Skill::Unknown(s),
        }
    }
}

impl From<Skill> for String {
    fn from(skill: Skill) -> Self {
        skill.name().to_string()
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-step failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Stop the run at the first failing step (the default).
    #[default]
    Abort,
    /// Record the failure and move on to the next step.
    Continue,
}

/// Parameter mapping of a step. Which keys are required depends on the
/// skill; the validator enforces that, the executor re-checks defensively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub find: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    /// Replacement cap for replace_text/remove_text. Zero or absent means
    /// unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}
