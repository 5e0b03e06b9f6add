//! Static plan acceptance.
//!
//! `validate` is the only gate between an untrusted plan value and the
//! executor. It checks, in order and short-circuiting on the first failure:
//!
//! 1. shape — the raw JSON conforms to the bundled plan schema, then decodes
//!    into the typed [`Plan`] ([`SchemaError`]);
//! 2. per-skill required parameters ([`SchemaError`]);
//! 3. path safety for every path-bearing parameter ([`SafetyError`]);
//! 4. payload-size caps ([`SafetyError`]);
//! 5. editing-target existence for replace/remove ([`SafetyError`]).
//!
//! Acceptance is plan-scope atomic: any failure rejects the whole plan and
//! the executor must never be invoked on it. Validation performs no file
//! mutation — the sandbox root is created when the [`Sandbox`] is opened,
//! before this runs.

use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;

use crate::plan::{Plan, Skill, Step, PLAN_SCHEMA_JSON};
use crate::sandbox::{ResolveError, Sandbox};

/// Ceiling on `text` and `find` payloads, in characters.
pub const MAX_TEXT_CHARS: usize = 20_000;

/// The plan's shape does not conform to the fixed structure.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("plan does not match schema: {0}")]
    Shape(String),
    #[error("plan could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("step {step} has unknown skill `{skill}`")]
    UnknownSkill { step: usize, skill: String },
    #[error("step {step} ({skill}) is missing required parameter `{param}`")]
    MissingParam {
        step: usize,
        skill: Skill,
        param: &'static str,
    },
}

/// A structurally valid step violates a confinement, size, or existence rule.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("step {step} ({skill}) has unsafe path `{path}`: {reason}")]
    UnsafePath {
        step: usize,
        skill: Skill,
        path: String,
        #[source]
        reason: ResolveError,
    },
    #[error("step {step} ({skill}) `{param}` exceeds {MAX_TEXT_CHARS} characters ({len})")]
    PayloadTooLarge {
        step: usize,
        skill: Skill,
        param: &'static str,
        len: usize,
    },
    #[error("step {step} ({skill}) requires a non-empty `find`")]
    EmptyFind { step: usize, skill: Skill },
    #[error("step {step} ({skill}) requires parameter `{param}`")]
    MissingEditParam {
        step: usize,
        skill: Skill,
        param: &'static str,
    },
    #[error("step {step} ({skill}) edits a file that does not exist: {path}")]
    MissingEditTarget {
        step: usize,
        skill: Skill,
        path: String,
    },
}

/// Rejection reason for a whole plan.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Safety(#[from] SafetyError),
}

/// Checks an untrusted plan value and returns the typed, accepted [`Plan`].
pub fn validate(raw: &Value, sandbox: &Sandbox) -> Result<Plan, ValidateError> {
    check_shape(raw)?;
    let plan: Plan = serde_json::from_value(raw.clone()).map_err(SchemaError::Decode)?;
    check_required_params(&plan)?;
    check_path_safety(&plan, sandbox)?;
    check_payload_limits(&plan)?;
    check_edit_targets(&plan, sandbox)?;
    Ok(plan)
}

/// JSON Schema check of the raw value. Reports the first violation with its
/// instance path.
fn check_shape(raw: &Value) -> Result<(), SchemaError> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA_JSON).map_err(SchemaError::Decode)?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| SchemaError::Shape(format!("invalid bundled schema: {e}")))?;
    compiled.validate(raw).map_err(|errors| {
        let message = errors.into_iter().next().map_or_else(
            || "schema validation failed".to_string(),
            |error| format!("`{}` {error}", error.instance_path),
        );
        SchemaError::Shape(message)
    })
}

/// Per-skill structural requirements beyond what the schema expresses:
/// `path` for every skill, `dest` for move/copy. Also refuses plans that
/// somehow carry an unknown skill or no steps (both already caught by the
/// schema for JSON input).
fn check_required_params(plan: &Plan) -> Result<(), SchemaError> {
    if plan.steps.is_empty() {
        return Err(SchemaError::Shape("`/steps` must not be empty".to_string()));
    }
    for (step, s) in plan.steps.iter().enumerate() {
        if let Skill::Unknown(name) = &s.skill {
            return Err(SchemaError::UnknownSkill {
                step,
                skill: name.clone(),
            });
        }
        if s.params.path.is_none() {
            return Err(SchemaError::MissingParam {
                step,
                skill: s.skill.clone(),
                param: "path",
            });
        }
        if matches!(s.skill, Skill::MoveFile | Skill::CopyFile) && s.params.dest.is_none() {
            return Err(SchemaError::MissingParam {
                step,
                skill: s.skill.clone(),
                param: "dest",
            });
        }
    }
    Ok(())
}

/// Static confinement check on every path-bearing parameter.
fn check_path_safety(plan: &Plan, sandbox: &Sandbox) -> Result<(), SafetyError> {
    for (step, s) in plan.steps.iter().enumerate() {
        for raw in path_params(s) {
            if let Err(reason) = sandbox.resolve(raw) {
                return Err(SafetyError::UnsafePath {
                    step,
                    skill: s.skill.clone(),
                    path: raw.to_string(),
                    reason,
                });
            }
        }
    }
    Ok(())
}

fn check_payload_limits(plan: &Plan) -> Result<(), SafetyError> {
    for (step, s) in plan.steps.iter().enumerate() {
        match s.skill {
            Skill::WriteText | Skill::AppendText => {
                let len = s.params.text.as_deref().map_or(0, |t| t.chars().count());
                if len > MAX_TEXT_CHARS {
                    return Err(SafetyError::PayloadTooLarge {
                        step,
                        skill: s.skill.clone(),
                        param: "text",
                        len,
                    });
                }
            }
            Skill::ReplaceText | Skill::RemoveText => {
                let find = s.params.find.as_deref().unwrap_or("");
                if find.is_empty() {
                    return Err(SafetyError::EmptyFind {
                        step,
                        skill: s.skill.clone(),
                    });
                }
                let len = find.chars().count();
                if len > MAX_TEXT_CHARS {
                    return Err(SafetyError::PayloadTooLarge {
                        step,
                        skill: s.skill.clone(),
                        param: "find",
                        len,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Editing a file that does not exist is treated as a suspicious request,
/// not silently auto-created.
fn check_edit_targets(plan: &Plan, sandbox: &Sandbox) -> Result<(), SafetyError> {
    for (step, s) in plan.steps.iter().enumerate() {
        if !matches!(s.skill, Skill::ReplaceText | Skill::RemoveText) {
            continue;
        }
        if s.skill == Skill::ReplaceText && s.params.replace.is_none() {
            return Err(SafetyError::MissingEditParam {
                step,
                skill: s.skill.clone(),
                param: "replace",
            });
        }
        // `path` presence was established by check_required_params; the
        // resolve cannot fail after check_path_safety passed.
        let raw = s.params.path.as_deref().unwrap_or("");
        let resolved = sandbox.resolve(raw).map_err(|reason| SafetyError::UnsafePath {
            step,
            skill: s.skill.clone(),
            path: raw.to_string(),
            reason,
        })?;
        if !resolved.is_file() {
            return Err(SafetyError::MissingEditTarget {
                step,
                skill: s.skill.clone(),
                path: raw.to_string(),
            });
        }
    }
    Ok(())
}

/// The path-bearing parameters of a step, in check order.
fn path_params(step: &Step) -> impl Iterator<Item = &str> {
    step.params
        .path
        .as_deref()
        .into_iter()
        .chain(step.params.dest.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::open(&dir.path().join("box")).unwrap();
        (dir, sandbox)
    }

    fn count_entries(sandbox: &Sandbox) -> usize {
        std::fs::read_dir(sandbox.root()).unwrap().count()
    }

    #[test]
    fn test_accepts_well_formed_plan() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [
                {"skill": "write_text", "params": {"path": "a.txt", "text": "hello"}},
                {"skill": "list_dir", "params": {"path": "."}, "on_fail": "continue"}
            ]
        });
        let plan = validate(&raw, &sandbox).unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn test_rejects_missing_steps_field() {
        let (_dir, sandbox) = sandbox();
        let err = validate(&json!({}), &sandbox).unwrap_err();
        assert!(matches!(
            err,
            ValidateError::Schema(SchemaError::Shape(_))
        ));
    }

    #[test]
    fn test_rejects_empty_steps() {
        let (_dir, sandbox) = sandbox();
        let err = validate(&json!({"steps": []}), &sandbox).unwrap_err();
        assert!(matches!(
            err,
            ValidateError::Schema(SchemaError::Shape(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_skill_at_schema_level() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "format_disk", "params": {"path": "a"}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        assert!(matches!(
            err,
            ValidateError::Schema(SchemaError::Shape(_))
        ));
    }

    #[test]
    fn test_rejects_bad_on_fail_value() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "create_file", "params": {"path": "a"}, "on_fail": "retry"}]
        });
        assert!(validate(&raw, &sandbox).is_err());
    }

    #[test]
    fn test_rejects_missing_dest_for_move() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "move_file", "params": {"path": "a.txt"}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        match err {
            ValidateError::Schema(SchemaError::MissingParam { step, param, .. }) => {
                assert_eq!(step, 0);
                assert_eq!(param, "dest");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_absolute_path_naming_step() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "write_text", "params": {"path": "/etc/hosts", "text": "x"}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        match err {
            ValidateError::Safety(SafetyError::UnsafePath { step, path, .. }) => {
                assert_eq!(step, 0);
                assert_eq!(path, "/etc/hosts");
            }
            other => panic!("unexpected error: {other}"),
        }
        // No file was created anywhere beneath the root.
        assert_eq!(count_entries(&sandbox), 0);
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "create_file", "params": {"path": "../secret"}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        assert!(matches!(
            err,
            ValidateError::Safety(SafetyError::UnsafePath { step: 0, .. })
        ));
        assert_eq!(count_entries(&sandbox), 0);
    }

    #[test]
    fn test_rejects_traversal_in_dest() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "copy_file", "params": {"path": "a.txt", "dest": "../../out"}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        match err {
            ValidateError::Safety(SafetyError::UnsafePath { path, .. }) => {
                assert_eq!(path, "../../out");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let sandbox = Sandbox::open(&dir.path().join("box")).unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link")).unwrap();

        let raw = json!({
            "steps": [{"skill": "write_text", "params": {"path": "link/evil.txt", "text": "x"}}]
        });
        assert!(matches!(
            validate(&raw, &sandbox).unwrap_err(),
            ValidateError::Safety(SafetyError::UnsafePath { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_text() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "write_text",
                       "params": {"path": "a.txt", "text": "x".repeat(MAX_TEXT_CHARS + 1)}}]
        });
        let err = validate(&raw, &sandbox).unwrap_err();
        match err {
            ValidateError::Safety(SafetyError::PayloadTooLarge { param, len, .. }) => {
                assert_eq!(param, "text");
                assert_eq!(len, MAX_TEXT_CHARS + 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_accepts_text_at_exact_limit() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "append_text",
                       "params": {"path": "a.txt", "text": "x".repeat(MAX_TEXT_CHARS)}}]
        });
        assert!(validate(&raw, &sandbox).is_ok());
    }

    #[test]
    fn test_rejects_empty_find() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "replace_text",
                       "params": {"path": "a.txt", "find": "", "replace": "y"}}]
        });
        assert!(matches!(
            validate(&raw, &sandbox).unwrap_err(),
            ValidateError::Safety(SafetyError::EmptyFind { step: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_missing_find() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "remove_text", "params": {"path": "a.txt"}}]
        });
        assert!(matches!(
            validate(&raw, &sandbox).unwrap_err(),
            ValidateError::Safety(SafetyError::EmptyFind { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_find() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "remove_text",
                       "params": {"path": "a.txt", "find": "x".repeat(MAX_TEXT_CHARS + 1)}}]
        });
        match validate(&raw, &sandbox).unwrap_err() {
            ValidateError::Safety(SafetyError::PayloadTooLarge { param, .. }) => {
                assert_eq!(param, "find");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_replace_without_replace_param() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "replace_text", "params": {"path": "a.txt", "find": "x"}}]
        });
        match validate(&raw, &sandbox).unwrap_err() {
            ValidateError::Safety(SafetyError::MissingEditParam { param, .. }) => {
                assert_eq!(param, "replace");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_edit_of_missing_target() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [{"skill": "replace_text",
                       "params": {"path": "missing.txt", "find": "x", "replace": "y"}}]
        });
        match validate(&raw, &sandbox).unwrap_err() {
            ValidateError::Safety(SafetyError::MissingEditTarget { step, path, .. }) => {
                assert_eq!(step, 0);
                assert_eq!(path, "missing.txt");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remove_text_accepts_existing_target_without_replace() {
        let (_dir, sandbox) = sandbox();
        std::fs::write(sandbox.root().join("a.txt"), "x").unwrap();
        let raw = json!({
            "steps": [{"skill": "remove_text", "params": {"path": "a.txt", "find": "x"}}]
        });
        assert!(validate(&raw, &sandbox).is_ok());
    }

    #[test]
    fn test_required_params_refuses_unknown_skill_in_typed_plan() {
        // A typed plan built directly, bypassing the JSON layer.
        let plan = Plan {
            steps: vec![crate::plan::Step {
                skill: Skill::Unknown("format_disk".to_string()),
                params: Default::default(),
                on_fail: Default::default(),
            }],
        };
        match check_required_params(&plan).unwrap_err() {
            SchemaError::UnknownSkill { step, skill } => {
                assert_eq!(step, 0);
                assert_eq!(skill, "format_disk");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_required_params_refuses_missing_path_in_typed_plan() {
        let plan = Plan {
            steps: vec![crate::plan::Step {
                skill: Skill::CreateFile,
                params: Default::default(),
                on_fail: Default::default(),
            }],
        };
        assert!(matches!(
            check_required_params(&plan).unwrap_err(),
            SchemaError::MissingParam { param: "path", .. }
        ));
    }

    #[test]
    fn test_whole_plan_rejected_on_single_bad_step() {
        let (_dir, sandbox) = sandbox();
        let raw = json!({
            "steps": [
                {"skill": "create_file", "params": {"path": "fine.txt"}},
                {"skill": "create_file", "params": {"path": "../escape"}}
            ]
        });
        assert!(matches!(
            validate(&raw, &sandbox).unwrap_err(),
            ValidateError::Safety(SafetyError::UnsafePath { step: 1, .. })
        ));
        // Atomic: the fine step must not have run either.
        assert_eq!(count_entries(&sandbox), 0);
    }
}
