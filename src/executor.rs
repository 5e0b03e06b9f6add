//! Plan execution inside the sandbox.
//!
//! Steps run strictly in plan order, one blocking filesystem call at a time.
//! Each step handler returns a typed outcome or a [`StepError`]; the engine
//! loop records exactly one [`LogEntry`] per attempted step and applies the
//! step's `on_fail` policy — it never raises for per-step failures.
//!
//! Every path parameter is re-resolved against the sandbox root here, even
//! though the validator already checked the raw strings: symlinks or
//! filesystem changes between validation and execution must not be able to
//! move an effect outside the root.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::plan::{OnFail, Plan, Skill, Step, StepParams};
use crate::sandbox::{ResolveError, Sandbox};

/// Length of the `read_file` content preview, in characters.
const PREVIEW_CHARS: usize = 200;

/// Failure while performing a single step's effect. Step-local: captured
/// into a log entry, never propagated past the engine loop.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    #[error("missing required parameter `{0}`")]
    MissingParam(&'static str),
    #[error(transparent)]
    Unsafe(#[from] ResolveError),
    #[error("cannot {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StepError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        StepError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One recorded outcome for one executed or attempted step.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub ok: bool,
    pub step: usize,
    pub skill: Skill,
    #[serde(flatten)]
    pub detail: StepDetail,
}

/// Per-skill success fields, or the error message of a failed step.
/// Field names follow the run-log format.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StepDetail {
    Written {
        path: String,
        bytes: usize,
    },
    Replaced {
        path: String,
        find: String,
        replacements: usize,
    },
    Read {
        path: String,
        preview: String,
    },
    Listed {
        path: String,
        items: Vec<String>,
    },
    Moved {
        from: String,
        to: String,
    },
    Copied {
        from: String,
        to: String,
    },
    Deleted {
        deleted: String,
    },
    Touched {
        path: String,
    },
    Failed {
        error: String,
    },
}

/// What a successful step handler hands back to the engine loop.
struct StepOutcome {
    detail: StepDetail,
    /// New "last artifact", when the step produced or mutated a path.
    artifact: Option<PathBuf>,
}

impl StepOutcome {
    fn new(detail: StepDetail, artifact: Option<PathBuf>) -> Self {
        Self { detail, artifact }
    }
}

/// The ordered log plus the final artifact path — the path most recently
/// produced or mutated by a successful step, or the sandbox root if none.
#[derive(Debug)]
pub struct ExecutionResult {
    pub entries: Vec<LogEntry>,
    pub artifact: PathBuf,
}

/// Runs a plan against the sandbox.
///
/// Only fails for conditions outside plan content (the sandbox root cannot
/// be re-created); every per-step failure becomes a failing [`LogEntry`].
pub fn execute(plan: &Plan, sandbox: &Sandbox) -> io::Result<ExecutionResult> {
    sandbox.ensure()?;

    let mut entries = Vec::with_capacity(plan.steps.len());
    let mut artifact: Option<PathBuf> = None;

    for (idx, step) in plan.steps.iter().enumerate() {
        match run_step(step, sandbox) {
            Ok(outcome) => {
                debug!("step {idx} ({}) ok", step.skill);
                if let Some(path) = outcome.artifact {
                    artifact = Some(path);
                }
                entries.push(LogEntry {
                    ok: true,
                    step: idx,
                    skill: step.skill.clone(),
                    detail: outcome.detail,
                });
            }
            Err(err) => {
                warn!("step {idx} ({}) failed: {err}", step.skill);
                entries.push(LogEntry {
                    ok: false,
                    step: idx,
                    skill: step.skill.clone(),
                    detail: StepDetail::Failed {
                        error: err.to_string(),
                    },
                });
                if step.on_fail == OnFail::Abort {
                    break;
                }
            }
        }
    }

    Ok(ExecutionResult {
        artifact: artifact.unwrap_or_else(|| sandbox.root().to_path_buf()),
        entries,
    })
}

/// Dispatches one step to its skill handler.
fn run_step(step: &Step, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let p = &step.params;
    match &step.skill {
        Skill::CreateFile => create_file(p, sandbox),
        Skill::WriteText => write_text(p, sandbox),
        Skill::AppendText => append_text(p, sandbox),
        Skill::ReplaceText => replace_text(p, sandbox, false),
        Skill::RemoveText => replace_text(p, sandbox, true),
        Skill::ReadFile => read_file(p, sandbox),
        Skill::ListDir => list_dir(p, sandbox),
        Skill::MoveFile => transfer_file(p, sandbox, Transfer::Move),
        Skill::CopyFile => transfer_file(p, sandbox, Transfer::Copy),
        Skill::DeleteFile => delete_file(p, sandbox),
        Skill::Unknown(name) => Err(StepError::UnknownSkill(name.clone())),
    }
}

/// Resolves the step's required `path` parameter inside the sandbox.
fn required_path(params: &StepParams, sandbox: &Sandbox) -> Result<PathBuf, StepError> {
    let raw = params.path.as_deref().ok_or(StepError::MissingParam("path"))?;
    Ok(sandbox.resolve(raw)?)
}

fn create_parents(path: &Path) -> Result<(), StepError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StepError::io("create directory", parent, e))?;
    }
    Ok(())
}

fn create_file(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    create_parents(&path)?;
    fs::write(&path, b"").map_err(|e| StepError::io("create", &path, e))?;
    Ok(StepOutcome::new(
        StepDetail::Touched {
            path: path.display().to_string(),
        },
        Some(path),
    ))
}

fn write_text(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    create_parents(&path)?;
    let text = params.text.as_deref().unwrap_or("");
    fs::write(&path, text).map_err(|e| StepError::io("write", &path, e))?;
    Ok(StepOutcome::new(
        StepDetail::Written {
            path: path.display().to_string(),
            bytes: text.len(),
        },
        Some(path),
    ))
}

fn append_text(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    create_parents(&path)?;
    let text = params.text.as_deref().unwrap_or("");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StepError::io("open", &path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| StepError::io("append to", &path, e))?;
    Ok(StepOutcome::new(
        StepDetail::Touched {
            path: path.display().to_string(),
        },
        Some(path),
    ))
}

/// Shared handler for replace_text and remove_text (replacement = "").
///
/// Occurrences are counted on the original content as non-overlapping
/// literal matches; the reported count is the number actually bounded by
/// the effective limit. The file is rewritten only if content changed.
fn replace_text(
    params: &StepParams,
    sandbox: &Sandbox,
    remove: bool,
) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    let find = params.find.as_deref().ok_or(StepError::MissingParam("find"))?;
    if find.is_empty() {
        return Err(StepError::MissingParam("find"));
    }
    let replacement = if remove {
        ""
    } else {
        params
            .replace
            .as_deref()
            .ok_or(StepError::MissingParam("replace"))?
    };

    let original = fs::read_to_string(&path).map_err(|e| StepError::io("read", &path, e))?;
    let occurrences = original.matches(find).count();
    let limit = params.count.unwrap_or(0) as usize;

    let (updated, replacements) = if limit == 0 {
        (original.replace(find, replacement), occurrences)
    } else {
        (
            original.replacen(find, replacement, limit),
            occurrences.min(limit),
        )
    };

    if updated != original {
        fs::write(&path, &updated).map_err(|e| StepError::io("write", &path, e))?;
    }

    Ok(StepOutcome::new(
        StepDetail::Replaced {
            path: path.display().to_string(),
            find: find.to_string(),
            replacements,
        },
        Some(path),
    ))
}

fn read_file(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    let text = fs::read_to_string(&path).map_err(|e| StepError::io("read", &path, e))?;
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    Ok(StepOutcome::new(
        StepDetail::Read {
            path: path.display().to_string(),
            preview,
        },
        None,
    ))
}

fn list_dir(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    let mut items: Vec<String> = fs::read_dir(&path)
        .map_err(|e| StepError::io("list", &path, e))?
        .map(|entry| {
            entry
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .map_err(|e| StepError::io("list", &path, e))
        })
        .collect::<Result<_, _>>()?;
    // Lexicographic order, independent of filesystem iteration order.
    items.sort();
    Ok(StepOutcome::new(
        StepDetail::Listed {
            path: path.display().to_string(),
            items,
        },
        None,
    ))
}

enum Transfer {
    Move,
    Copy,
}

fn transfer_file(
    params: &StepParams,
    sandbox: &Sandbox,
    mode: Transfer,
) -> Result<StepOutcome, StepError> {
    let src = required_path(params, sandbox)?;
    let raw_dest = params.dest.as_deref().ok_or(StepError::MissingParam("dest"))?;
    let dest = sandbox.resolve(raw_dest)?;
    create_parents(&dest)?;

    match mode {
        Transfer::Move => {
            fs::rename(&src, &dest).map_err(|e| StepError::io("move", &src, e))?;
            Ok(StepOutcome::new(
                StepDetail::Moved {
                    from: src.display().to_string(),
                    to: dest.display().to_string(),
                },
                Some(dest),
            ))
        }
        Transfer::Copy => {
            fs::copy(&src, &dest).map_err(|e| StepError::io("copy", &src, e))?;
            copy_mtime(&src, &dest)?;
            Ok(StepOutcome::new(
                StepDetail::Copied {
                    from: src.display().to_string(),
                    to: dest.display().to_string(),
                },
                Some(dest),
            ))
        }
    }
}

/// `fs::copy` carries permissions; the modification time is carried here.
fn copy_mtime(src: &Path, dest: &Path) -> Result<(), StepError> {
    let meta = fs::metadata(src).map_err(|e| StepError::io("stat", src, e))?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime).map_err(|e| StepError::io("set mtime on", dest, e))
}

fn delete_file(params: &StepParams, sandbox: &Sandbox) -> Result<StepOutcome, StepError> {
    let path = required_path(params, sandbox)?;
    if path.exists() {
        fs::remove_file(&path).map_err(|e| StepError::io("delete", &path, e))?;
    }
    Ok(StepOutcome::new(
        StepDetail::Deleted {
            deleted: path.display().to_string(),
        },
        None,
    ))
}
