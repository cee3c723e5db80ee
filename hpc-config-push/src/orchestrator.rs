//! Backend-independent push ordering.
//!
//! A push is a fixed sequence of steps: one per area archive, then the
//! private files tree, then the puppet, hiera and private nodes files. Each
//! backend supplies the operation applied to a step together with its own
//! context (an open session, a shared index, an accumulator).

use crate::environment::{Area, Environment};
use crate::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// Subdirectory receiving the private files tree
pub const FILES_DIR: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Area,
    PrivateFiles,
    PuppetConf,
    HieraConf,
    PrivateNodes,
}

impl StepKind {
    pub fn describe(&self) -> &'static str {
        match self {
            StepKind::Area => "area tarball",
            StepKind::PrivateFiles => "private files",
            StepKind::PuppetConf => "puppet conf",
            StepKind::HieraConf => "hiera conf",
            StepKind::PrivateNodes => "private cluster nodes description",
        }
    }
}

/// One unit of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushStep {
    pub kind: StepKind,

    /// Local file or directory to push
    pub source: PathBuf,

    /// Destination relative to the environment destination (`""` = its root)
    pub destination: String,
}

impl PushStep {
    pub fn for_area(area: &Area<'_>) -> Self {
        Self {
            kind: StepKind::Area,
            source: area.archive.clone(),
            destination: area.name.to_string(),
        }
    }
}

/// Steps following the areas, in push order.
pub fn file_group_steps(env: &Environment) -> Vec<PushStep> {
    vec![
        PushStep {
            kind: StepKind::PrivateFiles,
            source: env.files_private.clone(),
            destination: FILES_DIR.to_string(),
        },
        PushStep {
            kind: StepKind::PuppetConf,
            source: env.conf_puppet.clone(),
            destination: String::new(),
        },
        PushStep {
            kind: StepKind::HieraConf,
            source: env.conf_hiera.clone(),
            destination: String::new(),
        },
        PushStep {
            kind: StepKind::PrivateNodes,
            source: env.nodes_private.clone(),
            destination: String::new(),
        },
    ]
}

/// Every step of a push, in order.
pub fn push_steps(env: &Environment) -> Vec<PushStep> {
    let mut steps: Vec<PushStep> = env.areas().map(|area| PushStep::for_area(&area)).collect();
    steps.extend(file_group_steps(env));
    steps
}

/// Apply `op` to every configured area, in order, with a shared context.
pub fn for_each_area<C, F>(env: &Environment, ctx: &mut C, mut op: F) -> Result<()>
where
    F: FnMut(&Area<'_>, &mut C) -> Result<()>,
{
    for area in env.areas() {
        op(&area, ctx)?;
    }
    Ok(())
}

/// Run a whole push: areas first, then the file groups.
///
/// `prefix` is the log prefix of the calling backend (`"S3 push"`, ...).
pub fn drive<C, F>(env: &Environment, prefix: &str, ctx: &mut C, mut op: F) -> Result<()>
where
    F: FnMut(&PushStep, &mut C) -> Result<()>,
{
    for_each_area(env, ctx, |area, ctx| {
        debug!("{}: copying area {} tarball", prefix, area.name);
        op(&PushStep::for_area(area), ctx)
    })?;

    for step in file_group_steps(env) {
        debug!("{}: copying {}", prefix, step.kind.describe());
        op(&step, ctx)?;
    }

    Ok(())
}

/// An environment found at a destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EnvEntry {
    pub name: String,

    /// Last modification, `YYYY-MM-DD HH:MM:SS` UTC
    pub modified: String,
}

impl EnvEntry {
    pub fn new(name: impl Into<String>, modified: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified: modified.into(),
        }
    }
}

/// Environments reported identically by a group of hosts. Single-destination
/// backends report one group with no host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListGroup {
    pub hosts: Vec<String>,
    pub entries: Vec<EnvEntry>,
}

impl ListGroup {
    pub fn report(&self) -> String {
        format_list_results(&self.entries)
    }
}

/// One `"  - name [mtime]"` line per environment.
pub fn format_list_results(entries: &[EnvEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("  - {:<20} [{}]", e.name, e.modified))
        .collect::<Vec<_>>()
        .join("\n")
}
