use clap::Parser;
use std::path::PathBuf;

use crate::attachments::DEFAULT_MAX_ATTACHMENT_BYTES;

#[derive(Debug, Parser, Clone)]
#[command(name = "classroomd", version, about = "Assignment and grading sidecar speaking line-delimited JSON")]
pub struct Config {
    /// Workspace directory to open at startup; `workspace.select` can change it later.
    #[clap(long, env = "CLASSROOMD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[clap(long, env = "CLASSROOMD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[clap(long, env = "CLASSROOMD_MAX_ATTACHMENT_BYTES", default_value_t = DEFAULT_MAX_ATTACHMENT_BYTES)]
    pub max_attachment_bytes: u64,
}
