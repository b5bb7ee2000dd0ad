//! Work identity resolution from git state.
//!
//! The resolver is a pure function of what is checked out right now: it reads
//! the current branch, looks for a ticket id in it, and falls back to the
//! branch name itself. It keeps no memory between calls.

use fs_err as fs;
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, IdentityError};
use crate::patterns::{RE_DEFAULT_TICKET, RE_HEAD_REF};
use crate::types::{BranchState, WorkIdentity};

/// External VCS collaborator.
pub trait BranchSource: Send + Sync {
    /// `Ok(None)` when the repository exists but no branch is checked out
    /// (detached HEAD, unborn repo).
    fn current_branch(&self) -> Result<Option<String>, IdentityError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ticket Pattern
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TicketPattern {
    regex: Regex,
}

impl TicketPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidTicketPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { regex })
    }

    /// Leftmost match, uppercased. Uses capture group 1 when the pattern has
    /// one so that surrounding context can be matched without being kept.
    pub fn extract(&self, branch: &str) -> Option<String> {
        let captures = self.regex.captures(branch)?;
        let matched = captures.get(1).or_else(|| captures.get(0))?;
        let ticket = matched.as_str().trim();
        if ticket.is_empty() {
            None
        } else {
            Some(ticket.to_uppercase())
        }
    }
}

impl Default for TicketPattern {
    fn default() -> Self {
        Self {
            regex: RE_DEFAULT_TICKET.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

pub struct IdentityResolver {
    source: Box<dyn BranchSource>,
    pattern: TicketPattern,
}

impl IdentityResolver {
    pub fn new(source: Box<dyn BranchSource>, pattern: TicketPattern) -> Self {
        Self { source, pattern }
    }

    /// Branch and ticket as seen right now. VCS errors are reported and
    /// treated as "nothing checked out".
    pub fn observe(&self) -> BranchState {
        let branch = match self.source.current_branch() {
            Ok(Some(branch)) if !branch.trim().is_empty() => branch.trim().to_string(),
            Ok(_) => {
                tracing::debug!("No current branch found");
                return BranchState::default();
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read git branch");
                return BranchState::default();
            }
        };

        let ticket = self.pattern.extract(&branch);
        match &ticket {
            Some(ticket) => tracing::debug!(%branch, %ticket, "Extracted ticket from branch"),
            None => tracing::debug!(%branch, "No ticket in branch name"),
        }

        BranchState {
            branch: Some(branch),
            ticket,
        }
    }

    pub fn resolve(&self) -> Option<WorkIdentity> {
        self.observe().identity()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Git HEAD Reader
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads the checked-out branch straight from `.git/HEAD`, following
/// `gitdir:` files for linked worktrees and submodules.
#[derive(Debug, Clone)]
pub struct GitHeadReader {
    start: PathBuf,
}

impl GitHeadReader {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            start: project_dir.into(),
        }
    }
}

impl BranchSource for GitHeadReader {
    fn current_branch(&self) -> Result<Option<String>, IdentityError> {
        let git_dir = find_git_dir(&self.start)?;
        let head_path = git_dir.join("HEAD");
        let contents = fs::read_to_string(&head_path).map_err(|source| IdentityError::Io {
            path: head_path.clone(),
            source,
        })?;
        Ok(parse_head(&contents))
    }
}

fn parse_head(contents: &str) -> Option<String> {
    let line = contents.lines().next()?.trim();
    let captures = RE_HEAD_REF.captures(line)?;
    let branch = captures.get(1)?.as_str().trim();
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}

fn find_git_dir(start: &Path) -> Result<PathBuf, IdentityError> {
    let start_dir = if start.is_dir() {
        start.to_path_buf()
    } else {
        start
            .parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| IdentityError::NoRepository(start.to_path_buf()))?
    };

    let mut current = Some(start_dir.as_path());
    while let Some(dir) = current {
        let git_entry = dir.join(".git");
        if git_entry.is_dir() {
            return Ok(git_entry);
        }
        if git_entry.is_file() {
            return parse_gitdir(&git_entry, dir);
        }
        current = dir.parent();
    }

    Err(IdentityError::NoRepository(start_dir))
}

fn parse_gitdir(git_file: &Path, worktree_root: &Path) -> Result<PathBuf, IdentityError> {
    let contents = fs::read_to_string(git_file).map_err(|source| IdentityError::Io {
        path: git_file.to_path_buf(),
        source,
    })?;
    let raw = contents
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("gitdir:"))
        .and_then(|line| line.get("gitdir:".len()..))
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| IdentityError::MalformedGitFile(git_file.to_path_buf()))?;

    let path = Path::new(raw);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(worktree_root.join(path))
    }
}
