// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coverage-profile bookkeeping across rerun invocations.
//!
//! Profiles use the text format with a `mode:` header followed by one block
//! per line:
//!
//! ```text
//! mode: count
//! example.com/pkg/parse.go:10.2,12.16 3 7
//! ```
//!
//! Each rerun invocation writes its own temporary profile (the shared path
//! would be clobbered otherwise); the accumulator folds every temporary
//! profile into the run's main profile once the session is over.

use crate::errors::CoverageError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, fs};
use swrite::{SWrite, swriteln};
use tracing::{debug, warn};

/// The source span a coverage block covers. Blocks are merged under this key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockKey {
    /// The source file the block is in.
    pub file: String,
    /// 1-based line the span starts on.
    pub start_line: u32,
    /// 1-based column the span starts at.
    pub start_col: u32,
    /// 1-based line the span ends on.
    pub end_line: u32,
    /// 1-based column the span ends at.
    pub end_col: u32,
}

/// The measured portion of a coverage block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockStats {
    /// Number of statements in the span.
    pub num_statements: u64,
    /// How many times the span executed.
    pub count: u64,
}

/// An in-memory coverage profile: a mode header plus blocks ordered by key
/// (file, then span position).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CoverageProfile {
    mode: String,
    blocks: BTreeMap<BlockKey, BlockStats>,
}

impl CoverageProfile {
    /// Creates an empty profile with the given mode.
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            blocks: BTreeMap::new(),
        }
    }

    /// The profile's mode (`set`, `count`, or `atomic`).
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Number of distinct blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True if the profile has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The stats recorded for `key`, if present.
    pub fn block(&self, key: &BlockKey) -> Option<BlockStats> {
        self.blocks.get(key).copied()
    }

    /// The blocks in serialization order.
    pub fn blocks(&self) -> impl Iterator<Item = (&BlockKey, &BlockStats)> {
        self.blocks.iter()
    }

    /// Inserts a block, summing counts if the key is already present.
    pub fn add_block(&mut self, key: BlockKey, stats: BlockStats) {
        self.blocks
            .entry(key)
            .and_modify(|existing| existing.count += stats.count)
            .or_insert(stats);
    }

    /// Parses the profile at `path`.
    pub fn parse_file(path: &Utf8Path) -> Result<Self, CoverageError> {
        let contents = fs::read_to_string(path).map_err(|error| CoverageError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Utf8Path, contents: &str) -> Result<Self, CoverageError> {
        let mut lines = contents.lines().enumerate();
        let mode = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => continue,
                Some((_, line)) => match line.strip_prefix("mode: ") {
                    Some(mode) => break mode.trim().to_owned(),
                    None => {
                        return Err(CoverageError::MissingModeHeader {
                            path: path.to_owned(),
                        });
                    }
                },
                None => {
                    return Err(CoverageError::MissingModeHeader {
                        path: path.to_owned(),
                    });
                }
            }
        };

        let mut profile = Self::new(mode);
        for (index, line) in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, stats) = parse_block(line).map_err(|reason| {
                CoverageError::MalformedBlock {
                    path: path.to_owned(),
                    line: index + 1,
                    reason,
                }
            })?;
            profile.add_block(key, stats);
        }
        Ok(profile)
    }

    /// Merges `other` into `self`: blocks present in both have their counts
    /// summed, blocks unique to either side pass through unchanged.
    pub fn merge_from(&mut self, other: &CoverageProfile) {
        for (key, stats) in &other.blocks {
            self.add_block(key.clone(), *stats);
        }
    }

    /// Serializes the profile to the text format.
    pub fn to_contents(&self) -> String {
        let mut out = String::new();
        swriteln!(out, "mode: {}", self.mode);
        for (key, stats) in &self.blocks {
            swriteln!(
                out,
                "{}:{}.{},{}.{} {} {}",
                key.file,
                key.start_line,
                key.start_col,
                key.end_line,
                key.end_col,
                stats.num_statements,
                stats.count
            );
        }
        out
    }

    /// Writes the profile to `path`, replacing any existing file.
    pub fn write_file(&self, path: &Utf8Path) -> Result<(), CoverageError> {
        fs::write(path, self.to_contents()).map_err(|error| CoverageError::Write {
            path: path.to_owned(),
            error,
        })
    }
}

/// Parses one block line: `file:sl.sc,el.ec numStatements count`.
fn parse_block(line: &str) -> Result<(BlockKey, BlockStats), String> {
    let (rest, count) = line
        .rsplit_once(' ')
        .ok_or_else(|| "expected `file:span numStatements count`".to_owned())?;
    let (span, num_statements) = rest
        .rsplit_once(' ')
        .ok_or_else(|| "expected `file:span numStatements count`".to_owned())?;
    let (file, positions) = span
        .rsplit_once(':')
        .ok_or_else(|| "expected `file:span`".to_owned())?;
    let (start, end) = positions
        .split_once(',')
        .ok_or_else(|| "expected `start,end` span".to_owned())?;

    let parse_pos = |pos: &str| -> Result<(u32, u32), String> {
        let (line, col) = pos
            .split_once('.')
            .ok_or_else(|| format!("expected `line.col` position, got `{pos}`"))?;
        Ok((
            line.parse().map_err(|_| format!("invalid line in `{pos}`"))?,
            col.parse().map_err(|_| format!("invalid column in `{pos}`"))?,
        ))
    };
    let (start_line, start_col) = parse_pos(start)?;
    let (end_line, end_col) = parse_pos(end)?;

    Ok((
        BlockKey {
            file: file.to_owned(),
            start_line,
            start_col,
            end_line,
            end_col,
        },
        BlockStats {
            num_statements: num_statements
                .parse()
                .map_err(|_| format!("invalid statement count `{num_statements}`"))?,
            count: count
                .parse()
                .map_err(|_| format!("invalid execution count `{count}`"))?,
        },
    ))
}

/// Collects the coverage profiles produced by every rerun invocation in a
/// session.
#[derive(Debug, Default)]
pub struct CoverageAccumulator {
    partials: Vec<CoverageProfile>,
}

impl CoverageAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partial profiles collected so far.
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    /// True if nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// Adds one invocation's parsed profile.
    pub fn add(&mut self, profile: CoverageProfile) {
        self.partials.push(profile);
    }

    /// Reads the temporary profile at `path` into the accumulator, then
    /// deletes the file.
    ///
    /// The file is removed as soon as its contents are in memory, so an abort
    /// later in the round cannot leak it. A failed removal is reported and
    /// the parsed profile kept.
    pub fn consume_file(&mut self, path: &Utf8Path) -> Result<(), CoverageError> {
        let profile = CoverageProfile::parse_file(path)?;
        if let Err(error) = fs::remove_file(path) {
            warn!("failed to remove rerun coverage profile {path}: {error}");
        }
        debug!(blocks = profile.len(), "collected rerun coverage from {path}");
        self.add(profile);
        Ok(())
    }

    /// Merges everything collected into the profile at `main_path`,
    /// rewriting it in place.
    pub fn combine_into(&self, main_path: &Utf8Path) -> Result<(), CoverageError> {
        let mut main = CoverageProfile::parse_file(main_path)?;
        for partial in &self.partials {
            main.merge_from(partial);
        }
        main.write_file(main_path)
    }
}

/// Finds the coverage-profile output path in a test invocation's arguments.
///
/// Recognizes `-coverprofile=PATH`, `--coverprofile=PATH`, and the two-token
/// `-coverprofile PATH` form; the last occurrence wins, matching the
/// flag-precedence rule used for the whole argv.
pub fn coverprofile_path(args: &[String]) -> Option<Utf8PathBuf> {
    let mut found = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let Some(flag) = arg
            .strip_prefix("--")
            .or_else(|| arg.strip_prefix('-'))
        else {
            continue;
        };
        if let Some(value) = flag.strip_prefix("coverprofile=") {
            found = Some(Utf8PathBuf::from(value));
        } else if flag == "coverprofile" {
            if let Some(value) = iter.next() {
                found = Some(Utf8PathBuf::from(value));
            }
        }
    }
    found
}

/// The unique temporary profile path for one rerun invocation, derived from
/// the attempt round and the selection index within it.
pub fn rerun_profile_path(main: &Utf8Path, attempt: usize, index: usize) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{main}.{attempt}.{index}"))
}
