//! Crontab block editor
//!
//! A scheduler document (e.g. `/etc/cron.d/hoist`) is shared by several
//! services. Each service+environment pair owns one delimited block:
//!
//! ```text
//! # BEGIN report-prod
//! # hoist:tag=main-abc1234-20260213110000
//! # hoist:previous=main-0ff1ce0-20260212090000
//! 0 3 * * * root docker rm -f report-prod 2>/dev/null; docker run ...
//! # END report-prod
//! ```
//!
//! Everything here is a pure function over strings. Content outside the
//! edited block is preserved byte for byte.

use thiserror::Error;

const BEGIN_MARKER: &str = "# BEGIN ";
const END_MARKER: &str = "# END ";
const METADATA_PREFIX: &str = "# hoist:";

/// Errors raised when a block's interior cannot be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block {block}: missing `{key}` field")]
    MissingField { block: String, key: &'static str },

    #[error("block {block}: missing schedule entry line")]
    MissingEntry { block: String },
}

/// Identifier of the block owned by a service in an environment
pub fn block_id(service: &str, env: &str) -> String {
    format!("{}-{}", service, env)
}

/// Returns the interior of block `id` verbatim, or `None` if the document
/// has no complete `BEGIN`/`END` pair for it
pub fn extract_block<'a>(document: &'a str, id: &str) -> Option<&'a str> {
    let span = locate(document, id)?;
    Some(&document[span.interior_start..span.interior_end])
}

/// Replaces block `id` with `new_block`, or appends `new_block` when the
/// document has no such block
///
/// `new_block` is the complete block including its markers (see
/// [`CronBlock::render`]). When appending, trailing whitespace of the
/// document is trimmed and exactly one blank line separates it from the new
/// block; an empty document becomes just the block.
pub fn replace_block(document: &str, id: &str, new_block: &str) -> String {
    match locate(document, id) {
        Some(span) => {
            let before = &document[..span.start];
            let after = &document[span.end..];

            let mut out = String::with_capacity(before.len() + new_block.len() + after.len() + 1);
            out.push_str(before);
            out.push_str(new_block);
            if !after.is_empty() && !new_block.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(after);
            out
        }
        None => {
            let trimmed = document.trim_end();
            if trimmed.is_empty() {
                new_block.to_string()
            } else {
                format!("{}\n\n{}", trimmed, new_block)
            }
        }
    }
}

/// Reads a `# hoist:<key>=<value>` metadata line from a block interior
pub fn metadata_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        line.trim_end_matches('\r')
            .strip_prefix(METADATA_PREFIX)?
            .strip_prefix(key)?
            .strip_prefix('=')
    })
}

/// One service's block in the scheduler document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronBlock {
    pub id: String,
    /// Build tag the entry runs
    pub tag: String,
    /// Tag it replaced; empty on first deploy
    pub previous: String,
    /// Full scheduler entry line
    pub entry: String,
}

impl CronBlock {
    /// Renders the block including its `BEGIN`/`END` markers, newline terminated
    pub fn render(&self) -> String {
        format!(
            "{begin}{id}\n{meta}tag={tag}\n{meta}previous={previous}\n{entry}\n{end}{id}\n",
            begin = BEGIN_MARKER,
            end = END_MARKER,
            meta = METADATA_PREFIX,
            id = self.id,
            tag = self.tag,
            previous = self.previous,
            entry = self.entry,
        )
    }

    /// Parses a block interior as returned by [`extract_block`]
    pub fn parse(id: &str, interior: &str) -> Result<Self, BlockError> {
        let missing = |key| BlockError::MissingField {
            block: id.to_string(),
            key,
        };

        let tag = metadata_value(interior, "tag").ok_or_else(|| missing("tag"))?;
        let previous = metadata_value(interior, "previous").ok_or_else(|| missing("previous"))?;
        let entry = interior
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .find(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .ok_or_else(|| BlockError::MissingEntry {
                block: id.to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            tag: tag.to_string(),
            previous: previous.to_string(),
            entry: entry.to_string(),
        })
    }
}

/// Byte offsets of a block within a document
struct BlockSpan {
    /// Start of the `BEGIN` line
    start: usize,
    /// First byte after the `BEGIN` line
    interior_start: usize,
    /// Start of the `END` line
    interior_end: usize,
    /// First byte after the `END` line (including its newline, if any)
    end: usize,
}

/// Finds the first `END id` line and pairs it with the closest `BEGIN id`
/// above it. A stray `BEGIN` without a matching `END` is ignored.
fn locate(document: &str, id: &str) -> Option<BlockSpan> {
    let begin = format!("{}{}", BEGIN_MARKER, id);
    let end = format!("{}{}", END_MARKER, id);

    let mut open: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in document.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let content = line.trim_end_matches(['\n', '\r']).trim();
        if content == begin {
            open = Some((line_start, offset));
        } else if content == end {
            if let Some((start, interior_start)) = open {
                return Some(BlockSpan {
                    start,
                    interior_start,
                    interior_end: line_start,
                    end: offset,
                });
            }
        }
    }

    None
}
