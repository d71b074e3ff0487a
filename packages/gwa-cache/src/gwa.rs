//! GWA line codec
//!
//! GWA is tab separated. The first field of a payload is the keyword,
//! optionally followed by `:` and a sid made of `{key:value}` pairs:
//!
//! ```text
//! SET\tMEMB.8:{speckle_app_id:gh/a}\t5\t...
//! SET_AT\t2\tLOAD_2D_THERMAL.2:{speckle_app_id:gh/a}\t...
//! ```

use crate::error::{CacheError, CacheResult};
use crate::record::{CommandKind, RecordEntry};

pub const SID_APP_ID: &str = "speckle_app_id";
pub const SID_STREAM_ID: &str = "speckle_stream_id";

/// A GWA command broken into the parts the cache tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGwa {
    pub keyword: String,
    pub index: Option<u32>,
    pub application_id: Option<String>,
    pub stream_id: Option<String>,
    /// The record content without any `SET`/`SET_AT` prefix
    pub payload: String,
    pub command_kind: CommandKind,
}

impl ParsedGwa {
    /// Cache entry for this line; `None` when the line carries no index
    pub fn into_entry(self) -> Option<RecordEntry> {
        let index = self.index.filter(|i| *i > 0)?;
        Some(
            RecordEntry::new(self.keyword, index, self.payload)
                .application_id(self.application_id.unwrap_or_default())
                .stream_id(self.stream_id.unwrap_or_default())
                .command_kind(self.command_kind),
        )
    }
}

/// Parse a full command line or a bare payload
pub fn parse_command(line: &str) -> CacheResult<ParsedGwa> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.first().map_or(true, |f| f.trim().is_empty()) {
        return Err(CacheError::parse("empty GWA line"));
    }

    let (command_kind, set_at_index, payload) = match fields[0] {
        "SET_AT" => {
            if fields.len() < 3 {
                return Err(CacheError::parse(format!("truncated SET_AT command: {}", line)));
            }
            let index = fields[1].trim().parse::<u32>().map_err(|e| {
                CacheError::parse(format!("invalid SET_AT index '{}': {}", fields[1], e))
            })?;
            (CommandKind::SetAt, Some(index), fields[2..].join("\t"))
        }
        "SET" => {
            if fields.len() < 2 {
                return Err(CacheError::parse(format!("truncated SET command: {}", line)));
            }
            (CommandKind::Set, None, fields[1..].join("\t"))
        }
        _ => (CommandKind::Set, None, line.to_string()),
    };

    let mut payload_fields = payload.split('\t');
    let head = payload_fields.next().unwrap_or_default();
    let (keyword, sid) = match head.split_once(':') {
        Some((kw, sid)) => (kw, sid),
        None => (head, ""),
    };
    if keyword.trim().is_empty() {
        return Err(CacheError::parse(format!("missing keyword: {}", line)));
    }

    let index = match set_at_index {
        Some(i) => Some(i),
        None => payload_fields
            .next()
            .and_then(|f| f.trim().parse::<u32>().ok()),
    };

    Ok(ParsedGwa {
        keyword: keyword.to_string(),
        index,
        application_id: sid_value(sid, SID_APP_ID),
        stream_id: sid_value(sid, SID_STREAM_ID),
        payload,
        command_kind,
    })
}

/// Value of `key` in a `{key:value}{key:value}` sid
pub fn sid_value(sid: &str, key: &str) -> Option<String> {
    let mut rest = sid;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        if let Some((k, v)) = after[..end].split_once(':') {
            if k == key && !v.is_empty() {
                return Some(v.to_string());
            }
        }
        rest = &after[end + 1..];
    }
    None
}

/// `KEYWORD:{speckle_app_id:..}{speckle_stream_id:..}`, or the bare keyword
pub fn keyword_with_sid(
    keyword: &str,
    application_id: Option<&str>,
    stream_id: Option<&str>,
) -> String {
    let mut sid = String::new();
    if let Some(id) = application_id.filter(|s| !s.is_empty()) {
        sid.push_str(&format!("{{{}:{}}}", SID_APP_ID, id));
    }
    if let Some(id) = stream_id.filter(|s| !s.is_empty()) {
        sid.push_str(&format!("{{{}:{}}}", SID_STREAM_ID, id));
    }
    if sid.is_empty() {
        keyword.to_string()
    } else {
        format!("{}:{}", keyword, sid)
    }
}

/// Keyword without its version suffix (`MEMB.8` -> `MEMB`)
pub fn keyword_base(keyword: &str) -> &str {
    keyword.split('.').next().unwrap_or(keyword)
}

pub fn set_command(kind: CommandKind, index: u32, payload: &str) -> String {
    match kind {
        CommandKind::Set => format!("SET\t{}", payload),
        CommandKind::SetAt => format!("SET_AT\t{}\t{}", index, payload),
    }
}

/// `BLANK` keeps the slot for absolute writes; `DELETE` removes a positional one
pub fn delete_command(kind: CommandKind, keyword: &str, index: u32) -> String {
    match kind {
        CommandKind::Set => format!("BLANK\t{}\t{}", keyword_base(keyword), index),
        CommandKind::SetAt => format!("DELETE\t{}\t{}", keyword_base(keyword), index),
    }
}

pub fn highest_command(keyword: &str) -> String {
    format!("HIGHEST\t{}", keyword_base(keyword))
}
