//! Mapping between `PartContent` variants and the typed columns of `parts`.
//!
//! This is the only place that knows which columns belong to which type tag.
//! Writes go through `from_part`, reads through `into_part`; both match
//! exhaustively on the variant or tag.

use rusqlite::{params, Connection, Row};
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::transcript::{MessagePart, PartContent};

/// Column list matching `PartColumns::from_row`, for `parts` aliased as `p`
pub const PART_SELECT_COLUMNS: &str = "p.type, p.text_content, p.reasoning_content, \
     p.image_url, p.image_mime_type, p.file_url, p.file_name, p.file_mime_type, \
     p.tool_call_id, p.tool_call_name, p.tool_call_args, \
     p.tool_result_id, p.tool_result_name, p.tool_result_result, p.tool_result_is_error, \
     p.provider_metadata";

/// One `parts` row, minus keys and bookkeeping columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartColumns {
    pub part_type: String,
    pub text_content: Option<String>,
    pub reasoning_content: Option<String>,
    pub image_url: Option<String>,
    pub image_mime_type: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_mime_type: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_call_name: Option<String>,
    pub tool_call_args: Option<String>,
    pub tool_result_id: Option<String>,
    pub tool_result_name: Option<String>,
    pub tool_result_result: Option<String>,
    pub tool_result_is_error: Option<bool>,
    pub provider_metadata: Option<String>,
}

impl PartColumns {
    pub fn from_part(part: &MessagePart) -> Result<Self> {
        let mut columns = PartColumns {
            part_type: part.content.type_tag().to_string(),
            provider_metadata: part
                .provider_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            ..Default::default()
        };

        match &part.content {
            PartContent::Text { text } => {
                columns.text_content = Some(text.clone());
            }
            PartContent::Reasoning { text } => {
                columns.reasoning_content = Some(text.clone());
            }
            PartContent::Image { url, media_type } => {
                columns.image_url = Some(url.clone());
                columns.image_mime_type = media_type.clone();
            }
            PartContent::File { url, name, media_type } => {
                columns.file_url = Some(url.clone());
                columns.file_name = Some(name.clone());
                columns.file_mime_type = media_type.clone();
            }
            PartContent::ToolCall { tool_call_id, tool_name, input } => {
                columns.tool_call_id = Some(tool_call_id.clone());
                columns.tool_call_name = Some(tool_name.clone());
                columns.tool_call_args = Some(serde_json::to_string(input)?);
            }
            PartContent::ToolResult { tool_call_id, tool_name, output, is_error } => {
                columns.tool_result_id = Some(tool_call_id.clone());
                columns.tool_result_name = tool_name.clone();
                columns.tool_result_result = Some(serde_json::to_string(output)?);
                columns.tool_result_is_error = Some(*is_error);
            }
        }

        Ok(columns)
    }

    /// Reads `PART_SELECT_COLUMNS` starting at `offset`. `None` when the row
    /// carries no part (left join on a message without parts).
    pub fn from_row(row: &Row, offset: usize) -> rusqlite::Result<Option<Self>> {
        let part_type: Option<String> = row.get(offset)?;
        let Some(part_type) = part_type else {
            return Ok(None);
        };
        Ok(Some(PartColumns {
            part_type,
            text_content: row.get(offset + 1)?,
            reasoning_content: row.get(offset + 2)?,
            image_url: row.get(offset + 3)?,
            image_mime_type: row.get(offset + 4)?,
            file_url: row.get(offset + 5)?,
            file_name: row.get(offset + 6)?,
            file_mime_type: row.get(offset + 7)?,
            tool_call_id: row.get(offset + 8)?,
            tool_call_name: row.get(offset + 9)?,
            tool_call_args: row.get(offset + 10)?,
            tool_result_id: row.get(offset + 11)?,
            tool_result_name: row.get(offset + 12)?,
            tool_result_result: row.get(offset + 13)?,
            tool_result_is_error: row.get(offset + 14)?,
            provider_metadata: row.get(offset + 15)?,
        }))
    }

    /// Rebuilds the part. `Ok(None)` for a type tag this build does not know.
    pub fn into_part(self, message_id: &str) -> Result<Option<MessagePart>> {
        let corrupt = |reason: String| ChatError::CorruptPart {
            message_id: message_id.to_string(),
            reason,
        };
        let require = |value: Option<String>, column: &str| {
            value.ok_or_else(|| corrupt(format!("{} part without {}", self.part_type, column)))
        };
        let parse_json = |raw: String, column: &str| -> Result<Value> {
            serde_json::from_str(&raw).map_err(|e| corrupt(format!("{} is not valid JSON: {}", column, e)))
        };

        let content = match self.part_type.as_str() {
            PartContent::TEXT => PartContent::Text {
                text: require(self.text_content.clone(), "text_content")?,
            },
            PartContent::REASONING => PartContent::Reasoning {
                text: require(self.reasoning_content.clone(), "reasoning_content")?,
            },
            PartContent::IMAGE => PartContent::Image {
                url: require(self.image_url.clone(), "image_url")?,
                media_type: self.image_mime_type.clone(),
            },
            PartContent::FILE => PartContent::File {
                url: require(self.file_url.clone(), "file_url")?,
                name: require(self.file_name.clone(), "file_name")?,
                media_type: self.file_mime_type.clone(),
            },
            PartContent::TOOL_CALL => PartContent::ToolCall {
                tool_call_id: require(self.tool_call_id.clone(), "tool_call_id")?,
                tool_name: require(self.tool_call_name.clone(), "tool_call_name")?,
                input: parse_json(require(self.tool_call_args.clone(), "tool_call_args")?, "tool_call_args")?,
            },
            PartContent::TOOL_RESULT => PartContent::ToolResult {
                tool_call_id: require(self.tool_result_id.clone(), "tool_result_id")?,
                tool_name: self.tool_result_name.clone(),
                output: parse_json(
                    require(self.tool_result_result.clone(), "tool_result_result")?,
                    "tool_result_result",
                )?,
                is_error: self.tool_result_is_error.unwrap_or(false),
            },
            _ => return Ok(None),
        };

        let provider_metadata = match self.provider_metadata.clone() {
            Some(raw) => Some(parse_json(raw, "provider_metadata")?),
            None => None,
        };

        Ok(Some(MessagePart { content, provider_metadata }))
    }

    pub fn insert(
        &self,
        conn: &Connection,
        message_id: &str,
        order: i64,
        created_at: &str,
    ) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO parts
             (message_id, type, part_order, created_at,
              text_content, reasoning_content,
              image_url, image_mime_type,
              file_url, file_name, file_mime_type,
              tool_call_id, tool_call_name, tool_call_args,
              tool_result_id, tool_result_name, tool_result_result, tool_result_is_error,
              provider_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        )?;
        stmt.execute(params![
            message_id,
            self.part_type,
            order,
            created_at,
            self.text_content,
            self.reasoning_content,
            self.image_url,
            self.image_mime_type,
            self.file_url,
            self.file_name,
            self.file_mime_type,
            self.tool_call_id,
            self.tool_call_name,
            self.tool_call_args,
            self.tool_result_id,
            self.tool_result_name,
            self.tool_result_result,
            self.tool_result_is_error,
            self.provider_metadata,
        ])
    }
}
