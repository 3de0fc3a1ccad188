use super::error::WireError;
use super::record::FixedRecord;

const TAG_QUERY: &str = "QUERY:";
const TAG_RECORD: &str = "RECORD";
const NOT_FOUND: &str = "NOT_FOUND";

/// `QUERY:<id>`, sent to a storage node's query port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    pub id: i32,
}

impl QueryRequest {
    pub fn encode(&self) -> String {
        format!("{TAG_QUERY}{}", self.id)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotText)?;
        let text = text.trim_end();

        let raw = text
            .strip_prefix(TAG_QUERY)
            .ok_or_else(|| WireError::UnknownFrame(text.to_string()))?;

        raw.trim()
            .parse()
            .map(|id| QueryRequest { id })
            .map_err(|_| WireError::InvalidField {
                field: "id",
                value: raw.to_string(),
            })
    }
}

/// Reply to a [`QueryRequest`]: `RECORD:<id>:<s0>:<s1>:<s2>:<s3>` or the literal `NOT_FOUND`.
///
/// Scores are written with `f32`'s shortest round-trip formatting, so a decoded record is
/// bit-for-bit the stored one.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Found(FixedRecord),
    NotFound,
}

impl QueryResponse {
    pub fn encode(&self) -> String {
        match self {
            QueryResponse::Found(record) => format!(
                "{TAG_RECORD}:{}:{}:{}:{}:{}",
                record.id, record.scores[0], record.scores[1], record.scores[2], record.scores[3]
            ),
            QueryResponse::NotFound => NOT_FOUND.to_string(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotText)?;
        let text = text.trim_end();

        if text == NOT_FOUND {
            return Ok(QueryResponse::NotFound);
        }

        let parts: Vec<&str> = text.split(':').collect();
        if parts[0] != TAG_RECORD {
            return Err(WireError::UnknownFrame(parts[0].to_string()));
        }
        if parts.len() != 6 {
            return Err(WireError::MissingField {
                frame: TAG_RECORD,
                field: "scores",
            });
        }

        let id = parts[1].parse().map_err(|_| WireError::InvalidField {
            field: "id",
            value: parts[1].to_string(),
        })?;

        let mut scores = [0f32; 4];
        for (slot, raw) in scores.iter_mut().zip(&parts[2..]) {
            *slot = raw.parse().map_err(|_| WireError::InvalidField {
                field: "score",
                value: raw.to_string(),
            })?;
        }

        Ok(QueryResponse::Found(FixedRecord { id, scores }))
    }
}
