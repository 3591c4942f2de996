//! On-disk record envelope for session checkpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::StoreError;
use crate::models::SessionState;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RecordEnvelope {
    format_version: u32,
    checksum: String,
    state: Value,
}

/// SHA-256 of the canonical JSON of a state value.
///
/// `serde_json::Value` keeps object keys sorted, so serializing the value
/// is canonical regardless of the original field order.
fn checksum(state: &Value) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Encode a state into its envelope.
pub fn encode(state: &SessionState) -> Result<Vec<u8>, StoreError> {
    let value = serde_json::to_value(state)?;
    let envelope = RecordEnvelope {
        format_version: FORMAT_VERSION,
        checksum: checksum(&value)?,
        state: value,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decode and verify a record stored under `id`.
pub fn decode(id: &str, bytes: &[u8]) -> Result<SessionState, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: id.to_string(),
        reason,
    };

    let envelope: RecordEnvelope =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable record: {}", e)))?;

    if envelope.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {}",
            envelope.format_version
        )));
    }

    let expected = checksum(&envelope.state).map_err(|e| corrupt(e.to_string()))?;
    if expected != envelope.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    let state: SessionState = serde_json::from_value(envelope.state)
        .map_err(|e| corrupt(format!("invalid session state: {}", e)))?;

    if state.id != id {
        return Err(corrupt(format!("record holds session {}", state.id)));
    }
    state
        .query
        .validate()
        .map_err(|e| corrupt(format!("invalid query: {}", e)))?;
    if (state.page_ids.len() as u64) > state.collected {
        return Err(corrupt(
            "more checkpointed page items than collected items".to_string(),
        ));
    }

    Ok(state)
}
