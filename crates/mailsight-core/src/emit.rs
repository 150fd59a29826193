//! Machine-readable progress lines on stdout.
//!
//! Each event is one line: a fixed prefix followed by a JSON object.
//! `MAILSIGHT_PROGRESS:` carries a snapshot, `MAILSIGHT_RESULT:` a final
//! outcome. Consumers read stdout line by line and ignore anything else.

use std::io::Write;

use serde::Serialize;

use crate::progress::ProgressSnapshot;

pub const PROGRESS_PREFIX: &str = "MAILSIGHT_PROGRESS:";
pub const RESULT_PREFIX: &str = "MAILSIGHT_RESULT:";

fn line<T: Serialize>(prefix: &str, payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(json) => format!("{prefix}{json}"),
        Err(e) => format!(
            "{prefix}{}",
            serde_json::json!({"status": "error", "message": format!("unserializable payload: {e}")})
        ),
    }
}

fn write_line(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.flush();
}

pub fn snapshot_line(snapshot: &ProgressSnapshot) -> String {
    line(PROGRESS_PREFIX, snapshot)
}

pub fn result_line(result_type: &str, status: &str, data: serde_json::Value) -> String {
    let payload = serde_json::json!({
        "type": result_type,
        "status": status,
        "data": data
    });
    line(RESULT_PREFIX, &payload)
}

/// Emit one progress snapshot.
pub fn emit_snapshot(snapshot: &ProgressSnapshot) {
    write_line(&snapshot_line(snapshot));
}

/// Emit a final result, e.g. `("upload", "accepted", {...})`.
pub fn emit_result(result_type: &str, status: &str, data: serde_json::Value) {
    write_line(&result_line(result_type, status, data));
}

/// Convenience wrapper for a failed result.
pub fn emit_error(result_type: &str, message: &str) {
    emit_result(result_type, "error", serde_json::json!({ "message": message }));
}
