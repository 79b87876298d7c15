//! JSON output for the CLI
//!
//! Every command prints exactly one JSON object on one line.

use std::io::Write;

use serde_json::{json, Value};

use super::errors::CliResult;

/// Write a success response
pub fn write_response<W: Write>(out: &mut W, data: Value) -> CliResult<()> {
    let response = json!({
        "status": "ok",
        "data": data
    });
    serde_json::to_writer(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write an error response
pub fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> CliResult<()> {
    let response = json!({
        "status": "error",
        "code": code,
        "message": message
    });
    serde_json::to_writer(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_per_response() {
        let mut buf = Vec::new();
        write_response(&mut buf, json!({"rows": 2})).unwrap();
        write_error(&mut buf, "FSTORE_NOT_FOUND", "gone").unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"data":{"rows":2},"status":"ok"}"#);
        assert!(lines[1].contains("FSTORE_NOT_FOUND"));
    }
}
