//! Wire frames: message sanitizing and JSON encoding.

use parley_history::HistoryRecord;

/// A serialized text frame, cheap to clone for fan-out.
pub type Frame = axum::extract::ws::Utf8Bytes;

/// Normalize inbound text.
///
/// Every run of whitespace that contains a control character (newline, tab,
/// CR, ...) collapses to a single space. Plain-space runs are kept. The result
/// is trimmed.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    let mut run_has_control = false;

    for c in text.chars() {
        if c.is_control() || c.is_whitespace() {
            run_has_control |= c.is_control();
            run.push(c);
        } else {
            flush_run(&mut out, &mut run, &mut run_has_control);
            out.push(c);
        }
    }
    flush_run(&mut out, &mut run, &mut run_has_control);
    out.trim().to_string()
}

fn flush_run(out: &mut String, run: &mut String, has_control: &mut bool) {
    if *has_control {
        out.push(' ');
    } else {
        out.push_str(run);
    }
    run.clear();
    *has_control = false;
}

/// Encode a record as one JSON text frame.
pub fn encode(record: &HistoryRecord) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(record).map(Frame::from)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn collapses_control_runs() {
        assert_eq!(sanitize("hello\nworld"), "hello world");
        assert_eq!(sanitize("a \r\n\t b"), "a b");
        assert_eq!(sanitize("x\u{0007}y"), "x y");
    }

    #[test]
    fn keeps_plain_spaces() {
        assert_eq!(sanitize("two  spaces"), "two  spaces");
    }

    #[test]
    fn trims_edges() {
        assert_eq!(sanitize("\n  padded \t"), "padded");
        assert_eq!(sanitize(" \n\r "), "");
    }

    #[test]
    fn leaves_unicode_alone() {
        assert_eq!(sanitize("héllo wörld ✓"), "héllo wörld ✓");
    }

    #[test]
    fn encode_record() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap();
        let frame = encode(&HistoryRecord::at(ts, "alice", "hi \"there\"")).unwrap();
        insta::assert_snapshot!(
            frame.as_str(),
            @r#"{"timestamp":"2024-03-09T08:07:06Z","name":"alice","message":"hi \"there\""}"#
        );
    }
}
