//! Free-text measurement normalization.
//!
//! Source pages render numbers with inconsistent separators ("1.1 m", "1,1 m",
//! "6,9 kg", "0.3–0.4 m"). `normalize_measurement` turns such text into an
//! `f64` without knowing anything about units; rescaling happens at the call site.

/// Parse a measurement out of free text.
///
/// Everything except digits, `.` and `,` is discarded. When the cleaned text
/// holds two or more digit runs, the last two runs are joined as
/// `integer.fraction`, which makes "1.1" and "1,1" equivalent. Plain digits
/// parse as-is. Returns `None` for empty input, text without digits, or runs
/// separated by more than one separator character.
pub fn normalize_measurement(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let runs = digit_runs(&cleaned);
    let value = match runs.as_slice() {
        [] => None,
        [(only, _)] => only.parse::<f64>().ok(),
        [.., (int_part, _), (frac_part, gap)] => {
            if *gap != 1 {
                tracing::debug!(raw, "malformed measurement: separator run between last digits");
                return None;
            }
            format!("{}.{}", int_part, frac_part).parse::<f64>().ok()
        }
    };

    if value.is_none() {
        tracing::debug!(raw, "malformed measurement, treating as unavailable");
    }
    value
}

/// Split into maximal digit runs, each paired with the number of separator
/// characters that preceded it.
fn digit_runs(cleaned: &str) -> Vec<(&str, usize)> {
    let mut runs = Vec::new();
    let mut gap = 0usize;
    let mut start: Option<usize> = None;

    for (i, c) in cleaned.char_indices() {
        if c.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
            }
        } else {
            if let Some(s) = start.take() {
                runs.push((&cleaned[s..i], gap));
                gap = 0;
            }
            gap += 1;
        }
    }
    if let Some(s) = start {
        runs.push((&cleaned[s..], gap));
    }

    runs
}
