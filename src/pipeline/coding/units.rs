use std::sync::LazyLock;

use regex::Regex;

use super::cpt::{CRISIS_ADD_ON, CRISIS_BASE};

/// Behavioral health counseling, billed per 15 minutes.
pub const PER_15_MIN_CODE: &str = "H0004";
const PER_15_MIN_INCREMENT: u32 = 15;

/// Minutes covered by the crisis base code before add-on time starts.
const CRISIS_BASE_MINUTES: u32 = 53;
/// Minutes per crisis add-on unit.
const CRISIS_ADD_ON_INCREMENT: u32 = 30;

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// First integer in a duration string, read as minutes.
pub fn duration_minutes(duration: &str) -> Option<u32> {
    FIRST_INTEGER
        .find(duration)
        .and_then(|m| m.as_str().parse().ok())
}

/// Attach billable units to predicted codes.
///
/// Without a parseable duration the codes pass through unchanged. H0004 is
/// billed in 15-minute increments (rounded up). 90839 is emitted once and,
/// past 53 minutes, followed by `90840 xK` with one unit per started 30
/// minutes; a separately predicted 90840 is folded into that computed line.
/// Other codes carry no unit suffix.
pub fn compute_units(codes: &[String], duration: Option<&str>) -> Vec<String> {
    let Some(minutes) = duration.and_then(duration_minutes) else {
        return codes.to_vec();
    };

    let has_crisis_base = codes.iter().any(|c| c == CRISIS_BASE);
    let mut lines = Vec::with_capacity(codes.len() + 1);

    for code in codes {
        match code.as_str() {
            PER_15_MIN_CODE => {
                let units = minutes.div_ceil(PER_15_MIN_INCREMENT);
                lines.push(with_units(code, units));
            }
            CRISIS_BASE => {
                lines.push(code.clone());
                if minutes > CRISIS_BASE_MINUTES {
                    let units = (minutes - CRISIS_BASE_MINUTES).div_ceil(CRISIS_ADD_ON_INCREMENT);
                    lines.push(format!("{CRISIS_ADD_ON} x{units}"));
                }
            }
            CRISIS_ADD_ON if has_crisis_base => {}
            _ => lines.push(code.clone()),
        }
    }

    lines
}

fn with_units(code: &str, units: u32) -> String {
    if units == 0 {
        code.to_string()
    } else {
        format!("{code} x{units}")
    }
}
