/// Display formatting for aggregate values.
///
/// Every aggregate in the tree is a plain `u64`; floating point exists
/// only here, at the display boundary. Sizes use binary steps (1024)
/// with the short labels disk tools conventionally show, topping out at
/// TB — a petabyte-scale subtree simply prints a large TB figure.

/// Unit labels, one per 1024× step.
const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Render a byte count for status lines and shells.
///
/// Whole bytes print exactly; KB/MB get one decimal, GB and above two,
/// mirroring how much precision is meaningful at each magnitude.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{bytes} B"),
        1 | 2 => format!("{value:.1} {}", UNITS[unit]),
        _ => format!("{value:.2} {}", UNITS[unit]),
    }
}

/// Render a file or folder count with thousands separators.
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
