//! Console-facing value formatting: human file sizes, middle-ellipsized
//! paths, and the per-file status line.

const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
const PLACEHOLDER: &str = "...";

/// Human-readable size on the 1024 ladder. Values in the top tenth of an
/// exponent are bumped to the next unit, and precision drops as the
/// number grows: two decimals below 10, one below 100, none above.
pub fn human_size(len: u64) -> (f64, &'static str) {
    if len == 0 {
        return (0.0, "B");
    }
    let power = (len as f64).log2() / 10.0;
    let mut index = power.trunc() as usize;
    if power - index as f64 > 0.9 {
        index += 1;
    }
    index = index.min(UNITS.len() - 1);
    let value = len as f64 / (1u64 << (index * 10)) as f64;
    let value = if value >= 100.0 {
        value.round()
    } else if value >= 10.0 {
        (value * 10.0).round() / 10.0
    } else {
        (value * 100.0).round() / 100.0
    };
    (value, UNITS[index])
}

/// Shortens `text` to at most `max` characters by replacing the middle
/// with `...`, keeping both ends visible.
pub fn trim_middle(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(PLACEHOLDER.len());
    let left = budget / 2;
    let right = budget - left;
    let chars: Vec<char> = text.chars().collect();
    let head: String = chars[..left].iter().collect();
    let tail: String = chars[chars.len() - right..].iter().collect();
    format!("{head}{PLACEHOLDER}{tail}")
}

/// One console line per visited file: encoding name, code page, human
/// size, relative path. The trailing status tag is appended by the
/// caller once the outcome is known.
pub fn file_line(
    encoding_name: &str,
    code_page: Option<u16>,
    len: u64,
    rel_path: &str,
    max_path: usize,
) -> String {
    let (size, unit) = human_size(len);
    let code = code_page.map_or_else(|| "    -".to_string(), |code| format!("{code:5}"));
    format!(
        "{encoding_name:>20}({code})[{size:6} {unit:>2}] {}",
        trim_middle(rel_path, max_path)
    )
}
