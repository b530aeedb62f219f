use std::fmt;
use std::time::Duration;

/// A byte count rendered with a binary suffix: `0`, `512`, `1k`, `1.500M`.
/// Negative values render as `off`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeSuffix(pub i64);

impl SizeSuffix {
    fn scaled(self) -> (f64, &'static str) {
        const SUFFIXES: [(i64, &str); 5] = [
            (1 << 50, "P"),
            (1 << 40, "T"),
            (1 << 30, "G"),
            (1 << 20, "M"),
            (1 << 10, "k"),
        ];
        for (base, suffix) in SUFFIXES {
            if self.0 >= base {
                return (self.0 as f64 / base as f64, suffix);
            }
        }
        (self.0 as f64, "")
    }
}

impl fmt::Display for SizeSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            return f.write_str("off");
        }
        if self.0 == 0 {
            return f.write_str("0");
        }
        let (scaled, suffix) = self.scaled();
        if scaled.floor() == scaled {
            write!(f, "{scaled:.0}{suffix}")
        } else {
            write!(f, "{scaled:.3}{suffix}")
        }
    }
}

impl From<f64> for SizeSuffix {
    fn from(v: f64) -> Self {
        SizeSuffix(v as i64)
    }
}

/// Whole-second duration in `1h2m3s` form. Sub-second parts are dropped.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffix_rendering() {
        assert_eq!(SizeSuffix(-1).to_string(), "off");
        assert_eq!(SizeSuffix(0).to_string(), "0");
        assert_eq!(SizeSuffix(102).to_string(), "102");
        assert_eq!(SizeSuffix(1024).to_string(), "1k");
        assert_eq!(SizeSuffix(1536 * 1024).to_string(), "1.500M");
        assert_eq!(SizeSuffix(3 << 30).to_string(), "3G");
    }

    #[test]
    fn duration_rendering() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(15)), "15s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_millis(2900)), "2s");
    }
}
