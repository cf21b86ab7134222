/// Coarse outcome of an item, as shown to the user.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum StatusColor {
    #[default]
    Unknown = 0,
    Pass = 1,
    Fail = 2,
}

/// Status fields shared by project files and tasks.
///
/// Everything here is derived from result artifacts on disk;
/// nothing is set directly by the user.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Status {
    pub color: StatusColor,
    /// Outcome label reported by the tool ("PASS", "FAIL", "ERROR", ...)
    pub label: Option<String>,
    /// Run progress, 0..=100
    pub percentage: u8,
    /// Elapsed seconds of the most recent completed run
    pub time_spent: Option<u32>,
    /// Captured log of the most recent completed run
    pub previous_log: Option<String>,
}

/// Roll child colors up into a parent color and percentage.
///
/// The percentage counts children that reached any outcome. The parent only
/// gets an outcome once every child has one, and then only if they agree:
/// a mix of passes and failures stays `Unknown`.
pub fn aggregate(children: &[StatusColor]) -> (StatusColor, u8) {
    if children.is_empty() {
        return (StatusColor::Unknown, 0);
    }
    let total = children.len();
    let resolved = children.iter().filter(|c| **c != StatusColor::Unknown).count();
    let passed = children.iter().filter(|c| **c == StatusColor::Pass).count();

    let percentage = (resolved * 100 / total) as u8;
    let color = if resolved < total {
        StatusColor::Unknown
    } else if passed == total {
        StatusColor::Pass
    } else if passed == 0 {
        StatusColor::Fail
    } else {
        StatusColor::Unknown
    };
    (color, percentage)
}

#[cfg(test)]
mod test {
    use super::*;
    use StatusColor::*;

    #[test]
    fn test_all_pass() {
        assert_eq!(aggregate(&[Pass, Pass]), (Pass, 100));
    }

    #[test]
    fn test_all_fail() {
        assert_eq!(aggregate(&[Fail, Fail, Fail]), (Fail, 100));
    }

    #[test]
    fn test_mixed_rolls_up_to_unknown() {
        assert_eq!(aggregate(&[Pass, Pass, Fail]), (Unknown, 100));
    }

    #[test]
    fn test_incomplete() {
        assert_eq!(aggregate(&[Pass, Unknown, Unknown]), (Unknown, 33));
        assert_eq!(aggregate(&[Unknown]), (Unknown, 0));
        assert_eq!(aggregate(&[]), (Unknown, 0));
    }
}
