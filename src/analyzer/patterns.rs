//! Textual file-write detection.
//!
//! This is a coarse pre-filter that runs on the raw source before anything is
//! executed. It matches substrings, including inside strings and comments, and
//! is never the only barrier: the syscall filter enforces the real policy.

/// Substring patterns that indicate filesystem mutation in Python code, in
/// the order they are reported.
pub const PYTHON_WRITE_PATTERNS: &[&str] = &[
    "open(",
    "file(",
    "write(",
    "writelines(",
    "savefig(",
    "mkdir",
    "makedirs",
    "rmdir",
    "removedirs",
    "unlink",
    "remove",
    "rename",
];

/// Markers whose presence means the code drives the plotting library.
pub const PYTHON_PLOTTING_MARKERS: &[&str] = &["matplotlib", "pyplot", "plt."];

/// Plotting call sites that are masked out before scanning plotting code:
/// the figure save call and the figure constructors.
pub const PYTHON_PLOTTING_EXEMPT_CALLS: &[&str] = &["savefig(", "figure(", "Figure("];

pub const JAVASCRIPT_WRITE_PATTERNS: &[&str] = &[
    "writeFile",
    "appendFile",
    "createWriteStream",
    "mkdir",
    "rmdir",
    "unlink",
    "rename",
    "truncate",
];

/// Ordered list of denied substrings, with an optional plotting exemption.
#[derive(Debug, Clone)]
pub struct FileWritePolicy {
    patterns: &'static [&'static str],
    plotting_markers: &'static [&'static str],
    exempt_calls: &'static [&'static str],
}

impl FileWritePolicy {
    pub const fn new(
        patterns: &'static [&'static str],
        plotting_markers: &'static [&'static str],
        exempt_calls: &'static [&'static str],
    ) -> Self {
        Self {
            patterns,
            plotting_markers,
            exempt_calls,
        }
    }

    pub const fn python() -> Self {
        Self::new(
            PYTHON_WRITE_PATTERNS,
            PYTHON_PLOTTING_MARKERS,
            PYTHON_PLOTTING_EXEMPT_CALLS,
        )
    }

    pub const fn javascript() -> Self {
        Self::new(JAVASCRIPT_WRITE_PATTERNS, &[], &[])
    }

    /// Whether the code uses the plotting library.
    pub fn uses_plotting(&self, code: &str) -> bool {
        self.plotting_markers.iter().any(|marker| code.contains(marker))
    }

    /// Returns the first denied pattern found in `code`, if any.
    ///
    /// In plotting code, every exempt call site is blanked out first so that
    /// only those calls are tolerated; other patterns on the same line still
    /// match.
    pub fn scan(&self, code: &str) -> Option<&'static str> {
        let scanned = if self.uses_plotting(code) {
            mask_calls(code, self.exempt_calls)
        } else {
            code.to_string()
        };

        self.patterns
            .iter()
            .copied()
            .find(|pattern| scanned.contains(pattern))
    }
}

/// Replace every occurrence of the given call sites with spaces of the same
/// length, so neighbouring text cannot merge into a new match.
fn mask_calls(code: &str, calls: &[&str]) -> String {
    calls.iter().fold(code.to_string(), |masked, call| {
        masked.replace(call, &" ".repeat(call.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_open_is_denied() {
        let policy = FileWritePolicy::python();
        assert_eq!(policy.scan("f = open('x.txt', 'w')"), Some("open("));
        assert_eq!(policy.scan("x = 1 + 1"), None);
    }

    #[test]
    fn test_first_pattern_in_list_order_wins() {
        let policy = FileWritePolicy::python();
        // "write(" appears before "open(" in the text but not in the list
        assert_eq!(policy.scan("w.write(1)\nopen('a')"), Some("open("));
    }

    #[test]
    fn test_savefig_denied_without_plotting_markers() {
        let policy = FileWritePolicy::python();
        assert_eq!(policy.scan("chart.savefig('out.png')"), Some("savefig("));
    }

    #[test]
    fn test_savefig_allowed_in_plotting_code() {
        let policy = FileWritePolicy::python();
        let code = "import matplotlib.pyplot as plt\nfig = plt.figure()\nfig.savefig('a.png')\n";
        assert_eq!(policy.scan(code), None);
    }

    #[test]
    fn test_other_patterns_still_denied_in_plotting_code() {
        let policy = FileWritePolicy::python();
        let code = "import matplotlib.pyplot as plt\nplt.savefig('a.png')\nopen('b', 'w')\n";
        assert_eq!(policy.scan(code), Some("open("));
    }

    #[test]
    fn test_mask_keeps_length() {
        let masked = mask_calls("a.savefig(b)", &["savefig("]);
        assert_eq!(masked.len(), "a.savefig(b)".len());
        assert!(!masked.contains("savefig"));
    }

    #[test]
    fn test_javascript_patterns() {
        let policy = FileWritePolicy::javascript();
        assert_eq!(policy.scan("fs.writeFileSync('a', 'b')"), Some("writeFile"));
        assert!(!policy.uses_plotting("plt.plot()"));
    }
}
