use crate::error::{Result, TraceError};
use crate::frame::Frame;

const MAX_WILDCARDS: usize = 100;

/// Whether the host platform needs Windows-style filename normalization
/// (case folding, `/` -> `\`). Parameterized rather than `cfg!(windows)` so
/// the normalization rules themselves are unit-testable on any host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformStyle {
    Windows,
    Posix,
}

impl PlatformStyle {
    pub fn host() -> Self {
        if cfg!(windows) {
            PlatformStyle::Windows
        } else {
            PlatformStyle::Posix
        }
    }
}

/// Include/exclude pattern over (filename, lineno), with optional
/// whole-traceback matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub include: bool,
    pattern: String,
    pub lineno: Option<u32>,
    pub match_traceback: bool,
    style: PlatformStyle,
}

fn normalize_pyc_pyo(name: &str) -> String {
    if let Some(stripped) = name.strip_suffix(".pyc").or_else(|| name.strip_suffix(".pyo")) {
        format!("{}.py", stripped)
    } else {
        name.to_string()
    }
}

fn normalize_for_style(name: &str, style: PlatformStyle) -> String {
    let name = normalize_pyc_pyo(name);
    match style {
        PlatformStyle::Windows => name.to_lowercase().replace('/', "\\"),
        PlatformStyle::Posix => name,
    }
}

/// Collapse runs of consecutive `*` into one, returning the collapsed
/// pattern and the number of wildcard segments it contains.
fn collapse_wildcards(pattern: &str) -> (String, usize) {
    let mut collapsed = String::with_capacity(pattern.len());
    let mut count = 0usize;
    let mut prev_was_star = false;
    for ch in pattern.chars() {
        if ch == '*' {
            if !prev_was_star {
                collapsed.push(ch);
                count += 1;
            }
            prev_was_star = true;
        } else {
            collapsed.push(ch);
            prev_was_star = false;
        }
    }
    (collapsed, count)
}

/// Classic `*`-only glob matching (no `?`, no character classes).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star_idx = Some(pi);
            match_idx = ti;
            pi += 1;
        } else if let Some(si) = star_idx {
            pi = si + 1;
            match_idx += 1;
            ti = match_idx;
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

impl Filter {
    pub fn new_for_style(
        include: bool,
        filename_pattern: &str,
        lineno: Option<u32>,
        match_traceback: bool,
        style: PlatformStyle,
    ) -> Result<Self> {
        let normalized = normalize_for_style(filename_pattern, style);
        let (collapsed, wildcards) = collapse_wildcards(&normalized);
        if wildcards > MAX_WILDCARDS {
            return Err(TraceError::invalid_argument(
                "too many joker characters in the filename pattern",
            ));
        }
        Ok(Filter {
            include,
            pattern: collapsed,
            lineno,
            match_traceback,
            style,
        })
    }

    pub fn new(
        include: bool,
        filename_pattern: &str,
        lineno: Option<u32>,
        match_traceback: bool,
    ) -> Result<Self> {
        Self::new_for_style(include, filename_pattern, lineno, match_traceback, PlatformStyle::host())
    }

    pub fn filename_pattern(&self) -> &str {
        &self.pattern
    }

    /// True iff `filename` matches this filter's pattern, in this filter's
    /// include/exclude sense (so this already returns "keep?", not a raw
    /// pattern hit).
    pub fn match_filename(&self, filename: Option<&str>) -> bool {
        let positive = match filename {
            None => false,
            Some(name) => glob_match(&self.pattern, &normalize_for_style(name, self.style)),
        };
        if self.include {
            positive
        } else {
            !positive
        }
    }

    /// True iff (filename, lineno) matches, honoring this filter's own
    /// `lineno` (absent means "any line of the matched file").
    pub fn matches(&self, filename: Option<&str>, lineno: Option<u32>) -> bool {
        let name_positive = match filename {
            None => false,
            Some(name) => glob_match(&self.pattern, &normalize_for_style(name, self.style)),
        };
        let positive = name_positive && (self.lineno.is_none() || self.lineno == lineno);
        if self.include {
            positive
        } else {
            !positive
        }
    }

    /// True iff the traceback as a whole matches, per `match_traceback`.
    pub fn matches_traceback(&self, frames: &[Frame]) -> bool {
        if self.match_traceback {
            let per_frame = frames
                .iter()
                .map(|f| self.match_filename(f.filename.as_deref()));
            if self.include {
                per_frame.fold(false, |acc, m| acc || m)
            } else {
                per_frame.fold(true, |acc, m| acc && m)
            }
        } else {
            let innermost = frames.first();
            self.match_filename(innermost.and_then(|f| f.filename.as_deref()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fnmatch(filename: &str, pattern: &str) -> bool {
        fnmatch_style(filename, pattern, PlatformStyle::Posix)
    }

    fn fnmatch_style(filename: &str, pattern: &str, style: PlatformStyle) -> bool {
        let filter = Filter::new_for_style(true, pattern, None, false, style).unwrap();
        filter.match_filename(Some(filename))
    }

    #[test]
    fn empty_pattern_and_empty_name() {
        assert!(!fnmatch("abc", ""));
        assert!(!fnmatch("", "abc"));
        assert!(fnmatch("", ""));
        assert!(fnmatch("", "*"));
    }

    #[test]
    fn literal_and_single_wildcard_forms() {
        assert!(fnmatch("abc", "abc"));
        assert!(!fnmatch("abc", "abcd"));
        assert!(!fnmatch("abc", "def"));

        assert!(fnmatch("abc", "a*"));
        assert!(fnmatch("abc", "abc*"));
        assert!(!fnmatch("abc", "b*"));
        assert!(!fnmatch("abc", "abcd*"));

        assert!(fnmatch("abc", "a*c"));
        assert!(fnmatch("abcdcx", "a*cx"));
        assert!(!fnmatch("abb", "a*c"));
        assert!(!fnmatch("abcdce", "a*cx"));

        assert!(fnmatch("abcde", "a*c*e"));
        assert!(fnmatch("abcbdefeg", "a*bd*eg"));
        assert!(!fnmatch("abcdd", "a*c*e"));
        assert!(!fnmatch("abcbdefef", "a*bd*eg"));
    }

    #[test]
    fn compiled_bytecode_suffix_normalization() {
        assert!(fnmatch("a.pyc", "a.py"));
        assert!(fnmatch("a.pyo", "a.py"));
        assert!(fnmatch("a.py", "a.pyc"));
        assert!(fnmatch("a.py", "a.pyo"));
    }

    #[test]
    fn windows_is_case_insensitive_and_normalizes_separators() {
        assert!(fnmatch_style("aBC", "ABc", PlatformStyle::Windows));
        assert!(fnmatch_style("aBcDe", "Ab*dE", PlatformStyle::Windows));
        assert!(fnmatch_style("a/b", r"a\b", PlatformStyle::Windows));
        assert!(fnmatch_style(r"a\b", "a/b", PlatformStyle::Windows));

        assert!(!fnmatch_style("aBC", "ABc", PlatformStyle::Posix));
        assert!(!fnmatch_style("a/b", r"a\b", PlatformStyle::Posix));
    }

    #[test]
    fn long_runs_of_stars_collapse_to_one_wildcard() {
        let n = 1000;
        let stars = "*".repeat(n);
        assert!(fnmatch(&"a".repeat(n), &stars));
        assert!(fnmatch(&(("a".repeat(n)) + "c"), &stars));
        assert!(fnmatch(&"a".repeat(n), &format!("a{}a", stars)));
        assert!(fnmatch(&(("a".repeat(n)) + "b"), &format!("a{}b", stars)));
        assert!(!fnmatch(&(("a".repeat(n)) + "b"), &format!("a{}c", stars)));
    }

    #[test]
    fn repeated_star_segments_match_like_one_star() {
        assert!(fnmatch(&"a".repeat(10), &"a*".repeat(10)));
        assert!(!fnmatch(&"a".repeat(10), &(("a*".repeat(10)) + "b")));
    }

    #[test]
    fn consecutive_wildcards_collapse_at_construction() {
        let f = Filter::new(true, "a****b", None, false).unwrap();
        assert_eq!(f.filename_pattern(), "a*b");
        let f = Filter::new(true, "***x****", None, false).unwrap();
        assert_eq!(f.filename_pattern(), "*x*");
        let f = Filter::new(true, "1*2**3***4", None, false).unwrap();
        assert_eq!(f.filename_pattern(), "1*2*3*4");
    }

    #[test]
    fn pattern_with_too_many_wildcards_is_rejected() {
        let pattern = "a*".repeat(101);
        let err = Filter::new(true, &pattern, None, false).unwrap_err();
        assert_eq!(err.to_string(), "too many joker characters in the filename pattern");
    }

    #[test]
    fn match_filename_absence_rule() {
        let include = Filter::new(true, "abc", None, false).unwrap();
        assert!(include.match_filename(Some("abc")));
        assert!(!include.match_filename(Some("12356")));
        assert!(!include.match_filename(None));

        let exclude = Filter::new(false, "abc", None, false).unwrap();
        assert!(!exclude.match_filename(Some("abc")));
        assert!(exclude.match_filename(Some("12356")));
        assert!(exclude.match_filename(None));
    }

    #[test]
    fn matches_honors_lineno() {
        let f = Filter::new(true, "abc", None, false).unwrap();
        assert!(f.matches(Some("abc"), Some(5)));
        assert!(f.matches(Some("abc"), None));
        assert!(!f.matches(Some("12356"), Some(5)));
        assert!(!f.matches(None, Some(5)));
        assert!(!f.matches(None, None));

        let f = Filter::new(false, "abc", None, false).unwrap();
        assert!(!f.matches(Some("abc"), Some(5)));
        assert!(f.matches(Some("12356"), Some(5)));
        assert!(f.matches(None, Some(5)));
        assert!(f.matches(None, None));

        let f = Filter::new(true, "abc", Some(5), false).unwrap();
        assert!(f.matches(Some("abc"), Some(5)));
        assert!(!f.matches(Some("abc"), Some(10)));
        assert!(!f.matches(Some("abc"), None));
        assert!(!f.matches(None, Some(5)));

        let f = Filter::new(false, "abc", Some(5), false).unwrap();
        assert!(!f.matches(Some("abc"), Some(5)));
        assert!(f.matches(Some("abc"), Some(10)));
        assert!(f.matches(Some("abc"), None));
        assert!(f.matches(None, Some(5)));
        assert!(f.matches(None, None));
    }

    fn frame(name: &str, line: u32) -> Frame {
        Frame::new(Some(name.to_string()), Some(line))
    }

    #[test]
    fn matches_traceback_any_vs_all_vs_innermost_only() {
        let t1 = vec![frame("a.py", 2), frame("b.py", 3)];
        let t2 = vec![frame("b.py", 4), frame("b.py", 5)];

        let f = Filter::new(true, "b.py", None, true).unwrap();
        assert!(f.matches_traceback(&t1));
        assert!(f.matches_traceback(&t2));

        let f = Filter::new(true, "b.py", None, false).unwrap();
        assert!(!f.matches_traceback(&t1));
        assert!(f.matches_traceback(&t2));

        let f = Filter::new(false, "b.py", None, true).unwrap();
        assert!(!f.matches_traceback(&t1));
        assert!(!f.matches_traceback(&t2));

        let f = Filter::new(false, "b.py", None, false).unwrap();
        assert!(f.matches_traceback(&t1));
        assert!(!f.matches_traceback(&t2));
    }
}
