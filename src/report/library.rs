//! Library configuration reports over the info records.
//!
//! The analyzer emits information messages when a called function or used
//! type has no library configuration. These reports count the names those
//! messages mention.

use std::collections::HashMap;

use super::html::{encode_component, link, page};
use crate::storage::ResultRecord;

/// Names shown per report.
pub const LIBRARY_NAMES_SHOWN: usize = 5000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibraryReport {
    Function,
    NoReturn,
    UseIgnore,
    CheckType,
}

impl LibraryReport {
    pub const ALL: [LibraryReport; 4] = [
        LibraryReport::Function,
        LibraryReport::NoReturn,
        LibraryReport::UseIgnore,
        LibraryReport::CheckType,
    ];

    pub fn message_id(self) -> &'static str {
        match self {
            LibraryReport::Function => "checkLibraryFunction",
            LibraryReport::NoReturn => "checkLibraryNoReturn",
            LibraryReport::UseIgnore => "checkLibraryUseIgnore",
            LibraryReport::CheckType => "checkLibraryCheckType",
        }
    }

    pub fn page_name(self) -> &'static str {
        match self {
            LibraryReport::Function => "check_library_function_report.html",
            LibraryReport::NoReturn => "check_library_noreturn_report.html",
            LibraryReport::UseIgnore => "check_library_use_ignore_report.html",
            LibraryReport::CheckType => "check_library_check_type_report.html",
        }
    }

    pub fn from_page(path: &str) -> Option<Self> {
        let name = path.trim_start_matches('/');
        Self::ALL.into_iter().find(|kind| kind.page_name() == name)
    }

    fn column_title(self) -> &'static str {
        match self {
            LibraryReport::CheckType => "Type",
            _ => "Function",
        }
    }

    /// Name mentioned by a message line of this kind.
    ///
    /// ```text
    /// checkLibraryFunction:  ... configuration for function foo() [checkLibraryFunction]
    /// checkLibraryCheckType: ... configuration for std::string [checkLibraryCheckType]
    /// others:                ...: Function foo() should have ...
    /// ```
    pub fn extract_name(self, line: &str) -> Option<String> {
        let line = line.trim_end();
        let name = match self {
            LibraryReport::Function => {
                let start = line.find("for function ")? + "for function ".len();
                let end = line.rfind(" should").or_else(|| line.rfind(" ["))?;
                line.get(start..end)?
            }
            LibraryReport::CheckType => {
                let start = line.find("configuration for ")? + "configuration for ".len();
                let end = line.rfind('[')?;
                line.get(start..end)?
            }
            LibraryReport::NoReturn | LibraryReport::UseIgnore => {
                let start = line.find(": Function ")? + ": Function ".len();
                let end = line.rfind("should")?;
                line.get(start..end)?
            }
        };
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// `(name, count)` by count descending, then name, at most `limit` entries.
pub fn count_library_names<I>(records: I, kind: LibraryReport, limit: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = ResultRecord>,
{
    let suffix = format!("[{}]", kind.message_id());
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        for line in &record.info_messages {
            if !line.trim_end().ends_with(&suffix) {
                continue;
            }
            if let Some(name) = kind.extract_name(line) {
                *counts.entry(name).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

pub fn library_page(kind: LibraryReport, ranked: &[(String, usize)]) -> String {
    let mut body = format!(
        "Top {} {}s are shown.\n<pre>\n<b>{:>10} {}</b>\n",
        LIBRARY_NAMES_SHOWN,
        kind.column_title().to_lowercase(),
        "Count",
        kind.column_title()
    );
    for (name, count) in ranked {
        let href = format!("check_library-{}", encode_component(name));
        body.push_str(&format!("{:>10} {}\n", count, link(&href, name)));
    }
    body.push_str("</pre>\n");
    page(&format!("{} report", kind.message_id()), &body)
}

/// Every check-library info line mentioning `name`, each package's matches
/// preceded by its url.
pub fn library_name_lines<I>(records: I, name: &str) -> String
where
    I: IntoIterator<Item = ResultRecord>,
{
    let needle = format!(" {} ", name);
    let mut out = String::new();
    for record in records {
        let mut url = Some(record.url.clone().unwrap_or_else(|| record.package.clone()));
        for line in &record.info_messages {
            if !line.contains("[checkLibrary") {
                continue;
            }
            let matches = LibraryReport::ALL
                .into_iter()
                .any(|kind| kind.extract_name(line).as_deref() == Some(name))
                || line.contains(&needle);
            if !matches {
                continue;
            }
            if let Some(url) = url.take() {
                out.push_str(&url);
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNCTION_LINE: &str = "a.c:3:5: information: --check-library: There is no matching configuration for function foo() [checkLibraryFunction]";
    const NORETURN_LINE: &str = "a.c:9:1: information: --check-library: Function bar() should have <noreturn> configuration [checkLibraryNoReturn]";
    const CHECKTYPE_LINE: &str = "a.c:1:1: information: --check-library: There is no matching configuration for std::string [checkLibraryCheckType]";

    fn info_record(name: &str, lines: &[&str]) -> ResultRecord {
        let text = format!(
            "2024-03-05 10:00\nftp://x/{}.tar.gz\ncppcheck: 2.14 head\ninfo messages:\n{}\n",
            name,
            lines.join("\n")
        );
        ResultRecord::parse(name, &text)
    }

    #[test]
    fn test_extract_names() {
        assert_eq!(
            LibraryReport::Function.extract_name(FUNCTION_LINE).as_deref(),
            Some("foo()")
        );
        assert_eq!(
            LibraryReport::NoReturn.extract_name(NORETURN_LINE).as_deref(),
            Some("bar()")
        );
        assert_eq!(
            LibraryReport::CheckType.extract_name(CHECKTYPE_LINE).as_deref(),
            Some("std::string")
        );
        assert_eq!(LibraryReport::NoReturn.extract_name("unrelated"), None);
    }

    #[test]
    fn test_counts_ranked() {
        let records = vec![
            info_record("a", &[NORETURN_LINE, NORETURN_LINE, FUNCTION_LINE]),
            info_record(
                "b",
                &["b.c:1:1: information: --check-library: Function baz() should have <noreturn> configuration [checkLibraryNoReturn]"],
            ),
        ];
        let ranked = count_library_names(records, LibraryReport::NoReturn, 10);
        assert_eq!(
            ranked,
            vec![("bar()".to_string(), 2), ("baz()".to_string(), 1)]
        );
    }

    #[test]
    fn test_page_links_encoded_names() {
        let html = library_page(
            LibraryReport::CheckType,
            &[("std::string".to_string(), 3)],
        );
        assert!(html.contains("href=\"check_library-std%3A%3Astring\""));
        assert!(html.contains("checkLibraryCheckType report"));
    }

    #[test]
    fn test_name_lines() {
        let records = vec![
            info_record("a", &[NORETURN_LINE, CHECKTYPE_LINE]),
            info_record("b", &[CHECKTYPE_LINE]),
        ];
        let text = library_name_lines(records, "bar()");
        assert_eq!(text, format!("ftp://x/a.tar.gz\n{}\n", NORETURN_LINE));
    }

    #[test]
    fn test_page_lookup() {
        assert_eq!(
            LibraryReport::from_page("/check_library_use_ignore_report.html"),
            Some(LibraryReport::UseIgnore)
        );
        assert_eq!(LibraryReport::from_page("/nope.html"), None);
    }
}
