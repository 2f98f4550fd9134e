//! The deduplicated, delimiter-joined result list.

use crate::config::TraceConfig;

/// What happened to a candidate handed to [`FileList::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Added,
    Duplicate,
    /// The bounded list has no room left and accepts nothing further.
    Full,
}

/// Serialized list of option-file paths in first-observed order.
///
/// Entries are stored bracketed by the delimiter on both sides, which makes
/// duplicate detection an exact substring match on the serialized form (a
/// path can never match inside another path). The doubled delimiters this
/// leaves between entries are stripped by [`FileList::finish`].
pub struct FileList {
    buf: String,
    delimiter: char,
    max_size: usize,
    filter: String,
    sentinel_prefix: String,
    full: bool,
}

impl FileList {
    pub fn new(cfg: &TraceConfig) -> Self {
        FileList {
            buf: String::new(),
            delimiter: cfg.delimiter,
            max_size: cfg.max_list_size,
            filter: cfg.filter.clone(),
            sentinel_prefix: cfg.sentinel_prefix.clone(),
            full: false,
        }
    }

    /// If `candidate` is a child-reported error, return the message after
    /// the sentinel prefix.
    pub fn sentinel<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        candidate.strip_prefix(&self.sentinel_prefix)
    }

    /// Whether `candidate` names an option file at all.
    pub fn relevant(&self, candidate: &str) -> bool {
        candidate.contains(&self.filter)
    }

    pub fn append(&mut self, path: &str) -> Append {
        if self.full {
            return Append::Full;
        }
        let mut entry = String::with_capacity(path.len() + 2);
        entry.push(self.delimiter);
        entry.push_str(path);
        entry.push(self.delimiter);
        if self.buf.contains(&entry) {
            return Append::Duplicate;
        }
        if self.buf.len() + entry.len() >= self.max_size {
            self.full = true;
            return Append::Full;
        }
        self.buf.push_str(&entry);
        Append::Added
    }

    /// Final serialized form: one forward pass dropping leading and doubled
    /// delimiters, then the trailing one.
    pub fn finish(self) -> String {
        let mut out = String::with_capacity(self.buf.len());
        for c in self.buf.chars() {
            if c == self.delimiter && (out.is_empty() || out.ends_with(self.delimiter)) {
                continue;
            }
            out.push(c);
        }
        if out.ends_with(self.delimiter) {
            out.pop();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_with(delimiter: char, max_size: usize) -> FileList {
        FileList::new(&TraceConfig {
            delimiter,
            max_list_size: max_size,
            ..TraceConfig::default()
        })
    }

    fn list() -> FileList {
        FileList::new(&TraceConfig::default())
    }

    #[test]
    fn entries_come_out_in_first_observed_order() {
        let mut l = list();
        assert_eq!(l.append("/etc/my.cnf"), Append::Added);
        assert_eq!(l.append("/etc/mysql/my.cnf"), Append::Added);
        assert_eq!(l.append("/home/user/.my.cnf"), Append::Added);
        assert_eq!(
            l.finish(),
            "/etc/my.cnf\n/etc/mysql/my.cnf\n/home/user/.my.cnf"
        );
    }

    #[test]
    fn duplicates_collapse_to_the_first_observation() {
        let mut l = list();
        assert_eq!(l.append("/etc/my.cnf"), Append::Added);
        assert_eq!(l.append("/etc/my.cnf"), Append::Duplicate);
        assert_eq!(l.append("/home/user/.my.cnf"), Append::Added);
        assert_eq!(l.append("/etc/my.cnf"), Append::Duplicate);
        assert_eq!(l.finish(), "/etc/my.cnf\n/home/user/.my.cnf");
    }

    #[test]
    fn dedup_is_exact_not_substring() {
        let mut l = list();
        assert_eq!(l.append("/etc/mysql/my.cnf"), Append::Added);
        // A strict suffix of an existing entry is a different path.
        assert_eq!(l.append("mysql/my.cnf"), Append::Added);
        assert_eq!(l.finish(), "/etc/mysql/my.cnf\nmysql/my.cnf");
    }

    #[test]
    fn serialized_form_has_no_stray_delimiters() {
        let mut l = list_with(';', 1024);
        l.append("/etc/my.cnf");
        l.append("/home/user/.my.cnf");
        let out = l.finish();
        assert_eq!(out, "/etc/my.cnf;/home/user/.my.cnf");
        assert!(!out.starts_with(';'));
        assert!(!out.ends_with(';'));
        assert!(!out.contains(";;"));
    }

    #[test]
    fn overflow_truncates_but_keeps_earlier_entries() {
        // "/etc/my.cnf" bracketed is 13 bytes; the second entry would push
        // the buffer past 24.
        let mut l = list_with('\n', 24);
        assert_eq!(l.append("/etc/my.cnf"), Append::Added);
        assert_eq!(l.append("/etc/mysql/my.cnf"), Append::Full);
        assert_eq!(l.append("/home/user/.my.cnf"), Append::Full);
        assert_eq!(l.finish(), "/etc/my.cnf");
    }

    #[test]
    fn sentinel_prefix_is_recognized_and_stripped() {
        let l = list();
        assert_eq!(
            l.sentinel("Error: dlopen() failed"),
            Some("dlopen() failed")
        );
        assert_eq!(l.sentinel("/etc/my.cnf"), None);
        // The prefix must be at the very start.
        assert_eq!(l.sentinel("/tmp/Error: my.cnf"), None);
    }

    #[test]
    fn relevance_is_a_substring_test() {
        let l = list();
        assert!(l.relevant("/etc/my.cnf"));
        assert!(l.relevant("/home/user/.my.cnf"));
        assert!(l.relevant("/etc/mysql/conf.d//my.cnf"));
        assert!(!l.relevant("/etc/ld.so.cache"));
        assert!(!l.relevant("/lib/x86_64-linux-gnu/libc.so.6"));
    }

    #[test]
    fn empty_list_serializes_to_an_empty_string() {
        assert_eq!(list().finish(), "");
    }
}
