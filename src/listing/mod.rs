//! Directory-listing normalization
//!
//! FTP servers answer `LIST` with free-form text whose layout depends on the
//! server's lineage. Six dialects survive in the wild: Unix `ls -l`,
//! NetWare, NetPresenz (classic Mac OS), EPLF, MultiNet (VMS) and MSDOS
//! `dir`. [`ListingParser`] tries them in that fixed priority order and
//! produces a normalized [`ListingEntry`] from the first structural match.
//! A line matching no grammar is simply skipped by the caller — servers
//! intersperse banners and totals that carry no entry at all.

pub mod time;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use time::TimeResolver;

/// One normalized directory entry.
///
/// `is_dir` and `is_retrievable` are not mutually exclusive: a symlink may
/// be enterable and downloadable at once, so both are set until the target
/// is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Entry name (never a full path).
    pub name: String,
    /// Size in bytes; 0 when the dialect does not report one.
    pub size: u64,
    /// Modification time, Unix epoch seconds UTC.
    pub mtime: i64,
    /// Entry can be entered with a change-directory.
    pub is_dir: bool,
    /// Entry can be downloaded.
    pub is_retrievable: bool,
    pub is_symlink: bool,
    /// Mode string as printed by the server (e.g. `rw-r--r--`), if any.
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// Multi-grammar listing-line parser.
///
/// All regexes are compiled once at construction; the parser holds no other
/// state and is shared behind an `Arc` by the FTP sessions.
pub struct ListingParser {
    unix_re: Regex,
    netware_re: Regex,
    netpresenz_re: Regex,
    eplf_re: Regex,
    eplf_type_re: Regex,
    eplf_size_re: Regex,
    eplf_mtime_re: Regex,
    multinet_re: Regex,
    msdos_re: Regex,
    time: TimeResolver,
}

impl ListingParser {
    pub fn new() -> Self {
        Self {
            // type, permissions, link count, owner, group, size, date, name
            unix_re: Regex::new(
                r"^([-bcdlps])([-rwxXsStT]{1,9})\s+(\d+)\s+(\w+)\s+(\w+)\s+(\d+)\s+([A-Za-z]{3}\s+\d{1,2}\s+[:\d]{4,5})\s(.+)$",
            )
            .expect("valid regex"),
            // type, [rights], owner, size, date, name
            // See https://www.novell.com/documentation/oes/ftp_enu/data/a3ep22p.html
            netware_re: Regex::new(
                r"^([-d])\s+(\[[-SRWCIEMFA]{8}\])\s+(\w+)\s+(\d+)\s+([A-Za-z]{3}\s+\d{1,2}\s+[:\d]{4,5})\s+(.+)$",
            )
            .expect("valid regex"),
            // Like Unix but the permissions field may be empty and the
            // owner/group blob is opaque.
            // See http://files.stairways.com/other/ftp-list-specs-info.txt
            netpresenz_re: Regex::new(
                r"^([-dl])([-rwx]{9}|)\s+(.*)\s+(\d+|)\s+([A-Za-z]{3}\s+\d{1,2}\s+[:\d]{4,5})\s+(.+)$",
            )
            .expect("valid regex"),
            // "+facts\tname" -- see http://cr.yp.to/ftp/list/eplf.html
            eplf_re: Regex::new(r"^\+(\S+)\s(.+)$").expect("valid regex"),
            eplf_type_re: Regex::new(r"(\+|,)(r|/),").expect("valid regex"),
            eplf_size_re: Regex::new(r"(\+|,)s(\d+),").expect("valid regex"),
            eplf_mtime_re: Regex::new(r"(\+|,)m(\d+),").expect("valid regex"),
            // name;version, file id, date, [owner,group], (permissions)
            multinet_re: Regex::new(
                r"^([^;]+);(\d+)\s+([\d/]+)\s+(\d{1,2}-[A-Za-z]{3}-\d{4}\s+\d{2}:\d{2}(:\d{2})?)\s+\[([^\]]+)\]\s+\(([^\)]+)\)$",
            )
            .expect("valid regex"),
            // date+time, <DIR> or size, name
            msdos_re: Regex::new(r"^(\d{2}-\d{2}-\d{2}\s+\d{2}:\d{2}[AP]M)\s+(<DIR>|\d+)\s+(.+)$")
                .expect("valid regex"),
            time: TimeResolver::new(),
        }
    }

    /// Parse one raw listing line.
    ///
    /// `reference` anchors the year inference for year-less Unix dates.
    /// Returns `None` when no grammar matches; the caller must skip the
    /// line, not fail the listing.
    pub fn parse_line(&self, line: &str, reference: DateTime<Utc>) -> Option<ListingEntry> {
        if let Some(caps) = self.unix_re.captures(line) {
            let typ = &caps[1];
            let mut name = caps[8].to_string();
            let (mut is_dir, mut is_retrievable, mut is_symlink) = (false, false, false);
            match typ {
                "d" => is_dir = true,
                "-" => is_retrievable = true,
                "l" => {
                    is_symlink = true;
                    is_dir = true;
                    is_retrievable = true;
                    name = strip_symlink_target(&name);
                }
                _ => {}
            }
            let mtime = self.time.resolve(&caps[7], reference)?.timestamp();
            return Some(ListingEntry {
                name,
                size: caps[6].parse().unwrap_or(0),
                mtime,
                is_dir,
                is_retrievable,
                is_symlink,
                permissions: Some(caps[2].to_string()),
                owner: Some(caps[4].to_string()),
                group: Some(caps[5].to_string()),
            });
        }

        if let Some(caps) = self.netware_re.captures(line) {
            let typ = &caps[1];
            let mtime = self.time.resolve(&caps[5], reference)?.timestamp();
            return Some(ListingEntry {
                name: caps[6].to_string(),
                size: caps[4].parse().unwrap_or(0),
                mtime,
                is_dir: typ == "d",
                is_retrievable: typ == "-",
                is_symlink: false,
                permissions: None,
                owner: None,
                group: None,
            });
        }

        if let Some(caps) = self.netpresenz_re.captures(line) {
            let typ = &caps[1];
            let mut name = caps[6].to_string();
            let (mut is_dir, mut is_retrievable, mut is_symlink) = (false, false, false);
            match typ {
                "d" => is_dir = true,
                "-" => is_retrievable = true,
                "l" => {
                    is_symlink = true;
                    is_dir = true;
                    is_retrievable = true;
                    name = strip_symlink_target(&name);
                }
                _ => {}
            }
            let permissions = match &caps[2] {
                "" => None,
                mode => Some(mode.to_string()),
            };
            let mtime = self.time.resolve(&caps[5], reference)?.timestamp();
            return Some(ListingEntry {
                name,
                size: caps[4].parse().unwrap_or(0),
                mtime,
                is_dir,
                is_retrievable,
                is_symlink,
                permissions,
                owner: None,
                group: None,
            });
        }

        if let Some(caps) = self.eplf_re.captures(line) {
            let facts = &caps[1];
            // Facts are order-insensitive; scan each independently and keep
            // the first occurrence. The mtime fact is already absolute epoch
            // seconds, so no resolution is needed.
            let typ = self
                .eplf_type_re
                .captures(facts)
                .map(|c| c[2].to_string())
                .unwrap_or_default();
            let size = self
                .eplf_size_re
                .captures(facts)
                .and_then(|c| c[2].parse().ok())
                .unwrap_or(0);
            let mtime = self
                .eplf_mtime_re
                .captures(facts)
                .and_then(|c| c[2].parse().ok())
                .unwrap_or(0);
            return Some(ListingEntry {
                name: caps[2].to_string(),
                size,
                mtime,
                is_dir: typ == "/",
                is_retrievable: typ == "r",
                is_symlink: false,
                permissions: None,
                owner: None,
                group: None,
            });
        }

        if let Some(caps) = self.multinet_re.captures(line) {
            let raw_name = &caps[1];
            // VMS marks directories with a .DIR suffix on the name itself;
            // no size is reported at all.
            let (name, is_dir) = match raw_name.strip_suffix(".DIR") {
                Some(stripped) => (stripped.to_string(), true),
                None => (raw_name.to_string(), false),
            };
            let mtime = self.time.resolve(&caps[4], reference)?.timestamp();
            return Some(ListingEntry {
                name,
                size: 0,
                mtime,
                is_dir,
                is_retrievable: !is_dir,
                is_symlink: false,
                permissions: None,
                owner: None,
                group: None,
            });
        }

        if let Some(caps) = self.msdos_re.captures(line) {
            let size_field = &caps[2];
            let is_dir = size_field == "<DIR>";
            let size = if is_dir {
                0
            } else {
                size_field.parse().unwrap_or(0)
            };
            let mtime = self.time.resolve(&caps[1], reference)?.timestamp();
            return Some(ListingEntry {
                name: caps[3].to_string(),
                size,
                mtime,
                is_dir,
                is_retrievable: !is_dir,
                is_symlink: false,
                permissions: None,
                owner: None,
                group: None,
            });
        }

        None
    }

    /// Parse a whole `LIST` response, silently dropping unmatched lines.
    pub fn parse_lines(&self, lines: &[String], reference: DateTime<Utc>) -> Vec<ListingEntry> {
        lines
            .iter()
            .filter_map(|line| self.parse_line(line, reference))
            .collect()
    }
}

impl Default for ListingParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep only the link source of a `name -> target` pair. A name that does
/// not split into exactly two parts is kept verbatim.
fn strip_symlink_target(name: &str) -> String {
    let parts: Vec<&str> = name.split(" -> ").collect();
    if parts.len() == 2 {
        parts[0].to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unix_file() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line(
                "-rw-r--r--   1 user  group  1234 Jan  5 10:00 file.txt",
                reference(),
            )
            .unwrap();
        assert_eq!(entry.name, "file.txt");
        assert_eq!(entry.size, 1234);
        assert!(!entry.is_dir);
        assert!(entry.is_retrievable);
        assert!(!entry.is_symlink);
        assert_eq!(entry.permissions.as_deref(), Some("rw-r--r--"));
        assert_eq!(entry.owner.as_deref(), Some("user"));
        assert_eq!(entry.group.as_deref(), Some("group"));
        assert_eq!(
            entry.mtime,
            Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_unix_directory_with_year() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line("drwxr-xr-x   2 root  wheel  512 Mar  1 2023 logs", reference())
            .unwrap();
        assert!(entry.is_dir);
        assert!(!entry.is_retrievable);
        assert_eq!(entry.name, "logs");
        assert_eq!(
            entry.mtime,
            Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_unix_symlink_keeps_link_source() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line(
                "lrwxrwxrwx   1 user  group  11 Jan  5 10:00 current -> releases/3",
                reference(),
            )
            .unwrap();
        assert_eq!(entry.name, "current");
        assert!(entry.is_symlink);
        // A symlink is both enterable and downloadable until resolved.
        assert!(entry.is_dir);
        assert!(entry.is_retrievable);
    }

    #[test]
    fn test_netware() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line(
                "d [RWCEAFMS] dhowells 512 Apr 22 10:04 dls",
                reference(),
            )
            .unwrap();
        assert_eq!(entry.name, "dls");
        assert!(entry.is_dir);
        assert!(!entry.is_retrievable);
        assert_eq!(entry.size, 512);
        assert_eq!(entry.permissions, None);
    }

    #[test]
    fn test_netpresenz() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line(
                "drwxrwxr-x               folder   2 May 10 1996 network",
                reference(),
            )
            .unwrap();
        assert_eq!(entry.name, "network");
        assert!(entry.is_dir);
        assert_eq!(entry.permissions.as_deref(), Some("rwxrwxr-x"));
    }

    #[test]
    fn test_eplf_file() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line("+i8388621.29609,m824255902,r,s10376,\t/bin/ls", reference())
            .unwrap();
        assert_eq!(entry.name, "/bin/ls");
        assert_eq!(entry.size, 10376);
        assert_eq!(entry.mtime, 824255902);
        assert!(!entry.is_dir);
        assert!(entry.is_retrievable);
    }

    #[test]
    fn test_eplf_directory() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line("+i8388621.29609,m824255902,/,\tbin", reference())
            .unwrap();
        assert_eq!(entry.name, "bin");
        assert!(entry.is_dir);
        assert!(!entry.is_retrievable);
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_multinet_file_and_directory() {
        let parser = ListingParser::new();
        let entry = parser
            .parse_line(
                "CII-MANUAL.TEX;1  213/216  29-JAN-1996 03:33:12  [ANONYMOU,ANONYMOUS]   (RWED,RWED,RE,)",
                reference(),
            )
            .unwrap();
        assert_eq!(entry.name, "CII-MANUAL.TEX");
        assert!(!entry.is_dir);
        assert!(entry.is_retrievable);
        // MultiNet does not report a size.
        assert_eq!(entry.size, 0);
        assert_eq!(
            entry.mtime,
            Utc.with_ymd_and_hms(1996, 1, 29, 3, 33, 12).unwrap().timestamp()
        );

        let dir = parser
            .parse_line(
                "SOURCES.DIR;1  4/4  4-FEB-2003 10:00  [SYSTEM,SYSTEM]  (RWE,RWE,RE,)",
                reference(),
            )
            .unwrap();
        assert_eq!(dir.name, "SOURCES");
        assert!(dir.is_dir);
        assert!(!dir.is_retrievable);
    }

    #[test]
    fn test_msdos() {
        let parser = ListingParser::new();
        let dir = parser
            .parse_line("04-27-00  09:09PM       <DIR>          licensed", reference())
            .unwrap();
        assert_eq!(dir.name, "licensed");
        assert!(dir.is_dir);
        assert_eq!(dir.size, 0);

        let file = parser
            .parse_line("04-14-00  03:47PM                  589 readme.htm", reference())
            .unwrap();
        assert_eq!(file.name, "readme.htm");
        assert!(!file.is_dir);
        assert!(file.is_retrievable);
        assert_eq!(file.size, 589);
        assert_eq!(
            file.mtime,
            Utc.with_ymd_and_hms(2000, 4, 14, 15, 47, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_unmatched_lines_are_skipped() {
        let parser = ListingParser::new();
        assert!(parser.parse_line("total 43", reference()).is_none());
        assert!(parser.parse_line("", reference()).is_none());
        assert!(parser
            .parse_line("220 welcome to ftp.example.com", reference())
            .is_none());
    }

    #[test]
    fn test_parse_lines_drops_noise() {
        let parser = ListingParser::new();
        let lines = vec![
            "total 2".to_string(),
            "-rw-r--r--   1 user  group  10 Jan  5 10:00 a.txt".to_string(),
            "drwxr-xr-x   2 user  group  512 Jan  5 10:00 sub".to_string(),
        ];
        let entries = parser.parse_lines(&lines, reference());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[1].name, "sub");
    }
}
