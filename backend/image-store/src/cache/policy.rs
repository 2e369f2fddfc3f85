//! Eviction policies for `FileCache::manage`

use super::CacheEntry;
use crate::key::validate_key;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const LOG_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub count: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Request counts per storage identity
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    stats: HashMap<String, AccessStats>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identity: impl Into<String>, at: Option<DateTime<Utc>>) {
        let stats = self.stats.entry(identity.into()).or_default();
        stats.count += 1;
        if at > stats.last_seen {
            stats.last_seen = at;
        }
    }

    /// Build from common/combined format access log lines
    ///
    /// Only requests under `route_prefix` are counted; `?x=W&y=H` turns the
    /// request into the derived identity `key_WxH`. Lines that don't parse
    /// are skipped.
    pub fn from_lines<I, S>(lines: I, route_prefix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut log = Self::new();
        for line in lines {
            if let Some((identity, at)) = parse_line(line.as_ref(), route_prefix) {
                log.record(identity, at);
            }
        }
        log
    }

    pub fn stats(&self, identity: &str) -> AccessStats {
        self.stats.get(identity).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Identities by descending request count, ties by most recent then name
    pub fn most_requested(&self) -> Vec<(&str, AccessStats)> {
        let mut ranked: Vec<_> = self.stats.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(b.1.last_seen.cmp(&a.1.last_seen))
                .then(a.0.cmp(b.0))
        });
        ranked
    }
}

fn parse_line(line: &str, route_prefix: &str) -> Option<(String, Option<DateTime<Utc>>)> {
    let at = line
        .split_once('[')
        .and_then(|(_, rest)| rest.split_once(']'))
        .and_then(|(ts, _)| DateTime::parse_from_str(ts, LOG_TIME_FORMAT).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let request = line.split('"').nth(1)?;
    let target = request.split_whitespace().nth(1)?;
    let rest = target.strip_prefix(route_prefix)?;
    let (key, query) = match rest.split_once('?') {
        Some((key, query)) => (key, Some(query)),
        None => (rest, None),
    };
    validate_key(key).ok()?;

    let mut width = None;
    let mut height = None;
    for pair in query.unwrap_or_default().split('&') {
        match pair.split_once('=') {
            Some(("x", v)) => width = v.parse::<u32>().ok().filter(|v| *v > 0),
            Some(("y", v)) => height = v.parse::<u32>().ok().filter(|v| *v > 0),
            _ => {}
        }
    }

    let identity = match (width, height) {
        (Some(w), Some(h)) => format!("{key}_{w}x{h}"),
        _ => key.to_string(),
    };
    Some((identity, at))
}

/// Entries to remove and identities to fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Cache file names
    pub evict: Vec<String>,
    /// Storage identities
    pub prefetch: Vec<String>,
}

/// Decides what a cache maintenance pass does
pub trait EvictionPolicy: Send + Sync {
    fn plan(&self, entries: &[CacheEntry], log: &AccessLog, max_size: u64) -> EvictionPlan;
}

/// Evicts the least requested entries first; recency then mtime break ties
#[derive(Debug, Clone)]
pub struct LruPolicy {
    pub max_prefetch: usize,
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self { max_prefetch: 32 }
    }
}

impl EvictionPolicy for LruPolicy {
    fn plan(&self, entries: &[CacheEntry], log: &AccessLog, max_size: u64) -> EvictionPlan {
        let mut ranked: Vec<(&CacheEntry, AccessStats)> = entries
            .iter()
            .map(|e| (e, log.stats(e.identity())))
            .collect();
        ranked.sort_by(|(a, sa), (b, sb)| {
            sa.count
                .cmp(&sb.count)
                .then(sa.last_seen.cmp(&sb.last_seen))
                .then(a.modified.cmp(&b.modified))
                .then(a.name.cmp(&b.name))
        });

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut evict = Vec::new();
        for (entry, _) in &ranked {
            if total <= max_size {
                break;
            }
            total = total.saturating_sub(entry.size);
            evict.push(entry.name.clone());
        }

        let mut prefetch = Vec::new();
        if total < max_size {
            let cached: HashSet<&str> = entries.iter().map(|e| e.identity()).collect();
            prefetch = log
                .most_requested()
                .into_iter()
                .filter(|(identity, _)| !cached.contains(identity))
                .take(self.max_prefetch)
                .map(|(identity, _)| identity.to_string())
                .collect();
        }

        EvictionPlan { evict, prefetch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, size: u64, secs: i64) -> CacheEntry {
        CacheEntry {
            name: name.to_string(),
            size,
            modified: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_parse_combined_line() {
        let line = r#"10.0.0.1 - - [10/Oct/2023:13:55:36 -0700] "GET /files/abc_X-1?x=100&y=80 HTTP/1.1" 200 2326 "-" "curl/8.0""#;
        let (identity, at) = parse_line(line, "/files/").unwrap();
        assert_eq!(identity, "abc_X-1_100x80");
        assert_eq!(
            at.unwrap(),
            Utc.with_ymd_and_hms(2023, 10, 10, 20, 55, 36).unwrap()
        );
    }

    #[test]
    fn test_parse_line_skips_foreign_and_invalid() {
        let other = r#"1.2.3.4 - - [10/Oct/2023:13:55:36 +0000] "GET /search?q=a HTTP/1.1" 200 1"#;
        assert!(parse_line(other, "/files/").is_none());

        let traversal = r#"1.2.3.4 - - [10/Oct/2023:13:55:36 +0000] "GET /files/../etc HTTP/1.1" 404 1"#;
        assert!(parse_line(traversal, "/files/").is_none());

        assert!(parse_line("garbage", "/files/").is_none());
    }

    #[test]
    fn test_parse_line_partial_box_is_original() {
        let line = r#"1.2.3.4 - - [bad time] "GET /files/abc?x=100 HTTP/1.1" 200 1"#;
        let (identity, at) = parse_line(line, "/files/").unwrap();
        assert_eq!(identity, "abc");
        assert!(at.is_none());
    }

    #[test]
    fn test_from_lines_counts() {
        let lines = [
            r#"a - - [10/Oct/2023:13:55:36 +0000] "GET /files/abc HTTP/1.1" 200 1"#,
            r#"a - - [10/Oct/2023:13:55:37 +0000] "GET /files/abc HTTP/1.1" 200 1"#,
            r#"a - - [10/Oct/2023:13:55:38 +0000] "GET /files/def HTTP/1.1" 200 1"#,
        ];
        let log = AccessLog::from_lines(lines, "/files/");
        assert_eq!(log.len(), 2);
        assert_eq!(log.stats("abc").count, 2);
        assert_eq!(log.most_requested()[0].0, "abc");
        assert_eq!(log.stats("missing"), AccessStats::default());
    }

    #[test]
    fn test_lru_evicts_until_within_budget() {
        let entries = vec![
            entry("a.jpg", 40, 100),
            entry("b.jpg", 40, 50),
            entry("c.jpg", 40, 10),
        ];
        let mut log = AccessLog::new();
        log.record("a", None);
        log.record("a", None);

        let plan = LruPolicy::default().plan(&entries, &log, 50);
        // b and c are unrequested; c has the older mtime
        assert_eq!(plan.evict, vec!["c.jpg".to_string(), "b.jpg".to_string()]);
    }

    #[test]
    fn test_lru_recency_breaks_count_ties() {
        let entries = vec![entry("old.jpg", 10, 0), entry("new.jpg", 10, 0)];
        let mut log = AccessLog::new();
        log.record("old", Some(Utc.timestamp_opt(1_000, 0).unwrap()));
        log.record("new", Some(Utc.timestamp_opt(2_000, 0).unwrap()));

        let plan = LruPolicy::default().plan(&entries, &log, 10);
        assert_eq!(plan.evict, vec!["old.jpg".to_string()]);
    }

    #[test]
    fn test_lru_prefetch_only_with_headroom() {
        let entries = vec![entry("a.jpg", 10, 0)];
        let mut log = AccessLog::new();
        log.record("a", None);
        for _ in 0..3 {
            log.record("hot", None);
        }
        log.record("warm_10x10", None);

        let policy = LruPolicy { max_prefetch: 1 };
        let plan = policy.plan(&entries, &log, 100);
        assert!(plan.evict.is_empty());
        assert_eq!(plan.prefetch, vec!["hot".to_string()]);

        let plan = policy.plan(&entries, &log, 10);
        assert!(plan.prefetch.is_empty());
    }
}
