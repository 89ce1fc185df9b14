//! Parsers for the `/proc/net/snmp`, `/proc/net/netstat` and
//! `/proc/net/snmp6` counter layouts.
//!
//! Both parsers are pure functions over a `BufRead` and return a nested
//! section → counter → value map. Per-entry parse failures drop the entry
//! and never fail the whole read; only I/O errors propagate.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Section → counter name → sampled value.
pub type CounterMap = HashMap<String, HashMap<String, i64>>;

/// Parses one header/value line pair of the two-line layout.
///
/// The leading token of both lines must be identical (e.g. `Tcp:`); the
/// section name is that token with the trailing colon stripped. Values that
/// are not valid integers are omitted, sibling counters are kept.
fn parse_section_couple(header_line: &str, value_line: &str) -> Option<(String, HashMap<String, i64>)> {
    let header_fields: Vec<&str> = header_line.split_whitespace().collect();
    let value_fields: Vec<&str> = value_line.split_whitespace().collect();

    match (header_fields.first(), value_fields.first()) {
        (Some(h), Some(v)) if h == v => {}
        _ => return None,
    }

    let section = header_fields[0].trim_end_matches(':').to_string();
    let mut counters = HashMap::new();
    for (name, raw) in header_fields[1..].iter().zip(&value_fields[1..]) {
        if let Ok(value) = raw.parse::<i64>() {
            counters.insert((*name).to_string(), value);
        }
    }
    Some((section, counters))
}

/// Parses the two-line layout used by `/proc/net/snmp` and
/// `/proc/net/netstat`.
///
/// A mismatched pair consumes both lines and parsing resumes with the next
/// line as a fresh header. A trailing header with no value line is ignored.
pub fn parse_two_line<R: BufRead>(reader: R) -> io::Result<CounterMap> {
    let mut result = CounterMap::new();
    let mut lines = reader.lines();

    while let Some(header_line) = lines.next() {
        let header_line = header_line?;
        let value_line = match lines.next() {
            Some(line) => line?,
            None => break,
        };

        if let Some((section, counters)) = parse_section_couple(&header_line, &value_line) {
            result.insert(section, counters);
        }
    }

    Ok(result)
}

/// Opens and parses a two-line layout file.
pub fn parse_two_line_file<P: AsRef<Path>>(path: P) -> io::Result<CounterMap> {
    let file = File::open(path)?;
    parse_two_line(BufReader::new(file))
}

/// Parses one `/proc/net/snmp6` line.
///
/// Section and counter share a single token split at the first `'6'`,
/// inclusive on the left: `Icmp6InMsgs 42` → (`Icmp6`, `InMsgs`, 42).
fn parse_snmp6_line(line: &str) -> Option<(String, String, i64)> {
    let idx = line.find('6')?;
    if idx + 1 >= line.len() {
        return None;
    }
    let section = line[..=idx].trim().to_string();
    let rest = line[idx + 1..].trim();
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != 2 {
        return None;
    }
    let value = fields[1].parse::<i64>().ok()?;
    Some((section, fields[0].to_string(), value))
}

/// Parses the one-line-per-counter layout of `/proc/net/snmp6`.
///
/// Lines without a `'6'`, with a trailing `'6'`, with the wrong field count
/// or a non-integer value are silently dropped.
pub fn parse_snmp6<R: BufRead>(reader: R) -> io::Result<CounterMap> {
    let mut result = CounterMap::new();
    for line in reader.lines() {
        let line = line?;
        if let Some((section, counter, value)) = parse_snmp6_line(&line) {
            result.entry(section).or_default().insert(counter, value);
        }
    }
    Ok(result)
}

/// Opens and parses a `/proc/net/snmp6` layout file.
pub fn parse_snmp6_file<P: AsRef<Path>>(path: P) -> io::Result<CounterMap> {
    let file = File::open(path)?;
    parse_snmp6(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn section_couple_valid() {
        let (section, counters) = parse_section_couple(
            "TcpExt: SyncookiesSent SyncookiesRecv",
            "TcpExt: 10 20",
        )
        .unwrap();
        assert_eq!(section, "TcpExt");
        assert_eq!(counters["SyncookiesSent"], 10);
        assert_eq!(counters["SyncookiesRecv"], 20);
    }

    #[test]
    fn section_couple_mismatched_prefix() {
        assert!(parse_section_couple("TcpExt: A B", "Other: 10 20").is_none());
    }

    #[test]
    fn section_couple_keeps_siblings_of_invalid_value() {
        let (section, counters) =
            parse_section_couple("TcpExt: A B", "TcpExt: 10 notanint").unwrap();
        assert_eq!(section, "TcpExt");
        assert_eq!(counters.len(), 1);
        assert_eq!(counters["A"], 10);
    }

    #[test]
    fn two_line_multiple_sections() {
        let data = "TcpExt: SyncookiesSent SyncookiesRecv\nTcpExt: 10 20\nIpExt: InOctets OutOctets\nIpExt: 100 200\n";
        let result = parse_two_line(Cursor::new(data)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result["TcpExt"]["SyncookiesRecv"], 20);
        assert_eq!(result["IpExt"]["InOctets"], 100);
    }

    #[test]
    fn two_line_malformed_pair_is_skipped() {
        // "Other:" consumes the value slot; IpExt pair still parses.
        let data = "TcpExt: A B\nOther: 10 20\nIpExt: InOctets OutOctets\nIpExt: 100 200\n";
        let result = parse_two_line(Cursor::new(data)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result["IpExt"]["OutOctets"], 200);
    }

    #[test]
    fn two_line_trailing_header_ignored() {
        let data = "Tcp: ActiveOpens\nTcp: 7\nUdp: InDatagrams\n";
        let result = parse_two_line(Cursor::new(data)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result["Tcp"]["ActiveOpens"], 7);
    }

    #[test]
    fn two_line_empty_input() {
        let result = parse_two_line(Cursor::new("")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn two_line_negative_and_zero_values() {
        let data = "Tcp: MaxConn CurrEstab\nTcp: -1 0\n";
        let result = parse_two_line(Cursor::new(data)).unwrap();
        assert_eq!(result["Tcp"]["MaxConn"], -1);
        assert_eq!(result["Tcp"]["CurrEstab"], 0);
    }

    #[test]
    fn two_line_round_trips_rendered_map() {
        let data = "Tcp: ActiveOpens PassiveOpens\nTcp: 7 3\n";
        let parsed = parse_two_line(Cursor::new(data)).unwrap();

        let mut rendered = String::new();
        for (section, counters) in &parsed {
            let mut names = Vec::new();
            let mut values = Vec::new();
            for (name, value) in counters {
                names.push(name.clone());
                values.push(value.to_string());
            }
            rendered.push_str(&format!("{}: {}\n", section, names.join(" ")));
            rendered.push_str(&format!("{}: {}\n", section, values.join(" ")));
        }

        assert_eq!(parse_two_line(Cursor::new(rendered)).unwrap(), parsed);
    }

    #[test]
    fn snmp6_line_splits_at_first_six() {
        let (section, counter, value) = parse_snmp6_line("Icmp6InMsgs 42").unwrap();
        assert_eq!(section, "Icmp6");
        assert_eq!(counter, "InMsgs");
        assert_eq!(value, 42);

        let (section, counter, value) = parse_snmp6_line("Udp6InDatagrams 999").unwrap();
        assert_eq!(section, "Udp6");
        assert_eq!(counter, "InDatagrams");
        assert_eq!(value, 999);
    }

    #[test]
    fn snmp6_line_rejections() {
        // No '6' at all.
        assert!(parse_snmp6_line("TcpActiveOpens 5").is_none());
        // '6' is the final character.
        assert!(parse_snmp6_line("Icmp6").is_none());
        // Wrong field count after the split.
        assert!(parse_snmp6_line("Icmp6InMsgs 42 extra").is_none());
        // Non-integer value.
        assert!(parse_snmp6_line("Icmp6InMsgs abc").is_none());
    }

    #[test]
    fn snmp6_bad_lines_do_not_affect_others() {
        let data = "Tcp6ActiveOpens 5\nbogus line here\nIcmp6InMsgs 2\n";
        let result = parse_snmp6(Cursor::new(data)).unwrap();
        assert_eq!(result["Tcp6"]["ActiveOpens"], 5);
        assert_eq!(result["Icmp6"]["InMsgs"], 2);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn snmp6_empty_input() {
        assert!(parse_snmp6(Cursor::new("")).unwrap().is_empty());
    }
}
