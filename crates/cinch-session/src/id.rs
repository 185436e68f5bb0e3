//! Time-ordered identifiers for sessions, messages, and parts.
//!
//! Ascending identifiers sort lexicographically in creation order, which is
//! what lets a consumer replay a message's part log (listed by key) in the
//! same order the processor emitted it. Descending identifiers invert the
//! time component so the newest entity sorts first.

use rand::Rng;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the identifier body (after `prefix_`).
const ID_LENGTH: usize = 26;

/// Hex characters used for the time component.
const TIME_HEX_LENGTH: usize = 12;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Entity kind encoded in the identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Session,
    Message,
    Part,
}

impl Prefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::Session => "ses",
            Prefix::Message => "msg",
            Prefix::Part => "prt",
        }
    }
}

/// Last (timestamp, counter) pair handed out. Guarded by a mutex so two
/// threads can never observe the same pair.
static CLOCK: Mutex<(u64, u64)> = Mutex::new((0, 0));

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Next monotonic value: `timestamp * 4096 + counter`.
///
/// If the wall clock steps backwards the previous timestamp is reused, so
/// values never decrease within a process.
fn next_tick() -> u64 {
    let mut clock = CLOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ts = now_ms().max(clock.0);
    if ts == clock.0 {
        clock.1 += 1;
    } else {
        *clock = (ts, 1);
    }
    ts.wrapping_mul(0x1000).wrapping_add(clock.1)
}

fn random_base62(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE62[rng.random_range(0..BASE62.len())] as char)
        .collect()
}

fn create(prefix: Prefix, descending: bool) -> String {
    let mut tick = next_tick();
    if descending {
        tick = !tick;
    }
    // Low 48 bits, big-endian hex.
    let time_hex = format!("{:012x}", tick & 0xffff_ffff_ffff);
    format!(
        "{}_{}{}",
        prefix.as_str(),
        time_hex,
        random_base62(ID_LENGTH - TIME_HEX_LENGTH)
    )
}

/// A new identifier that sorts after every identifier created before it.
pub fn ascending(prefix: Prefix) -> String {
    create(prefix, false)
}

/// A new identifier that sorts before every identifier created before it.
pub fn descending(prefix: Prefix) -> String {
    create(prefix, true)
}

/// Whether `id` carries the given prefix.
pub fn has_prefix(id: &str, prefix: Prefix) -> bool {
    id.strip_prefix(prefix.as_str())
        .is_some_and(|rest| rest.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(ascending(Prefix::Session).starts_with("ses_"));
        assert!(ascending(Prefix::Message).starts_with("msg_"));
        assert!(ascending(Prefix::Part).starts_with("prt_"));
    }

    #[test]
    fn ascending_ids_sort_in_creation_order() {
        let ids: Vec<String> = (0..500).map(|_| ascending(Prefix::Part)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn descending_ids_sort_in_reverse() {
        let first = descending(Prefix::Message);
        let second = descending(Prefix::Message);
        assert!(first > second, "{first} should sort after {second}");
    }

    #[test]
    fn id_length() {
        let id = ascending(Prefix::Part);
        assert_eq!(id.len(), "prt_".len() + ID_LENGTH);
    }

    #[test]
    fn ascending_ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..200).map(|_| ascending(Prefix::Part)).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn has_prefix_checks_separator() {
        assert!(has_prefix("ses_abc", Prefix::Session));
        assert!(!has_prefix("session", Prefix::Session));
        assert!(!has_prefix("msg_abc", Prefix::Session));
    }
}
