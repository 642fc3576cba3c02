use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

// Step workers emit from their own threads, so the record is process wide.
// Tests only ever assert that a name was seen, never that it was absent.
static EVENTS_RECORDED: Lazy<Mutex<HashMap<&'static str, usize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn record_internal_event(name: &'static str) {
    *EVENTS_RECORDED.lock().entry(name).or_default() += 1;
}

pub fn contains_name(name: &str) -> bool {
    recorded_count(name) > 0
}

pub fn recorded_count(name: &str) -> usize {
    EVENTS_RECORDED.lock().get(name).copied().unwrap_or(0)
}
