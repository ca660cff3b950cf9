/// Canonical topic name. Topics are case-insensitive and stored lower-cased.
#[inline]
#[must_use]
pub fn canonical_topic(topic: &str) -> String {
    topic.to_lowercase()
}
