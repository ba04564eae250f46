//! Record properties.

use std::time::Duration;

/// Property carrying a time-to-live in seconds.
pub const TTL_PROPERTY: &str = "ttl";

/// Property carrying a UUID tag (server instance id on heartbeats and sentinels).
pub const UUID_PROPERTY: &str = "uuid";

/// An ordered string-to-string property set.
///
/// Lookups ignore position, but the pair order is what goes on the wire, so a
/// decoded set re-encodes to the same bytes. Keys other than [`TTL_PROPERTY`]
/// and [`UUID_PROPERTY`] are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `name` to `value`, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Removes `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns true if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over the pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses the `ttl` property as a duration in seconds.
    ///
    /// Fractional seconds are accepted. Returns `None` when the property is
    /// absent, unparsable, zero, or negative.
    pub fn ttl(&self) -> Option<Duration> {
        let secs: f64 = self.get(TTL_PROPERTY)?.trim().parse().ok()?;
        if secs > 0.0 {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    }

    /// Sets the `ttl` property from a duration.
    ///
    /// Whole seconds are written without a fractional part.
    pub fn set_ttl(&mut self, ttl: Duration) {
        let value = if ttl.subsec_nanos() == 0 {
            ttl.as_secs().to_string()
        } else {
            ttl.as_secs_f64().to_string()
        };
        self.insert(TTL_PROPERTY, value);
    }

    /// Returns the `uuid` property.
    pub fn uuid(&self) -> Option<&str> {
        self.get(UUID_PROPERTY)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut props = Properties::new();
        props.insert("a", "1");
        props.insert("b", "2");
        props.insert("a", "3");

        let pairs: Vec<_> = props.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn remove_property() {
        let mut props: Properties = [("x", "1"), ("y", "2")].into_iter().collect();
        assert_eq!(props.remove("x"), Some("1".to_string()));
        assert_eq!(props.remove("x"), None);
        assert_eq!(props.len(), 1);
        assert!(props.contains("y"));
    }

    #[test]
    fn ttl_parsing() {
        let mut props = Properties::new();
        assert_eq!(props.ttl(), None);

        props.insert(TTL_PROPERTY, "30");
        assert_eq!(props.ttl(), Some(Duration::from_secs(30)));

        props.insert(TTL_PROPERTY, "0.25");
        assert_eq!(props.ttl(), Some(Duration::from_millis(250)));

        props.insert(TTL_PROPERTY, "0");
        assert_eq!(props.ttl(), None);

        props.insert(TTL_PROPERTY, "-4");
        assert_eq!(props.ttl(), None);

        props.insert(TTL_PROPERTY, "soon");
        assert_eq!(props.ttl(), None);
    }

    #[test]
    fn set_ttl_formats_whole_seconds() {
        let mut props = Properties::new();
        props.set_ttl(Duration::from_secs(5));
        assert_eq!(props.get(TTL_PROPERTY), Some("5"));

        props.set_ttl(Duration::from_millis(1500));
        assert_eq!(props.get(TTL_PROPERTY), Some("1.5"));
        assert_eq!(props.ttl(), Some(Duration::from_millis(1500)));
    }
}
