//! In-memory representation of a section/key/value settings file.

use std::fmt;

/// One `[section]` block and its entries, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Inserts or overwrites `key`; returns `true` if the stored value changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) if v == value => false,
            Some((_, v)) => {
                *v = value.to_string();
                true
            }
            None => {
                self.entries.push((key.to_string(), value.to_string()));
                true
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered collection of sections.
///
/// Insertion order of both sections and keys is preserved so that a rewrite
/// keeps the file recognisable, including sections this program never reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigRecord {
    sections: Vec<Section>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Inserts or overwrites `(section, key)`; returns `true` if anything changed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> bool {
        self.section_mut(section).set(key, value)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Returns the named section, appending an empty one if missing.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Iterates every `(section, key, value)` triple in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.sections
            .iter()
            .flat_map(|s| s.entries().map(move |(k, v)| (s.name(), k, v)))
    }

    /// Number of entries across all sections.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::codec::render(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get_returns_value() {
        let mut rec = ConfigRecord::new();
        assert!(rec.set("watch", "directory", "/media/dev0"));
        assert_eq!(rec.get("watch", "directory"), Some("/media/dev0"));
        assert_eq!(rec.get("watch", "missing"), None);
        assert_eq!(rec.get("missing", "directory"), None);
    }

    #[test]
    fn test_set_same_value_reports_no_change() {
        let mut rec = ConfigRecord::new();
        rec.set("USB device", "device", "Pico");
        assert!(!rec.set("USB device", "device", "Pico"));
        assert!(rec.set("USB device", "device", "Feather"));
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_iter_preserves_section_and_key_order() {
        // Arrange
        let mut rec = ConfigRecord::new();
        rec.set("b", "k2", "1");
        rec.set("a", "k1", "2");
        rec.set("b", "k1", "3");

        // Act
        let triples: Vec<_> = rec.iter().collect();

        // Assert
        assert_eq!(
            triples,
            vec![("b", "k2", "1"), ("b", "k1", "3"), ("a", "k1", "2")]
        );
    }

    #[test]
    fn test_empty_record_reports_empty() {
        let rec = ConfigRecord::new();
        assert!(rec.is_empty());
        assert_eq!(rec.sections().count(), 0);
    }
}
