use std::fmt::Write as _;

/// One `[Section]` of a unit file. Entries keep insertion order and may
/// repeat a key (`DeviceAllow=` does).
#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// An in-memory systemd unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    name: String,
    sections: Vec<Section>,
}

impl UnitDescriptor {
    /// `name` is the file name, suffix included (`web1.service`).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
        }
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First value of `key` in `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.get_all(section, key).next()
    }

    /// Every value of `key` in `section`, in file order.
    pub fn get_all<'a>(&'a self, section: &str, key: &str) -> impl Iterator<Item = &'a str> {
        self.sections
            .iter()
            .filter(move |s| s.name == section)
            .flat_map(|s| s.entries.iter())
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `[Section]` headers followed by `Key=Value` lines, sections separated
    /// by a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", section.name);
            for (key, value) in &section.entries {
                let _ = writeln!(out, "{key}={value}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnitDescriptor {
        UnitDescriptor::new("web1.service")
            .section(Section::new("Unit").entry("Description", "web"))
            .section(
                Section::new("Service")
                    .entry("DeviceAllow", "/dev/net/tun rwm")
                    .entry("DeviceAllow", "char-pts rw"),
            )
    }

    #[test]
    fn render_sections_in_order() {
        assert_eq!(
            sample().render(),
            "[Unit]\nDescription=web\n\n\
             [Service]\nDeviceAllow=/dev/net/tun rwm\nDeviceAllow=char-pts rw\n"
        );
    }

    #[test]
    fn render_empty_descriptor() {
        assert_eq!(UnitDescriptor::new("x.service").render(), "");
    }

    #[test]
    fn repeated_keys_are_kept() {
        let unit = sample();
        let allowed: Vec<&str> = unit.get_all("Service", "DeviceAllow").collect();
        assert_eq!(allowed, ["/dev/net/tun rwm", "char-pts rw"]);
        assert_eq!(unit.get("Service", "DeviceAllow"), Some("/dev/net/tun rwm"));
        assert_eq!(unit.get("Unit", "DeviceAllow"), None);
    }
}
