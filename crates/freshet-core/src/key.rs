//! Structural cache keys.
//!
//! A [`CacheKey`] is derived from a logical cache name plus the arguments of
//! the call being cached. Positional arguments keep their order; named
//! arguments are held in a `BTreeMap`, so the order in which a caller supplies
//! them never changes the key.
//!
//! ```text
//! CacheKey::new("layout").arg("home").named("offset", 2)  →  layout(home,offset=2)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Deterministic identifier for one cached unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    name: Arc<str>,
    args: Vec<String>,
    named: BTreeMap<String, String>,
}

impl CacheKey {
    /// Start a key for the given logical cache name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            args: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Set a named argument. Setting the same name twice keeps the last value.
    pub fn named(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.named.insert(name.into(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn named_arg(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(arg)?;
            first = false;
        }
        for (name, value) in &self.named {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn named_argument_order_does_not_matter() {
        let a = CacheKey::new("layout").named("surface", "home").named("offset", 1);
        let b = CacheKey::new("layout").named("offset", 1).named("surface", "home");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn positional_order_matters() {
        let a = CacheKey::new("pair").arg("x").arg("y");
        let b = CacheKey::new("pair").arg("y").arg("x");
        assert_ne!(a, b);
    }

    #[test]
    fn different_names_are_different_keys() {
        let a = CacheKey::new("layout").arg(1);
        let b = CacheKey::new("ranking").arg(1);
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_stable() {
        let key = CacheKey::new("layout")
            .arg("home")
            .named("tz", "+02:00")
            .named("offset", 2);
        assert_eq!(key.to_string(), "layout(home,offset=2,tz=+02:00)");
        assert_eq!(CacheKey::new("surfaces").to_string(), "surfaces()");
        assert_eq!(key.named_arg("offset"), Some("2"));
    }
}
