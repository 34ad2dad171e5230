use std::collections::HashMap;

use crate::graph::NodeId;

/// Maps every spelling under which a Terraform resource may be referenced to
/// its node id.
///
/// One cache is built per parse run: filled while nodes are created, then
/// only read by the reference pass. Nothing is shared between runs.
#[derive(Debug, Default)]
pub struct AddressCache {
    // spelling -> node id
    spellings: HashMap<String, NodeId>,
}

impl AddressCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(resources: usize) -> Self {
        // bare + module-qualified spelling per resource
        Self { spellings: HashMap::with_capacity(resources.saturating_mul(2)) }
    }

    /// Register a resource under its bare address and, when it lives inside a
    /// module, under the module-qualified form `<module_path>.<bare>` as well.
    ///
    /// Root resources own their bare spelling; a module resource only takes a
    /// bare spelling that nobody claimed yet.
    pub fn register(&mut self, bare: &str, module_path: Option<&str>, id: &NodeId) {
        match module_path {
            None => {
                self.spellings.insert(bare.to_string(), id.clone());
            }
            Some(module) => {
                self.spellings.entry(bare.to_string()).or_insert_with(|| id.clone());
                self.spellings.insert(format!("{module}.{bare}"), id.clone());
            }
        }
    }

    /// Register an extra spelling unless it is already taken.
    ///
    /// Returns true when the spelling was added.
    pub fn register_alias(&mut self, spelling: &str, id: &NodeId) -> bool {
        if self.spellings.contains_key(spelling) {
            return false;
        }
        self.spellings.insert(spelling.to_string(), id.clone());
        true
    }

    #[must_use]
    pub fn get(&self, spelling: &str) -> Option<&NodeId> {
        self.spellings.get(spelling)
    }

    /// Resolve a cleaned reference as seen from a node in `from_module`
    /// (`None` for the root module).
    ///
    /// References that already start with `module.` are only looked up
    /// exactly. Anything else is tried qualified with the referencing node's
    /// module path first, so a module's own resource wins over a root or
    /// sibling-module resource with the same bare address, then exactly.
    /// A miss returns `None`.
    #[must_use]
    pub fn resolve(&self, target: &str, from_module: Option<&str>) -> Option<&NodeId> {
        if !target.starts_with("module.") {
            if let Some(module) = from_module.filter(|m| !m.is_empty() && *m != "root") {
                if let Some(id) = self.spellings.get(&format!("{module}.{target}")) {
                    return Some(id);
                }
            }
        }
        self.spellings.get(target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spellings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spellings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_resource_registers_both_spellings() {
        let mut cache = AddressCache::new();
        let id = NodeId::from("tf:aws_subnet:module.network.aws_subnet.public");
        cache.register("aws_subnet.public", Some("module.network"), &id);
        assert_eq!(cache.get("aws_subnet.public"), Some(&id));
        assert_eq!(cache.get("module.network.aws_subnet.public"), Some(&id));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn root_resource_owns_bare_spelling() {
        let mut cache = AddressCache::new();
        let in_module = NodeId::from("tf:aws_vpc:module.net.aws_vpc.main");
        let at_root = NodeId::from("tf:aws_vpc:aws_vpc.main");
        cache.register("aws_vpc.main", Some("module.net"), &in_module);
        cache.register("aws_vpc.main", None, &at_root);
        assert_eq!(cache.get("aws_vpc.main"), Some(&at_root));
        assert_eq!(cache.get("module.net.aws_vpc.main"), Some(&in_module));
    }

    #[test]
    fn module_scope_wins_over_bare_spelling() {
        let mut cache = AddressCache::new();
        let a = NodeId::from("tf:aws_subnet:module.a.aws_subnet.public");
        let b = NodeId::from("tf:aws_subnet:module.b.aws_subnet.public");
        let root = NodeId::from("tf:aws_subnet:aws_subnet.public");
        cache.register("aws_subnet.public", Some("module.a"), &a);
        cache.register("aws_subnet.public", Some("module.b"), &b);
        assert_eq!(cache.resolve("aws_subnet.public", Some("module.b")), Some(&b));
        assert_eq!(cache.resolve("aws_subnet.public", Some("module.a")), Some(&a));

        cache.register("aws_subnet.public", None, &root);
        assert_eq!(cache.resolve("aws_subnet.public", None), Some(&root));
        assert_eq!(cache.resolve("aws_subnet.public", Some("module.b")), Some(&b));
        // No own resource in module.c: falls back to the bare spelling
        assert_eq!(cache.resolve("aws_subnet.public", Some("module.c")), Some(&root));
    }

    #[test]
    fn resolve_qualifies_with_referencing_module() {
        let mut cache = AddressCache::new();
        let id = NodeId::from("tf:aws_subnet:module.network.aws_subnet.public");
        // Only the qualified spelling exists
        cache.register_alias("module.network.aws_subnet.public", &id);

        assert_eq!(cache.resolve("aws_subnet.public", Some("module.network")), Some(&id));
        assert_eq!(cache.resolve("aws_subnet.public", None), None);
        assert_eq!(cache.resolve("aws_subnet.public", Some("root")), None);
        assert_eq!(cache.resolve("module.network.aws_subnet.public", None), Some(&id));
    }

    #[test]
    fn module_prefixed_targets_are_never_requalified() {
        let mut cache = AddressCache::new();
        let id = NodeId::from("x");
        cache.register_alias("module.a.module.b.aws_s3_bucket.logs", &id);
        assert_eq!(cache.resolve("module.b.aws_s3_bucket.logs", Some("module.a")), None);
    }

    #[test]
    fn alias_does_not_overwrite() {
        let mut cache = AddressCache::new();
        let first = NodeId::from("first");
        let second = NodeId::from("second");
        assert!(cache.register_alias("aws_instance.web", &first));
        assert!(!cache.register_alias("aws_instance.web", &second));
        assert_eq!(cache.get("aws_instance.web"), Some(&first));
    }
}
