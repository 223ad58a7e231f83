//! netgate common types
//!
//! Wire schemas shared by the control plane and its tests: the neutral
//! Ingress resource, the Gateway API resources it is compiled into, and the
//! naming and labelling conventions that tie children to their owner.

pub mod gateway;
pub mod grant;
pub mod ingress;
pub mod matching;
pub mod route;

pub use gateway::{Gateway, GatewaySpec, GatewayStatus, GatewayStatusAddresses};
pub use grant::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
pub use ingress::{
    AppProtocol, BackendRef, Condition, ConditionStatus, HttpOption, Ingress, IngressRule,
    IngressSpec, IngressStatus, LoadBalancerAddress, PathRule, Split, Visibility,
};
pub use route::{HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteSpec, HTTPRouteStatus};

/// Label carrying the owning Ingress name on every child
pub const OWNER_NAME_LABEL: &str = "ingress.netgate.dev/name";

/// Label carrying the owning Ingress namespace on every child
pub const OWNER_NAMESPACE_LABEL: &str = "ingress.netgate.dev/namespace";

/// Finalizer guarding cleanup of children that cannot be owner-referenced
pub const FINALIZER: &str = "ingresses.netgate.dev/cleanup";

/// Annotation selecting which ingress implementation handles an Ingress
pub const INGRESS_CLASS_ANNOTATION: &str = "networking.knative.dev/ingress.class";

/// Request header carrying a routing tag
pub const TAG_HEADER: &str = "Netgate-Route-Tag";

/// FNV-1a hash (64-bit)
///
/// Stable across processes and releases, which child names depend on.
pub const fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Hash of a hostname set, independent of order and duplicates
pub fn hosts_hash(hosts: &[String]) -> u64 {
    let mut sorted: Vec<&str> = hosts.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    fnv1a_hash(sorted.join(",").as_bytes())
}

/// Name of the HTTPRoute serving one (visibility, hostname set) group
pub fn route_name(ingress: &str, visibility: Visibility, hosts: &[String]) -> String {
    format!(
        "{}-{}-{:016x}",
        ingress,
        visibility.short_name(),
        hosts_hash(hosts)
    )
}

/// Name of the ReferenceGrant an Ingress owns in a backend namespace
///
/// Grants of Ingresses from different namespaces share backend namespaces,
/// so the name hashes the full owner key.
pub fn grant_name(ingress_namespace: &str, ingress: &str) -> String {
    let owner = format!("{}/{}", ingress_namespace, ingress);
    format!("{}-{:016x}", ingress, fnv1a_hash(owner.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_hash(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_hosts_hash_ignores_order_and_duplicates() {
        let a = vec!["b.example.com".to_string(), "a.example.com".to_string()];
        let b = vec![
            "a.example.com".to_string(),
            "b.example.com".to_string(),
            "a.example.com".to_string(),
        ];
        assert_eq!(hosts_hash(&a), hosts_hash(&b));
    }

    #[test]
    fn test_route_name_format() {
        let hosts = vec!["hello.default.example.com".to_string()];
        let name = route_name("hello", Visibility::External, &hosts);
        assert!(name.starts_with("hello-ext-"), "got {}", name);
        assert_eq!(name.len(), "hello-ext-".len() + 16);

        let local = route_name("hello", Visibility::ClusterLocal, &hosts);
        assert!(local.starts_with("hello-local-"));
        assert_ne!(name, local);
    }

    #[test]
    fn test_grant_name_unambiguous_across_namespaces() {
        // Joining namespace and name with '-' would give "c-a-b" for both
        assert_ne!(grant_name("c", "a-b"), grant_name("c-a", "b"));
        assert_eq!(grant_name("c", "a-b"), grant_name("c", "a-b"));

        let name = grant_name("default", "hello");
        assert!(name.starts_with("hello-"), "got {}", name);
        assert_eq!(name.len(), "hello-".len() + 16);
    }
}
