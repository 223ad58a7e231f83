//! Gateway API ReferenceGrant (v1beta1)
//!
//! Lives in the namespace being referenced *into* and lists which kinds in
//! which namespaces may reference which local objects.

pub use gateway_api::apis::standard::referencegrants::{
    ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo,
};

use crate::route::GATEWAY_API_GROUP;

/// Grant entry admitting `kind` objects of the Gateway API group
pub fn grant_from(kind: &str, namespace: &str) -> ReferenceGrantFrom {
    ReferenceGrantFrom {
        group: GATEWAY_API_GROUP.to_string(),
        kind: kind.to_string(),
        namespace: namespace.to_string(),
    }
}

/// Grant target naming one Service in the core group
pub fn service_target(name: &str) -> ReferenceGrantTo {
    ReferenceGrantTo {
        group: String::new(),
        kind: "Service".to_string(),
        name: Some(name.to_string()),
    }
}
