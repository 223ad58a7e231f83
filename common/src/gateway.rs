//! Gateway API Gateway (v1), read side
//!
//! The control plane never writes Gateways; it only needs the addresses
//! the implementation reports in status.

pub use gateway_api::apis::standard::gateways::{
    Gateway, GatewayListeners, GatewaySpec, GatewayStatus, GatewayStatusAddresses,
};

/// Addresses reported by the implementation, empty until programmed
pub fn gateway_addresses(gateway: &Gateway) -> &[GatewayStatusAddresses] {
    gateway
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_deref())
        .unwrap_or_default()
}

/// `IPAddress` is the default address type
pub fn is_hostname(address: &GatewayStatusAddresses) -> bool {
    address.r#type.as_deref() == Some("Hostname")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_addresses_from_status() {
        let gateway: Gateway = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "external", "namespace": "gw-system"},
            "spec": {
                "gatewayClassName": "vendor-x",
                "listeners": [{"name": "http", "port": 80, "protocol": "HTTP"}]
            },
            "status": {
                "addresses": [
                    {"type": "IPAddress", "value": "203.0.113.10"},
                    {"type": "Hostname", "value": "lb.example.com"}
                ]
            }
        }))
        .unwrap();

        let addresses = gateway_addresses(&gateway);
        assert_eq!(addresses.len(), 2);
        assert!(!is_hostname(&addresses[0]));
        assert!(is_hostname(&addresses[1]));
    }

    #[test]
    fn test_unprogrammed_gateway_has_no_addresses() {
        let gateway: Gateway = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "external", "namespace": "gw-system"},
            "spec": {"gatewayClassName": "vendor-x", "listeners": []}
        }))
        .unwrap();
        assert!(gateway_addresses(&gateway).is_empty());
    }
}
