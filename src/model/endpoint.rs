use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use typed_builder::TypedBuilder;

/// The network context of a node recording a span.
///
/// All fields are optional; an endpoint with nothing set is legal and
/// describes an anonymous participant.
#[derive(TypedBuilder, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Lower-case label of this node in the service graph.
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// IPv4 address of this endpoint.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address of this endpoint.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    /// Listen or client port.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    /// Build an endpoint from a service name and an optional socket address.
    pub fn new(service_name: impl Into<String>, socket_addr: Option<SocketAddr>) -> Self {
        match socket_addr {
            Some(SocketAddr::V4(v4)) => Endpoint::builder()
                .service_name(service_name)
                .ipv4(*v4.ip())
                .port(v4.port())
                .build(),
            Some(SocketAddr::V6(v6)) => Endpoint::builder()
                .service_name(service_name)
                .ipv6(*v6.ip())
                .port(v6.port())
                .build(),
            None => Endpoint::builder().service_name(service_name).build(),
        }
    }

    /// Build an endpoint from a service name, port and optional host address.
    pub(crate) fn from_parts(
        service_name: impl Into<String>,
        port: u16,
        host: Option<IpAddr>,
    ) -> Self {
        let mut endpoint = Endpoint {
            service_name: Some(service_name.into()),
            ..Endpoint::default()
        };
        if port != 0 {
            endpoint.port = Some(port);
        }
        match host {
            Some(IpAddr::V4(ip)) => endpoint.ipv4 = Some(ip),
            Some(IpAddr::V6(ip)) => endpoint.ipv6 = Some(ip),
            None => {}
        }
        endpoint
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.ipv4.is_none()
            && self.ipv6.is_none()
            && self.port.is_none()
    }
}
