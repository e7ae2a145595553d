use core::fmt;

const MAX_SERVICE_ID: &str = "max_serviceid";
const MAX_CONTAINER_ID: &str = "max_containerid";
const SERVICE_DIR: &str = "service";
const CONTAINER_DIR: &str = "container";

/// The two identity namespaces managed by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Service,
    Container,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str(SERVICE_DIR),
            Self::Container => f.write_str(CONTAINER_DIR),
        }
    }
}

/// Key layout under a configurable path prefix.
///
/// ```text
/// {prefix}/max_serviceid            namespace-wide service id counter
/// {prefix}/max_containerid          namespace-wide container id counter
/// {prefix}/service/{name}           service name -> service id
/// {prefix}/container/{name}         container name -> container id
/// {prefix}/{service}:{container}    sequence high-water mark
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    /// Trailing slashes on `prefix` are dropped so keys never contain `//`.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Counter key from which fresh ids of `namespace` are minted.
    pub fn max_id(&self, namespace: Namespace) -> String {
        match namespace {
            Namespace::Service => format!("{}/{MAX_SERVICE_ID}", self.prefix),
            Namespace::Container => format!("{}/{MAX_CONTAINER_ID}", self.prefix),
        }
    }

    /// Mapping key holding the id assigned to `name`.
    pub fn identity(&self, namespace: Namespace, name: &str) -> String {
        format!("{}/{namespace}/{name}", self.prefix)
    }

    /// High-water mark key for one `(service, container)` pair.
    pub fn sequence(&self, service_id: u32, container_id: u32) -> String {
        format!("{}/{service_id}:{container_id}", self.prefix)
    }
}
