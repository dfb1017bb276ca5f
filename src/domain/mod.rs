pub mod injector;
pub mod registry;

pub use injector::{mount_marker, Injection, Injector, NavigationCommitted};
pub use registry::{
    normalize_host, Bundle, DomainRegistry, RegistryEntry, RunAt, DEFAULT_CHUNK, DEFAULT_SITE_ID,
};
