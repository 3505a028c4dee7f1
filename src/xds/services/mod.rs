mod discovery;

pub use discovery::DiscoveryService;
