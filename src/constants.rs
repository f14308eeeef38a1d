/// The version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The version reported in the default HTTP `User-Agent` header.
pub const PACKAGE_HTTP_VERSION: &str = VERSION;

/// The environment variable naming the endpoint metrics are posted to.
///
/// Its absence from the environment inhibits startup.
pub const ENV_KEY_ENDPOINT: &str = "HEROKU_METRICS_URL";

include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

lazy_static::lazy_static! {
    /// The default `User-Agent` of metrics posts.
    pub static ref USER_AGENT: String = format!(
        "hmetrics/{} ({}-{}; app using the hmetrics crate)",
        PACKAGE_HTTP_VERSION, PLATFORM, ARCH
    );
}

// Keys of the posted document.  These are the receiving service's
// language-metrics schema and must match it exactly.
pub(crate) const COUNTER_GC_COLLECTIONS: &str = "go.gc.collections";
pub(crate) const COUNTER_GC_PAUSE_NS: &str = "go.gc.pause.ns";
pub(crate) const GAUGE_HEAP_BYTES: &str = "go.memory.heap.bytes";
pub(crate) const GAUGE_STACK_BYTES: &str = "go.memory.stack.bytes";
pub(crate) const GAUGE_HEAP_OBJECTS: &str = "go.memory.heap.objects";
pub(crate) const GAUGE_GC_GOAL: &str = "go.gc.goal";
pub(crate) const GAUGE_ROUTINES: &str = "go.routines";
