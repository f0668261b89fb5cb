//! Destination names shared by producers and consumers.
//!
//! Each constant is the exact task, function or topic name a sample
//! producer sends to and a worker registers under.

pub struct Destinations;

impl Destinations {
    // ── Task queue ──────────────────────────────────────────────────────
    pub const PING_TASK: &str = "ping";
    pub const HELLO_WORLD_TASK: &str = "HelloWorldAI_queue";

    // ── Async queue ─────────────────────────────────────────────────────
    pub const PING_JOB: &str = "ping";

    // ── Broker ──────────────────────────────────────────────────────────
    pub const PING_TOPIC: &str = "in-topic";
    pub const PING_REPLY_TOPIC: &str = "out-topic";
}
