mod job_queue;

pub use job_queue::{
    JobHandler, JobQueue, LEASE_TIMEOUT, PARALLELISM, POLL_INTERVAL, QueueSettings,
};
