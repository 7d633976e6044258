pub(crate) mod jobs;

pub use jobs::JobsClient;
