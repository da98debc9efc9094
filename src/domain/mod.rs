mod entry;

pub use entry::LogEntry;
