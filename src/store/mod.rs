pub mod scan_log;
pub mod storage;

pub use scan_log::{parse_scan_log, ScanLogSnapshot, ScanLogStore, DEFAULT_CAPACITY, STORAGE_KEY};
pub use storage::{MemoryStorage, SharedStorage, StorageBackend, StorageEvent, StorageEvents, StorageHandle};
