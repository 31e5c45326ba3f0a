mod atomic_io;
mod records;
mod writer;

pub use atomic_io::write_text_atomic;
pub use records::{
    load_records, parse_records_json, ActorRecord, LabelDescriptor, RecordStore,
    RecordStoreError, RECORD_FILE_NAME, RECORD_FILE_VERSION,
};
pub use writer::{DebouncedWriter, FileSink, FlushMode, FlushOutcome, SnapshotSink};
