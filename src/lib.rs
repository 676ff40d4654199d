pub mod acquisition;
pub mod actions;
pub mod conditions;
pub mod error;
pub mod hooks;
pub mod logger;
pub mod plotting;
pub mod points;
pub mod positioner;
pub mod processor;
pub mod readers;
pub mod scanner;
pub mod settings;
pub mod stream;
pub mod transport;
pub mod types;
pub mod utils;

pub use acquisition::{acquire, Acquisition, Validator};
pub use actions::{per_position, restore_points, sequence, set_point, Action};
pub use conditions::{Condition, Conditions};
pub use error::{Result, ScanError};
pub use hooks::{ControlHook, Hooks, PositionHook};
pub use logger::RecordLogger;
pub use plotting::{plot_scan, plot_values, readable_series};
pub use points::{MemoryPoints, PointAccess, PointReader, PointWriter, SharedPoints};
pub use positioner::{LinePositioner, Positioner, StaticPositioner, VectorPositioner};
pub use processor::{
    DataProcessor, JsonlDataProcessor, KeyedDataProcessor, ScanRecord, SimpleDataProcessor,
};
pub use readers::{CompositeReader, FunctionReader, FunctionWriter, Reader, StreamReadGroup, Writer};
pub use scanner::{ScanControl, Scanner};
pub use settings::{ProgressCallback, ScanConfig, ScanSettings};
pub use stream::{
    ChannelSource, FieldSpec, MessageFilter, MessageSource, MissingFieldPolicy, SharedStreamReader,
    StreamTimestamp, SynchronizedMessage, SynchronizedReader,
};
pub use transport::{StreamSender, TcpMessageStream};
pub use types::{Measurement, Position, PositionData, ScanState, Value};
pub use utils::{poll_until, poll_with_timeout, PollError};
