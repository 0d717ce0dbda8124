pub mod contract;
pub mod params;
pub mod supervisor;
pub mod transport;

pub use transport::{
    parse_private_key, BlockHeader, ChainEvent, ChainTransport, EthersTransport, EventStream,
    HeaderStream, LogMeta, Receipt,
};
