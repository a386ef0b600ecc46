//! T.38 real-time fax-over-IP support (spec.md §4.6-§4.8): the IFP packet
//! core, a PCM-to-packet gateway, and a PCM-free terminal.

pub mod core;
pub mod gateway;
pub mod terminal;

pub use self::core::{DataField, DataType, FieldType, Indicator, IfpPacket, PacketTransport, T38Core, T38RxSink};
pub use gateway::{GatewayConfig, T38Gateway};
pub use terminal::{T38Terminal, TerminalConfig, TimedStep};
