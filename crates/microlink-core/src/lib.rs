//! Core link functionality: port transport, frame reassembly, session
//! management.

pub mod encoding;
pub mod error;
pub mod frame;
pub mod link;
pub mod transcript;
pub mod transport;

pub use error::{LinkError, Result};
pub use link::{LinkConfig, MicrobitLink, NO_RESPONSE};
pub use transcript::{Direction, Transcript, TranscriptEntry};
pub use transport::{list_port_names, list_ports, PortInfo, Transport};
