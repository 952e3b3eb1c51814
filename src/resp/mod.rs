pub mod decoder;
pub mod parser;
pub mod types;
pub mod writer;

pub use decoder::{ReplyDecoder, RespDecoder};
pub use parser::{parse, parse_slice};
pub use types::RespValue;
pub use writer::{encode_command, encode_command_into};
