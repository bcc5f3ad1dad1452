mod cli;
mod traits;

pub use cli::CliChannel;
pub use traits::{Channel, InboundMessage, MediaRef};
