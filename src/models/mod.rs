mod download;
mod order;
mod order_event;
mod report;

pub use download::*;
pub use order::*;
pub use order_event::*;
pub use report::*;
