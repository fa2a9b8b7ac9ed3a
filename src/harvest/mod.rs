pub mod batch;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod lock;
pub mod message;
pub mod pacer;
pub mod replay;
pub mod session;
pub mod source;
