pub mod key_strategy;
pub mod producer;


pub use key_strategy::KeyStrategy;
pub use producer::KafkaSink;
