mod feed;
mod utils;

pub use utils::*;
