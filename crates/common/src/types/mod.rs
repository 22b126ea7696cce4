mod cache;
mod code_gen;
mod documentation;
mod response;
mod routing;

pub use cache::*;
pub use code_gen::*;
pub use documentation::*;
pub use response::*;
pub use routing::*;
